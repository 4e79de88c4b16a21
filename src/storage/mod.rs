//! Object store gateway.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::ratelimit::{Destination, RateLimiter};
use crate::{PipelineError, Result};

/// Upload payload
#[derive(Debug, Clone)]
pub enum ObjectBody {
    /// Streamed from disk
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl ObjectBody {
    pub fn len(&self) -> Result<u64> {
        match self {
            ObjectBody::File(path) => Ok(fs_err::metadata(path)?.len()),
            ObjectBody::Bytes(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub size: u64,
    pub etag: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` under `key`, returning the ETag
    async fn put(&self, key: &str, body: ObjectBody, content_type: &str) -> Result<String>;

    /// Time-limited GET URL for `key`
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String>;

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }
}

/// Map an AWS SDK error onto the pipeline taxonomy
pub(crate) fn classify_sdk_error<E, R>(err: &SdkError<E, R>, context: &str) -> PipelineError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{}: {}", context, DisplayErrorContext(err));
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => return PipelineError::Transient(message),
        SdkError::ResponseError(_) => return PipelineError::Transient(message),
        _ => {}
    }

    match err.code() {
        Some(
            "AccessDenied"
            | "AccessDeniedException"
            | "InvalidAccessKeyId"
            | "SignatureDoesNotMatch"
            | "ExpiredToken"
            | "ExpiredTokenException"
            | "UnrecognizedClientException",
        ) => PipelineError::Auth(message),
        Some("NoSuchBucket") => PipelineError::Config(message),
        Some("NoSuchKey" | "NotFound") => PipelineError::NotFound(message),
        Some(
            "SlowDown"
            | "Throttling"
            | "ThrottlingException"
            | "LimitExceededException"
            | "TooManyRequestsException",
        ) => PipelineError::RateLimited { retry_after: None },
        Some("InternalError" | "InternalFailureException" | "ServiceUnavailable" | "RequestTimeout") => {
            PipelineError::Transient(message)
        }
        Some("EntityTooLarge") => PipelineError::SizeLimitExceeded { size: 0, limit: 0 },
        _ => PipelineError::Permanent(message),
    }
}

/// S3-backed store; every key is placed under the configured prefix
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    prefix: String,
    limiter: RateLimiter,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, config: &Config, limiter: RateLimiter) -> Self {
        Self {
            client,
            bucket: config.aws.s3_bucket.clone(),
            prefix: config.aws.s3_key_prefix.clone().unwrap_or_default(),
            limiter,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: ObjectBody, content_type: &str) -> Result<String> {
        let full_key = self.full_key(key);
        let stream = match body {
            ObjectBody::File(path) => ByteStream::from_path(&path)
                .await
                .map_err(|e| PipelineError::Permanent(format!("reading {}: {}", path.display(), e)))?,
            ObjectBody::Bytes(bytes) => ByteStream::from(bytes),
        };

        self.limiter.acquire(Destination::Storage).await;
        tracing::info!("Uploading to s3://{}/{}", self.bucket, full_key);
        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .body(stream)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, "S3 upload"))?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| PipelineError::Config(format!("presign TTL {:?}: {}", ttl, e)))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .presigned(presigning)
            .await
            .map_err(|e| classify_sdk_error(&e, "S3 presign"))?;
        Ok(request.uri().to_string())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        self.limiter.acquire(Destination::Storage).await;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(response) => Ok(Some(ObjectInfo {
                size: response.content_length().unwrap_or(0).max(0) as u64,
                etag: response.e_tag().map(str::to_string),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(classify_sdk_error(&e, "S3 head")),
        }
    }
}

/// Storage key of an archived media file
pub fn media_key(platform: &str, name: &str, extension: &str) -> String {
    format!("videos/{}/{}.{}", platform, name, extension)
}

pub fn transcript_key(item_id: &str) -> String {
    format!("transcripts/{}.json", item_id)
}

pub fn chunk_key(item_id: &str, index: usize, extension: &str) -> String {
    format!("chunks/{}/{:03}.{}", item_id, index, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(media_key("youtube", "dQw4w9WgXcQ", "mp4"), "videos/youtube/dQw4w9WgXcQ.mp4");
        assert_eq!(transcript_key("0042"), "transcripts/0042.json");
        assert_eq!(chunk_key("0042", 2, "mp3"), "chunks/0042/002.mp3");
    }

    #[test]
    fn test_body_len() {
        assert_eq!(ObjectBody::Bytes(vec![0; 12]).len().unwrap(), 12);
        let file = tempfile::NamedTempFile::new().unwrap();
        fs_err::write(file.path(), b"abc").unwrap();
        assert_eq!(ObjectBody::File(file.path().to_path_buf()).len().unwrap(), 3);
    }
}

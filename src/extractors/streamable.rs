use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

use super::{media_id, stream_to_file, DownloadedMedia, MediaExtractor, MediaFormat};
use crate::models::{Item, Platform};
use crate::{PipelineError, Result};

const API_BASE: &str = "https://api.streamable.com/videos";

/// Streamable reports `status == 2` once a video is ready
const STATUS_READY: u8 = 2;

#[derive(Debug, Deserialize)]
struct VideoInfo {
    status: u8,
    #[serde(default)]
    files: Files,
}

#[derive(Debug, Default, Deserialize)]
struct Files {
    mp4: Option<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    url: Option<String>,
}

/// Streamable: public API lookup, then a plain HTTP download
pub struct StreamableExtractor {
    client: Client,
    api_base: String,
}

impl StreamableExtractor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_base: API_BASE.to_string(),
        }
    }

    /// Resolve the mp4 URL; an unknown id means the video is gone
    async fn mp4_url(&self, id: &str) -> Result<String> {
        let response = self.client.get(format!("{}/{}", self.api_base, id)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status, &format!("streamable video {}", id)));
        }

        let info: VideoInfo = response.json().await?;
        parse_mp4_url(id, &info)
    }
}

fn parse_mp4_url(id: &str, info: &VideoInfo) -> Result<String> {
    if info.status != STATUS_READY {
        return Err(PipelineError::Transient(format!(
            "streamable video {} not ready (status {})",
            id, info.status
        )));
    }
    let url = info
        .files
        .mp4
        .as_ref()
        .and_then(|f| f.url.as_deref())
        .ok_or_else(|| PipelineError::NotFound(format!("streamable video {} has no mp4 file", id)))?;

    // The API hands out protocol-relative URLs
    Ok(if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    })
}

#[async_trait]
impl MediaExtractor for StreamableExtractor {
    fn name(&self) -> &'static str {
        "streamable"
    }

    fn supports(&self, platform: Platform) -> bool {
        platform == Platform::Streamable
    }

    fn format(&self, _item: &Item) -> MediaFormat {
        MediaFormat::Mp4
    }

    async fn download(&self, item: &Item, dest: &Path) -> Result<DownloadedMedia> {
        let id = media_id(item)?;
        let url = self.mp4_url(id).await?;
        let size = stream_to_file(&self.client, &url, dest).await?;
        Ok(DownloadedMedia {
            path: dest.to_path_buf(),
            size,
            format: MediaFormat::Mp4,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(json: &str) -> VideoInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_protocol_relative_url_gets_https() {
        let info = info(r#"{"status": 2, "files": {"mp4": {"url": "//cdn-cf-east.streamable.com/video/mp4/k3xq9z.mp4?token=x"}}}"#);
        assert_eq!(
            parse_mp4_url("k3xq9z", &info).unwrap(),
            "https://cdn-cf-east.streamable.com/video/mp4/k3xq9z.mp4?token=x"
        );
    }

    #[test]
    fn test_processing_video_is_transient() {
        let info = info(r#"{"status": 1, "files": {}}"#);
        assert!(matches!(parse_mp4_url("k3xq9z", &info), Err(PipelineError::Transient(_))));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let info = info(r#"{"status": 2}"#);
        assert!(matches!(parse_mp4_url("k3xq9z", &info), Err(PipelineError::NotFound(_))));
    }
}

//! Transcription coordinator.
//!
//! Backends are tried in priority order. Media over a backend's upload limit
//! is either cut into chunks and resubmitted to the same backend or handed to
//! the next one, depending on the oversize policy. Every accepted result goes
//! through [`chunking::reconcile`], so single-shot and chunked transcripts
//! share the same timeline guarantees.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, OversizePolicy};
use crate::extractors::MediaFormat;
use crate::models::{MediaObject, Segment, Transcript, TranscriptionJob, WordTimestamp};
use crate::orchestrator::RetryPolicy;
use crate::ratelimit::{Destination, RateLimiter};
use crate::storage::{chunk_key, ObjectBody, ObjectStore};
use crate::utils::sanitize_key_component;
use crate::{PipelineError, Result};

pub mod aws;
pub mod chunking;
pub mod splitter;
pub mod whisper;

use chunking::{reconcile, ChunkPlan, ChunkResult};
use splitter::{AudioSplitter, ChunkFile};

/// Audio a backend should fetch, by presigned URL
#[derive(Debug, Clone, PartialEq)]
pub struct AudioRef {
    pub item_id: String,
    pub key: String,
    pub url: String,
    pub size: u64,
    pub duration: Option<f64>,
    pub format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitOptions {
    /// Language hint; the backend detects it when absent
    pub language: Option<String>,
}

/// A backend's raw answer, times relative to the submitted audio
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTranscript {
    pub text: String,
    pub segments: Vec<Segment>,
    pub words: Vec<WordTimestamp>,
    pub confidence: Option<f64>,
    pub duration: Option<f64>,
}

#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Largest accepted upload; `None` when there is no practical limit
    fn max_upload_bytes(&self) -> Option<u64>;

    fn supports_chunking(&self) -> bool {
        true
    }

    async fn submit(&self, audio: &AudioRef, options: &SubmitOptions) -> Result<BackendTranscript>;
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub oversize_policy: OversizePolicy,
    pub chunk_duration_secs: f64,
    pub max_concurrent_chunks: usize,
    pub presign_ttl: Duration,
    pub language: Option<String>,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            oversize_policy: config.transcription.oversize_policy,
            chunk_duration_secs: config.transcription.chunk_duration_secs,
            max_concurrent_chunks: config.transcription.max_concurrent_chunks.max(1),
            presign_ttl: Duration::from_secs(config.aws.presign_ttl_secs),
            language: config.transcription.language.clone(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct TranscriptionCoordinator {
    backends: Vec<Arc<dyn TranscriptionBackend>>,
    store: Arc<dyn ObjectStore>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    settings: CoordinatorSettings,
    splitter: Option<Arc<dyn AudioSplitter>>,
    scratch_dir: Option<PathBuf>,
}

impl TranscriptionCoordinator {
    pub fn new(
        backends: Vec<Arc<dyn TranscriptionBackend>>,
        store: Arc<dyn ObjectStore>,
        limiter: RateLimiter,
        policy: RetryPolicy,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            backends,
            store,
            limiter,
            policy,
            settings,
            splitter: None,
            scratch_dir: None,
        }
    }

    /// Enable chunking; chunk files are cut under `scratch_dir` or the system temp dir
    pub fn with_splitter(mut self, splitter: Arc<dyn AudioSplitter>, scratch_dir: Option<PathBuf>) -> Self {
        self.splitter = Some(splitter);
        self.scratch_dir = scratch_dir;
        self
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Transcribe stored media, trying backends in priority order
    pub async fn transcribe(&self, media: &MediaObject) -> Result<TranscriptionJob> {
        if self.backends.is_empty() {
            return Err(PipelineError::Config("no transcription backend configured".to_string()));
        }

        let url = self
            .store
            .presigned_url(&media.storage_key, self.settings.presign_ttl)
            .await?;
        let audio = AudioRef {
            item_id: media.item_id.clone(),
            key: media.storage_key.clone(),
            url,
            size: media.size,
            duration: media.duration_seconds,
            format: MediaFormat::from_key(&media.storage_key),
        };
        let options = SubmitOptions {
            language: self.settings.language.clone(),
        };
        let attempts = AtomicU32::new(0);
        let mut errors = Vec::new();

        for backend in &self.backends {
            let backend = backend.as_ref();
            match self.try_backend(backend, media, &audio, &options, &attempts).await {
                Ok((result, plan)) => {
                    tracing::info!(
                        "Transcribed {} with {} ({} chunk(s), {} segments)",
                        media.item_id,
                        backend.name(),
                        result.chunk_count,
                        result.segments.len()
                    );
                    return Ok(TranscriptionJob {
                        item_id: media.item_id.clone(),
                        service: backend.name().to_string(),
                        attempt_count: attempts.load(Ordering::SeqCst),
                        chunk_plan: plan.spans,
                        result,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Backend {} failed for {}: {}", backend.name(), media.item_id, e);
                    errors.push(format!("{}: {}", backend.name(), e));
                }
            }
        }

        Err(PipelineError::Permanent(format!(
            "all transcription backends failed ({})",
            errors.join("; ")
        )))
    }

    async fn try_backend(
        &self,
        backend: &dyn TranscriptionBackend,
        media: &MediaObject,
        audio: &AudioRef,
        options: &SubmitOptions,
        attempts: &AtomicU32,
    ) -> Result<(Transcript, ChunkPlan)> {
        let single = match backend.max_upload_bytes() {
            Some(limit) if media.size > limit => Err(PipelineError::SizeLimitExceeded {
                size: media.size,
                limit,
            }),
            _ => self.submit_with_retry(backend, audio, options, attempts).await,
        };

        match single {
            Ok(result) => {
                let duration = result
                    .duration
                    .or(media.duration_seconds)
                    .or_else(|| result.segments.iter().map(|s| s.end).reduce(f64::max))
                    .unwrap_or(0.0);
                let plan = ChunkPlan::single(duration);
                let results = vec![ChunkResult {
                    index: 0,
                    actual_duration: Some(duration),
                    transcript: result,
                }];
                let transcript = reconcile(&plan, results, backend.name())?;
                Ok((transcript, plan))
            }
            Err(PipelineError::SizeLimitExceeded { size, limit }) => {
                if let Some(reason) = self.chunking_unavailable(backend, media) {
                    tracing::warn!(
                        "{} is {} bytes, over the {} byte limit of {}; {}",
                        media.item_id,
                        size,
                        limit,
                        backend.name(),
                        reason
                    );
                    return Err(PipelineError::SizeLimitExceeded { size, limit });
                }
                self.transcribe_chunked(backend, media, options, attempts).await
            }
            Err(e) => Err(e),
        }
    }

    /// Why oversized media cannot be chunked for `backend`, if it cannot
    fn chunking_unavailable(&self, backend: &dyn TranscriptionBackend, media: &MediaObject) -> Option<&'static str> {
        if self.settings.oversize_policy != OversizePolicy::Chunk {
            Some("oversize policy is fallback")
        } else if !backend.supports_chunking() {
            Some("backend does not take chunks")
        } else if self.splitter.is_none() {
            Some("no splitter configured")
        } else if !media.duration_seconds.is_some_and(|d| d > 0.0) {
            Some("media duration is unknown")
        } else {
            None
        }
    }

    async fn transcribe_chunked(
        &self,
        backend: &dyn TranscriptionBackend,
        media: &MediaObject,
        options: &SubmitOptions,
        attempts: &AtomicU32,
    ) -> Result<(Transcript, ChunkPlan)> {
        let splitter = self
            .splitter
            .as_ref()
            .ok_or_else(|| PipelineError::Config("chunking requires a splitter".to_string()))?;
        let duration = media
            .duration_seconds
            .ok_or_else(|| PipelineError::Validation(format!("duration of {} is unknown", media.item_id)))?;
        let plan = ChunkPlan::fixed(duration, self.settings.chunk_duration_secs)?;
        tracing::info!(
            "Splitting {} into {} chunks of {}s for {}",
            media.item_id,
            plan.len(),
            self.settings.chunk_duration_secs,
            backend.name()
        );

        let scratch = match &self.scratch_dir {
            Some(dir) => {
                fs_err::create_dir_all(dir)?;
                tempfile::Builder::new().prefix("chunks-").tempdir_in(dir)?
            }
            None => tempfile::Builder::new().prefix("chunks-").tempdir()?,
        };

        let source = self
            .store
            .presigned_url(&media.storage_key, self.settings.presign_ttl)
            .await?;
        let files = splitter.split(&source, &plan, scratch.path()).await?;
        if files.len() != plan.len() {
            return Err(PipelineError::Corruption(format!(
                "splitter produced {} chunks for a plan of {}",
                files.len(),
                plan.len()
            )));
        }

        let format = splitter.format();
        let item_component = sanitize_key_component(&media.item_id);
        let mut chunks = Vec::with_capacity(files.len());
        for file in &files {
            let key = chunk_key(&item_component, file.index, format.as_str());
            let body = ObjectBody::File(file.path.clone());
            let size = body.len()?;
            if let Some(limit) = backend.max_upload_bytes() {
                if size > limit {
                    return Err(PipelineError::SizeLimitExceeded { size, limit });
                }
            }

            self.store.put(&key, body, format.mime_type()).await?;
            if !self.store.exists(&key).await? {
                return Err(PipelineError::Transient(format!("chunk {} missing after upload", key)));
            }
            let url = self.store.presigned_url(&key, self.settings.presign_ttl).await?;
            chunks.push(AudioRef {
                item_id: media.item_id.clone(),
                key,
                url,
                size,
                duration: file.actual_duration,
                format: Some(format),
            });
        }

        let mut jobs = Vec::with_capacity(files.len());
        for (file, audio) in files.iter().zip(&chunks) {
            jobs.push(self.submit_chunk(backend, file, audio, options, attempts));
        }
        let results: Vec<ChunkResult> = stream::iter(jobs)
            .buffer_unordered(self.settings.max_concurrent_chunks.max(1))
            .try_collect()
            .await?;

        let transcript = reconcile(&plan, results, backend.name())?;
        Ok((transcript, plan))
    }

    async fn submit_chunk(
        &self,
        backend: &dyn TranscriptionBackend,
        file: &ChunkFile,
        audio: &AudioRef,
        options: &SubmitOptions,
        attempts: &AtomicU32,
    ) -> Result<ChunkResult> {
        let transcript = self.submit_with_retry(backend, audio, options, attempts).await?;
        Ok(ChunkResult {
            index: file.index,
            actual_duration: file.actual_duration,
            transcript,
        })
    }

    /// Retries sign a fresh URL, the previous one may have expired while the
    /// job waited for its turn
    async fn submit_with_retry(
        &self,
        backend: &dyn TranscriptionBackend,
        audio: &AudioRef,
        options: &SubmitOptions,
        attempts: &AtomicU32,
    ) -> Result<BackendTranscript> {
        let limiter = &self.limiter;
        let store = &self.store;
        let ttl = self.settings.presign_ttl;
        let what = format!("{} submit of {}", backend.name(), audio.key);
        self.policy
            .run(&what, move |attempt| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                let mut current = audio.clone();
                if attempt > 1 {
                    current.url = store.presigned_url(&current.key, ttl).await?;
                }
                limiter.acquire(Destination::Transcription).await;
                backend.submit(&current, options).await
            })
            .await
    }
}

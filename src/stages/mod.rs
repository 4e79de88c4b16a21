//! Pipeline stages and their assembly from configuration.

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_transcribe::Client as TranscribeClient;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, Config};
use crate::extractors::ExtractorRegistry;
use crate::fetch::HttpPageFetcher;
use crate::orchestrator::Stage;
use crate::ratelimit::RateLimiter;
use crate::resolver::PlatformResolver;
use crate::storage::{ObjectStore, S3ObjectStore};
use crate::transcribe::aws::AwsTranscribeBackend;
use crate::transcribe::splitter::FfmpegSplitter;
use crate::transcribe::whisper::WhisperBackend;
use crate::transcribe::{CoordinatorSettings, TranscriptionBackend, TranscriptionCoordinator};
use crate::utils::Ffprobe;
use crate::{PipelineError, Result};

pub mod resolve;
pub mod store;
pub mod transcribe;

pub use resolve::ResolveStage;
pub use store::StoreStage;
pub use transcribe::TranscribeStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Resolve,
    Store,
    Transcribe,
}

impl StageKind {
    /// Pipeline order
    pub const ALL: [StageKind; 3] = [StageKind::Resolve, StageKind::Store, StageKind::Transcribe];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Resolve => "resolve",
            StageKind::Store => "store",
            StageKind::Transcribe => "transcribe",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        StageKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| PipelineError::Validation(format!("unknown stage '{}'", s)))
    }
}

/// Every stage wired to the real page fetcher, S3 and backends
pub struct PipelineStages {
    pub resolve: ResolveStage,
    pub store: StoreStage,
    pub transcribe: TranscribeStage,
}

impl PipelineStages {
    pub async fn from_config(config: &Config, limiter: RateLimiter) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(config.aws_region())
            .load()
            .await;

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(S3ObjectStore::new(S3Client::new(&aws_config), config, limiter.clone()));
        let presign_ttl = Duration::from_secs(config.aws.presign_ttl_secs);

        let resolve = ResolveStage::new(Arc::new(HttpPageFetcher::new(&config.app)?), PlatformResolver::new());

        let extractors = ExtractorRegistry::new(&config.app)?;
        tracing::debug!("Media extractors: {:?}", extractors.names());
        let store = StoreStage::new(
            extractors,
            object_store.clone(),
            Arc::new(Ffprobe::default()),
        )
        .with_scratch_dir(config.app.temp_dir.clone())
        .with_presign_ttl(presign_ttl);

        let coordinator = TranscriptionCoordinator::new(
            build_backends(config, &aws_config)?,
            object_store.clone(),
            limiter,
            config.retry_policy(),
            CoordinatorSettings::from_config(config),
        )
        .with_splitter(Arc::new(FfmpegSplitter::default()), config.app.temp_dir.clone());
        tracing::debug!("Transcription backends: {:?}", coordinator.backend_names());

        Ok(Self {
            resolve,
            store,
            transcribe: TranscribeStage::new(coordinator, object_store),
        })
    }

    pub fn get(&self, kind: StageKind) -> &dyn Stage {
        match kind {
            StageKind::Resolve => &self.resolve,
            StageKind::Store => &self.store,
            StageKind::Transcribe => &self.transcribe,
        }
    }
}

/// Backends in configured priority order. One that cannot be set up is
/// skipped while another remains usable.
fn build_backends(config: &Config, aws_config: &SdkConfig) -> Result<Vec<Arc<dyn TranscriptionBackend>>> {
    let mut backends: Vec<Arc<dyn TranscriptionBackend>> = Vec::new();
    let mut last_error = None;

    for kind in &config.transcription.backends {
        match kind {
            BackendKind::Whisper => match WhisperBackend::from_config(&config.transcription.whisper) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(e) => {
                    tracing::warn!("Whisper backend disabled: {}", e);
                    last_error = Some(e);
                }
            },
            BackendKind::AwsTranscribe => backends.push(Arc::new(AwsTranscribeBackend::new(
                TranscribeClient::new(aws_config),
                config,
            ))),
        }
    }

    if backends.is_empty() {
        return Err(last_error
            .unwrap_or_else(|| PipelineError::Config("no transcription backend configured".to_string())));
    }
    Ok(backends)
}

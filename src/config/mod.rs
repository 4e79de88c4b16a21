use anyhow::{Context, Result};
use aws_types::region::Region;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// AWS configuration
    pub aws: AwsConfig,

    /// Catalog and checkpoint locations
    pub catalog: CatalogConfig,

    /// Orchestrator behaviour
    pub pipeline: PipelineConfig,

    /// Minimum delay between calls, per destination
    pub rate_limits: RateLimitConfig,

    /// Transcription backends and chunking
    pub transcription: TranscriptionConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,

    /// S3 bucket holding media, chunks and transcripts
    pub s3_bucket: String,

    /// Optional S3 key prefix
    pub s3_key_prefix: Option<String>,

    /// Lifetime of presigned URLs handed to backends
    pub presign_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// SQLite database with the item catalog
    pub db_path: PathBuf,

    /// Directory for per-stage checkpoint files
    pub checkpoint_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Save a checkpoint every N visited items
    pub checkpoint_interval: usize,

    /// Attempts per item before it is marked failed
    pub max_attempts: u32,

    /// First retry delay; doubled on each further attempt
    pub base_backoff_ms: u64,

    /// Upper bound on a single retry delay
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub page_load_ms: u64,
    pub media_api_ms: u64,
    pub storage_ms: u64,
    pub transcription_ms: u64,
}

/// Transcription backend identifiers, in config order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Whisper,
    AwsTranscribe,
}

/// What to do when media is too large for a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Split the audio into chunks and resubmit to the same backend
    Chunk,
    /// Move on to the next backend in priority order
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Backends in priority order
    pub backends: Vec<BackendKind>,

    pub oversize_policy: OversizePolicy,

    /// Length of each chunk window in seconds
    pub chunk_duration_secs: f64,

    /// Chunk submissions in flight per job
    pub max_concurrent_chunks: usize,

    /// Language code (auto-detect if not specified)
    pub language: Option<String>,

    /// Maximum segment length in seconds when a backend returns only words
    pub max_segment_length: f64,

    pub whisper: WhisperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    /// OpenAI-compatible transcription endpoint
    pub endpoint: String,

    pub model: String,

    /// Hard upload limit of the endpoint
    pub max_upload_mb: u64,

    /// Environment variable holding the API key
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Temporary directory for downloads and chunks
    pub temp_dir: Option<PathBuf>,

    /// File with a raw `Cookie:` header value for authenticated page loads
    pub cookie_file: Option<PathBuf>,

    pub user_agent: String,

    pub page_timeout_secs: u64,

    /// Path to the yt-dlp binary
    pub yt_dlp_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aws: AwsConfig {
                region: "us-east-1".to_string(),
                s3_bucket: "".to_string(),
                s3_key_prefix: Some("batch-transcriptor/".to_string()),
                presign_ttl_secs: 3600,
            },
            catalog: CatalogConfig {
                db_path: PathBuf::from("catalog.db"),
                checkpoint_dir: PathBuf::from("checkpoints"),
            },
            pipeline: PipelineConfig {
                checkpoint_interval: 5,
                max_attempts: 3,
                base_backoff_ms: 2_000,
                max_backoff_ms: 60_000,
            },
            rate_limits: RateLimitConfig {
                page_load_ms: 2_000,
                media_api_ms: 500,
                storage_ms: 100,
                transcription_ms: 1_000,
            },
            transcription: TranscriptionConfig {
                backends: vec![BackendKind::Whisper, BackendKind::AwsTranscribe],
                oversize_policy: OversizePolicy::Chunk,
                chunk_duration_secs: 600.0,
                max_concurrent_chunks: 3,
                language: None,
                max_segment_length: 10.0,
                whisper: WhisperConfig {
                    endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
                    model: "whisper-1".to_string(),
                    max_upload_mb: 25,
                    api_key_env: "OPENAI_API_KEY".to_string(),
                },
            },
            app: AppConfig {
                temp_dir: None,
                cookie_file: None,
                user_agent: concat!("batch-transcriptor/", env!("CARGO_PKG_VERSION")).to_string(),
                page_timeout_secs: 45,
                yt_dlp_path: "yt-dlp".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            Self::from_file(&config_path)
        } else {
            let config = Self::default();
            config.save(&config_path).await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Parse a configuration file without validating it
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("batch-transcriptor").join("config.yaml"))
    }

    /// Validate the settings a pipeline run depends on
    pub fn validate(&self) -> Result<()> {
        if self.aws.s3_bucket.is_empty() {
            anyhow::bail!("AWS S3 bucket must be configured");
        }
        if self.pipeline.checkpoint_interval == 0 {
            anyhow::bail!("pipeline.checkpoint_interval must be at least 1");
        }
        if self.pipeline.max_attempts == 0 {
            anyhow::bail!("pipeline.max_attempts must be at least 1");
        }
        if self.transcription.backends.is_empty() {
            anyhow::bail!("At least one transcription backend must be configured");
        }
        if self.transcription.chunk_duration_secs <= 0.0 {
            anyhow::bail!("transcription.chunk_duration_secs must be positive");
        }
        if self.transcription.max_concurrent_chunks == 0 {
            anyhow::bail!("transcription.max_concurrent_chunks must be at least 1");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  AWS Region: {}", self.aws.region);
        println!("  S3 Bucket: {}", self.aws.s3_bucket);
        if let Some(prefix) = &self.aws.s3_key_prefix {
            println!("  S3 Prefix: {}", prefix);
        }
        println!("  Catalog: {}", self.catalog.db_path.display());
        println!("  Checkpoints: {}", self.catalog.checkpoint_dir.display());
        println!(
            "  Checkpoint every {} items, {} attempts per item",
            self.pipeline.checkpoint_interval, self.pipeline.max_attempts
        );
        let backends: Vec<String> = self
            .transcription
            .backends
            .iter()
            .map(|b| format!("{:?}", b))
            .collect();
        println!("  Backends: {}", backends.join(" -> "));
        println!(
            "  Chunking: {:?}, {}s windows, {} in flight",
            self.transcription.oversize_policy,
            self.transcription.chunk_duration_secs,
            self.transcription.max_concurrent_chunks
        );
    }

    /// Get AWS region
    pub fn aws_region(&self) -> Region {
        Region::new(self.aws.region.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.pipeline.max_attempts,
            base_delay: Duration::from_millis(self.pipeline.base_backoff_ms),
            max_delay: Duration::from_millis(self.pipeline.max_backoff_ms),
        }
    }

    /// Prefix an object key with the configured S3 prefix
    pub fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.aws.s3_key_prefix.as_deref().unwrap_or(""), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_requires_bucket() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aws.s3_bucket = "archive".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_checkpoint_interval() {
        let mut config = Config::default();
        config.aws.s3_bucket = "archive".into();
        config.pipeline.checkpoint_interval = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.aws.s3_bucket = "archive".into();
        config.transcription.backends = vec![BackendKind::AwsTranscribe];
        config.transcription.oversize_policy = OversizePolicy::Fallback;
        config.save(&path).await.unwrap();

        let loaded = Config::load(Some(&path)).await.unwrap();
        assert_eq!(loaded.aws.s3_bucket, "archive");
        assert_eq!(loaded.transcription.backends, vec![BackendKind::AwsTranscribe]);
        assert_eq!(loaded.transcription.oversize_policy, OversizePolicy::Fallback);
    }

    #[test]
    fn test_object_key_uses_prefix() {
        let config = Config::default();
        assert_eq!(config.object_key("videos/a.mp4"), "batch-transcriptor/videos/a.mp4");
    }
}

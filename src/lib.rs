//! Batch Transcriptor - a resumable pipeline that turns a catalog of video pages
//! into archived media and time-aligned transcripts.
//!
//! Each catalog item is resolved to a `(platform, media_id)` pair, its media is
//! copied into S3 and then transcribed through one of several backends. The
//! [`orchestrator`] drives every stage with checkpoints so a run can be
//! interrupted and resumed without repeating finished work.

use std::time::Duration;

pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod fetch;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod ratelimit;
pub mod resolver;
pub mod stages;
pub mod storage;
pub mod transcribe;
pub mod utils;

pub use catalog::{Catalog, ItemUpdate, SqliteCatalog};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use models::{Item, ItemStatus, MediaObject, Platform, Segment, Transcript, WordTimestamp};
pub use orchestrator::{BatchOrchestrator, RunOptions, RunReport, Stage};
pub use ratelimit::{Destination, RateLimiter};
pub use resolver::{PageContent, PlatformResolver, Resolution};
pub use transcribe::{TranscriptionBackend, TranscriptionCoordinator};

/// Result type used throughout the pipeline core
pub type Result<T> = std::result::Result<T, PipelineError>;

/// How the orchestrator reacts to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying after a backoff
    Transient,
    /// Recorded on the item; the run continues
    Permanent,
    /// Would recur for every item; the run aborts
    Fatal,
}

/// Error taxonomy for every pipeline stage
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited by remote service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Size limit exceeded: {size} bytes (limit {limit} bytes)")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Corrupt result: {0}")]
    Corruption(String),

    #[error("{0}")]
    Permanent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn class(&self) -> FailureClass {
        match self {
            PipelineError::Transient(_) | PipelineError::RateLimited { .. } => FailureClass::Transient,
            PipelineError::Auth(_) | PipelineError::Config(_) | PipelineError::Catalog(_) => {
                FailureClass::Fatal
            }
            PipelineError::Validation(_)
            | PipelineError::NotFound(_)
            | PipelineError::SizeLimitExceeded { .. }
            | PipelineError::Corruption(_)
            | PipelineError::Permanent(_)
            | PipelineError::Io(_) => FailureClass::Permanent,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::Fatal
    }

    /// Map an HTTP status from a remote service onto the taxonomy
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        match status.as_u16() {
            401 | 403 => PipelineError::Auth(format!("{}: HTTP {}", context, status)),
            404 | 410 => PipelineError::NotFound(format!("{}: HTTP {}", context, status)),
            408 => PipelineError::Transient(format!("{}: HTTP {}", context, status)),
            413 => PipelineError::SizeLimitExceeded { size: 0, limit: 0 },
            429 => PipelineError::RateLimited { retry_after: None },
            s if s >= 500 => PipelineError::Transient(format!("{}: HTTP {}", context, status)),
            _ => PipelineError::Permanent(format!("{}: HTTP {}", context, status)),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return PipelineError::from_status(status, "request failed");
        }
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            PipelineError::Transient(e.to_string())
        } else {
            PipelineError::Permanent(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Catalog(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Corruption(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert_eq!(PipelineError::Transient("timeout".into()).class(), FailureClass::Transient);
        assert_eq!(PipelineError::RateLimited { retry_after: None }.class(), FailureClass::Transient);
        assert_eq!(PipelineError::Auth("expired".into()).class(), FailureClass::Fatal);
        assert_eq!(PipelineError::Config("no bucket".into()).class(), FailureClass::Fatal);
        assert_eq!(PipelineError::Corruption("chunk count".into()).class(), FailureClass::Permanent);
        assert_eq!(PipelineError::NotFound("gone".into()).class(), FailureClass::Permanent);
    }

    #[test]
    fn test_from_status() {
        use reqwest::StatusCode;
        assert!(matches!(PipelineError::from_status(StatusCode::UNAUTHORIZED, "x"), PipelineError::Auth(_)));
        assert!(matches!(PipelineError::from_status(StatusCode::NOT_FOUND, "x"), PipelineError::NotFound(_)));
        assert!(matches!(
            PipelineError::from_status(StatusCode::TOO_MANY_REQUESTS, "x"),
            PipelineError::RateLimited { .. }
        ));
        assert!(matches!(PipelineError::from_status(StatusCode::BAD_GATEWAY, "x"), PipelineError::Transient(_)));
        assert!(matches!(
            PipelineError::from_status(StatusCode::PAYLOAD_TOO_LARGE, "x"),
            PipelineError::SizeLimitExceeded { .. }
        ));
        assert!(matches!(PipelineError::from_status(StatusCode::BAD_REQUEST, "x"), PipelineError::Permanent(_)));
    }
}

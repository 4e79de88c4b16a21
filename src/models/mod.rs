use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::PipelineError;

/// Processing state of a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Unresolved,
    Resolved,
    Stored,
    Transcribed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Unresolved => "unresolved",
            ItemStatus::Resolved => "resolved",
            ItemStatus::Stored => "stored",
            ItemStatus::Transcribed => "transcribed",
            ItemStatus::Failed => "failed",
        }
    }

    /// Position along the happy path; `Failed` has none
    fn rank(&self) -> Option<u8> {
        match self {
            ItemStatus::Unresolved => Some(0),
            ItemStatus::Resolved => Some(1),
            ItemStatus::Stored => Some(2),
            ItemStatus::Transcribed => Some(3),
            ItemStatus::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Transcribed)
    }

    /// True when `self` is at or beyond `other` on the happy path
    pub fn reached(&self, other: ItemStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Legal moves: one step forward, or to failed from any non-terminal state.
    /// Staying in place is allowed so metadata can be rewritten.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        if *self == next {
            return true;
        }
        match next {
            ItemStatus::Failed => !self.is_terminal(),
            _ => match (self.rank(), next.rank()) {
                (Some(a), Some(b)) => b == a + 1,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unresolved" => Ok(ItemStatus::Unresolved),
            "resolved" => Ok(ItemStatus::Resolved),
            "stored" => Ok(ItemStatus::Stored),
            "transcribed" => Ok(ItemStatus::Transcribed),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(PipelineError::Corruption(format!("unknown item status '{}'", other))),
        }
    }
}

/// Video host an item resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Streamable,
    Youtube,
    Vimeo,
    Wistia,
    /// Plain `<video>` element source
    Direct,
    /// Unrecognised embedded player iframe
    Other,
    /// No embedded video found; needs manual review
    None,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Streamable,
        Platform::Youtube,
        Platform::Vimeo,
        Platform::Wistia,
        Platform::Direct,
        Platform::Other,
        Platform::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Streamable => "streamable",
            Platform::Youtube => "youtube",
            Platform::Vimeo => "vimeo",
            Platform::Wistia => "wistia",
            Platform::Direct => "direct",
            Platform::Other => "other",
            Platform::None => "none",
        }
    }

    pub fn has_media(&self) -> bool {
        !matches!(self, Platform::None)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| PipelineError::Corruption(format!("unknown platform '{}'", s)))
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source_url: String,
    pub platform: Option<Platform>,
    pub media_id: Option<String>,
    pub status: ItemStatus,
    pub failure_reason: Option<String>,
    pub attempt_count: u32,
    /// State to return to when a failed item is retried
    pub failed_from: Option<ItemStatus>,
    pub storage_key: Option<String>,
    pub media_size: Option<u64>,
    pub media_etag: Option<String>,
    pub duration_seconds: Option<f64>,
    pub transcript_ref: Option<String>,
    pub service_used: Option<String>,
    pub transcribed_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            platform: None,
            media_id: None,
            status: ItemStatus::Unresolved,
            failure_reason: None,
            attempt_count: 0,
            failed_from: None,
            storage_key: None,
            media_size: None,
            media_etag: None,
            duration_seconds: None,
            transcript_ref: None,
            service_used: None,
            transcribed_at: None,
        }
    }

    /// Resolved to `none`: terminal for resolution but awaiting a human
    pub fn needs_review(&self) -> bool {
        self.platform == Some(Platform::None)
    }

    /// The stored media object, once the store stage has verified it
    pub fn media_object(&self) -> Option<MediaObject> {
        if !self.status.reached(ItemStatus::Stored) {
            return None;
        }
        Some(MediaObject {
            item_id: self.id.clone(),
            storage_key: self.storage_key.clone()?,
            size: self.media_size.unwrap_or(0),
            etag: self.media_etag.clone(),
            duration_seconds: self.duration_seconds,
        })
    }
}

/// A media file archived in the object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaObject {
    pub item_id: String,
    pub storage_key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// A contiguous transcript span, times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: Option<f64>,
}

/// A finished transcript on one continuous timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    pub words: Vec<WordTimestamp>,
    pub confidence: Option<f64>,
    pub duration_seconds: f64,
    /// Backend that produced the accepted result
    pub service: String,
    pub chunk_count: usize,
}

/// One window of a chunk plan, offsets in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub index: usize,
    pub start_offset: f64,
    pub end_offset: f64,
}

impl ChunkSpan {
    pub fn duration(&self) -> f64 {
        self.end_offset - self.start_offset
    }
}

/// Record of how one item's transcript was obtained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub item_id: String,
    pub service: String,
    pub attempt_count: u32,
    pub chunk_plan: Vec<ChunkSpan>,
    pub result: Transcript,
}

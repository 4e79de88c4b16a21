use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod direct;
pub mod streamable;
pub mod ytdlp;

use crate::config::AppConfig;
use crate::models::{Item, Platform};
use crate::{PipelineError, Result};

/// Container formats handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Mp4,
    Webm,
    Mov,
    Mp3,
    M4a,
    Wav,
    Flac,
    Ogg,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Webm => "webm",
            MediaFormat::Mov => "mov",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::M4a => "m4a",
            MediaFormat::Wav => "wav",
            MediaFormat::Flac => "flac",
            MediaFormat::Ogg => "ogg",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" | "m4v" => Some(MediaFormat::Mp4),
            "webm" => Some(MediaFormat::Webm),
            "mov" => Some(MediaFormat::Mov),
            "mp3" => Some(MediaFormat::Mp3),
            "m4a" | "aac" => Some(MediaFormat::M4a),
            "wav" => Some(MediaFormat::Wav),
            "flac" => Some(MediaFormat::Flac),
            "ogg" | "oga" => Some(MediaFormat::Ogg),
            _ => None,
        }
    }

    /// Format implied by the extension of a key or path
    pub fn from_key(key: &str) -> Option<Self> {
        Path::new(key)
            .extension()
            .and_then(|ext| Self::from_extension(&ext.to_string_lossy()))
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "video/mp4",
            MediaFormat::Webm => "video/webm",
            MediaFormat::Mov => "video/quicktime",
            MediaFormat::Mp3 => "audio/mpeg",
            MediaFormat::M4a => "audio/mp4",
            MediaFormat::Wav => "audio/wav",
            MediaFormat::Flac => "audio/flac",
            MediaFormat::Ogg => "audio/ogg",
        }
    }
}

/// A media file fetched into local scratch space
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub size: u64,
    pub format: MediaFormat,
}

/// Downloads the media behind a resolved item
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, platform: Platform) -> bool;

    /// Format the download will have, known before fetching anything
    fn format(&self, item: &Item) -> MediaFormat;

    /// Download the item's media to `dest`
    async fn download(&self, item: &Item, dest: &Path) -> Result<DownloadedMedia>;
}

/// Registry for managing multiple extractors
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn MediaExtractor>>,
}

impl ExtractorRegistry {
    /// Create a new registry with default extractors
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;

        let mut registry = Self::empty();
        registry.register(Box::new(streamable::StreamableExtractor::new(client.clone())));
        registry.register(Box::new(direct::DirectExtractor::new(client)));
        registry.register(Box::new(ytdlp::YtDlpExtractor::new(config.yt_dlp_path.clone())));
        Ok(registry)
    }

    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Register a new extractor
    pub fn register(&mut self, extractor: Box<dyn MediaExtractor>) {
        self.extractors.push(extractor);
    }

    /// First registered extractor handling `platform`
    pub fn find(&self, platform: Platform) -> Option<&dyn MediaExtractor> {
        self.extractors
            .iter()
            .find(|extractor| extractor.supports(platform))
            .map(|boxed| boxed.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }
}

/// The item's media id, or a validation error when it has none
pub(crate) fn media_id(item: &Item) -> Result<&str> {
    item.media_id
        .as_deref()
        .ok_or_else(|| PipelineError::Validation(format!("item {} has no media id", item.id)))
}

/// Stream a GET response body to `dest`, returning the byte count
pub(crate) async fn stream_to_file(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::from_status(status, &format!("download {}", url)));
    }

    let mut file = fs_err::File::create(dest)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
    }
    file.sync_all()?;

    if downloaded == 0 {
        return Err(PipelineError::Transient(format!("download {} returned an empty body", url)));
    }
    tracing::debug!("Downloaded {} bytes from {}", downloaded, url);
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_format_from_key() {
        assert_eq!(MediaFormat::from_key("videos/youtube/abc.mp4"), Some(MediaFormat::Mp4));
        assert_eq!(MediaFormat::from_key("chunks/0001/000.MP3"), Some(MediaFormat::Mp3));
        assert_eq!(MediaFormat::from_key("transcripts/0001.json"), None);
    }

    #[test]
    fn test_registry_routes_every_media_platform() {
        let registry = ExtractorRegistry::new(&Config::default().app).unwrap();
        assert_eq!(registry.find(Platform::Streamable).unwrap().name(), "streamable");
        assert_eq!(registry.find(Platform::Direct).unwrap().name(), "direct");
        for platform in [Platform::Youtube, Platform::Vimeo, Platform::Wistia, Platform::Other] {
            assert_eq!(registry.find(platform).unwrap().name(), "yt-dlp", "{}", platform);
        }
        assert!(registry.find(Platform::None).is_none());
    }
}

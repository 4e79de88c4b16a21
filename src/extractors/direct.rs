use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use url::Url;

use super::{media_id, stream_to_file, DownloadedMedia, MediaExtractor, MediaFormat};
use crate::models::{Item, Platform};
use crate::Result;

/// Plain `<video>` sources fetched over HTTP
pub struct DirectExtractor {
    client: Client,
}

impl DirectExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Determine format from the URL's file extension
    fn determine_format(url: &str) -> MediaFormat {
        Url::parse(url)
            .ok()
            .and_then(|parsed| {
                parsed
                    .path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .and_then(|filename| MediaFormat::from_key(&filename))
            .unwrap_or(MediaFormat::Mp4)
    }
}

#[async_trait]
impl MediaExtractor for DirectExtractor {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn supports(&self, platform: Platform) -> bool {
        platform == Platform::Direct
    }

    fn format(&self, item: &Item) -> MediaFormat {
        item.media_id
            .as_deref()
            .map(Self::determine_format)
            .unwrap_or(MediaFormat::Mp4)
    }

    async fn download(&self, item: &Item, dest: &Path) -> Result<DownloadedMedia> {
        let url = media_id(item)?;
        let size = stream_to_file(&self.client, url, dest).await?;
        Ok(DownloadedMedia {
            path: dest.to_path_buf(),
            size,
            format: Self::determine_format(url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_format() {
        assert_eq!(
            DirectExtractor::determine_format("https://cdn.example.com/a/lesson.webm?sig=1"),
            MediaFormat::Webm
        );
        assert_eq!(
            DirectExtractor::determine_format("https://cdn.example.com/stream/12345"),
            MediaFormat::Mp4
        );
    }
}

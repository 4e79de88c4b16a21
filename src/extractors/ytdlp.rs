use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{media_id, DownloadedMedia, MediaExtractor, MediaFormat};
use crate::models::{Item, Platform};
use crate::{PipelineError, Result};

/// Hosted players downloaded through yt-dlp
pub struct YtDlpExtractor {
    yt_dlp_path: String,
}

impl YtDlpExtractor {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }

    /// Canonical page yt-dlp understands for the item's platform
    fn source_url(item: &Item) -> Result<String> {
        let id = media_id(item)?;
        let url = match item.platform {
            Some(Platform::Youtube) => format!("https://www.youtube.com/watch?v={}", id),
            Some(Platform::Vimeo) => format!("https://vimeo.com/{}", id),
            Some(Platform::Wistia) => format!("https://fast.wistia.net/embed/iframe/{}", id),
            Some(Platform::Other) => id.to_string(),
            other => {
                return Err(PipelineError::Validation(format!(
                    "yt-dlp cannot download platform {:?}",
                    other
                )))
            }
        };
        Ok(url)
    }
}

/// Classify yt-dlp's stderr
fn classify_failure(stderr: &str) -> PipelineError {
    let lower = stderr.to_lowercase();
    let message = format!("yt-dlp failed: {}", stderr.trim());

    if lower.contains("http error 429") || lower.contains("too many requests") {
        PipelineError::RateLimited { retry_after: None }
    } else if lower.contains("video unavailable")
        || lower.contains("http error 404")
        || lower.contains("private video")
        || lower.contains("has been removed")
        || lower.contains("does not exist")
    {
        PipelineError::NotFound(message)
    } else if lower.contains("timed out")
        || lower.contains("connection reset")
        || lower.contains("temporary failure")
        || lower.contains("http error 5")
    {
        PipelineError::Transient(message)
    } else {
        PipelineError::Permanent(message)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn supports(&self, platform: Platform) -> bool {
        matches!(
            platform,
            Platform::Youtube | Platform::Vimeo | Platform::Wistia | Platform::Other
        )
    }

    fn format(&self, _item: &Item) -> MediaFormat {
        MediaFormat::Mp4
    }

    async fn download(&self, item: &Item, dest: &Path) -> Result<DownloadedMedia> {
        let url = Self::source_url(item)?;
        tracing::debug!("Downloading {} with yt-dlp", url);

        let output = Command::new(&self.yt_dlp_path)
            .args([
                "--output",
                &dest.to_string_lossy(),
                // Prefer a single mp4 file, merge separate streams otherwise
                "--format",
                "bv*[ext=mp4]+ba[ext=m4a]/b[ext=mp4]/bv*+ba/b",
                "--merge-output-format",
                "mp4",
                "--no-playlist",
                "--no-progress",
                "--concurrent-fragments",
                "4",
                &url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    PipelineError::Config(format!("yt-dlp not found at '{}'", self.yt_dlp_path))
                }
                _ => PipelineError::Io(e),
            })?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let size = fs_err::metadata(dest)?.len();
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

    fn item(platform: Platform, id: &str) -> Item {
        let mut item = Item::new("0001", "https://example.com/lesson");
        item.platform = Some(platform);
        item.media_id = Some(id.to_string());
        item
    }

    #[test]
    fn test_source_urls() {
        assert_eq!(
            YtDlpExtractor::source_url(&item(Platform::Youtube, "dQw4w9WgXcQ")).unwrap(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            YtDlpExtractor::source_url(&item(Platform::Vimeo, "76979871")).unwrap(),
            "https://vimeo.com/76979871"
        );
        assert_eq!(
            YtDlpExtractor::source_url(&item(Platform::Other, "https://player.example.com/e/1")).unwrap(),
            "https://player.example.com/e/1"
        );
        assert!(YtDlpExtractor::source_url(&item(Platform::Streamable, "k3xq9z")).is_err());
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("ERROR: [youtube] dQw4w9WgXcQ: Video unavailable"),
            PipelineError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: unable to download webpage: HTTP Error 429: Too Many Requests"),
            PipelineError::RateLimited { .. }
        ));
        assert!(matches!(classify_failure("ERROR: read timed out"), PipelineError::Transient(_)));
        assert!(matches!(classify_failure("ERROR: unsupported URL"), PipelineError::Permanent(_)));
    }
}

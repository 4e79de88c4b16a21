use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::chunking::ChunkPlan;
use crate::extractors::MediaFormat;
use crate::utils::probe_duration;
use crate::{PipelineError, Result};

/// One cut chunk on local disk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFile {
    pub index: usize,
    pub path: PathBuf,
    pub actual_duration: Option<f64>,
}

/// Cuts media into the windows of a [`ChunkPlan`]
#[async_trait]
pub trait AudioSplitter: Send + Sync {
    /// Format of the produced chunk files
    fn format(&self) -> MediaFormat;

    /// Cut `source` (a path or URL) into `dir`, one file per span
    async fn split(&self, source: &str, plan: &ChunkPlan, dir: &Path) -> Result<Vec<ChunkFile>>;
}

/// Mono low-bitrate MP3 chunks cut with ffmpeg
pub struct FfmpegSplitter {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegSplitter {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

impl Default for FfmpegSplitter {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl AudioSplitter for FfmpegSplitter {
    fn format(&self) -> MediaFormat {
        MediaFormat::Mp3
    }

    async fn split(&self, source: &str, plan: &ChunkPlan, dir: &Path) -> Result<Vec<ChunkFile>> {
        let mut chunks = Vec::with_capacity(plan.len());

        for span in &plan.spans {
            let path = dir.join(format!("{:03}.{}", span.index, self.format().as_str()));
            tracing::debug!(
                "Cutting chunk {} ({:.1}s - {:.1}s) to {}",
                span.index,
                span.start_offset,
                span.end_offset,
                path.display()
            );

            let output = Command::new(&self.ffmpeg_path)
                .args([
                    "-hide_banner",
                    "-loglevel",
                    "error",
                    "-y",
                    "-ss",
                    &format!("{:.3}", span.start_offset),
                    "-t",
                    &format!("{:.3}", span.duration()),
                    "-i",
                    source,
                    "-vn",
                    "-ac",
                    "1",
                    "-ar",
                    "16000",
                    "-b:a",
                    "64k",
                ])
                .arg(&path)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        PipelineError::Config(format!("ffmpeg not found at '{}'", self.ffmpeg_path))
                    }
                    _ => PipelineError::Io(e),
                })?;

            if !output.status.success() {
                return Err(PipelineError::Permanent(format!(
                    "ffmpeg failed on chunk {}: {}",
                    span.index,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }

            let actual_duration = probe_duration(&self.ffprobe_path, &path.to_string_lossy()).await?;
            chunks.push(ChunkFile {
                index: span.index,
                path,
                actual_duration,
            });
        }

        Ok(chunks)
    }
}

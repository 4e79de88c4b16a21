use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::{PipelineError, Result};

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Make an id safe for object keys, file names and job names
pub fn sanitize_key_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect();
    sanitized.trim_matches('.').to_string()
}

/// Map short language names to the locale codes AWS Transcribe expects
pub fn normalize_language_code(lang: &str) -> String {
    let normalized = match lang.to_lowercase().as_str() {
        "en" | "english" => "en-US",
        "es" | "spanish" => "es-ES",
        "fr" | "french" => "fr-FR",
        "de" | "german" => "de-DE",
        "it" | "italian" => "it-IT",
        "pt" | "portuguese" => "pt-BR",
        "ja" | "japanese" => "ja-JP",
        "ko" | "korean" => "ko-KR",
        "zh" | "chinese" => "zh-CN",
        "ru" | "russian" => "ru-RU",
        _ => lang,
    };

    normalized.to_string()
}

/// Media length in seconds as reported by ffprobe; `None` when unknown
pub async fn probe_duration(ffprobe_path: &str, source: &str) -> Result<Option<f64>> {
    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            source,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::Config(format!("ffprobe not found at '{}'", ffprobe_path)),
            _ => PipelineError::Io(e),
        })?;

    if !output.status.success() {
        tracing::debug!(
            "ffprobe could not read {}: {}",
            source,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Ok(None);
    }

    Ok(parse_probe_output(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_probe_output(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Source of media durations
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration(&self, source: &str) -> Result<Option<f64>>;
}

pub struct Ffprobe {
    path: String,
}

impl Ffprobe {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl DurationProbe for Ffprobe {
    async fn duration(&self, source: &str) -> Result<Option<f64>> {
        probe_duration(&self.path, source).await
    }
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp_path: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp_path, "--version").await {
        missing.push("yt-dlp - required for YouTube, Vimeo and Wistia downloads".to_string());
    }

    if !check_command_available("ffmpeg", "-version").await {
        missing.push("ffmpeg - required to chunk long recordings".to_string());
    }

    if !check_command_available("ffprobe", "-version").await {
        missing.push("ffprobe - required to measure media duration".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    Command::new(command)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[test]
    fn test_sanitize_key_component() {
        assert_eq!(sanitize_key_component("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(sanitize_key_component("lesson 4/intro?"), "lesson_4_intro_");
        assert_eq!(sanitize_key_component("..hidden"), "hidden");
    }

    #[test]
    fn test_normalize_language_code() {
        assert_eq!(normalize_language_code("en"), "en-US");
        assert_eq!(normalize_language_code("English"), "en-US");
        assert_eq!(normalize_language_code("zh-TW"), "zh-TW");
    }

    #[test]
    fn test_parse_probe_output() {
        assert_eq!(parse_probe_output("1499.872000\n"), Some(1499.872));
        assert_eq!(parse_probe_output("N/A\n"), None);
        assert_eq!(parse_probe_output("0.000000"), None);
    }

    #[tokio::test]
    async fn test_missing_probe_binary_is_config_error() {
        let err = probe_duration("definitely-not-ffprobe-binary", "x.mp4").await.unwrap_err();
        assert!(err.is_fatal());
    }
}

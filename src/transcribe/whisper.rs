use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::{AudioRef, BackendTranscript, SubmitOptions, TranscriptionBackend};
use crate::config::WhisperConfig;
use crate::extractors::MediaFormat;
use crate::models::{Segment, WordTimestamp};
use crate::{PipelineError, Result};

#[derive(Debug, Deserialize)]
struct VerboseResponse {
    #[serde(default)]
    text: String,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
    #[serde(default)]
    words: Vec<VerboseWord>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VerboseWord {
    word: String,
    start: f64,
    end: f64,
}

/// OpenAI-compatible `audio/transcriptions` endpoint
pub struct WhisperBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_upload_bytes: u64,
}

impl WhisperBackend {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_upload_bytes,
        }
    }

    /// Build from config; the API key comes from the environment
    pub fn from_config(config: &WhisperConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PipelineError::Config(format!("environment variable {} is not set", config.api_key_env))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(15 * 60))
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self::new(
            client,
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            config.max_upload_mb * 1024 * 1024,
        ))
    }

    async fn fetch_audio(&self, audio: &AudioRef) -> Result<Vec<u8>> {
        let response = self.client.get(&audio.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(media_fetch_error(status, &audio.key));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Storage refusing a presigned GET is about that one URL, never about the
/// transcription credentials
fn media_fetch_error(status: StatusCode, key: &str) -> PipelineError {
    match status.as_u16() {
        400 | 401 | 403 => PipelineError::Transient(format!(
            "presigned URL for {} was rejected (HTTP {}), it may have expired",
            key, status
        )),
        _ => match PipelineError::from_status(status, &format!("fetch {}", key)) {
            PipelineError::Auth(message) | PipelineError::Config(message) => PipelineError::Transient(message),
            other => other,
        },
    }
}

/// Whisper takes ISO-639-1 codes; `en-US` becomes `en`
fn whisper_language(language: &str) -> String {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_lowercase()
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn parse_response(body: &str) -> Result<BackendTranscript> {
    let response: VerboseResponse = serde_json::from_str(body)?;

    let logprobs: Vec<f64> = response.segments.iter().filter_map(|s| s.avg_logprob).collect();
    let confidence = if logprobs.is_empty() {
        None
    } else {
        Some(logprobs.iter().map(|lp| lp.exp()).sum::<f64>() / logprobs.len() as f64)
    };

    Ok(BackendTranscript {
        text: response.text.trim().to_string(),
        segments: response
            .segments
            .into_iter()
            .enumerate()
            .map(|(id, s)| Segment {
                id,
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
            })
            .collect(),
        words: response
            .words
            .into_iter()
            .map(|w| WordTimestamp {
                word: w.word.trim().to_string(),
                start: w.start,
                end: w.end,
                confidence: None,
            })
            .collect(),
        confidence,
        duration: response.duration,
    })
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    fn name(&self) -> &str {
        "whisper"
    }

    fn max_upload_bytes(&self) -> Option<u64> {
        Some(self.max_upload_bytes)
    }

    async fn submit(&self, audio: &AudioRef, options: &SubmitOptions) -> Result<BackendTranscript> {
        let bytes = self.fetch_audio(audio).await?;
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(PipelineError::SizeLimitExceeded {
                size: bytes.len() as u64,
                limit: self.max_upload_bytes,
            });
        }

        let file_name = Path::new(&audio.key)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let mime = audio.format.unwrap_or(MediaFormat::Mp3).mime_type();
        let part = Part::bytes(bytes).file_name(file_name).mime_str(mime)?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("timestamp_granularities[]", "word");
        if let Some(language) = &options.language {
            form = form.text("language", whisper_language(language));
        }

        tracing::debug!("Submitting {} to {}", audio.key, self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(PipelineError::SizeLimitExceeded {
                size: audio.size,
                limit: self.max_upload_bytes,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Whisper error body: {}", body);
            return Err(PipelineError::from_status(status, "whisper transcription"));
        }

        let body = response.text().await?;
        parse_response(&body).map_err(|e| PipelineError::Corruption(format!("whisper response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_parse_verbose_json() {
        let body = r#"{
            "task": "transcribe",
            "language": "english",
            "duration": 12.5,
            "text": " Hello there. General Kenobi.",
            "segments": [
                {"id": 0, "start": 0.0, "end": 4.2, "text": " Hello there.", "avg_logprob": -0.1},
                {"id": 1, "start": 4.2, "end": 8.0, "text": " General Kenobi.", "avg_logprob": -0.3}
            ],
            "words": [
                {"word": "Hello", "start": 0.0, "end": 0.6},
                {"word": "there", "start": 0.6, "end": 1.1}
            ]
        }"#;
        let transcript = parse_response(body).unwrap();

        assert_eq!(transcript.text, "Hello there. General Kenobi.");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[1].text, "General Kenobi.");
        assert_eq!(transcript.words[1].word, "there");
        assert_eq!(transcript.duration, Some(12.5));
        let confidence = transcript.confidence.unwrap();
        assert!(confidence > 0.7 && confidence < 0.9);
    }

    #[test]
    fn test_plain_json_without_segments() {
        let transcript = parse_response(r#"{"text": "short"}"#).unwrap();
        assert!(transcript.segments.is_empty());
        assert!(transcript.confidence.is_none());
    }

    #[test]
    fn test_garbage_is_corruption() {
        assert!(matches!(parse_response("<html>"), Err(PipelineError::Corruption(_))));
    }

    #[test]
    fn test_rejected_presigned_url_is_retryable() {
        for status in [StatusCode::FORBIDDEN, StatusCode::UNAUTHORIZED, StatusCode::BAD_REQUEST] {
            let error = media_fetch_error(status, "chunks/0001/000.mp3");
            assert!(matches!(error, PipelineError::Transient(_)), "{}", status);
            assert!(!error.is_fatal());
        }
        assert!(matches!(
            media_fetch_error(StatusCode::NOT_FOUND, "videos/youtube/abc.mp4"),
            PipelineError::NotFound(_)
        ));
    }

    /// Local HTTP server refusing every request with 403, except media GETs
    /// when `media_ok` is set
    async fn storage_and_api(media_ok: bool) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let response: &[u8] = if media_ok && request.starts_with(b"GET ") {
                    b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\nconnection: close\r\n\r\nRIFF"
                } else {
                    b"HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                };
                let _ = socket.write_all(response).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    /// Drain the whole request so the client never sees a reset mid-upload
    async fn read_request(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match tokio::time::timeout(Duration::from_millis(100), socket.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => request.extend_from_slice(&buf[..n]),
                _ => break,
            }
        }
        request
    }

    fn backend_at(server: &str) -> WhisperBackend {
        WhisperBackend::new(
            Client::new(),
            format!("{}/v1/audio/transcriptions", server),
            "whisper-1",
            "sk-test",
            25 * 1024 * 1024,
        )
    }

    fn audio_at(server: &str) -> AudioRef {
        AudioRef {
            item_id: "0001".to_string(),
            key: "videos/youtube/abc.mp4".to_string(),
            url: format!("{}/videos/youtube/abc.mp4?X-Amz-Expires=1", server),
            size: 4,
            duration: Some(60.0),
            format: Some(MediaFormat::Mp4),
        }
    }

    #[tokio::test]
    async fn test_expired_media_url_does_not_abort_the_run() {
        let server = storage_and_api(false).await;

        let error = backend_at(&server)
            .submit(&audio_at(&server), &SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::Transient(_)), "{:?}", error);
        assert!(!error.is_fatal());
    }

    #[tokio::test]
    async fn test_rejected_api_key_is_fatal() {
        let server = storage_and_api(true).await;

        let error = backend_at(&server)
            .submit(&audio_at(&server), &SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::Auth(_)), "{:?}", error);
    }

    #[test]
    fn test_whisper_language() {
        assert_eq!(whisper_language("en-US"), "en");
        assert_eq!(whisper_language("pt_BR"), "pt");
        assert_eq!(whisper_language("de"), "de");
    }
}

use async_trait::async_trait;
use aws_sdk_transcribe::types::{LanguageCode, Media, MediaFormat as AwsMediaFormat, TranscriptionJobStatus};
use aws_sdk_transcribe::Client as TranscribeClient;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{AudioRef, BackendTranscript, SubmitOptions, TranscriptionBackend};
use crate::config::Config;
use crate::extractors::MediaFormat;
use crate::models::{Segment, WordTimestamp};
use crate::storage::classify_sdk_error;
use crate::utils::{normalize_language_code, sanitize_key_component};
use crate::{PipelineError, Result};

/// AWS Transcribe transcript format
#[derive(Debug, Deserialize)]
struct AwsTranscript {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    transcripts: Vec<TranscriptText>,
    items: Vec<TranscriptItem>,
}

#[derive(Debug, Deserialize)]
struct TranscriptText {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptItem {
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(rename = "type")]
    item_type: String,
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    confidence: Option<String>,
    content: String,
}

/// Batch transcription jobs on AWS Transcribe
pub struct AwsTranscribeBackend {
    client: TranscribeClient,
    http: Client,
    bucket: String,
    prefix: String,
    max_segment_length: f64,
    max_wait: Duration,
}

impl AwsTranscribeBackend {
    pub fn new(client: TranscribeClient, config: &Config) -> Self {
        Self {
            client,
            http: Client::new(),
            bucket: config.aws.s3_bucket.clone(),
            prefix: config.aws.s3_key_prefix.clone().unwrap_or_default(),
            max_segment_length: config.transcription.max_segment_length,
            max_wait: Duration::from_secs(4 * 3600),
        }
    }

    fn media_uri(&self, key: &str) -> String {
        format!("s3://{}/{}{}", self.bucket, self.prefix, key)
    }

    async fn start_job(&self, audio: &AudioRef, options: &SubmitOptions) -> Result<String> {
        let job_name = format!(
            "batch-transcriptor-{}-{}",
            sanitize_key_component(&audio.item_id),
            &Uuid::new_v4().simple().to_string()[..12]
        );

        let media_format = match audio.format {
            Some(MediaFormat::Mp3) => AwsMediaFormat::Mp3,
            Some(MediaFormat::Wav) => AwsMediaFormat::Wav,
            Some(MediaFormat::Flac) => AwsMediaFormat::Flac,
            Some(MediaFormat::Ogg) => AwsMediaFormat::Ogg,
            Some(MediaFormat::Webm) => AwsMediaFormat::Webm,
            _ => AwsMediaFormat::Mp4,
        };

        let media = Media::builder().media_file_uri(self.media_uri(&audio.key)).build();

        let mut job = self
            .client
            .start_transcription_job()
            .transcription_job_name(&job_name)
            .media_format(media_format)
            .media(media);

        job = match &options.language {
            Some(language) => job.language_code(LanguageCode::from(normalize_language_code(language).as_str())),
            None => job.identify_language(true),
        };

        job.send()
            .await
            .map_err(|e| classify_sdk_error(&e, "start transcription job"))?;

        tracing::info!("Started transcription job {} for {}", job_name, audio.key);
        Ok(job_name)
    }

    /// Poll until the job finishes; returns the transcript file URI
    async fn wait_for_completion(&self, job_name: &str) -> Result<String> {
        let started = Instant::now();
        let mut check_count: u64 = 0;

        loop {
            check_count += 1;

            let response = self
                .client
                .get_transcription_job()
                .transcription_job_name(job_name)
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e, "get transcription job"))?;
            let job = response
                .transcription_job()
                .ok_or_else(|| PipelineError::NotFound(format!("transcription job {}", job_name)))?;

            match job.transcription_job_status() {
                Some(TranscriptionJobStatus::Queued) | Some(TranscriptionJobStatus::InProgress) => {
                    if started.elapsed() > self.max_wait {
                        return Err(PipelineError::Transient(format!(
                            "transcription job {} still running after {:?}",
                            job_name, self.max_wait
                        )));
                    }
                    tracing::debug!(
                        "Job {} in progress ({}s elapsed, check #{})",
                        job_name,
                        started.elapsed().as_secs(),
                        check_count
                    );
                    let wait_secs = std::cmp::min(5 + (check_count - 1) * 2, 30);
                    sleep(Duration::from_secs(wait_secs)).await;
                }
                Some(TranscriptionJobStatus::Completed) => {
                    return job
                        .transcript()
                        .and_then(|t| t.transcript_file_uri())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            PipelineError::Corruption(format!("job {} completed without a transcript", job_name))
                        });
                }
                Some(TranscriptionJobStatus::Failed) => {
                    let reason = job.failure_reason().unwrap_or("Unknown error");
                    return Err(PipelineError::Permanent(format!(
                        "transcription job {} failed: {}",
                        job_name, reason
                    )));
                }
                other => {
                    return Err(PipelineError::Permanent(format!(
                        "transcription job {} in unexpected state {:?}",
                        job_name, other
                    )));
                }
            }
        }
    }

    async fn download_transcript(&self, uri: &str) -> Result<String> {
        let response = self.http.get(uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status, "download transcript"));
        }
        Ok(response.text().await?)
    }
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Turn AWS transcript JSON into words and segments.
///
/// A new segment starts after a pause longer than a second, when the current
/// one exceeds `max_segment_length`, or at sentence punctuation once it is at
/// least half that long.
fn parse_transcript(json: &str, max_segment_length: f64) -> Result<BackendTranscript> {
    let transcript: AwsTranscript = serde_json::from_str(json)?;
    let results = transcript.results;

    let mut words = Vec::new();
    let mut segments: Vec<Segment> = Vec::new();
    let mut confidences = Vec::new();

    let mut current_text = String::new();
    let mut current_start: Option<f64> = None;
    let mut current_end: Option<f64> = None;

    let flush = |text: &mut String, start: Option<f64>, end: Option<f64>, segments: &mut Vec<Segment>| {
        if let (Some(start), Some(end)) = (start, end) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                segments.push(Segment {
                    id: segments.len(),
                    start,
                    end,
                    text: trimmed.to_string(),
                });
            }
        }
        text.clear();
    };

    for item in &results.items {
        let Some(alternative) = item.alternatives.first() else {
            continue;
        };

        if item.item_type == "punctuation" {
            current_text.push_str(&alternative.content);
            let sentence_end = matches!(alternative.content.as_str(), "." | "!" | "?");
            let long_enough = current_start
                .zip(current_end)
                .map(|(start, end)| end - start > max_segment_length / 2.0)
                .unwrap_or(false);
            if sentence_end && long_enough {
                flush(&mut current_text, current_start, current_end, &mut segments);
                current_start = None;
                current_end = None;
            }
            continue;
        }

        let start = item.start_time.as_deref().and_then(|s| s.parse::<f64>().ok());
        let end = item.end_time.as_deref().and_then(|s| s.parse::<f64>().ok());
        let confidence = alternative.confidence.as_deref().and_then(|c| c.parse::<f64>().ok());

        if let (Some(start), Some(end)) = (start, end) {
            words.push(WordTimestamp {
                word: alternative.content.clone(),
                start,
                end,
                confidence,
            });
        }
        if let Some(confidence) = confidence {
            confidences.push(confidence);
        }

        let pause = start
            .zip(current_end)
            .map(|(start, end)| start - end > 1.0)
            .unwrap_or(false);
        let too_long = current_start
            .zip(start)
            .map(|(seg_start, now)| now - seg_start > max_segment_length)
            .unwrap_or(false);

        if pause || too_long {
            flush(&mut current_text, current_start, current_end, &mut segments);
            current_start = None;
        }

        if current_text.is_empty() {
            current_start = start;
        } else {
            current_text.push(' ');
        }
        current_text.push_str(&alternative.content);
        current_end = end.or(current_end);
    }
    flush(&mut current_text, current_start, current_end, &mut segments);

    let text = results
        .transcripts
        .first()
        .map(|t| t.transcript.clone())
        .unwrap_or_default();

    Ok(BackendTranscript {
        text,
        segments,
        words,
        confidence: average(&confidences),
        duration: None,
    })
}

#[async_trait]
impl TranscriptionBackend for AwsTranscribeBackend {
    fn name(&self) -> &str {
        "aws_transcribe"
    }

    fn max_upload_bytes(&self) -> Option<u64> {
        None
    }

    async fn submit(&self, audio: &AudioRef, options: &SubmitOptions) -> Result<BackendTranscript> {
        let job_name = self.start_job(audio, options).await?;
        let uri = self.wait_for_completion(&job_name).await?;
        let json = self.download_transcript(&uri).await?;
        parse_transcript(&json, self.max_segment_length)
            .map_err(|e| PipelineError::Corruption(format!("transcript of job {}: {}", job_name, e)))
    }
}

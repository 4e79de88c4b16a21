use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::catalog::ItemUpdate;
use crate::models::{ChunkSpan, Item, ItemStatus, Transcript};
use crate::orchestrator::{Stage, StageOutput};
use crate::ratelimit::Destination;
use crate::storage::{transcript_key, ObjectBody, ObjectStore};
use crate::transcribe::TranscriptionCoordinator;
use crate::utils::sanitize_key_component;
use crate::{PipelineError, Result};

/// Transcript document written next to the media
#[derive(Debug, Serialize)]
struct TranscriptDocument<'a> {
    item_id: &'a str,
    source_url: &'a str,
    media_key: &'a str,
    attempt_count: u32,
    chunk_plan: &'a [ChunkSpan],
    transcribed_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    transcript: &'a Transcript,
}

/// Transcribes stored media and uploads the transcript JSON
pub struct TranscribeStage {
    coordinator: TranscriptionCoordinator,
    store: Arc<dyn ObjectStore>,
}

impl TranscribeStage {
    pub fn new(coordinator: TranscriptionCoordinator, store: Arc<dyn ObjectStore>) -> Self {
        Self { coordinator, store }
    }
}

#[async_trait]
impl Stage for TranscribeStage {
    fn name(&self) -> &'static str {
        "transcribe"
    }

    /// The coordinator charges `Transcription` for every submit, chunks included
    fn destination(&self) -> Option<Destination> {
        None
    }

    fn is_satisfied(&self, item: &Item) -> bool {
        item.status.reached(ItemStatus::Transcribed)
    }

    fn accepts(&self, item: &Item) -> bool {
        item.status == ItemStatus::Stored
    }

    async fn run(&self, item: &Item) -> Result<StageOutput> {
        let media = item
            .media_object()
            .ok_or_else(|| PipelineError::Validation(format!("item {} has no stored media", item.id)))?;

        let job = self.coordinator.transcribe(&media).await?;
        let transcribed_at = Utc::now();

        let document = TranscriptDocument {
            item_id: &item.id,
            source_url: &item.source_url,
            media_key: &media.storage_key,
            attempt_count: job.attempt_count,
            chunk_plan: &job.chunk_plan,
            transcribed_at,
            transcript: &job.result,
        };
        let body = serde_json::to_vec_pretty(&document)?;

        let key = transcript_key(&sanitize_key_component(&item.id));
        self.store.put(&key, ObjectBody::Bytes(body), "application/json").await?;
        if !self.store.exists(&key).await? {
            return Err(PipelineError::Transient(format!("{} missing right after upload", key)));
        }

        Ok(StageOutput::advance(ItemUpdate::transcribed(key, job.service, transcribed_at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OversizePolicy;
    use crate::orchestrator::RetryPolicy;
    use crate::ratelimit::RateLimiter;
    use crate::transcribe::tests::MemoryStore;
    use crate::transcribe::{AudioRef, BackendTranscript, CoordinatorSettings, SubmitOptions, TranscriptionBackend};

    struct EchoBackend;

    #[async_trait]
    impl TranscriptionBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn max_upload_bytes(&self) -> Option<u64> {
            None
        }

        async fn submit(&self, audio: &AudioRef, _options: &SubmitOptions) -> Result<BackendTranscript> {
            Ok(BackendTranscript {
                text: format!("spoken words of {}", audio.item_id),
                segments: Vec::new(),
                words: Vec::new(),
                confidence: None,
                duration: Some(12.0),
            })
        }
    }

    fn stage(store: Arc<MemoryStore>) -> TranscribeStage {
        paced_stage(store, RateLimiter::unlimited())
    }

    fn paced_stage(store: Arc<MemoryStore>, limiter: RateLimiter) -> TranscribeStage {
        let settings = CoordinatorSettings {
            oversize_policy: OversizePolicy::Fallback,
            ..CoordinatorSettings::default()
        };
        let coordinator = TranscriptionCoordinator::new(
            vec![Arc::new(EchoBackend) as Arc<dyn TranscriptionBackend>],
            store.clone(),
            limiter,
            RetryPolicy::none(),
            settings,
        );
        TranscribeStage::new(coordinator, store)
    }

    fn stored_item() -> Item {
        let mut item = Item::new("0007", "https://school.example/lesson/7");
        item.status = ItemStatus::Stored;
        item.storage_key = Some("videos/youtube/dQw4w9WgXcQ.mp4".into());
        item.media_size = Some(1024);
        item
    }

    #[tokio::test]
    async fn test_transcript_is_uploaded_before_status_moves() {
        let store = Arc::new(MemoryStore::default());
        let output = stage(store.clone()).run(&stored_item()).await.unwrap();

        assert_eq!(output.update.status, Some(ItemStatus::Transcribed));
        assert_eq!(output.update.transcript_ref.as_deref(), Some("transcripts/0007.json"));
        assert_eq!(output.update.service_used.as_deref(), Some("echo"));

        let objects = store.objects.lock().unwrap();
        let document: serde_json::Value = serde_json::from_slice(&objects["transcripts/0007.json"]).unwrap();
        assert_eq!(document["service"], "echo");
        assert_eq!(document["text"], "spoken words of 0007");
        assert_eq!(document["duration_seconds"], 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_submit_takes_one_transcription_slot() {
        use crate::catalog::{Catalog, ItemUpdate, SqliteCatalog};
        use crate::models::{MediaObject, Platform};
        use crate::orchestrator::{BatchOrchestrator, RunOptions};
        use std::time::Duration;

        let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        catalog
            .import(&[("0007".to_string(), "https://school.example/lesson/7".to_string())])
            .unwrap();
        catalog
            .apply("0007", &ItemUpdate::resolved(Platform::Youtube, "dQw4w9WgXcQ"))
            .unwrap();
        let media = MediaObject {
            item_id: "0007".into(),
            storage_key: "videos/youtube/dQw4w9WgXcQ.mp4".into(),
            size: 1024,
            etag: None,
            duration_seconds: Some(12.0),
        };
        catalog.apply("0007", &ItemUpdate::stored(&media)).unwrap();

        let interval = Duration::from_secs(30);
        let limiter = RateLimiter::new([(Destination::Transcription, interval)]);
        let stage = paced_stage(Arc::new(MemoryStore::default()), limiter.clone());
        let dir = tempfile::TempDir::new().unwrap();
        let orchestrator = BatchOrchestrator::new(catalog.clone(), limiter, RetryPolicy::none(), dir.path());

        let started = tokio::time::Instant::now();
        orchestrator.run_stage(&stage, &RunOptions::default()).await.unwrap();

        assert!(started.elapsed() < interval, "waited {:?}", started.elapsed());
        assert_eq!(catalog.get("0007").unwrap().unwrap().status, ItemStatus::Transcribed);
    }

    #[tokio::test]
    async fn test_item_without_media_is_rejected() {
        let mut item = stored_item();
        item.storage_key = None;
        let err = stage(Arc::new(MemoryStore::default())).run(&item).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}

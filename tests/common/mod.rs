#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batch_transcriptor::extractors::{DownloadedMedia, ExtractorRegistry, MediaExtractor, MediaFormat};
use batch_transcriptor::fetch::PageFetcher;
use batch_transcriptor::models::{Item, Platform, Segment};
use batch_transcriptor::orchestrator::RetryPolicy;
use batch_transcriptor::resolver::PlatformResolver;
use batch_transcriptor::stages::{ResolveStage, StoreStage, TranscribeStage};
use batch_transcriptor::storage::{ObjectBody, ObjectInfo, ObjectStore};
use batch_transcriptor::transcribe::{
    AudioRef, BackendTranscript, CoordinatorSettings, SubmitOptions, TranscriptionBackend, TranscriptionCoordinator,
};
use batch_transcriptor::utils::DurationProbe;
use batch_transcriptor::{PipelineError, RateLimiter, Result};

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn json(&self, key: &str) -> serde_json::Value {
        let objects = self.objects.lock().unwrap();
        serde_json::from_slice(&objects[key]).unwrap()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: ObjectBody, _content_type: &str) -> Result<String> {
        let bytes = match body {
            ObjectBody::File(path) => fs_err::read(path)?,
            ObjectBody::Bytes(bytes) => bytes,
        };
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok("\"etag\"".to_string())
    }

    async fn presigned_url(&self, key: &str, _ttl: Duration) -> Result<String> {
        Ok(format!("memory://{}", key))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        Ok(self.objects.lock().unwrap().get(key).map(|bytes| ObjectInfo {
            size: bytes.len() as u64,
            etag: Some("\"etag\"".to_string()),
        }))
    }
}

/// Serves canned pages by URL; URLs marked `gone` answer NotFound,
/// `locked` ones fail as if the session had expired and `flaky` ones time
/// out a set number of times first
#[derive(Default)]
pub struct FakeFetcher {
    pages: Mutex<HashMap<String, String>>,
    not_found: Mutex<Vec<String>>,
    login_wall: Mutex<Vec<String>>,
    timeouts: Mutex<HashMap<String, u32>>,
    pub calls: AtomicU32,
}

impl FakeFetcher {
    pub fn page(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), html.to_string());
    }

    pub fn gone(&self, url: &str) {
        self.not_found.lock().unwrap().push(url.to_string());
    }

    pub fn locked(&self, url: &str) {
        self.login_wall.lock().unwrap().push(url.to_string());
    }

    pub fn flaky(&self, url: &str, failures: u32) {
        self.timeouts.lock().unwrap().insert(url.to_string(), failures);
    }

    pub fn restore(&self, url: &str) {
        self.not_found.lock().unwrap().retain(|u| u != url);
        self.login_wall.lock().unwrap().retain(|u| u != url);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.login_wall.lock().unwrap().iter().any(|u| u == url) {
            return Err(PipelineError::Auth("session cookie expired".into()));
        }
        if let Some(left) = self.timeouts.lock().unwrap().get_mut(url).filter(|left| **left > 0) {
            *left -= 1;
            return Err(PipelineError::Transient(format!("page {} timed out", url)));
        }
        if self.not_found.lock().unwrap().iter().any(|u| u == url) {
            return Err(PipelineError::NotFound(format!("page {}", url)));
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("page {}", url)))
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    pub downloads: AtomicU32,
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports(&self, platform: Platform) -> bool {
        platform.has_media()
    }

    fn format(&self, _item: &Item) -> MediaFormat {
        MediaFormat::Mp4
    }

    async fn download(&self, _item: &Item, dest: &Path) -> Result<DownloadedMedia> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        fs_err::write(dest, vec![0u8; 4096])?;
        Ok(DownloadedMedia {
            path: dest.to_path_buf(),
            size: 4096,
            format: MediaFormat::Mp4,
        })
    }
}

/// Forwards to a shared extractor so tests keep a handle on its counters
struct SharedExtractor(Arc<FakeExtractor>);

#[async_trait]
impl MediaExtractor for SharedExtractor {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn supports(&self, platform: Platform) -> bool {
        self.0.supports(platform)
    }

    fn format(&self, item: &Item) -> MediaFormat {
        self.0.format(item)
    }

    async fn download(&self, item: &Item, dest: &Path) -> Result<DownloadedMedia> {
        self.0.download(item, dest).await
    }
}

pub struct FixedProbe;

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn duration(&self, _source: &str) -> Result<Option<f64>> {
        Ok(Some(420.0))
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub submissions: AtomicU32,
}

#[async_trait]
impl TranscriptionBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake-whisper"
    }

    fn max_upload_bytes(&self) -> Option<u64> {
        Some(25 * 1024 * 1024)
    }

    async fn submit(&self, audio: &AudioRef, _options: &SubmitOptions) -> Result<BackendTranscript> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(BackendTranscript {
            text: format!("lecture {}", audio.item_id),
            segments: vec![Segment {
                id: 0,
                start: 0.0,
                end: 4.0,
                text: format!("lecture {}", audio.item_id),
            }],
            words: Vec::new(),
            confidence: Some(0.95),
            duration: audio.duration,
        })
    }
}

/// Every fake wired into the three real stages
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<FakeFetcher>,
    pub extractor: Arc<FakeExtractor>,
    pub backend: Arc<FakeBackend>,
    pub resolve: ResolveStage,
    pub store_stage: StoreStage,
    pub transcribe: TranscribeStage,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let extractor = Arc::new(FakeExtractor::default());
        let backend = Arc::new(FakeBackend::default());

        let resolve = ResolveStage::new(fetcher.clone(), PlatformResolver::new());

        let mut registry = ExtractorRegistry::empty();
        registry.register(Box::new(SharedExtractor(extractor.clone())));
        let store_stage = StoreStage::new(registry, store.clone(), Arc::new(FixedProbe));

        let coordinator = TranscriptionCoordinator::new(
            vec![backend.clone() as Arc<dyn TranscriptionBackend>],
            store.clone(),
            RateLimiter::unlimited(),
            RetryPolicy::none(),
            CoordinatorSettings::default(),
        );
        let transcribe = TranscribeStage::new(coordinator, store.clone());

        Self {
            store,
            fetcher,
            extractor,
            backend,
            resolve,
            store_stage,
            transcribe,
        }
    }

    pub fn downloads(&self) -> u32 {
        self.extractor.downloads.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> u32 {
        self.backend.submissions.load(Ordering::SeqCst)
    }
}

pub fn youtube_page(id: &str) -> String {
    format!(
        r#"<html><body><h1>Lesson</h1><iframe src="https://www.youtube.com/embed/{}"></iframe></body></html>"#,
        id
    )
}

pub fn vimeo_page(id: &str) -> String {
    format!(
        r#"<html><body><iframe src="https://player.vimeo.com/video/{}?h=abc"></iframe></body></html>"#,
        id
    )
}

/// Quick retries so failure paths finish fast
pub fn fast_retries() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1))
}

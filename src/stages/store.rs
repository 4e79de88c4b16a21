use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::ItemUpdate;
use crate::extractors::{media_id, ExtractorRegistry};
use crate::models::{Item, ItemStatus, MediaObject, Platform};
use crate::orchestrator::{Stage, StageOutput};
use crate::ratelimit::Destination;
use crate::storage::{media_key, ObjectBody, ObjectStore};
use crate::utils::{format_duration, format_file_size, sanitize_key_component, DurationProbe};
use crate::{PipelineError, Result};

/// Copies each resolved item's media into the object store
pub struct StoreStage {
    extractors: ExtractorRegistry,
    store: Arc<dyn ObjectStore>,
    probe: Arc<dyn DurationProbe>,
    scratch_dir: Option<PathBuf>,
    presign_ttl: Duration,
}

impl StoreStage {
    pub fn new(extractors: ExtractorRegistry, store: Arc<dyn ObjectStore>, probe: Arc<dyn DurationProbe>) -> Self {
        Self {
            extractors,
            store,
            probe,
            scratch_dir: None,
            presign_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn with_presign_ttl(mut self, ttl: Duration) -> Self {
        self.presign_ttl = ttl;
        self
    }

    /// Object name for the item: the media id, or the item id when the id is a URL
    fn object_name(item: &Item, platform: Platform) -> Result<String> {
        match platform {
            Platform::Direct | Platform::Other => Ok(sanitize_key_component(&item.id)),
            _ => Ok(sanitize_key_component(media_id(item)?)),
        }
    }

    /// A missing duration only costs the ability to chunk, so probing never fails the item
    async fn probe(&self, source: &str) -> Option<f64> {
        match self.probe.duration(source).await {
            Ok(Some(duration)) => {
                tracing::debug!("Media runs {}", format_duration(duration));
                Some(duration)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not measure duration of {}: {}", source, e);
                None
            }
        }
    }

    async fn probe_stored(&self, key: &str) -> Option<f64> {
        match self.store.presigned_url(key, self.presign_ttl).await {
            Ok(url) => self.probe(&url).await,
            Err(e) => {
                tracing::warn!("Could not presign {} for probing: {}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl Stage for StoreStage {
    fn name(&self) -> &'static str {
        "store"
    }

    fn destination(&self) -> Option<Destination> {
        Some(Destination::MediaApi)
    }

    fn is_satisfied(&self, item: &Item) -> bool {
        item.status.reached(ItemStatus::Stored)
    }

    fn accepts(&self, item: &Item) -> bool {
        item.status == ItemStatus::Resolved
    }

    async fn run(&self, item: &Item) -> Result<StageOutput> {
        let platform = item
            .platform
            .filter(Platform::has_media)
            .ok_or_else(|| PipelineError::Validation(format!("item {} has no media platform", item.id)))?;
        let extractor = self
            .extractors
            .find(platform)
            .ok_or_else(|| PipelineError::Permanent(format!("no extractor handles {}", platform)))?;

        let format = extractor.format(item);
        let key = media_key(platform.as_str(), &Self::object_name(item, platform)?, format.as_str());

        if let Some(existing) = self.store.head(&key).await? {
            tracing::info!("{} already stored at {}, skipping download", item.id, key);
            let duration_seconds = match item.duration_seconds {
                Some(duration) => Some(duration),
                None => self.probe_stored(&key).await,
            };
            return Ok(StageOutput::advance(ItemUpdate::stored(&MediaObject {
                item_id: item.id.clone(),
                storage_key: key,
                size: existing.size,
                etag: existing.etag,
                duration_seconds,
            })));
        }

        let scratch = match &self.scratch_dir {
            Some(dir) => {
                fs_err::create_dir_all(dir)?;
                tempfile::Builder::new().prefix("media-").tempdir_in(dir)?
            }
            None => tempfile::Builder::new().prefix("media-").tempdir()?,
        };
        let dest = scratch
            .path()
            .join(format!("{}.{}", sanitize_key_component(&item.id), format.as_str()));

        tracing::info!("Downloading {} {} with {}", platform, item.id, extractor.name());
        let downloaded = extractor.download(item, &dest).await?;
        if downloaded.format != format {
            tracing::warn!(
                "{} downloaded as {} but stored under {}",
                item.id,
                downloaded.format.as_str(),
                key
            );
        }

        let duration_seconds = self.probe(&downloaded.path.to_string_lossy()).await;

        tracing::info!("Uploading {} ({})", key, format_file_size(downloaded.size));
        let etag = self
            .store
            .put(&key, ObjectBody::File(downloaded.path.clone()), format.mime_type())
            .await?;

        let Some(uploaded) = self.store.head(&key).await? else {
            return Err(PipelineError::Transient(format!("{} missing right after upload", key)));
        };
        if uploaded.size != downloaded.size {
            return Err(PipelineError::Transient(format!(
                "{} has {} bytes in the store, expected {}",
                key, uploaded.size, downloaded.size
            )));
        }

        Ok(StageOutput::advance(ItemUpdate::stored(&MediaObject {
            item_id: item.id.clone(),
            storage_key: key,
            size: downloaded.size,
            etag: Some(etag).filter(|e| !e.is_empty()).or(uploaded.etag),
            duration_seconds,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::{DownloadedMedia, MediaExtractor, MediaFormat};
    use crate::transcribe::tests::MemoryStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeExtractor {
        downloads: Arc<AtomicU32>,
        bytes: usize,
    }

    #[async_trait]
    impl MediaExtractor for FakeExtractor {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn supports(&self, _platform: Platform) -> bool {
            true
        }

        fn format(&self, _item: &Item) -> MediaFormat {
            MediaFormat::Mp4
        }

        async fn download(&self, _item: &Item, dest: &Path) -> Result<DownloadedMedia> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            fs_err::write(dest, vec![7u8; self.bytes])?;
            Ok(DownloadedMedia {
                path: dest.to_path_buf(),
                size: self.bytes as u64,
                format: MediaFormat::Mp4,
            })
        }
    }

    struct FixedProbe(Option<f64>);

    #[async_trait]
    impl DurationProbe for FixedProbe {
        async fn duration(&self, _source: &str) -> Result<Option<f64>> {
            Ok(self.0)
        }
    }

    fn stage(store: Arc<MemoryStore>, downloads: Arc<AtomicU32>) -> StoreStage {
        let mut registry = ExtractorRegistry::empty();
        registry.register(Box::new(FakeExtractor { downloads, bytes: 2048 }));
        StoreStage::new(registry, store, Arc::new(FixedProbe(Some(93.5))))
    }

    fn resolved(id: &str, platform: Platform, media_id: &str) -> Item {
        let mut item = Item::new(id, format!("https://school.example/lesson/{}", id));
        item.status = ItemStatus::Resolved;
        item.platform = Some(platform);
        item.media_id = Some(media_id.to_string());
        item
    }

    #[tokio::test]
    async fn test_download_upload_and_verify() {
        let store = Arc::new(MemoryStore::default());
        let downloads = Arc::new(AtomicU32::new(0));
        let item = resolved("0001", Platform::Youtube, "dQw4w9WgXcQ");

        let output = stage(store.clone(), downloads.clone()).run(&item).await.unwrap();

        assert_eq!(downloads.load(Ordering::SeqCst), 1);
        assert_eq!(store.keys(), vec!["videos/youtube/dQw4w9WgXcQ.mp4"]);
        assert_eq!(output.update.status, Some(ItemStatus::Stored));
        assert_eq!(output.update.media_size, Some(2048));
        assert_eq!(output.update.duration_seconds, Some(93.5));
    }

    #[tokio::test]
    async fn test_existing_object_is_reused() {
        let store = Arc::new(MemoryStore::default());
        store
            .put("videos/vimeo/76979871.mp4", ObjectBody::Bytes(vec![1; 10]), "video/mp4")
            .await
            .unwrap();
        let downloads = Arc::new(AtomicU32::new(0));
        let item = resolved("0002", Platform::Vimeo, "76979871");

        let output = stage(store, downloads.clone()).run(&item).await.unwrap();

        assert_eq!(downloads.load(Ordering::SeqCst), 0);
        assert_eq!(output.update.storage_key.as_deref(), Some("videos/vimeo/76979871.mp4"));
        assert_eq!(output.update.media_size, Some(10));
    }

    #[tokio::test]
    async fn test_url_media_ids_are_keyed_by_item() {
        let store = Arc::new(MemoryStore::default());
        let item = resolved("0003", Platform::Direct, "https://cdn.example/talk.mp4?sig=1");

        stage(store.clone(), Arc::new(AtomicU32::new(0))).run(&item).await.unwrap();

        assert_eq!(store.keys(), vec!["videos/direct/0003.mp4"]);
    }

    #[tokio::test]
    async fn test_review_items_are_rejected() {
        let store = Arc::new(MemoryStore::default());
        let mut item = Item::new("0004", "https://school.example/lesson/4");
        item.status = ItemStatus::Resolved;
        item.platform = Some(Platform::None);

        let err = stage(store, Arc::new(AtomicU32::new(0))).run(&item).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}

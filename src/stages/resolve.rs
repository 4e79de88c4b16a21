use async_trait::async_trait;
use std::sync::Arc;

use crate::catalog::ItemUpdate;
use crate::fetch::PageFetcher;
use crate::models::{Item, ItemStatus};
use crate::orchestrator::{Stage, StageOutput};
use crate::ratelimit::Destination;
use crate::resolver::{PageContent, PlatformResolver};
use crate::{PipelineError, Result};

/// Loads each source page and classifies its embedded video
pub struct ResolveStage {
    fetcher: Arc<dyn PageFetcher>,
    resolver: PlatformResolver,
}

impl ResolveStage {
    pub fn new(fetcher: Arc<dyn PageFetcher>, resolver: PlatformResolver) -> Self {
        Self { fetcher, resolver }
    }
}

#[async_trait]
impl Stage for ResolveStage {
    fn name(&self) -> &'static str {
        "resolve"
    }

    fn destination(&self) -> Option<Destination> {
        Some(Destination::PageLoad)
    }

    fn is_satisfied(&self, item: &Item) -> bool {
        item.status.reached(ItemStatus::Resolved)
    }

    fn accepts(&self, item: &Item) -> bool {
        item.status == ItemStatus::Unresolved
    }

    async fn run(&self, item: &Item) -> Result<StageOutput> {
        let html = self.fetcher.fetch(&item.source_url).await?;
        if html.trim().is_empty() {
            return Err(PipelineError::Transient(format!("page {} came back empty", item.source_url)));
        }

        let page = PageContent::from_html(&html).with_base_url(&item.source_url);
        let resolution = self.resolver.resolve(&page);

        match resolution.media_id {
            Some(media_id) if !resolution.needs_review() => {
                tracing::info!("{} resolved to {} {}", item.id, resolution.platform, media_id);
                Ok(StageOutput::advance(ItemUpdate::resolved(resolution.platform, media_id)))
            }
            _ => Ok(StageOutput::review(ItemUpdate::needs_review())),
        }
    }
}

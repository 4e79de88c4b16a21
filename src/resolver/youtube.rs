use super::{distinct, PageContent, PlatformMatcher};
use crate::models::Platform;

static_regex!(bare_id, r"^[A-Za-z0-9_-]{11}$");
static_regex!(
    embed_url,
    r"(?:youtube(?:-nocookie)?\.com/(?:watch\?(?:[^#]*&)?v=|embed/|v/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})"
);

/// YouTube iframes and `data-video-id` players
pub struct YoutubeMatcher;

impl YoutubeMatcher {
    fn extract_id(url_or_id: &str) -> Option<String> {
        if bare_id().is_match(url_or_id) {
            return Some(url_or_id.to_string());
        }
        embed_url().captures(url_or_id).map(|caps| caps[1].to_string())
    }
}

impl PlatformMatcher for YoutubeMatcher {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn candidates(&self, page: &PageContent) -> Vec<String> {
        let from_iframes = page
            .iframe_srcs
            .iter()
            .filter(|src| src.contains("youtube") || src.contains("youtu.be"))
            .filter_map(|src| Self::extract_id(src));
        let from_attributes = page
            .data_video_ids
            .iter()
            .filter(|id| bare_id().is_match(id))
            .cloned();
        distinct(from_iframes.chain(from_attributes))
    }

    fn validate(&self, candidate: &str) -> bool {
        bare_id().is_match(candidate)
    }
}

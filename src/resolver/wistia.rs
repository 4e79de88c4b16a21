use super::{distinct, PageContent, PlatformMatcher};
use crate::models::Platform;

static_regex!(embed_token, r"(?i)^wistia_(?:async_)?([a-z0-9]{10})$");
static_regex!(
    embed_url,
    r"(?i)fast\.wistia\.(?:net|com)/embed/(?:iframe|medias)/([a-z0-9]{10})"
);

/// Wistia embed classes (`wistia_async_<id>`) and embed iframes
pub struct WistiaMatcher;

impl PlatformMatcher for WistiaMatcher {
    fn platform(&self) -> Platform {
        Platform::Wistia
    }

    fn candidates(&self, page: &PageContent) -> Vec<String> {
        let from_tokens = page
            .element_tokens
            .iter()
            .filter_map(|token| embed_token().captures(token).map(|caps| caps[1].to_ascii_lowercase()));
        let from_iframes = page
            .iframe_srcs
            .iter()
            .filter_map(|src| embed_url().captures(src).map(|caps| caps[1].to_ascii_lowercase()));
        // `wistia_embed` itself is a styling class, not an id
        distinct(from_tokens.chain(from_iframes).filter(|id| id != "embed"))
    }

    fn validate(&self, candidate: &str) -> bool {
        candidate.len() == 10
            && candidate
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    }
}

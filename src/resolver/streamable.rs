use super::{distinct, PageContent, PlatformMatcher};
use crate::models::Platform;

// Host must not be a subdomain (api., cdn-cf-east.) so thumbnails and API
// paths are not mistaken for share links. The id must end the path segment,
// which keeps `embed.js` and similar asset paths out.
static_regex!(
    share_link,
    r#"(?i)(?:^|[^a-z0-9.-])(?:www\.)?streamable\.com/(?:e/|o/|s/)?([a-z0-9]+)(?:[?#"'/\s<>]|$)"#
);
static_regex!(thumbnail, r"(?i)cdn-cf-east\.streamable\.com/image/([a-z0-9]+)");

/// Site pages that share the id shape
const SITE_PATHS: &[&str] = &[
    "about",
    "blog",
    "careers",
    "contact",
    "documentation",
    "embed",
    "explore",
    "login",
    "logout",
    "plans",
    "pricing",
    "privacy",
    "settings",
    "signin",
    "signup",
    "support",
    "terms",
    "upload",
    "videos",
];

/// Streamable share links, embeds and CDN thumbnails
pub struct StreamableMatcher;

impl PlatformMatcher for StreamableMatcher {
    fn platform(&self) -> Platform {
        Platform::Streamable
    }

    fn candidates(&self, page: &PageContent) -> Vec<String> {
        let shares = share_link()
            .captures_iter(&page.html)
            .map(|caps| caps[1].to_ascii_lowercase())
            // a bare `e`/`o`/`s` is the embed prefix of a path the id did not terminate
            .filter(|id| id.len() > 1 && !SITE_PATHS.contains(&id.as_str()));
        let thumbs = thumbnail()
            .captures_iter(&page.html)
            .map(|caps| caps[1].to_ascii_lowercase());
        distinct(shares.chain(thumbs))
    }

    fn validate(&self, candidate: &str) -> bool {
        (5..=10).contains(&candidate.len())
            && candidate
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    }
}

//! Fallback matchers for media not hosted on a known platform.

use url::Url;

use super::{distinct, PageContent, PlatformMatcher};
use crate::models::Platform;

const BLOCKED_IFRAME_HOSTS: &[&str] = &[
    "recaptcha",
    "analytics",
    "tracking",
    "doubleclick",
    "googlesyndication",
    "facebook.com/plugins",
    "twitter.com/widgets",
    "/ads/",
];

const PLAYER_INDICATORS: &[&str] = &[
    "video",
    "player",
    "embed",
    "media",
    "stream",
    "watch",
    "herokuapp.com/worker",
    "w-gcb-app",
];

fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// A `<video>` element pointing straight at a media file
pub struct DirectVideoMatcher;

impl PlatformMatcher for DirectVideoMatcher {
    fn platform(&self) -> Platform {
        Platform::Direct
    }

    fn candidates(&self, page: &PageContent) -> Vec<String> {
        distinct(
            page.video_srcs
                .iter()
                .filter(|src| !src.starts_with("blob:") && !src.starts_with("data:"))
                .cloned(),
        )
    }

    fn validate(&self, candidate: &str) -> bool {
        is_http_url(candidate)
    }
}

/// Any remaining iframe that looks like a video player
pub struct EmbeddedPlayerMatcher;

impl EmbeddedPlayerMatcher {
    fn looks_like_player(src: &str) -> bool {
        let lower = src.to_ascii_lowercase();
        if BLOCKED_IFRAME_HOSTS.iter().any(|blocked| lower.contains(blocked)) {
            return false;
        }
        PLAYER_INDICATORS.iter().any(|hint| lower.contains(hint))
    }
}

impl PlatformMatcher for EmbeddedPlayerMatcher {
    fn platform(&self) -> Platform {
        Platform::Other
    }

    fn candidates(&self, page: &PageContent) -> Vec<String> {
        distinct(
            page.iframe_srcs
                .iter()
                .filter(|src| Self::looks_like_player(src))
                .cloned(),
        )
    }

    fn validate(&self, candidate: &str) -> bool {
        is_http_url(candidate)
    }
}

//! Platform id resolution.
//!
//! A page is classified by running an ordered list of matchers over its
//! [`PageContent`]. A matcher only wins when it finds exactly one distinct
//! candidate and that candidate has the platform's id shape; otherwise the
//! next matcher is consulted. Pages nothing matches resolve to
//! [`Platform::None`] and are left for manual review.

use serde::{Deserialize, Serialize};

use crate::models::Platform;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static regex::Regex {
            static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            RE.get_or_init(|| regex::Regex::new($pattern).expect("static pattern compiles"))
        }
    };
}

pub mod generic;
pub mod page;
pub mod streamable;
pub mod vimeo;
pub mod wistia;
pub mod youtube;

pub use page::PageContent;

/// Classification of one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub platform: Platform,
    pub media_id: Option<String>,
}

impl Resolution {
    pub fn none() -> Self {
        Self {
            platform: Platform::None,
            media_id: None,
        }
    }

    pub fn needs_review(&self) -> bool {
        self.platform == Platform::None
    }
}

/// One platform's pattern matcher; must be pure
pub trait PlatformMatcher: Send + Sync {
    fn platform(&self) -> Platform;

    /// Distinct candidate ids found on the page, in document order
    fn candidates(&self, page: &PageContent) -> Vec<String>;

    /// Whether `candidate` has this platform's id shape
    fn validate(&self, candidate: &str) -> bool;
}

/// Ordered matcher list, most specific first
pub struct PlatformResolver {
    matchers: Vec<Box<dyn PlatformMatcher>>,
}

impl PlatformResolver {
    /// Create a resolver with the default matchers
    pub fn new() -> Self {
        let mut resolver = Self { matchers: Vec::new() };

        resolver.register(Box::new(streamable::StreamableMatcher));
        resolver.register(Box::new(youtube::YoutubeMatcher));
        resolver.register(Box::new(vimeo::VimeoMatcher));
        resolver.register(Box::new(wistia::WistiaMatcher));
        resolver.register(Box::new(generic::EmbeddedPlayerMatcher));
        resolver.register(Box::new(generic::DirectVideoMatcher));

        resolver
    }

    pub fn empty() -> Self {
        Self { matchers: Vec::new() }
    }

    /// Append a matcher; it runs after every matcher registered before it
    pub fn register(&mut self, matcher: Box<dyn PlatformMatcher>) {
        self.matchers.push(matcher);
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.matchers.iter().map(|m| m.platform()).collect()
    }

    pub fn resolve(&self, page: &PageContent) -> Resolution {
        for matcher in &self.matchers {
            let platform = matcher.platform();
            let candidates = matcher.candidates(page);

            match candidates.as_slice() {
                [] => continue,
                [candidate] => {
                    if matcher.validate(candidate) {
                        tracing::debug!("Matched {} id {}", platform, candidate);
                        return Resolution {
                            platform,
                            media_id: Some(candidate.clone()),
                        };
                    }
                    tracing::debug!("Discarding malformed {} candidate: {}", platform, candidate);
                }
                many => {
                    tracing::debug!("Ambiguous {} match ({} candidates), trying next matcher", platform, many.len());
                }
            }
        }

        Resolution::none()
    }
}

impl Default for PlatformResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Deduplicate while keeping first-seen order
pub(crate) fn distinct(candidates: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for candidate in candidates {
        if !seen.contains(&candidate) {
            seen.push(candidate);
        }
    }
    seen
}

use super::{distinct, PageContent, PlatformMatcher};
use crate::models::Platform;

static_regex!(video_url, r"(?:player\.)?vimeo\.com/(?:video/|channels/[^/]+/)?(\d+)");

/// Vimeo player iframes
pub struct VimeoMatcher;

impl PlatformMatcher for VimeoMatcher {
    fn platform(&self) -> Platform {
        Platform::Vimeo
    }

    fn candidates(&self, page: &PageContent) -> Vec<String> {
        distinct(
            page.iframe_srcs
                .iter()
                .filter(|src| src.contains("vimeo.com"))
                .filter_map(|src| video_url().captures(src).map(|caps| caps[1].to_string())),
        )
    }

    fn validate(&self, candidate: &str) -> bool {
        (6..=12).contains(&candidate.len()) && candidate.chars().all(|c| c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_and_page_urls() {
        let page = PageContent::from_html(
            r#"<iframe src="https://player.vimeo.com/video/76979871?h=8272103f6e"></iframe>
               <iframe src="https://vimeo.com/76979871"></iframe>"#,
        );
        assert_eq!(VimeoMatcher.candidates(&page), vec!["76979871"]);
    }

    #[test]
    fn test_validate_shape() {
        assert!(VimeoMatcher.validate("76979871"));
        assert!(!VimeoMatcher.validate("123"));
        assert!(!VimeoMatcher.validate("7697987a"));
    }
}

use serde::{Deserialize, Serialize};
use url::Url;

static_regex!(iframe_tag, r"(?is)<iframe\b([^>]*)>");
static_regex!(video_block, r"(?is)<video\b([^>]*)>(.*?)</video>");
static_regex!(source_tag, r"(?is)<source\b([^>]*)>");
static_regex!(
    attribute,
    r#"(?is)(?:^|\s)([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#
);

/// Normalised rendered content of one page.
///
/// Built once from the rendered HTML so every matcher works on the same
/// typed view instead of re-scanning markup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// Full rendered HTML
    pub html: String,
    /// `src` / `data-src` of every iframe, in document order
    pub iframe_srcs: Vec<String>,
    /// `src` of `<video>` elements and their `<source>` children
    pub video_srcs: Vec<String>,
    /// Values of `data-video-id` attributes
    pub data_video_ids: Vec<String>,
    /// Whitespace-separated `class` and `id` tokens
    pub element_tokens: Vec<String>,
}

impl PageContent {
    pub fn from_html(html: &str) -> Self {
        let mut page = PageContent {
            html: html.to_string(),
            ..Default::default()
        };

        for tag in iframe_tag().captures_iter(html) {
            let attrs = attributes(&tag[1]);
            let src = lookup(&attrs, "src")
                .filter(|s| !s.is_empty())
                .or_else(|| lookup(&attrs, "data-src"));
            if let Some(src) = src.filter(|s| !s.is_empty()) {
                page.iframe_srcs.push(src.to_string());
            }
        }

        for block in video_block().captures_iter(html) {
            let attrs = attributes(&block[1]);
            if let Some(src) = lookup(&attrs, "src").filter(|s| !s.is_empty()) {
                page.video_srcs.push(src.to_string());
            }
            for source in source_tag().captures_iter(&block[2]) {
                let attrs = attributes(&source[1]);
                if let Some(src) = lookup(&attrs, "src").filter(|s| !s.is_empty()) {
                    page.video_srcs.push(src.to_string());
                }
            }
        }

        // Attribute scan over every tag for ids and styling hooks
        for caps in attribute().captures_iter(html) {
            let name = caps[1].to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()).unwrap_or("");
            match name.as_str() {
                "data-video-id" if !value.trim().is_empty() => {
                    page.data_video_ids.push(value.trim().to_string())
                }
                "class" | "id" => page
                    .element_tokens
                    .extend(value.split_whitespace().map(str::to_string)),
                _ => {}
            }
        }

        page
    }

    /// Resolve relative `<video>` and iframe srcs against the page URL.
    /// Srcs that still do not form a URL are left as they were.
    pub fn with_base_url(mut self, base: &str) -> Self {
        let Ok(base) = Url::parse(base) else {
            return self;
        };
        for src in self.video_srcs.iter_mut().chain(self.iframe_srcs.iter_mut()) {
            if Url::parse(src).is_ok() {
                continue;
            }
            if let Ok(joined) = base.join(src) {
                *src = joined.to_string();
            }
        }
        self
    }
}

fn attributes(tag_body: &str) -> Vec<(String, String)> {
    attribute()
        .captures_iter(tag_body)
        .map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()).unwrap_or("");
            (caps[1].to_ascii_lowercase(), decode_entities(value.trim()))
        })
        .collect()
}

fn lookup<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&#38;", "&")
        .replace("&quot;", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_iframes_videos_and_tokens() {
        let html = r#"
            <div class="lesson wistia_embed wistia_async_abcdefghij" id="player-1">
              <iframe data-src="https://player.vimeo.com/video/123456789?h=1&amp;x=2"></iframe>
              <iframe src="https://www.google.com/recaptcha/api2/anchor"></iframe>
              <video src="https://cdn.example.com/intro.mp4">
                <source src="https://cdn.example.com/intro.webm" type="video/webm">
              </video>
              <span data-video-id="dQw4w9WgXcQ"></span>
            </div>"#;
        let page = PageContent::from_html(html);

        assert_eq!(
            page.iframe_srcs,
            vec![
                "https://player.vimeo.com/video/123456789?h=1&x=2",
                "https://www.google.com/recaptcha/api2/anchor",
            ]
        );
        assert_eq!(
            page.video_srcs,
            vec!["https://cdn.example.com/intro.mp4", "https://cdn.example.com/intro.webm"]
        );
        assert_eq!(page.data_video_ids, vec!["dQw4w9WgXcQ"]);
        assert!(page.element_tokens.contains(&"wistia_async_abcdefghij".to_string()));
        assert!(page.element_tokens.contains(&"player-1".to_string()));
    }

    #[test]
    fn test_base_url_completes_relative_srcs() {
        let page = PageContent::from_html(
            r#"<iframe src="//player.example.com/embed/9"></iframe>
               <video src="/media/intro.mp4"></video>
               <video src="blob:https://school.example/42"></video>"#,
        )
        .with_base_url("https://school.example/lesson/3");

        assert_eq!(page.iframe_srcs, vec!["https://player.example.com/embed/9"]);
        assert_eq!(
            page.video_srcs,
            vec!["https://school.example/media/intro.mp4", "blob:https://school.example/42"]
        );
    }

    #[test]
    fn test_data_src_does_not_shadow_src() {
        let page = PageContent::from_html(
            r#"<iframe class="lazy" data-src="https://a.example/embed" src="https://b.example/embed"></iframe>"#,
        );
        assert_eq!(page.iframe_srcs, vec!["https://b.example/embed"]);
    }

    #[test]
    fn test_empty_page() {
        let page = PageContent::from_html("");
        assert!(page.iframe_srcs.is_empty());
        assert!(page.video_srcs.is_empty());
    }
}

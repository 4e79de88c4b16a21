use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use std::time::Duration;

use crate::config::AppConfig;
use crate::{PipelineError, Result};

/// Loads the rendered HTML of a source page
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain HTTP page loads, optionally carrying a session cookie
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(path) = &config.cookie_file {
            let raw = fs_err::read_to_string(path)?;
            let cookie = raw.trim().trim_start_matches("Cookie:").trim();
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| PipelineError::Config(format!("cookie file {}: {}", path.display(), e)))?;
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.page_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        tracing::debug!("Loading page {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status, &format!("page {}", url)));
        }

        // Login walls usually answer 200 with a redirect to a sign-in page
        let final_url = response.url().clone();
        if final_url.path().contains("/login") || final_url.path().contains("/sign_in") {
            return Err(PipelineError::Auth(format!(
                "page {} redirected to {}; session cookie missing or expired",
                url, final_url
            )));
        }

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_cookie_file_is_loaded() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs_err::write(file.path(), "Cookie: session=abc123\n").unwrap();

        let mut config = Config::default().app;
        config.cookie_file = Some(file.path().to_path_buf());
        assert!(HttpPageFetcher::new(&config).is_ok());
    }

    #[test]
    fn test_missing_cookie_file_is_an_error() {
        let mut config = Config::default().app;
        config.cookie_file = Some("/nonexistent/cookies.txt".into());
        assert!(HttpPageFetcher::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_mock_fetcher_returns_scripted_page() {
        let mut fetcher = MockPageFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url == "https://example.com/lesson/1")
            .times(1)
            .returning(|_| Ok("<html></html>".to_string()));

        assert_eq!(fetcher.fetch("https://example.com/lesson/1").await.unwrap(), "<html></html>");
    }
}

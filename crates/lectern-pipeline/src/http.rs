//! `reqwest`-backed fetcher.

use async_trait::async_trait;
use lectern_source_core::{FetchError, FetchMethod, FetchRequest, FetchResponse, Fetcher};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Lectern/0.1.0";

/// Fetches pages over HTTP(S) with rustls.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT, Duration::from_secs(30))
    }
}

impl HttpFetcher {
    /// `timeout` caps every request; each request may ask for less.
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn header_map(request: &FetchRequest) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url =
            Url::parse(&request.url).map_err(|_| FetchError::InvalidUrl(request.url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(request.url.clone()));
        }

        let builder = match request.method {
            FetchMethod::Get => self.client.get(url),
            FetchMethod::Post => self.client.post(url),
        };
        let mut builder = builder
            .headers(header_map(request)?)
            .timeout(Duration::from_millis(request.timeout_ms.max(1)));
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(url = %request.url, method = ?request.method, "Fetching page");
        let response = builder.send().await.map_err(|e| network_error(e, request))?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = response.text().await.map_err(|e| network_error(e, request))?;
        Ok(FetchResponse {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

fn network_error(err: reqwest::Error, request: &FetchRequest) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(request.timeout_ms)
    } else {
        FetchError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let fetcher = HttpFetcher::default();
        let err = fetcher
            .fetch(&FetchRequest::get("file:///etc/passwd", 1_000))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::InvalidUrl("file:///etc/passwd".to_string()));

        let err = fetcher
            .fetch(&FetchRequest::get("not a url", 1_000))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[test]
    fn test_invalid_header_name() {
        let mut request = FetchRequest::get("https://x.example", 1_000);
        request.headers.insert("bad header".to_string(), "v".to_string());
        assert_eq!(
            header_map(&request).unwrap_err(),
            FetchError::InvalidHeader("bad header".to_string())
        );
    }
}

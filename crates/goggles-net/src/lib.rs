//! # Goggles Net
//!
//! HTTP networking for the Whisky Goggles client.
//!
//! ## Design Goals
//!
//! 1. **Network seam**: [`HttpFetcher`] is the live [`goggles_sw::Fetcher`]
//! 2. **Identification**: [`IdentifyClient`] speaks the `POST /identify` contract

use std::time::Duration;

use async_trait::async_trait;
use goggles_sw::{FetchError, FetchRequest, FetchResponse, Fetcher};
use hashbrown::HashMap;
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::{debug, info, trace};

pub mod identify;

pub use identify::{BottleDetails, IdentifyClient, IdentifyError};

/// Errors that can occur while setting up networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Client build failed: {0}")]
    ClientBuild(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<NetError> for goggles_common::GogglesError {
    fn from(err: NetError) -> Self {
        goggles_common::GogglesError::network_with_source("http client", err)
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("WhiskyGoggles/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

impl LoaderConfig {
    pub(crate) fn build_client(&self) -> Result<Client, NetError> {
        Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects))
            .build()
            .map_err(|e| NetError::ClientBuild(e.to_string()))
    }
}

/// Live network access for the offline cache.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = config.build_client()?;
        info!(user_agent = %config.user_agent, "HttpFetcher initialized");
        Ok(Self { client, config })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.config.default_timeout)
        } else if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| FetchError::Network(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .header("Accept-Language", &self.config.accept_language);

        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        trace!(
            url = %request.url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("WhiskyGoggles/"));
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_fetch_returns_any_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/css/output.css"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/css")
                    .set_body_string("body{}"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.js"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let base = Url::parse(&server.uri()).unwrap();

        let css = fetcher
            .fetch(&FetchRequest::get(base.join("/static/css/output.css").unwrap()))
            .await
            .unwrap();
        assert!(css.ok());
        assert_eq!(css.body, b"body{}");
        assert_eq!(css.headers.get("content-type").map(String::as_str), Some("text/css"));

        let missing = fetcher
            .fetch(&FetchRequest::get(base.join("/missing.js").unwrap()))
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(missing.status_text, "Not Found");
    }

    #[tokio::test]
    async fn test_fetch_forwards_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("x-requested-with", "goggles"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let response = fetcher
            .fetch(&FetchRequest::get(url).with_header("x-requested-with", "goggles"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let server = MockServer::start().await;
        let url = Url::parse(&server.uri()).unwrap();
        drop(server);

        let fetcher = HttpFetcher::new(LoaderConfig {
            default_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        let err = fetcher.fetch(&FetchRequest::get(url)).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_) | FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig {
            default_timeout: Duration::from_millis(50),
            ..Default::default()
        })
        .unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&FetchRequest::get(url)).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(Duration::from_millis(50)));
    }
}

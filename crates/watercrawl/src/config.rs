use std::time::Duration;

use crate::errors::WaterCrawlError;

/// Default service endpoint.
pub const DEFAULT_BASE_URL: &str = "https://app.watercrawl.dev";

/// Configuration for `WaterCrawlClient`.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API key sent as `X-API-Key`.
    pub api_key: String,
    /// Base URL of the service.
    ///
    /// Useful for self-hosted deployments or local test servers.
    pub base_url: String,
    /// Timeout for plain request/response calls. Not applied to status streams.
    pub request_timeout: Duration,
    /// Timeout for establishing connections, status streams included.
    pub connect_timeout: Duration,
    /// Budget for each result download issued while monitoring.
    pub download_timeout: Duration,
}

impl ClientConfig {
    /// Creates a config with defaults and the provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `WATERCRAWL_API_KEY` and optional `WATERCRAWL_BASE_URL`.
    pub fn from_env() -> Result<Self, WaterCrawlError> {
        let api_key = std::env::var("WATERCRAWL_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(WaterCrawlError::Config(
                "missing WATERCRAWL_API_KEY for WaterCrawl client".into(),
            ));
        }
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("WATERCRAWL_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config = config.base_url(base_url.trim());
        }
        Ok(config)
    }

    /// Overrides the service base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the request/response timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the per-download budget used while monitoring.
    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

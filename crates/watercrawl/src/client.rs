use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt as _;
use reqwest::{Method, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{WaterCrawlError, api_error_from_body};
use crate::fetcher::fetch_result;
use crate::model::{
    CrawlRequest, CrawlRequestList, CrawlResultList, CrawlTarget, CreateCrawlRequestInput,
    JsonObject,
};
use crate::monitor::MonitorBuilder;
use crate::orchestrator::ScrapeBuilder;
use crate::service::{ByteStream, CrawlService};

const CRAWL_REQUESTS_PATH: &str = "/api/v1/core/crawl-requests/";

/// Client identifier sent as `User-Agent` on every request.
pub const USER_AGENT: &str = concat!("watercrawl-rust-sdk/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the WaterCrawl API.
#[derive(Clone)]
pub struct WaterCrawlClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl WaterCrawlClient {
    /// Creates a client from explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self, WaterCrawlError> {
        if config.api_key.trim().is_empty() {
            return Err(WaterCrawlError::Config(
                "WaterCrawl client config api_key must not be empty".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| WaterCrawlError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    /// Creates a client using `WATERCRAWL_API_KEY` / `WATERCRAWL_BASE_URL`.
    pub fn from_env() -> Result<Self, WaterCrawlError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Returns the configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Lists crawl requests, one page at a time.
    pub async fn list_crawl_requests(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<CrawlRequestList, WaterCrawlError> {
        let req = self
            .request(Method::GET, CRAWL_REQUESTS_PATH)
            .query(&[("page", page), ("page_size", page_size)]);
        self.call_json(req).await
    }

    /// Fetches the current snapshot of one crawl request.
    pub async fn get_crawl_request(&self, id: &str) -> Result<CrawlRequest, WaterCrawlError> {
        let req = self.request(Method::GET, &job_path(id, ""));
        self.call_json(req).await
    }

    /// Validates and submits a crawl request.
    pub async fn create_crawl_request(
        &self,
        input: &CreateCrawlRequestInput,
    ) -> Result<CrawlRequest, WaterCrawlError> {
        input.validate()?;
        let req = self.request(Method::POST, CRAWL_REQUESTS_PATH).json(input);
        self.call_json(req).await
    }

    /// Stops a running crawl request.
    pub async fn stop_crawl_request(&self, id: &str) -> Result<(), WaterCrawlError> {
        let req = self.request(Method::DELETE, &job_path(id, ""));
        let resp = self.send(req.timeout(self.config.request_timeout)).await?;
        read_body(resp).await.map(|_| ())
    }

    /// Downloads the accumulated result, normalized to an object.
    pub async fn download_crawl_request(&self, id: &str) -> Result<JsonObject, WaterCrawlError> {
        fetch_result(self, id).await
    }

    /// Lists the per-page results of a crawl request.
    pub async fn get_crawl_request_results(
        &self,
        id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<CrawlResultList, WaterCrawlError> {
        let req = self
            .request(Method::GET, &job_path(id, "results/"))
            .query(&[("page", page), ("page_size", page_size)]);
        self.call_json(req).await
    }

    /// Starts building a monitor for a job's status stream.
    pub fn monitor(&self, id: impl Into<String>) -> MonitorBuilder {
        MonitorBuilder::new(Arc::new(self.clone()), id)
            .download_timeout(self.config.download_timeout)
    }

    /// Starts building a scrape of `target`.
    pub fn scrape(&self, target: impl Into<CrawlTarget>) -> ScrapeBuilder {
        ScrapeBuilder::new(Arc::new(self.clone()), Some(target.into()))
            .download_timeout(self.config.download_timeout)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.config.endpoint(path))
            .header("X-API-Key", &self.config.api_key)
            .header(header::ACCEPT, "application/json")
            .header(header::ACCEPT_LANGUAGE, "en-US")
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, WaterCrawlError> {
        let resp = req.send().await.map_err(WaterCrawlError::from)?;
        debug!(
            event = "http.response",
            domain = "http",
            status = resp.status().as_u16(),
            url_path = resp.url().path()
        );
        Ok(resp)
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, WaterCrawlError> {
        let resp = self.send(req.timeout(self.config.request_timeout)).await?;
        let body = read_body(resp)
            .await?
            .ok_or_else(|| WaterCrawlError::decode("expected a JSON body, got 204 No Content"))?;
        serde_json::from_slice(&body)
            .map_err(|e| WaterCrawlError::decode(format!("failed to decode response: {e}")))
    }
}

#[async_trait::async_trait]
impl CrawlService for WaterCrawlClient {
    async fn create_job(
        &self,
        input: &CreateCrawlRequestInput,
    ) -> Result<CrawlRequest, WaterCrawlError> {
        self.create_crawl_request(input).await
    }

    async fn open_status_stream(&self, job_id: &str) -> Result<ByteStream, WaterCrawlError> {
        // No overall timeout: the server keeps this response open.
        let req = self.request(Method::GET, &job_path(job_id, "status/"));
        let resp = ensure_success(self.send(req).await?).await?;
        let body = resp.bytes_stream().map(|chunk| {
            chunk.map_err(|e| WaterCrawlError::transport(format!("status stream read failed: {e}")))
        });
        Ok(Box::pin(body))
    }

    async fn fetch_accumulated_result(&self, job_id: &str) -> Result<Bytes, WaterCrawlError> {
        let req = self.request(Method::GET, &job_path(job_id, "download/"));
        let resp = self.send(req.timeout(self.config.request_timeout)).await?;
        Ok(read_body(resp).await?.unwrap_or_default())
    }
}

fn job_path(id: &str, suffix: &str) -> String {
    format!("{CRAWL_REQUESTS_PATH}{id}/{suffix}")
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, WaterCrawlError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(api_error_from_body(status.as_u16(), &body))
}

/// Reads a successful body; `204 No Content` yields `None`.
async fn read_body(resp: reqwest::Response) -> Result<Option<Bytes>, WaterCrawlError> {
    let resp = ensure_success(resp).await?;
    if resp.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    let body = resp
        .bytes()
        .await
        .map_err(|e| WaterCrawlError::transport(format!("failed to read response body: {e}")))?;
    Ok(Some(body))
}

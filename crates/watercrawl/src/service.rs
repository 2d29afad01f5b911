use std::pin::Pin;

use bytes::Bytes;

use crate::errors::WaterCrawlError;
use crate::model::{CrawlRequest, CreateCrawlRequestInput};

/// Raw body of a live status stream.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, WaterCrawlError>> + Send + 'static>>;

/// Network operations the monitor and scrape orchestrator depend on.
///
/// `WaterCrawlClient` is the HTTP implementation; tests drive the core with
/// in-memory implementations.
#[async_trait::async_trait]
pub trait CrawlService: Send + Sync {
    /// Submits a new crawl job.
    async fn create_job(
        &self,
        input: &CreateCrawlRequestInput,
    ) -> Result<CrawlRequest, WaterCrawlError>;

    /// Opens the server-pushed status stream for a job.
    ///
    /// Returns once the response headers arrived with a success status; the
    /// body is read lazily.
    async fn open_status_stream(&self, job_id: &str) -> Result<ByteStream, WaterCrawlError>;

    /// Downloads the job's accumulated output as raw bytes.
    async fn fetch_accumulated_result(&self, job_id: &str) -> Result<Bytes, WaterCrawlError>;
}

//! Async client for the WaterCrawl crawling API.
//!
//! Besides plain request/response calls, the crate follows a job's
//! server-pushed status stream as a sequence of typed [`Event`]s and offers a
//! one-call scrape that creates a job, waits for it and returns its result.
//!
//! # Scrape a page
//!
//! ```no_run
//! use watercrawl::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), WaterCrawlError> {
//! let client = WaterCrawlClient::from_env()?;
//!
//! let outcome = client.scrape("https://example.com").run().await?;
//! match outcome.into_result() {
//!     Ok(page) => println!("{}", serde_json::Value::Object(page)),
//!     Err(failure) => eprintln!("scrape failed: {failure}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Follow a job's events
//!
//! ```no_run
//! use watercrawl::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), WaterCrawlError> {
//! let client = WaterCrawlClient::from_env()?;
//! let mut events = client.monitor("job-uuid").download_results(true).start().await?;
//!
//! while let Some(event) = events.next_event().await {
//!     println!("{}: {}", event.kind(), event.payload());
//! }
//! events.finish().await?;
//! # Ok(())
//! # }
//! ```

/// HTTP implementation of the WaterCrawl API.
pub mod client;
/// Client configuration and environment loading.
pub mod config;
/// Line decoder turning a status stream body into events.
pub mod decoder;
/// Public error type.
pub mod errors;
/// Status stream event types.
pub mod event;
/// Result download and normalization.
pub mod fetcher;
/// Request/response payload types.
pub mod model;
/// Status stream monitor, event stream handle and cancellation handle.
pub mod monitor;
/// Tracing subscriber setup.
pub mod observability;
/// Scrape orchestration and outcome types.
pub mod orchestrator;
/// Common imports for typical usage.
pub mod prelude;
/// Network seam used by the monitor and the orchestrator.
pub mod service;

#[cfg(test)]
mod testing;

pub use client::WaterCrawlClient;
pub use config::ClientConfig;
pub use errors::WaterCrawlError;
pub use event::Event;
pub use fetcher::{fetch_result, normalize_download};
pub use model::{
    CrawlOptions, CrawlRequest, CrawlRequestList, CrawlResult, CrawlResultList, CrawlTarget,
    CreateCrawlRequestInput, JsonObject, Page,
};
pub use monitor::{AbortHandle, EventStream, MonitorBuilder, StreamEnd};
pub use observability::init_observability;
pub use orchestrator::{Outcome, ScrapeBuilder, ScrapeFailure};
pub use service::{ByteStream, CrawlService};

//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, ClientConfig, CrawlOptions, CrawlRequest, CrawlTarget, CreateCrawlRequestInput,
    Event, EventStream, JsonObject, MonitorBuilder, Outcome, ScrapeBuilder, ScrapeFailure,
    StreamEnd, WaterCrawlClient, WaterCrawlError,
};

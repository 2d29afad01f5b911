use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::WaterCrawlError;

/// JSON object used for options and result payloads.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Target of a crawl request: one URL or a list of URLs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CrawlTarget {
    /// A single URL.
    One(String),
    /// Several URLs crawled by the same request.
    Many(Vec<String>),
}

impl CrawlTarget {
    /// Checks that the target names at least one non-empty URL.
    ///
    /// The error field points at the offending element (`url` or `url[i]`).
    pub fn validate(&self) -> Result<(), WaterCrawlError> {
        match self {
            CrawlTarget::One(url) if url.trim().is_empty() => Err(WaterCrawlError::validation(
                "url",
                "URL cannot be empty",
            )),
            CrawlTarget::One(_) => Ok(()),
            CrawlTarget::Many(urls) if urls.is_empty() => Err(WaterCrawlError::validation(
                "url",
                "URL list cannot be empty",
            )),
            CrawlTarget::Many(urls) => match urls.iter().position(|u| u.trim().is_empty()) {
                Some(idx) => Err(WaterCrawlError::validation(
                    format!("url[{idx}]"),
                    "URL cannot be empty",
                )),
                None => Ok(()),
            },
        }
    }
}

impl From<&str> for CrawlTarget {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for CrawlTarget {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<Vec<String>> for CrawlTarget {
    fn from(value: Vec<String>) -> Self {
        Self::Many(value)
    }
}

impl From<Vec<&str>> for CrawlTarget {
    fn from(value: Vec<&str>) -> Self {
        Self::Many(value.into_iter().map(ToOwned::to_owned).collect())
    }
}

/// Options sent with a crawl request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlOptions {
    #[serde(default, deserialize_with = "null_as_default")]
    pub spider_options: JsonObject,
    #[serde(default, deserialize_with = "null_as_default")]
    pub page_options: JsonObject,
    #[serde(default, deserialize_with = "null_as_default")]
    pub plugin_options: JsonObject,
}

/// A crawl job as reported by the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub uuid: String,
    #[serde(default)]
    pub url: Option<CrawlTarget>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    /// Completion percentage in `0..=100`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: CrawlOptions,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of a create-crawl-request call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateCrawlRequestInput {
    pub url: Option<CrawlTarget>,
    #[serde(default)]
    pub options: CrawlOptions,
}

impl CreateCrawlRequestInput {
    /// Creates an input for the given target with default options.
    pub fn new(url: impl Into<CrawlTarget>) -> Self {
        Self {
            url: Some(url.into()),
            options: CrawlOptions::default(),
        }
    }

    /// Replaces the request options.
    pub fn options(mut self, options: CrawlOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the input before it is submitted.
    pub fn validate(&self) -> Result<(), WaterCrawlError> {
        match &self.url {
            Some(target) => target.validate(),
            None => Err(WaterCrawlError::validation("url", "URL is required")),
        }
    }
}

/// A single page result of a crawl job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default)]
    pub data: Option<JsonObject>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of a paginated listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

pub type CrawlRequestList = Page<CrawlRequest>;
pub type CrawlResultList = Page<CrawlResult>;

/// Reads an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses an RFC 3339 timestamp; `null`, `""` and unparseable text become `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|text| !text.trim().is_empty())
        .and_then(|text| DateTime::parse_from_rfc3339(text.trim()).ok())
        .map(|parsed| parsed.with_timezone(&Utc)))
}

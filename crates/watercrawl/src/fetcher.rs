use std::time::Duration;

use tracing::debug;

use crate::errors::WaterCrawlError;
use crate::model::JsonObject;
use crate::monitor::AbortHandle;
use crate::service::CrawlService;

/// Key under which array-shaped downloads are wrapped.
pub const RESULTS_KEY: &str = "results";

/// Normalizes a download body into an object.
///
/// Objects are returned as-is and arrays are wrapped under `"results"`. Any
/// other top-level shape is a decode error.
pub fn normalize_download(body: &[u8]) -> Result<JsonObject, WaterCrawlError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| WaterCrawlError::decode(format!("failed to decode download body: {e}")))?;
    match value {
        serde_json::Value::Object(object) => Ok(object),
        serde_json::Value::Array(items) => {
            let mut object = JsonObject::new();
            object.insert(RESULTS_KEY.to_string(), serde_json::Value::Array(items));
            Ok(object)
        }
        other => Err(WaterCrawlError::decode(format!(
            "download body must be an object or array, got {}",
            json_kind(&other)
        ))),
    }
}

/// Downloads and normalizes a job's accumulated result.
pub async fn fetch_result(
    service: &dyn CrawlService,
    job_id: &str,
) -> Result<JsonObject, WaterCrawlError> {
    let body = service.fetch_accumulated_result(job_id).await?;
    normalize_download(&body)
}

/// `fetch_result` bounded by its own timeout and abandoned when `abort` fires.
pub(crate) async fn fetch_result_within(
    service: &dyn CrawlService,
    job_id: &str,
    budget: Duration,
    abort: &AbortHandle,
) -> Result<JsonObject, WaterCrawlError> {
    debug!(
        event = "download.started",
        domain = "download",
        job_id,
        budget_ms = budget.as_millis() as u64
    );
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(WaterCrawlError::Cancelled),
        fetched = tokio::time::timeout(budget, fetch_result(service, job_id)) => match fetched {
            Ok(result) => result,
            Err(_) => Err(WaterCrawlError::timeout(
                "download",
                format!("result download for {job_id} exceeded {}ms", budget.as_millis()),
            )),
        },
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

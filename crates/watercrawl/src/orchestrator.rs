use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::errors::WaterCrawlError;
use crate::event::Event;
use crate::fetcher::fetch_result_within;
use crate::model::{CrawlOptions, CrawlTarget, CreateCrawlRequestInput, JsonObject};
use crate::monitor::{AbortHandle, DEFAULT_DOWNLOAD_TIMEOUT, EventStream, MonitorBuilder};
use crate::service::CrawlService;

const STATUS_COMPLETED: &str = "completed";
const STATUS_FAILED: &str = "failed";

/// Terminal result of a scrape.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// An authoritative result was obtained.
    Delivered(JsonObject),
    /// The job reported completion but no result could be obtained; carries
    /// the last known state payload.
    Degraded(JsonObject),
    /// The job failed or the stream ended without a usable result.
    Failed(ScrapeFailure),
}

impl Outcome {
    /// Returns the delivered or degraded payload.
    pub fn payload(&self) -> Option<&JsonObject> {
        match self {
            Outcome::Delivered(payload) | Outcome::Degraded(payload) => Some(payload),
            Outcome::Failed(_) => None,
        }
    }

    /// Returns whether an authoritative result was obtained.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Delivered(_))
    }

    /// Converts to a `Result`, treating a degraded outcome as success.
    pub fn into_result(self) -> Result<JsonObject, ScrapeFailure> {
        match self {
            Outcome::Delivered(payload) | Outcome::Degraded(payload) => Ok(payload),
            Outcome::Failed(failure) => Err(failure),
        }
    }
}

/// Why a scrape ended in `Outcome::Failed`.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ScrapeFailure {
    /// A state event reported the failure status.
    #[error("crawl failed with status: {status}")]
    JobFailed { status: String },
    /// The stream ended before delivering any event.
    #[error("no events received from crawl request (timeout or connection error)")]
    NoEvents,
    /// The stream ended after an error event and nothing better.
    #[error("crawl request failed with error: {payload}")]
    ErrorEvent { payload: serde_json::Value },
    /// The stream ended with events but no result.
    #[error(
        "received {event_count} events (last progress: {last_progress:.2}%) but no valid result event"
    )]
    NoResult { event_count: u64, last_progress: f64 },
}

/// Builder for a single "submit and wait" scrape.
pub struct ScrapeBuilder {
    service: Arc<dyn CrawlService>,
    target: Option<CrawlTarget>,
    options: CrawlOptions,
    wait_for_completion: bool,
    download_result: bool,
    download_timeout: Duration,
    abort: AbortHandle,
}

impl ScrapeBuilder {
    /// Creates a scrape of `target` served by `service`.
    ///
    /// Waits for completion and downloads the result by default.
    pub fn new(service: Arc<dyn CrawlService>, target: Option<CrawlTarget>) -> Self {
        let mut spider_options = JsonObject::new();
        spider_options.insert("allowed_domains".into(), serde_json::json!(["*"]));
        Self {
            service,
            target,
            options: CrawlOptions {
                spider_options,
                ..CrawlOptions::default()
            },
            wait_for_completion: true,
            download_result: true,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            abort: AbortHandle::new(),
        }
    }

    /// Sets page options (content extraction settings).
    pub fn page_options(mut self, options: JsonObject) -> Self {
        self.options.page_options = options;
        self
    }

    /// Sets plugin options.
    pub fn plugin_options(mut self, options: JsonObject) -> Self {
        self.options.plugin_options = options;
        self
    }

    /// Overrides spider options (defaults to `{"allowed_domains": ["*"]}`).
    pub fn spider_options(mut self, options: JsonObject) -> Self {
        self.options.spider_options = options;
        self
    }

    /// When false, returns right after submission without watching the job.
    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    /// Whether to download the accumulated result instead of relying on
    /// streamed payloads.
    pub fn download_result(mut self, download: bool) -> Self {
        self.download_result = download;
        self
    }

    /// Sets the budget for each result download.
    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Uses a caller-owned abort handle.
    pub fn abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Submits the job and, when waiting, folds its status stream into one
    /// outcome.
    ///
    /// `Err` is returned only for failures before the stream is established:
    /// validation, submission, or opening the stream. Aborting during either
    /// request yields `Err(Cancelled)`.
    pub async fn run(self) -> Result<Outcome, WaterCrawlError> {
        let input = CreateCrawlRequestInput {
            url: self.target,
            options: self.options,
        };
        input.validate()?;

        let job = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return Err(WaterCrawlError::Cancelled),
            created = self.service.create_job(&input) => created?,
        };
        info!(
            event = "scrape.job_created",
            domain = "scrape",
            job_id = %job.uuid,
            status = %job.status
        );

        if !self.wait_for_completion {
            let mut payload = JsonObject::new();
            payload.insert("uuid".into(), job.uuid.into());
            payload.insert("status".into(), job.status.into());
            return Ok(Outcome::Delivered(payload));
        }

        let ctx = FoldContext {
            service: self.service,
            job_id: job.uuid,
            download_result: self.download_result,
            download_timeout: self.download_timeout,
            abort: self.abort,
        };
        let span = info_span!("scrape", job_id = %ctx.job_id);
        ctx.wait().instrument(span).await
    }
}

struct FoldContext {
    service: Arc<dyn CrawlService>,
    job_id: String,
    download_result: bool,
    download_timeout: Duration,
    abort: AbortHandle,
}

impl FoldContext {
    async fn wait(&self) -> Result<Outcome, WaterCrawlError> {
        let stream = MonitorBuilder::new(self.service.clone(), self.job_id.clone())
            .download_results(self.download_result)
            .download_timeout(self.download_timeout)
            .abort_handle(self.abort.clone())
            .start()
            .await?;
        Ok(fold_stream(self, stream).await)
    }

    async fn download(&self) -> Option<JsonObject> {
        match fetch_result_within(
            self.service.as_ref(),
            &self.job_id,
            self.download_timeout,
            &self.abort,
        )
        .await
        {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(
                    event = "scrape.download_failed",
                    domain = "scrape",
                    job_id = %self.job_id,
                    error = %err
                );
                None
            }
        }
    }
}

async fn fold_stream(ctx: &FoldContext, mut stream: EventStream) -> Outcome {
    let mut fold = ScrapeFold::default();
    while let Some(event) = stream.next_event().await {
        match fold.observe(event) {
            Step::Continue => {}
            Step::Finish(outcome) => return outcome,
            Step::StateCompleted(state) => {
                if ctx.download_result
                    && let Some(result) = ctx.download().await
                {
                    return Outcome::Delivered(result);
                }
                return Outcome::Degraded(state);
            }
            Step::CompletedSignal => {
                if !ctx.download_result {
                    continue;
                }
                match ctx.download().await {
                    Some(result) if !result.is_empty() => return Outcome::Delivered(result),
                    Some(_) => debug!(
                        event = "scrape.download_empty",
                        domain = "scrape",
                        job_id = %ctx.job_id
                    ),
                    None => {}
                }
            }
        }
    }

    match stream.finish().await {
        Ok(end) => debug!(
            event = "scrape.stream_ended",
            domain = "scrape",
            job_id = %ctx.job_id,
            reason = ?end,
            events = fold.event_count
        ),
        Err(err) => warn!(
            event = "scrape.stream_failed",
            domain = "scrape",
            job_id = %ctx.job_id,
            error = %err,
            events = fold.event_count
        ),
    }
    fold.conclude()
}

/// What the fold loop must do after observing an event.
#[derive(Debug, PartialEq)]
enum Step {
    Continue,
    Finish(Outcome),
    /// A state event reported completion; try one download.
    StateCompleted(JsonObject),
    /// A `completed` event arrived; try one download if enabled.
    CompletedSignal,
}

/// Running state kept while consuming a status stream.
#[derive(Debug, Default)]
struct ScrapeFold {
    event_count: u64,
    last_progress: f64,
    last_error: Option<serde_json::Value>,
    last_state: Option<JsonObject>,
}

impl ScrapeFold {
    fn observe(&mut self, event: Event) -> Step {
        self.event_count += 1;
        debug!(
            event = "scrape.event",
            domain = "scrape",
            seq = self.event_count,
            kind = event.kind()
        );
        match event {
            Event::Result(serde_json::Value::Object(payload)) => {
                Step::Finish(Outcome::Delivered(payload))
            }
            Event::Result(other) => {
                warn!(
                    event = "scrape.result_not_object",
                    domain = "scrape",
                    payload = %other
                );
                Step::Continue
            }
            Event::Error(payload) => {
                self.last_error = Some(payload);
                Step::Continue
            }
            Event::Progress(payload) => {
                if let Some(progress) = payload.get("progress").and_then(|v| v.as_f64()) {
                    self.last_progress = progress;
                }
                Step::Continue
            }
            Event::State(serde_json::Value::Object(state)) => {
                let status = state
                    .get("status")
                    .and_then(|v| v.as_str())
                    .map(ToOwned::to_owned);
                self.last_state = Some(state.clone());
                match status.as_deref() {
                    Some(STATUS_COMPLETED) => Step::StateCompleted(state),
                    Some(STATUS_FAILED) => Step::Finish(Outcome::Failed(ScrapeFailure::JobFailed {
                        status: STATUS_FAILED.to_string(),
                    })),
                    _ => Step::Continue,
                }
            }
            Event::Completed(_) => Step::CompletedSignal,
            Event::State(_) | Event::Other { .. } => Step::Continue,
        }
    }

    fn conclude(self) -> Outcome {
        if let Some(state) = self.last_state {
            return Outcome::Degraded(state);
        }
        if self.event_count == 0 {
            return Outcome::Failed(ScrapeFailure::NoEvents);
        }
        if let Some(payload) = self.last_error {
            return Outcome::Failed(ScrapeFailure::ErrorEvent { payload });
        }
        Outcome::Failed(ScrapeFailure::NoResult {
            event_count: self.event_count,
            last_progress: self.last_progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeService, FetchBehavior, StreamScript, frame};
    use serde_json::json;

    fn object(value: serde_json::Value) -> JsonObject {
        match value {
            serde_json::Value::Object(object) => object,
            other => panic!("expected object, got {other}"),
        }
    }

    fn scrape(service: &Arc<FakeService>) -> ScrapeBuilder {
        ScrapeBuilder::new(service.clone(), Some(CrawlTarget::from("https://example.com")))
    }

    #[tokio::test]
    async fn invalid_targets_fail_before_any_request() {
        let cases: Vec<(Option<CrawlTarget>, &str)> = vec![
            (None, "url"),
            (Some(CrawlTarget::from("")), "url"),
            (Some(CrawlTarget::Many(Vec::new())), "url"),
            (Some(CrawlTarget::from(vec!["https://a.example", ""])), "url[1]"),
        ];
        for (target, expected_field) in cases {
            let service = Arc::new(FakeService::builder().build());
            let err = ScrapeBuilder::new(service.clone(), target)
                .run()
                .await
                .expect_err("validation should fail");
            assert!(
                matches!(&err, WaterCrawlError::Validation { field, .. } if field == expected_field),
                "unexpected error: {err:?}"
            );
            assert_eq!(service.creates(), 0);
            assert_eq!(service.opens(), 0);
        }
    }

    #[tokio::test]
    async fn submission_failure_propagates_verbatim() {
        let service = Arc::new(
            FakeService::builder()
                .create(Err(WaterCrawlError::api(402, "quota exceeded")))
                .build(),
        );
        let err = scrape(&service).run().await.expect_err("create fails");
        assert_eq!(err, WaterCrawlError::api(402, "quota exceeded"));
        assert_eq!(service.opens(), 0);
    }

    #[tokio::test]
    async fn no_wait_returns_job_snapshot() {
        let service = Arc::new(FakeService::builder().build());
        let outcome = scrape(&service)
            .wait_for_completion(false)
            .run()
            .await
            .expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Delivered(object(json!({"uuid": "job-1", "status": "new"})))
        );
        assert_eq!(service.opens(), 0);
    }

    #[tokio::test]
    async fn result_event_delivers_without_download() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::eof(vec![
                    frame("state", json!({"status": "running"})),
                    frame("progress", json!({"progress": 50})),
                    frame("result", json!({"content": "x"})),
                ]))
                .build(),
        );
        let outcome = scrape(&service)
            .download_result(false)
            .run()
            .await
            .expect("outcome");
        assert_eq!(outcome, Outcome::Delivered(object(json!({"content": "x"}))));
        assert_eq!(service.fetches(), 0);
    }

    #[tokio::test]
    async fn result_event_is_augmented_when_downloading() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::eof(vec![frame(
                    "result",
                    json!({"content": "inline"}),
                )]))
                .fetch(FetchBehavior::Body(r#"{"content":"downloaded"}"#.into()))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Delivered(object(json!({"content": "downloaded"})))
        );
    }

    #[tokio::test]
    async fn completed_state_with_failed_download_is_degraded() {
        let state = json!({"status": "completed", "uuid": "job-1"});
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::then_pending(vec![frame("state", state.clone())]))
                .fetch(FetchBehavior::Error(WaterCrawlError::api(500, "boom")))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(outcome, Outcome::Degraded(object(state)));
        assert_eq!(service.fetches(), 1);
    }

    #[tokio::test]
    async fn completed_state_with_download_delivers() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::then_pending(vec![frame(
                    "state",
                    json!({"status": "completed"}),
                )]))
                .fetch(FetchBehavior::Body(r#"[{"content":"a"}]"#.into()))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Delivered(object(json!({"results": [{"content": "a"}]})))
        );
    }

    #[tokio::test]
    async fn completed_state_without_download_is_degraded() {
        let state = json!({"status": "completed"});
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::then_pending(vec![frame("state", state.clone())]))
                .build(),
        );
        let outcome = scrape(&service)
            .download_result(false)
            .run()
            .await
            .expect("outcome");
        assert_eq!(outcome, Outcome::Degraded(object(state)));
        assert_eq!(service.fetches(), 0);
        // Returning early must still release the stream.
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.releases() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream released");
    }

    #[tokio::test]
    async fn failed_state_fails() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::then_pending(vec![frame(
                    "state",
                    json!({"status": "failed"}),
                )]))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Failed(ScrapeFailure::JobFailed {
                status: "failed".into()
            })
        );
    }

    #[tokio::test]
    async fn empty_stream_fails_with_no_events() {
        let service = Arc::new(FakeService::builder().build());
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(outcome, Outcome::Failed(ScrapeFailure::NoEvents));
        assert!(
            ScrapeFailure::NoEvents
                .to_string()
                .contains("no events received")
        );
    }

    #[tokio::test]
    async fn completed_event_with_empty_download_keeps_consuming() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::eof(vec![
                    frame("error", json!({"message": "page timeout"})),
                    frame("completed", json!({})),
                ]))
                .fetch(FetchBehavior::Body("{}".into()))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Failed(ScrapeFailure::ErrorEvent {
                payload: json!({"message": "page timeout"})
            })
        );
        assert_eq!(service.fetches(), 1);
    }

    #[tokio::test]
    async fn completed_event_with_download_delivers() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::then_pending(vec![frame("completed", json!({}))]))
                .fetch(FetchBehavior::Body(r#"{"content":"final"}"#.into()))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(outcome, Outcome::Delivered(object(json!({"content": "final"}))));
    }

    #[tokio::test]
    async fn completed_event_without_download_passes_through() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::eof(vec![
                    frame("completed", json!({})),
                    frame("state", json!({"status": "running", "progress": 100})),
                ]))
                .build(),
        );
        let outcome = scrape(&service)
            .download_result(false)
            .run()
            .await
            .expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Degraded(object(json!({"status": "running", "progress": 100})))
        );
        assert_eq!(service.fetches(), 0);
    }

    #[tokio::test]
    async fn progress_only_stream_reports_count_and_progress() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::eof(vec![
                    frame("progress", json!({"progress": 12.5})),
                    frame("progress", json!({"progress": "n/a"})),
                    frame("result", json!(["not", "an", "object"])),
                ]))
                .build(),
        );
        let outcome = scrape(&service)
            .download_result(false)
            .run()
            .await
            .expect("outcome");
        let expected = ScrapeFailure::NoResult {
            event_count: 3,
            last_progress: 12.5,
        };
        assert_eq!(
            expected.to_string(),
            "received 3 events (last progress: 12.50%) but no valid result event"
        );
        assert_eq!(outcome, Outcome::Failed(expected));
    }

    #[tokio::test]
    async fn read_failure_falls_back_to_last_state() {
        let state = json!({"status": "running"});
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::then_error(
                    vec![frame("state", state.clone())],
                    WaterCrawlError::Transport("connection reset".into()),
                ))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(outcome, Outcome::Degraded(object(state)));
    }

    #[tokio::test]
    async fn stream_open_failure_is_an_error() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::OpenError(WaterCrawlError::Transport(
                    "connection refused".into(),
                )))
                .build(),
        );
        let err = scrape(&service).run().await.expect_err("open fails");
        assert!(matches!(err, WaterCrawlError::Transport(_)));
        assert_eq!(service.creates(), 1);
    }

    #[tokio::test]
    async fn abort_ends_fold_with_fallback() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::then_pending(vec![frame(
                    "progress",
                    json!({"progress": 30}),
                )]))
                .build(),
        );
        let abort = AbortHandle::new();
        let run = tokio::spawn(scrape(&service).abort_handle(abort.clone()).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        abort.abort();
        let outcome = run.await.expect("join").expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Failed(ScrapeFailure::NoResult {
                event_count: 1,
                last_progress: 30.0,
            })
        );
    }

    #[tokio::test]
    async fn untyped_frames_count_as_events() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::eof(vec![
                    "data: {\"data\": {\"x\": 1}}\n".to_string(),
                ]))
                .build(),
        );
        let outcome = scrape(&service).run().await.expect("outcome");
        assert_eq!(
            outcome,
            Outcome::Failed(ScrapeFailure::NoResult {
                event_count: 1,
                last_progress: 0.0,
            })
        );
    }

    #[tokio::test]
    async fn abort_while_submitting_returns_cancelled() {
        let service = Arc::new(FakeService::builder().stall_create().build());
        let abort = AbortHandle::new();
        let run = tokio::spawn(scrape(&service).abort_handle(abort.clone()).run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.abort();

        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run returned after abort")
            .expect("join");
        assert_eq!(result, Err(WaterCrawlError::Cancelled));
        assert_eq!(service.creates(), 1);
        assert_eq!(service.opens(), 0);
    }

    #[tokio::test]
    async fn abort_while_opening_stream_returns_cancelled() {
        let service = Arc::new(
            FakeService::builder()
                .stream(StreamScript::OpenStall)
                .build(),
        );
        let abort = AbortHandle::new();
        let run = tokio::spawn(scrape(&service).abort_handle(abort.clone()).run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.abort();

        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run returned after abort")
            .expect("join");
        assert_eq!(result, Err(WaterCrawlError::Cancelled));
        assert_eq!(service.opens(), 1);
    }

    #[test]
    fn non_object_state_is_counted_only() {
        let mut fold = ScrapeFold::default();
        assert_eq!(fold.observe(Event::State(json!("completed"))), Step::Continue);
        assert!(fold.last_state.is_none());
        assert_eq!(
            fold.conclude(),
            Outcome::Failed(ScrapeFailure::NoResult {
                event_count: 1,
                last_progress: 0.0,
            })
        );
    }
}

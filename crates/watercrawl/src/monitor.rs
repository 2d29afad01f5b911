use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument as _, debug, info_span, warn};

use crate::decoder::{EventFrames, decode_events};
use crate::errors::WaterCrawlError;
use crate::event::Event;
use crate::fetcher::fetch_result_within;
use crate::service::CrawlService;

/// Default budget for a result download issued while monitoring.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle used to cancel a monitor or scrape.
///
/// Clones share the same signal. Aborting is sticky: once fired it stays
/// fired.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Creates a handle that has not fired yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Returns whether cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation is requested.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a status stream ended when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the stream.
    Eof,
    /// The abort handle fired.
    Cancelled,
    /// The consumer stopped reading before the stream ended.
    ConsumerClosed,
}

/// Builder for monitoring one crawl job's status stream.
pub struct MonitorBuilder {
    service: Arc<dyn CrawlService>,
    job_id: String,
    download_results: bool,
    download_timeout: Duration,
    stream_buffer_capacity: usize,
    abort: AbortHandle,
}

impl MonitorBuilder {
    /// Creates a monitor for `job_id` served by `service`.
    pub fn new(service: Arc<dyn CrawlService>, job_id: impl Into<String>) -> Self {
        Self {
            service,
            job_id: job_id.into(),
            download_results: false,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            stream_buffer_capacity: 1,
            abort: AbortHandle::new(),
        }
    }

    /// Replaces `result` event payloads with the downloaded job result.
    pub fn download_results(mut self, enabled: bool) -> Self {
        self.download_results = enabled;
        self
    }

    /// Sets the budget for each result download.
    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Sets the bounded hand-off buffer between the stream task and the
    /// consumer. Defaults to a single slot.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    /// Uses a caller-owned abort handle instead of a fresh one.
    pub fn abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Opens the status stream and starts delivering events.
    ///
    /// Fails without returning a handle when the stream cannot be established,
    /// or with `Cancelled` when the abort handle fires before it opens.
    pub async fn start(self) -> Result<EventStream, WaterCrawlError> {
        if self.job_id.trim().is_empty() {
            return Err(WaterCrawlError::validation(
                "job_id",
                "job id must not be empty",
            ));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(WaterCrawlError::validation(
                "stream_buffer_capacity",
                "stream_buffer_capacity must be greater than 0",
            ));
        }

        let bytes_stream = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return Err(WaterCrawlError::Cancelled),
            opened = self.service.open_status_stream(&self.job_id) => opened?,
        };
        debug!(
            event = "stream.opened",
            domain = "stream",
            job_id = %self.job_id,
            download_results = self.download_results
        );

        let (tx, rx) = mpsc::channel(self.stream_buffer_capacity);
        let (end_tx, end_rx) = oneshot::channel();
        let task = StreamTask {
            service: self.service,
            job_id: self.job_id.clone(),
            download_results: self.download_results,
            download_timeout: self.download_timeout,
            abort: self.abort.clone(),
        };
        let span = info_span!("status_stream", job_id = %self.job_id);
        tokio::spawn(stream_task(task, decode_events(bytes_stream), tx, end_tx).instrument(span));

        Ok(EventStream {
            job_id: self.job_id,
            rx,
            end_rx,
            abort: self.abort,
        })
    }
}

/// Consumer side of a monitored status stream.
///
/// Call `next_event()` until it returns `None`, then `finish()` for the
/// terminal state. Dropping the handle stops the stream task.
pub struct EventStream {
    job_id: String,
    rx: mpsc::Receiver<Event>,
    end_rx: oneshot::Receiver<Result<StreamEnd, WaterCrawlError>>,
    abort: AbortHandle,
}

impl EventStream {
    /// Returns the monitored job id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Returns a handle that cancels this stream.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Waits for the next event in wire order.
    ///
    /// Returns `None` once the stream ended or was aborted. Events still
    /// buffered when the abort fired are not delivered.
    pub async fn next_event(&mut self) -> Option<Event> {
        if self.abort.is_aborted() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Stops reading (if still running) and returns how the stream ended.
    ///
    /// A read failure on the underlying connection is returned as `Err`.
    pub async fn finish(mut self) -> Result<StreamEnd, WaterCrawlError> {
        self.rx.close();
        match self.end_rx.await {
            Ok(end) => end,
            Err(_) => Err(WaterCrawlError::protocol_msg(format!(
                "stream task for job {} ended without a terminal state",
                self.job_id
            ))),
        }
    }
}

struct StreamTask {
    service: Arc<dyn CrawlService>,
    job_id: String,
    download_results: bool,
    download_timeout: Duration,
    abort: AbortHandle,
}

async fn stream_task(
    task: StreamTask,
    frames: EventFrames,
    tx: mpsc::Sender<Event>,
    end_tx: oneshot::Sender<Result<StreamEnd, WaterCrawlError>>,
) {
    // `pump` owns the frames, so the connection is dropped when it returns.
    let end = pump(&task, frames, &tx).await;
    match &end {
        Ok(reason) => debug!(
            event = "stream.released",
            domain = "stream",
            job_id = %task.job_id,
            reason = ?reason
        ),
        Err(err) => warn!(
            event = "stream.released",
            domain = "stream",
            job_id = %task.job_id,
            error = %err
        ),
    }
    let _ = end_tx.send(end);
}

async fn pump(
    task: &StreamTask,
    mut frames: EventFrames,
    tx: &mpsc::Sender<Event>,
) -> Result<StreamEnd, WaterCrawlError> {
    loop {
        let next = tokio::select! {
            biased;
            _ = task.abort.cancelled() => return Ok(StreamEnd::Cancelled),
            _ = tx.closed() => return Ok(StreamEnd::ConsumerClosed),
            next = frames.next() => next,
        };
        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(err)) => return Err(err),
            None => return Ok(StreamEnd::Eof),
        };

        let event = if task.download_results {
            let augmented = tokio::select! {
                biased;
                _ = tx.closed() => return Ok(StreamEnd::ConsumerClosed),
                augmented = augment(task, event) => augmented,
            };
            match augmented {
                Ok(event) => event,
                Err(WaterCrawlError::Cancelled) => return Ok(StreamEnd::Cancelled),
                Err(err) => return Err(err),
            }
        } else {
            event
        };

        tokio::select! {
            biased;
            _ = task.abort.cancelled() => return Ok(StreamEnd::Cancelled),
            sent = tx.send(event) => {
                if sent.is_err() {
                    return Ok(StreamEnd::ConsumerClosed);
                }
            }
        }
    }
}

/// Swaps an object `result` payload for the downloaded job result.
///
/// Download failures keep the streamed payload; only cancellation is
/// returned as an error.
async fn augment(task: &StreamTask, event: Event) -> Result<Event, WaterCrawlError> {
    let Event::Result(payload) = event else {
        return Ok(event);
    };
    if !payload.is_object() {
        return Ok(Event::Result(payload));
    }
    match fetch_result_within(
        task.service.as_ref(),
        &task.job_id,
        task.download_timeout,
        &task.abort,
    )
    .await
    {
        Ok(downloaded) => {
            debug!(
                event = "stream.result_augmented",
                domain = "stream",
                job_id = %task.job_id,
                keys = downloaded.len() as u64
            );
            Ok(Event::Result(serde_json::Value::Object(downloaded)))
        }
        Err(WaterCrawlError::Cancelled) => Err(WaterCrawlError::Cancelled),
        Err(err) => {
            warn!(
                event = "stream.augment_failed",
                domain = "stream",
                job_id = %task.job_id,
                error = %err
            );
            Ok(Event::Result(payload))
        }
    }
}

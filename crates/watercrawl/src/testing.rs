//! In-memory `CrawlService` used by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;

use crate::errors::WaterCrawlError;
use crate::model::{CrawlOptions, CrawlRequest, CrawlTarget, CreateCrawlRequestInput};
use crate::service::{ByteStream, CrawlService};

/// Renders one `data:` line for the status stream.
pub(crate) fn frame(kind: &str, data: serde_json::Value) -> String {
    format!("data: {}\n", serde_json::json!({"type": kind, "data": data}))
}

pub(crate) fn sample_job(uuid: &str) -> CrawlRequest {
    CrawlRequest {
        uuid: uuid.to_string(),
        url: Some(CrawlTarget::from("https://example.com")),
        status: "new".to_string(),
        progress: 0.0,
        options: CrawlOptions::default(),
        created_at: None,
        updated_at: None,
    }
}

pub(crate) enum Ending {
    Eof,
    Pending,
    Error(WaterCrawlError),
}

pub(crate) enum StreamScript {
    Open { lines: Vec<String>, ending: Ending },
    OpenError(WaterCrawlError),
    /// The open request never completes.
    OpenStall,
}

impl StreamScript {
    pub(crate) fn eof(lines: Vec<String>) -> Self {
        Self::Open {
            lines,
            ending: Ending::Eof,
        }
    }

    pub(crate) fn then_pending(lines: Vec<String>) -> Self {
        Self::Open {
            lines,
            ending: Ending::Pending,
        }
    }

    pub(crate) fn then_error(lines: Vec<String>, err: WaterCrawlError) -> Self {
        Self::Open {
            lines,
            ending: Ending::Error(err),
        }
    }
}

#[derive(Clone)]
pub(crate) enum FetchBehavior {
    Body(String),
    Error(WaterCrawlError),
    Hang,
}

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct FakeService {
    create: Result<CrawlRequest, WaterCrawlError>,
    stall_create: bool,
    script: Mutex<Option<StreamScript>>,
    fetch: FetchBehavior,
    creates: AtomicUsize,
    opens: AtomicUsize,
    fetches: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl FakeService {
    pub(crate) fn builder() -> FakeServiceBuilder {
        FakeServiceBuilder {
            create: Ok(sample_job("job-1")),
            stall_create: false,
            script: StreamScript::eof(Vec::new()),
            fetch: FetchBehavior::Error(WaterCrawlError::api(404, "not found")),
        }
    }

    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of times an opened status stream has been dropped.
    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeServiceBuilder {
    create: Result<CrawlRequest, WaterCrawlError>,
    stall_create: bool,
    script: StreamScript,
    fetch: FetchBehavior,
}

impl FakeServiceBuilder {
    pub(crate) fn create(mut self, create: Result<CrawlRequest, WaterCrawlError>) -> Self {
        self.create = create;
        self
    }

    pub(crate) fn stall_create(mut self) -> Self {
        self.stall_create = true;
        self
    }

    pub(crate) fn stream(mut self, script: StreamScript) -> Self {
        self.script = script;
        self
    }

    pub(crate) fn fetch(mut self, fetch: FetchBehavior) -> Self {
        self.fetch = fetch;
        self
    }

    pub(crate) fn build(self) -> FakeService {
        FakeService {
            create: self.create,
            stall_create: self.stall_create,
            script: Mutex::new(Some(self.script)),
            fetch: self.fetch,
            creates: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl CrawlService for FakeService {
    async fn create_job(
        &self,
        _input: &CreateCrawlRequestInput,
    ) -> Result<CrawlRequest, WaterCrawlError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.stall_create {
            futures::future::pending::<()>().await;
        }
        self.create.clone()
    }

    async fn open_status_stream(&self, _job_id: &str) -> Result<ByteStream, WaterCrawlError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().expect("script lock").take();
        let (lines, ending) = match script {
            Some(StreamScript::Open { lines, ending }) => (lines, ending),
            Some(StreamScript::OpenError(err)) => return Err(err),
            Some(StreamScript::OpenStall) => futures::future::pending().await,
            None => {
                return Err(WaterCrawlError::protocol_msg(
                    "fake status stream opened twice",
                ));
            }
        };
        let tail: ByteStream = match ending {
            Ending::Eof => Box::pin(stream::empty()),
            Ending::Pending => Box::pin(stream::pending()),
            Ending::Error(err) => Box::pin(stream::iter(vec![Err(err)])),
        };
        let guard = ReleaseGuard(self.releases.clone());
        let body = stream::iter(lines.into_iter().map(|line| Ok(Bytes::from(line))))
            .chain(tail)
            .map(move |item| {
                let _held = &guard;
                item
            });
        Ok(Box::pin(body))
    }

    async fn fetch_accumulated_result(&self, _job_id: &str) -> Result<Bytes, WaterCrawlError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.fetch {
            FetchBehavior::Body(body) => Ok(Bytes::from(body.clone())),
            FetchBehavior::Error(err) => Err(err.clone()),
            FetchBehavior::Hang => futures::future::pending().await,
        }
    }
}

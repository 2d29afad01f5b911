use serde::{Deserialize, Serialize};

/// Wire shape of one status-stream frame: `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct EventFrame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Event pushed by the crawl status stream.
///
/// Known kinds get their own variant; anything else is carried through as
/// `Other`. Payloads stay untyped JSON, so match on the variant before
/// asserting a payload shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "EventFrame", into = "EventFrame")]
pub enum Event {
    /// Job state snapshot (carries `status`).
    State(serde_json::Value),
    /// Progress update (carries a numeric `progress`).
    Progress(serde_json::Value),
    /// Crawl result payload.
    Result(serde_json::Value),
    /// Error reported by the crawler.
    Error(serde_json::Value),
    /// Completion signal.
    Completed(serde_json::Value),
    /// Unrecognized kind, passed through untouched.
    Other {
        kind: String,
        payload: serde_json::Value,
    },
}

impl Event {
    /// Returns the wire kind tag.
    pub fn kind(&self) -> &str {
        match self {
            Event::State(_) => "state",
            Event::Progress(_) => "progress",
            Event::Result(_) => "result",
            Event::Error(_) => "error",
            Event::Completed(_) => "completed",
            Event::Other { kind, .. } => kind,
        }
    }

    /// Returns the event payload.
    pub fn payload(&self) -> &serde_json::Value {
        match self {
            Event::State(payload)
            | Event::Progress(payload)
            | Event::Result(payload)
            | Event::Error(payload)
            | Event::Completed(payload)
            | Event::Other { payload, .. } => payload,
        }
    }

    /// Consumes the event and returns its payload.
    pub fn into_payload(self) -> serde_json::Value {
        match self {
            Event::State(payload)
            | Event::Progress(payload)
            | Event::Result(payload)
            | Event::Error(payload)
            | Event::Completed(payload)
            | Event::Other { payload, .. } => payload,
        }
    }

    /// `status` field of a `state` event with an object payload.
    pub fn state_status(&self) -> Option<&str> {
        match self {
            Event::State(payload) => payload.get("status").and_then(|v| v.as_str()),
            _ => None,
        }
    }

    /// Numeric `progress` field of a `progress` event.
    pub fn progress_percent(&self) -> Option<f64> {
        match self {
            Event::Progress(payload) => payload.get("progress").and_then(|v| v.as_f64()),
            _ => None,
        }
    }
}

impl From<EventFrame> for Event {
    fn from(frame: EventFrame) -> Self {
        let EventFrame { kind, data } = frame;
        match kind.as_str() {
            "state" => Event::State(data),
            "progress" => Event::Progress(data),
            "result" => Event::Result(data),
            "error" => Event::Error(data),
            "completed" => Event::Completed(data),
            _ => Event::Other {
                kind,
                payload: data,
            },
        }
    }
}

impl From<Event> for EventFrame {
    fn from(event: Event) -> Self {
        let kind = event.kind().to_string();
        EventFrame {
            kind,
            data: event.into_payload(),
        }
    }
}

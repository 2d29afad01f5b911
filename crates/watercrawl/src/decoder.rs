use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::{trace, warn};

use crate::errors::WaterCrawlError;
use crate::event::Event;
use crate::service::ByteStream;

/// Marker that prefixes every data-bearing line.
pub const DATA_MARKER: &str = "data:";

/// Lazy sequence of events decoded from a status stream.
///
/// Ends with `None` on clean EOF; a read failure is yielded once as the last
/// item.
pub type EventFrames =
    Pin<Box<dyn futures::Stream<Item = Result<Event, WaterCrawlError>> + Send + 'static>>;

/// Splits an incoming byte stream into complete lines.
#[derive(Default)]
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Buffers `chunk` and returns every line it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.drain(..=idx).collect::<Vec<u8>>();
            lines.push(String::from_utf8_lossy(&line[..idx]).into_owned());
        }
        lines
    }

    /// Returns the trailing line left without a newline at EOF.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Decodes one line into an event.
///
/// Lines without the `data:` marker carry no event. A marked line whose JSON
/// is not a well-formed event is logged and dropped.
pub fn parse_frame(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix(DATA_MARKER) else {
        trace!(event = "stream.line_skipped", line_len = line.len() as u64);
        return None;
    };
    match serde_json::from_str::<Event>(rest.trim()) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(
                event = "stream.frame_malformed",
                domain = "stream",
                error = %err,
                frame_len = rest.len() as u64
            );
            None
        }
    }
}

/// Turns a raw status-stream body into a lazy sequence of events.
pub fn decode_events(bytes_stream: ByteStream) -> EventFrames {
    struct State {
        bytes_stream: ByteStream,
        decoder: LineDecoder,
        pending: VecDeque<Event>,
        done: bool,
    }

    Box::pin(stream::try_unfold(
        State {
            bytes_stream,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for line in state.decoder.push_chunk(&chunk) {
                            if let Some(event) = parse_frame(&line) {
                                state.pending.push_back(event);
                            }
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        state.done = true;
                        if let Some(event) = state.decoder.finish().as_deref().and_then(parse_frame)
                        {
                            state.pending.push_back(event);
                        }
                    }
                }
            }
        },
    ))
}

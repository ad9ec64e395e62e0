//! Server-Sent Events payloads and the channel-backed stream sink.

use axum::response::sse::Event;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::jobs::StreamSink;

/// Payload of the final SSE frame.
pub const DONE_MARKER: &str = "[DONE]";

/// Error reported if a sink is dropped before a terminal event.
const ENDED_UNEXPECTEDLY: &str = "Stream ended unexpectedly";

/// One SSE `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Execution state notice; the first frame of every stream.
    Status {
        /// Status name.
        status: String,
        /// Human-readable detail.
        message: String,
    },
    /// A fragment of agent output.
    Chunk {
        /// Output text.
        content: String,
    },
    /// The agent finished successfully.
    Complete {
        /// Human-readable detail.
        message: String,
    },
    /// The execution failed.
    Error {
        /// Failure description.
        error: String,
    },
}

impl StreamEvent {
    /// Opening status frame.
    #[must_use]
    pub fn started() -> Self {
        Self::Status {
            status: "processing".into(),
            message: "Starting agent response...".into(),
        }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Render as an SSE frame.
    #[must_use]
    pub fn to_sse(&self) -> Event {
        match serde_json::to_string(self) {
            Ok(json) => Event::default().data(json),
            Err(err) => Event::default().data(format!(
                r#"{{"type":"error","error":"failed to encode event: {err}"}}"#
            )),
        }
    }
}

/// [`StreamSink`] that forwards events into an unbounded channel.
///
/// If dropped before a terminal event was sent, it emits an error event
/// so the client never sees a stream end without one.
#[derive(Debug)]
pub struct ChannelSink {
    tx: UnboundedSender<StreamEvent>,
    finished: bool,
}

impl ChannelSink {
    /// Wrap a sender.
    #[must_use]
    pub fn new(tx: UnboundedSender<StreamEvent>) -> Self {
        Self {
            tx,
            finished: false,
        }
    }

    fn send(&self, event: StreamEvent) {
        // A closed receiver means the client went away; cancellation
        // handles that separately.
        let _ = self.tx.send(event);
    }
}

impl StreamSink for ChannelSink {
    fn on_chunk(&mut self, text: &str) {
        if !self.finished {
            self.send(StreamEvent::Chunk {
                content: text.to_owned(),
            });
        }
    }

    fn on_complete(&mut self) {
        if !self.finished {
            self.finished = true;
            self.send(StreamEvent::Complete {
                message: "Response completed successfully".into(),
            });
        }
    }

    fn on_error(&mut self, message: &str) {
        if !self.finished {
            self.finished = true;
            self.send(StreamEvent::Error {
                error: message.to_owned(),
            });
        }
    }
}

impl Drop for ChannelSink {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.send(StreamEvent::Error {
                error: ENDED_UNEXPECTEDLY.into(),
            });
        }
    }
}

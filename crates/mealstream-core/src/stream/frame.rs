//! Server-side frame encoding and the event sink.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::event::StreamEvent;

/// The terminal frame of every stream.
pub const SENTINEL: &[u8] = b"data: [DONE]\n\n";

/// Encode one event as a `data: <json>\n\n` frame.
///
/// Events are plain data and always serialize; should that ever fail the
/// frame carries an `error` event instead so the client still terminates.
pub fn encode_frame(event: &StreamEvent) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, kind = event.kind(), "failed to serialize stream event");
        r#"{"type":"error","message":"internal serialization failure"}"#.to_string()
    });
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(json.as_bytes());
    frame.extend_from_slice(b"\n\n");
    Bytes::from(frame)
}

/// The receiving side of the stream has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct Disconnected;

/// Writes encoded frames into a bounded channel drained by the HTTP body.
///
/// A failed send means the receiver (and so the client) is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Bytes>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiver to turn into a response body.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Send one event frame.
    pub async fn send(&self, event: &StreamEvent) -> Result<(), Disconnected> {
        self.tx
            .send(encode_frame(event))
            .await
            .map_err(|_| Disconnected)
    }

    /// Send the end-of-stream sentinel.
    pub async fn finish(&self) -> Result<(), Disconnected> {
        self.tx
            .send(Bytes::from_static(SENTINEL))
            .await
            .map_err(|_| Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

//! Client-side stream consumption.
//!
//! [`StreamConsumer`] pairs a frame [`Decoder`] with a [`ClientState`]
//! reducer. [`consume`] drives it from any stream of byte chunks, such as a
//! `reqwest` response body.

pub mod state;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::warn;

use crate::stream::{Decoder, Frame, StreamEvent};

pub use state::ClientState;

/// Errors from [`consume`].
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("stream transport failed: {0}")]
    Transport(String),

    /// The stream ended without the sentinel while the run was still going.
    #[error("stream ended before the run finished")]
    Truncated(Box<ClientState>),
}

/// Incremental decoder plus reducer for one request.
#[derive(Debug)]
pub struct StreamConsumer {
    decoder: Decoder,
    state: ClientState,
    done: bool,
    malformed: usize,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self {
            decoder: Decoder::new(),
            state: ClientState::started(),
            done: false,
            malformed: 0,
        }
    }

    /// Feed one chunk. `on_update` runs after every applied event.
    ///
    /// Returns `true` once the sentinel has been seen; later chunks are
    /// ignored.
    pub fn feed<F>(&mut self, chunk: &[u8], on_update: &mut F) -> bool
    where
        F: FnMut(&ClientState, &StreamEvent),
    {
        if self.done {
            return true;
        }
        let frames = self.decoder.push(chunk);
        self.apply_frames(frames, on_update)
    }

    /// Flush leftover bytes at end of input.
    pub fn finish<F>(&mut self, on_update: &mut F) -> bool
    where
        F: FnMut(&ClientState, &StreamEvent),
    {
        if self.done {
            return true;
        }
        let frames = self.decoder.flush();
        self.apply_frames(frames, on_update)
    }

    fn apply_frames<F>(&mut self, frames: Vec<Frame>, on_update: &mut F) -> bool
    where
        F: FnMut(&ClientState, &StreamEvent),
    {
        for frame in frames {
            match frame {
                Frame::Event(event) => {
                    if self.state.apply(&event) {
                        on_update(&self.state, &event);
                    }
                }
                Frame::Done => {
                    // Nothing follows the sentinel, terminal event or not.
                    self.done = true;
                    self.state.is_generating = false;
                    break;
                }
                Frame::Malformed(reason) => {
                    self.malformed += 1;
                    warn!(reason = %reason, "dropping malformed stream frame");
                }
            }
        }
        self.done
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn into_state(self) -> ClientState {
        self.state
    }

    /// Whether the sentinel was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Frames dropped because they could not be decoded.
    pub fn malformed_frames(&self) -> usize {
        self.malformed
    }
}

/// Read `stream` to the sentinel (or its end), folding every event.
///
/// A stream that ends without the sentinel is fine if a terminal event was
/// applied; otherwise the partial state comes back in
/// [`ConsumeError::Truncated`].
pub async fn consume<S, B, E, F>(stream: S, mut on_update: F) -> Result<ClientState, ConsumeError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(&ClientState, &StreamEvent),
{
    let mut consumer = StreamConsumer::new();
    let mut stream = std::pin::pin!(stream);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ConsumeError::Transport(e.to_string()))?;
        if consumer.feed(chunk.as_ref(), &mut on_update) {
            return Ok(consumer.into_state());
        }
    }

    if consumer.finish(&mut on_update) || consumer.state().is_finished() {
        return Ok(consumer.into_state());
    }
    let mut state = consumer.into_state();
    state.is_generating = false;
    Err(ConsumeError::Truncated(Box::new(state)))
}

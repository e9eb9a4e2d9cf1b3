//! Event stream wire format.
//!
//! Every [`StreamEvent`] travels as one `data: <json>\n\n` frame; the run
//! ends with the `data: [DONE]\n\n` sentinel. [`frame`] writes frames on the
//! server side, [`decoder`] turns arbitrary byte chunks back into frames on
//! the client side.

pub mod decoder;
pub mod event;
pub mod frame;

pub use decoder::{Decoder, DecoderState, Frame};
pub use event::StreamEvent;
pub use frame::{Disconnected, EventSink, SENTINEL, encode_frame};

//! Client-side frame decoder.
//!
//! [`step`] is a pure function from the current state and a chunk of bytes
//! to the next state and the frames completed by that chunk. Bytes are
//! buffered raw, so a multi-byte character split across chunks is decoded
//! only once the whole frame has arrived.

use super::event::StreamEvent;

/// Decoder state between chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DecoderState {
    /// No unconsumed bytes.
    #[default]
    AwaitingFrame,
    /// Bytes of a frame whose terminating blank line has not arrived.
    HavePartial(Vec<u8>),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// The `[DONE]` sentinel.
    Done,
    /// A frame whose payload could not be decoded. Carries the reason.
    Malformed(String),
}

/// Feed one chunk.
pub fn step(state: DecoderState, chunk: &[u8]) -> (DecoderState, Vec<Frame>) {
    let mut buffer = match state {
        DecoderState::AwaitingFrame => Vec::new(),
        DecoderState::HavePartial(bytes) => bytes,
    };
    buffer.extend_from_slice(chunk);

    let mut frames = Vec::new();
    let mut consumed = 0;
    let mut block_start = 0;
    let mut cursor = 0;

    while let Some(offset) = buffer[cursor..].iter().position(|b| *b == b'\n') {
        let line_end = cursor + offset;
        let line = trim_cr(&buffer[cursor..line_end]);
        cursor = line_end + 1;

        if line.is_empty() {
            if let Some(frame) = decode_block(&buffer[block_start..line_end]) {
                frames.push(frame);
            }
            consumed = cursor;
            block_start = cursor;
        }
    }

    let rest = buffer.split_off(consumed);
    let next = if rest.is_empty() {
        DecoderState::AwaitingFrame
    } else {
        DecoderState::HavePartial(rest)
    };
    (next, frames)
}

/// Flush leftover bytes at end of stream as a final frame.
pub fn finish(state: DecoderState) -> Vec<Frame> {
    match state {
        DecoderState::AwaitingFrame => Vec::new(),
        DecoderState::HavePartial(bytes) => decode_block(&bytes).into_iter().collect(),
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Decode the lines of one frame. Comment-only and field-less blocks yield
/// nothing.
fn decode_block(block: &[u8]) -> Option<Frame> {
    let text = match std::str::from_utf8(block) {
        Ok(text) => text,
        Err(e) => return Some(Frame::Malformed(format!("frame is not UTF-8: {e}"))),
    };

    let mut data: Option<String> = None;
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field != "data" {
            continue;
        }
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    let data = data?;
    if data.trim() == "[DONE]" {
        return Some(Frame::Done);
    }
    Some(match serde_json::from_str::<StreamEvent>(&data) {
        Ok(event) => Frame::Event(event),
        Err(e) => Frame::Malformed(format!("{e}: {}", truncate(&data, 80))),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Stateful wrapper around [`step`] for callers that own a decoder.
#[derive(Debug, Default)]
pub struct Decoder {
    state: DecoderState,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the frames it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let (next, frames) = step(std::mem::take(&mut self.state), chunk);
        self.state = next;
        frames
    }

    /// Flush leftover bytes. The decoder is empty afterwards.
    pub fn flush(&mut self) -> Vec<Frame> {
        finish(std::mem::take(&mut self.state))
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }
}

//! Server-sent event framing shared by the streaming adapters.

use bytes::Bytes;
use futures::StreamExt;
use parley_tool_runtime::provider::{ConnectionError, RawStream};
use std::collections::VecDeque;

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental line decoder. Bytes are buffered until a full line is
/// available, so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is left once the body ends without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.line(rest.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        Some(frame)
    }
}

/// Per-provider frame interpretation.
pub(crate) trait FrameHandler: Send + 'static {
    type Event: Send + 'static;

    /// Translate one frame. Returning `true` ends the stream.
    fn handle(&mut self, frame: SseFrame, out: &mut VecDeque<Result<Self::Event, ConnectionError>>) -> bool;
}

struct State<H: FrameHandler> {
    raw: RawStream,
    decoder: SseDecoder,
    handler: H,
    pending: VecDeque<Result<H::Event, ConnectionError>>,
    done: bool,
}

impl<H: FrameHandler> State<H> {
    fn absorb(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        for frame in frames {
            if self.done {
                break;
            }
            if self.handler.handle(frame, &mut self.pending) {
                self.done = true;
            }
        }
    }
}

/// Decode a raw body into provider events, in order, lazily.
pub(crate) fn decode<H: FrameHandler>(
    raw: RawStream,
    handler: H,
) -> impl futures::Stream<Item = Result<H::Event, ConnectionError>> + Send {
    let state = State {
        raw,
        decoder: SseDecoder::default(),
        handler,
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.raw.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.feed(&chunk);
                    state.absorb(frames);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    let tail = state.decoder.finish();
                    state.absorb(tail);
                    state.done = true;
                }
            }
        }
    })
}

/// Map a reqwest body into the adapter-facing raw stream.
pub(crate) fn body_stream(response: reqwest::Response) -> RawStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk: Result<Bytes, reqwest::Error>| {
                chunk.map_err(|e| ConnectionError::Network(e.to_string()))
            }),
    )
}

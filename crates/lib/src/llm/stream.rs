//! NDJSON decoder for streaming `/api/generate` responses.
//!
//! Fragments arrive at arbitrary byte boundaries; complete lines are parsed as they
//! become available and the trailing partial line is kept for the next fragment.

use crate::error::ServiceError;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// One decoded increment of a streaming generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub chunk: String,
    pub done: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Incremental line decoder. Feed fragments with [`StreamDecoder::feed`], then call
/// [`StreamDecoder::finish`] at end of input.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    text: String,
    done: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and decode every complete line in the buffer, calling `on_event`
    /// for each line carrying a `response`. Returns Ok(true) once a `done: true` line is seen;
    /// later input is ignored. A line with an `error` field fails immediately.
    pub fn feed(
        &mut self,
        fragment: &[u8],
        on_event: &mut dyn FnMut(StreamEvent),
    ) -> Result<bool, ServiceError> {
        if self.done {
            return Ok(true);
        }
        self.buffer.extend_from_slice(fragment);
        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=i).collect();
            if self.decode_line(&line[..i], on_event)? {
                self.done = true;
                self.buffer.clear();
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// End of input: best-effort parse of any unterminated tail, then return the accumulated text.
    pub fn finish(&mut self, on_event: &mut dyn FnMut(StreamEvent)) -> Result<String, ServiceError> {
        let tail = std::mem::take(&mut self.buffer);
        if !self.done && !tail.iter().all(u8::is_ascii_whitespace) {
            let tail = String::from_utf8_lossy(&tail);
            match serde_json::from_str::<GenerateLine>(tail.trim()) {
                Ok(line) => {
                    self.apply(line, on_event)?;
                }
                Err(e) => log::debug!("discarding unparseable stream tail: {}", e),
            }
        }
        Ok(std::mem::take(&mut self.text))
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(
        &mut self,
        raw: &[u8],
        on_event: &mut dyn FnMut(StreamEvent),
    ) -> Result<bool, ServiceError> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }
        match serde_json::from_str::<GenerateLine>(line) {
            Ok(parsed) => self.apply(parsed, on_event),
            Err(e) => {
                log::warn!("skipping malformed stream line ({}): {}", e, preview(line));
                Ok(false)
            }
        }
    }

    fn apply(
        &mut self,
        line: GenerateLine,
        on_event: &mut dyn FnMut(StreamEvent),
    ) -> Result<bool, ServiceError> {
        if let Some(message) = line.error {
            return Err(ServiceError::RemoteError(message));
        }
        if let Some(chunk) = line.response {
            self.text.push_str(&chunk);
            on_event(StreamEvent {
                chunk,
                done: line.done,
            });
        }
        Ok(line.done)
    }
}

fn preview(line: &str) -> String {
    const MAX: usize = 120;
    if line.len() <= MAX {
        return line.to_string();
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

/// Drive a decoder over a byte stream. Returns the accumulated text when the stream ends
/// or a `done: true` line arrives, whichever comes first.
pub async fn decode_stream<S, B, E>(
    stream: S,
    mut on_event: impl FnMut(StreamEvent),
) -> Result<String, ServiceError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ServiceError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = StreamDecoder::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment.map_err(Into::into)?;
        if decoder.feed(fragment.as_ref(), &mut on_event)? {
            break;
        }
    }
    decoder.finish(&mut on_event)
}

//! SSE transport: streamed HTTP POST plus incremental event-stream decoding.
//!
//! The backend frames its streams as blank-line-separated records:
//!
//! ```text
//! event: thinking
//! data: {"content":"..."}
//!
//! event: result
//! data: {...}
//! ```
//!
//! `SseDecoder` is the pure framing layer (byte chunks in, records out) and is
//! what the chunk-boundary tests exercise; `fetch_sse` wires it to a reqwest
//! byte stream with cooperative cancellation.

use reqwest::Client;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::StreamEvent;

// ---------------------------------------------------------------------------
// Framing decoder
// ---------------------------------------------------------------------------

/// One framed record before typed mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub event: String,
    pub data: serde_json::Value,
}

/// Incremental decoder for the blank-line-separated event framing.
///
/// Holds two pieces of streaming state across `push` calls: the tail bytes of
/// an incomplete UTF-8 sequence, and the text of an unterminated record. A
/// multi-byte character split across network chunks is therefore never
/// dropped, and a `\n\n` separator split across chunks still terminates its
/// record.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending_bytes: Vec<u8>,
    text: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning every record completed by it.
    ///
    /// Records with no `data: ` line are ignored. Records whose payload fails
    /// JSON parsing are dropped without aborting the stream; a debug log is
    /// the only trace they leave.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawRecord> {
        self.pending_bytes.extend_from_slice(chunk);
        self.decode_pending();

        let mut records = Vec::new();
        while let Some(pos) = self.text.find("\n\n") {
            let part = self.text[..pos].to_string();
            self.text.drain(..pos + 2);
            if let Some(record) = parse_record(&part) {
                records.push(record);
            }
        }
        records
    }

    /// Text buffered but not yet terminated by a blank line. Discarded at
    /// end-of-stream; exposed for tests.
    pub fn unterminated(&self) -> &str {
        &self.text
    }

    /// Move every complete UTF-8 prefix of `pending_bytes` into `text`,
    /// keeping only an incomplete trailing sequence (if any) as bytes.
    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(s) => {
                    self.text.push_str(s);
                    self.pending_bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        // Truly invalid bytes: substitute and continue.
                        Some(len) => {
                            self.text.push('\u{FFFD}');
                            self.pending_bytes.drain(..valid + len);
                        }
                        // Incomplete trailing sequence: wait for more bytes.
                        None => {
                            self.pending_bytes.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Parse one record's text into `(event, data)`. The event type defaults to
/// `"message"` when no `event: ` line is present; the last `data: ` line wins.
fn parse_record(part: &str) -> Option<RawRecord> {
    if part.trim().is_empty() {
        return None;
    }

    let mut event = "message";
    let mut data = "";
    for line in part.split('\n') {
        if let Some(rest) = line.strip_prefix("event: ") {
            event = rest;
        } else if let Some(rest) = line.strip_prefix("data: ") {
            data = rest;
        }
    }

    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => Some(RawRecord { event: event.to_string(), data: value }),
        Err(err) => {
            debug!(event, %err, "dropping record with malformed JSON payload");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Streamed POST
// ---------------------------------------------------------------------------

/// Issue one streamed HTTP POST and invoke `on_event` for every decoded
/// event until the connection closes or `cancel` fires.
///
/// Non-2xx responses fail the whole call (no events delivered) with the
/// `detail` field of the JSON body when present, else the HTTP status line.
/// Cancellation aborts the connection, returns `Error::Cancelled`, and
/// invokes no further callbacks.
pub async fn fetch_sse<B, F>(
    client: &Client,
    url: &str,
    body: &B,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<()>
where
    B: Serialize + ?Sized,
    F: FnMut(StreamEvent),
{
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        resp = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send() => resp?,
    };

    if !response.status().is_success() {
        return Err(Error::from_response(response).await);
    }

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                for record in decoder.push(&bytes) {
                    if let Some(event) = StreamEvent::from_record(&record.event, &record.data) {
                        on_event(event);
                    }
                }
            }
            Some(Err(err)) => return Err(Error::Request(err)),
            // End of stream: an unterminated partial record is discarded.
            None => return Ok(()),
        }
    }
}

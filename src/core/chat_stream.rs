//! Decoding of the upstream data stream and the network task that feeds it.
//!
//! The wire format is newline-delimited frames of the form `<tag>:<json>`.
//! `0:` carries a JSON string text delta, `3:` a JSON string error, `d:`
//! ends the message. Step markers (`e:`, `f:`) and other tags are ignored.

use std::fmt::Display;

use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ChatRequest;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

impl StreamMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamMessage::Chunk(_))
    }
}

const TAG_TEXT: &str = "0";
const TAG_ERROR: &str = "3";
const TAG_FINISH_MESSAGE: &str = "d";

enum LineOutcome {
    Skip,
    Delta(String),
    Error(String),
    Done,
}

fn decode_line(raw: &[u8]) -> LineOutcome {
    let line = match std::str::from_utf8(raw) {
        Ok(s) => s.trim_end_matches('\r'),
        Err(e) => {
            warn!("skipping stream line with invalid UTF-8: {e}");
            return LineOutcome::Skip;
        }
    };

    if line.trim().is_empty() {
        return LineOutcome::Skip;
    }

    let Some((tag, payload)) = line.split_once(':') else {
        debug!(line, "skipping untagged stream line");
        return LineOutcome::Skip;
    };

    match tag {
        TAG_TEXT => match serde_json::from_str::<String>(payload) {
            Ok(text) if text.is_empty() => LineOutcome::Skip,
            Ok(text) => LineOutcome::Delta(text),
            Err(e) => {
                warn!(payload, "skipping malformed text frame: {e}");
                LineOutcome::Skip
            }
        },
        TAG_ERROR => {
            let message = serde_json::from_str::<String>(payload)
                .unwrap_or_else(|_| payload.trim().to_string());
            LineOutcome::Error(message)
        }
        TAG_FINISH_MESSAGE => LineOutcome::Done,
        _ => LineOutcome::Skip,
    }
}

/// Incremental frame decoder.
///
/// Bytes may arrive split at arbitrary positions; incomplete lines are
/// buffered until their newline shows up. After the first terminal event the
/// decoder ignores all further input.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one read's worth of bytes, returning the events it completed.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<StreamMessage> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        self.buffer.extend_from_slice(bytes);
        let mut consumed = 0;
        while let Some(offset) = memchr(b'\n', &self.buffer[consumed..]) {
            let line_end = consumed + offset;
            let outcome = decode_line(&self.buffer[consumed..line_end]);
            consumed = line_end + 1;
            if self.push_outcome(outcome, &mut out) {
                break;
            }
        }

        if self.finished {
            self.buffer.clear();
        } else {
            self.buffer.drain(..consumed);
        }
        out
    }

    /// Signal end of input. A trailing line without a newline is decoded,
    /// and `End` is produced if no terminal frame was seen.
    pub fn finish(&mut self) -> Vec<StreamMessage> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() && self.push_outcome(decode_line(&rest), &mut out) {
            return out;
        }

        self.finished = true;
        out.push(StreamMessage::End);
        out
    }

    fn push_outcome(&mut self, outcome: LineOutcome, out: &mut Vec<StreamMessage>) -> bool {
        match outcome {
            LineOutcome::Skip => false,
            LineOutcome::Delta(text) => {
                out.push(StreamMessage::Chunk(text));
                false
            }
            LineOutcome::Error(message) => {
                self.finished = true;
                out.push(StreamMessage::Error(message));
                true
            }
            LineOutcome::Done => {
                self.finished = true;
                out.push(StreamMessage::End);
                true
            }
        }
    }
}

/// Drive a byte stream through a [`FrameDecoder`], handing each event to
/// `emit`.
///
/// Emits deltas followed by exactly one terminal event, unless `cancel_token`
/// fires first, in which case nothing further is emitted at all.
pub async fn pump_stream<S, B, E>(
    mut stream: S,
    cancel_token: &CancellationToken,
    mut emit: impl FnMut(StreamMessage),
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return,
            next = stream.next() => next,
        };

        let events = match next {
            Some(Ok(bytes)) => decoder.decode(bytes.as_ref()),
            Some(Err(e)) => vec![StreamMessage::Error(
                StreamError::Interrupted(e.to_string()).to_string(),
            )],
            None => decoder.finish(),
        };

        for event in events {
            if cancel_token.is_cancelled() {
                return;
            }
            let terminal = event.is_terminal();
            emit(event);
            if terminal {
                return;
            }
        }
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Render a non-success response body as a one-line user-facing error.
pub fn format_api_error(status: Option<u16>, body: &str) -> String {
    let prefix = match status {
        Some(code) => format!("API Error ({code})"),
        None => "API Error".to_string(),
    };
    let trimmed = body.trim();

    if trimmed.is_empty() {
        return format!("{prefix}: <empty response>");
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return format!("{prefix}: {summary}");
            }
        }
        return format!("{prefix}: {json_value}");
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{prefix}: {collapsed}")
}

/// Transport failures, rendered into [`StreamMessage::Error`] text.
#[derive(Debug)]
pub enum StreamError {
    Request(reqwest::Error),
    Status { status: u16, body: String },
    Interrupted(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Request(e) => f.write_str(&format_api_error(None, &e.to_string())),
            StreamError::Status { status, body } => {
                f.write_str(&format_api_error(Some(*status), body))
            }
            StreamError::Interrupted(reason) => write!(f, "Stream interrupted: {reason}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Request(e) => Some(e),
            _ => None,
        }
    }
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub endpoint: String,
    /// Header carrying the provider key, and the key itself.
    pub api_key: Option<(String, String)>,
    pub request: ChatRequest,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                endpoint,
                api_key,
                request,
                cancel_token,
                stream_id,
            } = params;

            let send = |message: StreamMessage| {
                let _ = tx.send((message, stream_id));
            };

            let mut http_request = client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .json(&request);
            if let Some((header, key)) = &api_key {
                http_request = http_request.header(header.as_str(), key.as_str());
            }

            let response = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return,
                response = http_request.send() => response,
            };

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let body = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "<no body>".to_string());
                        if !cancel_token.is_cancelled() {
                            let error = StreamError::Status {
                                status: status.as_u16(),
                                body,
                            };
                            warn!(stream_id, %error, "upstream rejected request");
                            send(StreamMessage::Error(error.to_string()));
                        }
                        return;
                    }

                    debug!(stream_id, %endpoint, "stream opened");
                    pump_stream(response.bytes_stream(), &cancel_token, send).await;
                }
                Err(e) => {
                    if !cancel_token.is_cancelled() {
                        let error = StreamError::Request(e);
                        warn!(stream_id, %error, "request failed");
                        send(StreamMessage::Error(error.to_string()));
                    }
                }
            }
        })
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

//! Offline decoding of a captured response body

use std::convert::Infallible;
use std::error::Error;
use std::io::{self, Write};
use std::path::Path;

use futures_util::stream;
use tokio_util::sync::CancellationToken;

use crate::core::chat_stream::{pump_stream, StreamMessage};

const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Decode `body` in chunks of `chunk_size` bytes, returning the assembled
/// text and the terminal error, if any.
pub async fn replay_body(body: &[u8], chunk_size: usize) -> (String, Option<String>) {
    let chunks: Vec<Result<&[u8], Infallible>> = body.chunks(chunk_size.max(1)).map(Ok).collect();
    let mut text = String::new();
    let mut error = None;
    pump_stream(stream::iter(chunks), &CancellationToken::new(), |event| {
        match event {
            StreamMessage::Chunk(delta) => text.push_str(&delta),
            StreamMessage::Error(message) => error = Some(message),
            StreamMessage::End => {}
        }
    })
    .await;
    (text, error)
}

pub async fn run_replay(path: &Path, chunk_size: Option<usize>) -> Result<(), Box<dyn Error>> {
    let body = tokio::fs::read(path).await?;
    let (text, error) = replay_body(&body, chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)).await;

    let mut stdout = io::stdout();
    writeln!(stdout, "{text}")?;
    stdout.flush()?;

    if let Some(error) = error {
        eprintln!("❌ Error: {error}");
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"f:{\"messageId\":\"m\"}\n0:\"Hel\"\n0:\"lo \\u00e9\"\n0:\"!\"\nd:{\"finishReason\":\"stop\"}\n";

    #[tokio::test]
    async fn chunk_size_does_not_change_the_text() {
        for size in [1, 2, 7, 4096] {
            let (text, error) = replay_body(BODY, size).await;
            assert_eq!(text, "Hello é!", "chunk size {size}");
            assert_eq!(error, None);
        }
    }

    #[tokio::test]
    async fn error_frame_stops_the_replay() {
        let body = b"0:\"partial\"\n3:\"rate limited\"\n0:\"ignored\"\n";
        let (text, error) = replay_body(body, 5).await;
        assert_eq!(text, "partial");
        assert_eq!(error.as_deref(), Some("rate limited"));
    }

    #[tokio::test]
    async fn zero_chunk_size_is_clamped() {
        let (text, _) = replay_body(b"0:\"x\"\n", 0).await;
        assert_eq!(text, "x");
    }
}

//! Event-stream reading
//!
//! Registry and orchestrator event feeds are newline-delimited JSON,
//! optionally wrapped in server-sent-event `data:` lines. This module
//! turns a streaming HTTP response into a stream of parsed objects.

use crate::{Result, TransportError};
use futures::Stream;
use futures_util::StreamExt;
use serde_json::Value;

/// Parse one line of an event stream
///
/// Accepts bare JSON and SSE `data:` lines; comments, blank lines, and
/// non-data SSE fields yield `None`.
pub fn parse_event_line(line: &str) -> Result<Option<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Ok(None);
    }
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None => {
            if trimmed.contains(':') && !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                // Some other SSE field (event:, id:, retry:)
                return Ok(None);
            }
            trimmed
        }
    };
    let value = serde_json::from_str(body)
        .map_err(|e| TransportError::Protocol(format!("Bad event line {:?}: {}", body, e)))?;
    Ok(Some(value))
}

/// Turn a streaming response into a stream of parsed event objects
pub fn event_stream(response: reqwest::Response) -> impl Stream<Item = Result<Value>> {
    let bytes = Box::pin(response.bytes_stream());
    futures::stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, mut ended)| async move {
            loop {
                // Emit any complete line already buffered.
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    match parse_event_line(&text) {
                        Ok(Some(value)) => return Some((Ok(value), (bytes, buffer, ended))),
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (bytes, buffer, ended))),
                    }
                }

                if ended {
                    // Trailing bytes without a newline form a final line.
                    if buffer.is_empty() {
                        return None;
                    }
                    let text = String::from_utf8_lossy(&buffer).into_owned();
                    buffer.clear();
                    match parse_event_line(&text) {
                        Ok(Some(value)) => return Some((Ok(value), (bytes, buffer, ended))),
                        Ok(None) => return None,
                        Err(e) => return Some((Err(e), (bytes, buffer, ended))),
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        ended = true;
                        return Some((
                            Err(TransportError::ConnectionReset(e.to_string())),
                            (bytes, buffer, ended),
                        ));
                    }
                    None => ended = true,
                }
            }
        },
    )
}

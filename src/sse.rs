//! Streaming relay with usage capture.
//!
//! Upstream bytes are yielded downstream before being inspected, so
//! observability never adds client latency. A rolling text buffer is split
//! on the `\n\n` event separator; `data: ` events are probed for a `usage`
//! object. Parse and decode failures are silently ignored — a valid
//! upstream stream must never be broken by the sniffer.

use std::sync::Arc;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::AppState;
use crate::usage::{RequestLogGuard, process_usage};

/// Rolling SSE event splitter. Fed decoded chunk text, yields complete
/// events (the text between `\n\n` separators).
#[derive(Default)]
pub struct SseScanner {
    buffer: String,
}

impl SseScanner {
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            events.push(self.buffer[..pos].to_string());
            self.buffer.drain(..pos + 2);
        }
        events
    }
}

/// If `event` is a `data: ` frame carrying a `usage` object, return the
/// event's `model` (if any) and the usage payload.
pub fn extract_usage_event(event: &str) -> Option<(Option<String>, Value)> {
    let data = event.strip_prefix("data: ")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let value: Value = serde_json::from_str(data).ok()?;
    let usage = value.get("usage")?;
    if !usage.is_object() {
        return None;
    }

    let model = value
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((model, usage.clone()))
}

/// Relay the upstream body verbatim while accounting any usage frames.
///
/// The guard records the RequestLog row on every exit path: normal end of
/// stream, upstream error, or the client dropping the response mid-stream.
pub fn relay_with_usage_capture(
    upstream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    state: Arc<AppState>,
    user_id: Option<String>,
    request_model: String,
    guard: RequestLogGuard,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
    stream! {
        let mut body = std::pin::pin!(upstream);
        let mut scanner = SseScanner::default();

        while let Some(chunk_result) = body.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(std::io::Error::other(e));
                    break;
                }
            };

            // Bytes go to the client first; sniffing happens afterwards.
            yield Ok(chunk.clone());

            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
            };
            for event in scanner.push(text) {
                if let Some((event_model, usage)) = extract_usage_event(&event) {
                    let model = event_model.unwrap_or_else(|| request_model.clone());
                    process_usage(&state, user_id.as_deref(), &model, &usage).await;
                }
            }
        }

        guard.complete().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scanner_splits_on_double_newline() {
        let mut scanner = SseScanner::default();
        assert!(scanner.push("data: {\"a\":1}").is_empty());
        let events = scanner.push("\n\ndata: {\"b\":2}\n\n");
        assert_eq!(events, vec!["data: {\"a\":1}", "data: {\"b\":2}"]);
    }

    #[test]
    fn scanner_handles_events_split_mid_json() {
        let mut scanner = SseScanner::default();
        assert!(scanner.push("data: {\"model\":\"m1\",\"usa").is_empty());
        let events = scanner.push("ge\":{\"prompt_tokens\":3}}\n\n");
        assert_eq!(events.len(), 1);
        let (model, usage) = extract_usage_event(&events[0]).unwrap();
        assert_eq!(model.as_deref(), Some("m1"));
        assert_eq!(usage["prompt_tokens"], 3);
    }

    #[test]
    fn usage_frame_is_extracted() {
        let event = format!(
            "data: {}",
            json!({
                "model": "m1",
                "usage": { "prompt_tokens": 3, "completion_tokens": 7 }
            })
        );
        let (model, usage) = extract_usage_event(&event).unwrap();
        assert_eq!(model.as_deref(), Some("m1"));
        assert_eq!(usage["completion_tokens"], 7);
    }

    #[test]
    fn frames_without_usage_are_skipped() {
        let event = format!("data: {}", json!({ "model": "m1", "choices": [] }));
        assert!(extract_usage_event(&event).is_none());
    }

    #[test]
    fn done_empty_and_malformed_frames_are_skipped() {
        assert!(extract_usage_event("data: [DONE]").is_none());
        assert!(extract_usage_event("data: ").is_none());
        assert!(extract_usage_event("data: {not json").is_none());
        assert!(extract_usage_event(": keep-alive").is_none());
        assert!(extract_usage_event("event: ping").is_none());
    }

    #[test]
    fn usage_must_be_an_object() {
        assert!(extract_usage_event("data: {\"usage\": 42}").is_none());
    }
}

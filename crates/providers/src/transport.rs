//! HTTP plumbing shared by the streaming adapters: client construction,
//! status classification and SSE line framing.

use futures::StreamExt;
use rivet_core::error::ProviderError;
use rivet_core::provider::{EventReceiver, StreamEvent};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Build the shared HTTP client. Streams can run for minutes, so only the
/// connect phase is bounded.
pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))
}

/// Map a non-success HTTP response into a `ProviderError`.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    let body = response.text().await.unwrap_or_default();
    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the API key ({status})"
        )));
    }
    if status == 404 && body.contains("model") {
        return Err(ProviderError::ModelNotFound(error_message(&body)));
    }

    warn!(provider, status, body = %body, "Provider API error");
    Err(ProviderError::ApiError {
        status_code: status,
        message: error_message(&body),
    })
}

/// Pull `error.message` out of a JSON error body, falling back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

pub(crate) fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// One meaningful SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseLine {
    Event(String),
    Data(String),
}

/// Splits a byte stream into SSE lines. Comments and blank lines are dropped.
///
/// Bytes are buffered until a full line arrives, so a multi-byte character
/// split across chunks decodes intact.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let text = String::from_utf8_lossy(&raw[..line_end]);
            let line = text.trim_end_matches('\r');

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(event) = line.strip_prefix("event:") {
                lines.push(SseLine::Event(event.trim().to_string()));
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    lines.push(SseLine::Data(data.to_string()));
                }
            }
        }
        lines
    }
}

/// Vendor-specific translation of SSE `data:` payloads into stream events.
pub(crate) trait SseTranslator: Send + 'static {
    fn on_data(&mut self, data: &str) -> Vec<StreamEvent>;

    /// True once the vendor signalled the end of the call.
    fn is_done(&self) -> bool;

    /// Called when the byte stream ends; flushes whatever is still open.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Pump an SSE response through `translator` on a background task.
///
/// The task stops when the vendor signals completion, the receiver is
/// dropped, or `cancel` fires.
pub(crate) fn spawn_sse_pump<T: SseTranslator>(
    provider: String,
    response: reqwest::Response,
    mut translator: T,
    cancel: CancellationToken,
) -> EventReceiver {
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(provider = %provider, "Stream cancelled");
                    return;
                }
                chunk = byte_stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
            };

            for line in decoder.push(&bytes) {
                let SseLine::Data(data) = line else { continue };
                trace!(provider = %provider, data = %data, "SSE data");
                for event in translator.on_data(&data) {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                if translator.is_done() {
                    return;
                }
            }
        }

        for event in translator.finish() {
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: message_start\nda").len() == 1);
        let lines = decoder.push(b"ta: {\"a\":1}\r\n\n: keepalive\n");
        assert_eq!(lines, vec![SseLine::Data("{\"a\":1}".into())]);
    }

    #[test]
    fn decoder_keeps_characters_split_across_chunks() {
        let bytes = "data: {\"t\":\"é→🦀\"}\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let lines = decoder.push(&bytes[split..]);
        assert_eq!(lines, vec![SseLine::Data("{\"t\":\"é→🦀\"}".into())]);

        // One byte at a time.
        let mut decoder = SseDecoder::default();
        let lines: Vec<_> = bytes.iter().flat_map(|b| decoder.push(&[*b])).collect();
        assert_eq!(lines, vec![SseLine::Data("{\"t\":\"é→🦀\"}".into())]);
    }

    #[test]
    fn decoder_parses_event_and_data() {
        let mut decoder = SseDecoder::default();
        let lines = decoder.push(b"event: ping\ndata: [DONE]\n");
        assert_eq!(
            lines,
            vec![SseLine::Event("ping".into()), SseLine::Data("[DONE]".into())]
        );
    }

    #[test]
    fn error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            "Overloaded"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }
}

//! Shared HTTP and SSE plumbing for the streaming adapters.
//!
//! Every adapter does the same thing with a response: check the status,
//! buffer body chunks, cut them into lines, and hand each `data:` payload
//! to a protocol-specific decoder. Bytes are buffered rather than decoded
//! per chunk so a multi-byte character split across chunks survives.

use std::time::Duration;

use futures::StreamExt;
use tracing::warn;
use turnwright_core::ProviderError;

/// Build the HTTP client used by an adapter.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))
}

/// Reject non-2xx responses with the matching error variant.
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status, body = %body, "Provider API error");
    Err(ProviderError::from_status(status, body))
}

/// Line buffer over raw SSE bytes.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Append bytes and drain every complete `data:` payload.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }

        payloads
    }

    /// Flush a trailing line that arrived without a newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

/// Whether the decoder wants more of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Feed every `data:` payload of a streaming response into `on_data`.
///
/// A payload that is not JSON (other than the `[DONE]` sentinel) ends the
/// turn with [`ProviderError::InvalidResponse`].
pub(crate) async fn for_each_event<F>(
    provider: &str,
    response: reqwest::Response,
    mut on_data: F,
) -> Result<(), ProviderError>
where
    F: FnMut(&serde_json::Value) -> Result<Flow, ProviderError>,
{
    let mut stream = response.bytes_stream();
    let mut buffer = SseBuffer::default();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
        for data in buffer.push(&bytes) {
            if dispatch(provider, &data, &mut on_data)? == Flow::Stop {
                return Ok(());
            }
        }
    }

    if let Some(data) = buffer.finish() {
        dispatch(provider, &data, &mut on_data)?;
    }
    Ok(())
}

fn dispatch<F>(provider: &str, data: &str, on_data: &mut F) -> Result<Flow, ProviderError>
where
    F: FnMut(&serde_json::Value) -> Result<Flow, ProviderError>,
{
    if data == "[DONE]" {
        return Ok(Flow::Stop);
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(event) => on_data(&event),
        Err(e) => {
            warn!(provider, error = %e, data = %data, "Unparseable SSE payload");
            Err(ProviderError::InvalidResponse(format!(
                "{provider} sent a non-JSON stream event: {e}"
            )))
        }
    }
}

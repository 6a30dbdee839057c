use crate::{EdgeError, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mime::Mime;
use reqwest::Client;
use std::time::Duration;

/// Raw bytes handed back by the origin. Ownership moves to the caller.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub bytes: Bytes,
    /// Content type as reported by the origin, if it sent a parseable one.
    pub content_type: Option<String>,
}

/// A single outbound fetch against the backing store.
///
/// Implementations must not retry: the first failure is the answer.
#[async_trait::async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<OriginResponse>;
}

/// `Origin` backed by a shared `reqwest` client.
///
/// # Errors
/// - transport, DNS or timeout failure: `EdgeError::Unreachable`
/// - non-2xx upstream status: `EdgeError::NotFound`
/// - body larger than `max_size`: `EdgeError::InvalidInput`
pub struct HttpOrigin {
    client: Client,
    max_size: usize,
}

impl HttpOrigin {
    pub fn new(timeout: Duration, max_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EdgeError::Internal(format!("http client: {}", e)))?;
        Ok(Self { client, max_size })
    }
}

#[async_trait::async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, location: &str) -> Result<OriginResponse> {
        tracing::debug!("Fetching origin {}", location);

        let resp = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| EdgeError::Unreachable(format!("{}: {}", location, e)))?;

        if !resp.status().is_success() {
            return Err(EdgeError::NotFound(format!(
                "{}: upstream status {}",
                location,
                resp.status()
            )));
        }

        // Malformed values are dropped rather than guessed at
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.parse::<Mime>().is_ok())
            .map(str::to_string);

        // Pre-flight size check based on Content-Length header
        if let Some(len) = resp.content_length() {
            if len > self.max_size as u64 {
                return Err(EdgeError::InvalidInput(format!(
                    "{}: {} bytes exceeds the {} byte limit",
                    location, len, self.max_size
                )));
            }
        }

        // Stream response with size enforcement to prevent header spoofing
        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| EdgeError::Unreachable(format!("{}: {}", location, e)))?
        {
            if buf.len() + chunk.len() > self.max_size {
                return Err(EdgeError::InvalidInput(format!(
                    "{}: body exceeds the {} byte limit",
                    location, self.max_size
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(OriginResponse { bytes: buf.freeze(), content_type })
    }
}

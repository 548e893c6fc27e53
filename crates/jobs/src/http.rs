// crates/jobs/src/http.rs
//! JSON-over-HTTP transport.
//!
//! Every call is `POST {base_url}/{endpoint}` with body
//! `{"intention": "...", "load": ...}`; the response body is the JSON reply.

use std::time::Duration;

use async_trait::async_trait;
use jobstream_core::{ClientConfig, Intention, TransportError};
use serde::Serialize;
use serde_json::Value;

use crate::transport::Transport;

#[derive(Serialize)]
struct Envelope<'a> {
    intention: Intention,
    load: &'a Value,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Build from `ClientConfig`. Requires `base_url` (JOBSTREAM_URL).
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            TransportError::Connect("no base URL configured (set JOBSTREAM_URL)".to_string())
        })?;
        Self::new(base_url, config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn classify(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout.as_secs())
        } else if error.is_decode() {
            TransportError::Protocol(error.to_string())
        } else {
            TransportError::Connect(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &str,
        intention: Intention,
        load: Value,
    ) -> Result<Value, TransportError> {
        let url = self.url(endpoint);
        tracing::debug!(%url, %intention, "POST");

        let response = self
            .client
            .post(&url)
            .json(&Envelope {
                intention,
                load: &load,
            })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::Protocol(format!("invalid JSON from {url}: {e}")))
    }

    fn name(&self) -> &str {
        "http"
    }
}

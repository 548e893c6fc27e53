// crates/jobs/src/transport.rs
//! Transport trait: the only path from a job controller to the network.

use std::sync::Arc;

use async_trait::async_trait;
use jobstream_core::{Intention, TransportError};
use serde_json::Value;

/// Request/response channel to the remote job service.
///
/// Implementations include:
/// - `HttpTransport`: JSON over HTTP POST
/// - test doubles that replay scripted responses
///
/// A call either resolves with the decoded response body or fails. Retries,
/// auth and wire format are the transport's business, never the controller's.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        intention: Intention,
        load: Value,
    ) -> Result<Value, TransportError>;

    /// Transport name for logging (e.g. "http").
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        endpoint: &str,
        intention: Intention,
        load: Value,
    ) -> Result<Value, TransportError> {
        (**self).send(endpoint, intention, load).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

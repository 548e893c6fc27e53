// crates/core/src/error.rs
use thiserror::Error;

use crate::types::Intention;

/// Errors raised by a `Transport` while talking to the remote job service.
///
/// `Clone` so a failure can be carried inside a `JobUpdate` to every
/// observer without re-stringifying it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),
}

/// Everything that can end a job in the `Fail` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Transport failure during {intention}: {source}")]
    Transport {
        intention: Intention,
        #[source]
        source: TransportError,
    },

    #[error("Remote job error: {0}")]
    Remote(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{}", if *acknowledged { "Job canceled" } else { "Job already canceled" })]
    Canceled { acknowledged: bool },
}

impl JobError {
    pub fn transport(intention: Intention, source: TransportError) -> Self {
        Self::Transport { intention, source }
    }

    /// True for failures caused by a local `cancel()` rather than the remote side.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

/// Errors reported by the `StreamingDecoder`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed payload at element {offset}: {message}")]
    Malformed { offset: usize, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Decode worker lost: {0}")]
    WorkerLost(String),
}

impl DecodeError {
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            message: message.into(),
        }
    }
}

/// Errors from the opt-in writer lease on `ResultStore` slots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Slot {namespace}/{key} already has an active writer: {holder}")]
    WriterBusy {
        namespace: String,
        key: String,
        holder: String,
    },
}

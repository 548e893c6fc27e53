// crates/core/src/config.rs
//! Client configuration, read from the environment with sane defaults.

use std::str::FromStr;
use std::time::Duration;

use crate::decoder::{
    DecodeMode, DecoderConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_BATCH_ELEMENTS,
};
use crate::types::PageSize;

/// Default per-request timeout for network transports.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration shared by the dispatcher, decoder and transports.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// JOBSTREAM_URL env var (e.g. https://host/api). None = no default transport.
    pub base_url: Option<String>,
    pub default_page_size: PageSize,
    pub max_batch_elements: usize,
    pub decode_channel_capacity: usize,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("JOBSTREAM_URL").ok().filter(|url| !url.is_empty()),
            default_page_size: env_positive::<u32>("JOBSTREAM_PAGE_SIZE")
                .and_then(|size| PageSize::new(size).ok())
                .unwrap_or_default(),
            max_batch_elements: env_positive("JOBSTREAM_BATCH_SIZE")
                .unwrap_or(DEFAULT_MAX_BATCH_ELEMENTS),
            decode_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            request_timeout: env_positive("JOBSTREAM_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_page_size(mut self, size: PageSize) -> Self {
        self.default_page_size = size;
        self
    }

    pub fn with_max_batch_elements(mut self, max: usize) -> Self {
        self.max_batch_elements = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl From<&ClientConfig> for DecoderConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_batch_elements: config.max_batch_elements,
            channel_capacity: config.decode_channel_capacity,
            mode: DecodeMode::detect(),
        }
    }
}

/// Parse a positive number from `var`. Unset is silent, garbage warns.
fn env_positive<N>(var: &str) -> Option<N>
where
    N: FromStr + PartialOrd + Default,
{
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<N>() {
        Ok(value) if value > N::default() => Some(value),
        _ => {
            tracing::warn!(var, value = %raw, "ignoring invalid value, using default");
            None
        }
    }
}

// crates/jobs/src/dispatcher.rs
//! Issues jobs against one remote endpoint.

use std::sync::Arc;

use jobstream_core::{ClientConfig, JobError, JobUpdate, PageSize};
use serde_json::Value;

use crate::controller::{JobCallback, JobController};
use crate::transport::Transport;

/// Factory for jobs on a single endpoint.
///
/// Every `request` creates an independent `JobController`; there is no
/// dedup, identical request bodies produce separate remote jobs.
#[derive(Clone)]
pub struct JobDispatcher {
    endpoint: String,
    transport: Arc<dyn Transport>,
    default_page_size: PageSize,
}

impl JobDispatcher {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
            default_page_size: PageSize::default(),
        }
    }

    pub fn from_config(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> Self {
        Self::new(endpoint, transport).with_default_page_size(config.default_page_size)
    }

    pub fn with_default_page_size(mut self, page_size: PageSize) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn default_page_size(&self) -> PageSize {
        self.default_page_size
    }

    /// Start a job with the default page size.
    pub fn request<F>(&self, request_body: Value, callback: F) -> JobController
    where
        F: Fn(JobUpdate) + Send + Sync + 'static,
    {
        self.spawn(request_body, self.default_page_size, Arc::new(callback))
    }

    /// Start a job with an explicit page size. Zero is rejected before
    /// anything is sent.
    pub fn request_with_page_size<F>(
        &self,
        request_body: Value,
        page_size: u32,
        callback: F,
    ) -> Result<JobController, JobError>
    where
        F: Fn(JobUpdate) + Send + Sync + 'static,
    {
        let page_size = PageSize::new(page_size)?;
        Ok(self.spawn(request_body, page_size, Arc::new(callback)))
    }

    /// Start a job with an already shared callback.
    pub fn request_with_callback(
        &self,
        request_body: Value,
        page_size: PageSize,
        callback: JobCallback,
    ) -> JobController {
        self.spawn(request_body, page_size, callback)
    }

    fn spawn(
        &self,
        request_body: Value,
        page_size: PageSize,
        callback: JobCallback,
    ) -> JobController {
        JobController::start(
            self.endpoint.clone(),
            Arc::clone(&self.transport),
            request_body,
            page_size,
            callback,
        )
    }
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport.name())
            .field("default_page_size", &self.default_page_size)
            .finish()
    }
}

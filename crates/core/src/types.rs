// crates/core/src/types.rs
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;

/// Page size used when the caller does not choose one.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Identifier assigned to a job by the remote side once `start` succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a job.
///
/// `Done` and `Fail` are terminal. Discriminants are stable so the state can
/// live in an `AtomicU8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending = 0,
    Done = 1,
    Fail = 2,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Fail => "fail",
        }
    }

    /// Inverse of `state as u8`. Unknown values map to `Fail`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Done,
            _ => Self::Fail,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transport call asks the remote side to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intention {
    Start,
    Continue,
    Cancel,
}

impl Intention {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Continue => "continue",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote page granularity. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PageSize(u32);

impl PageSize {
    pub fn new(size: u32) -> Result<Self, JobError> {
        if size == 0 {
            return Err(JobError::InvalidArgument(
                "page size must be a positive integer".to_string(),
            ));
        }
        Ok(Self(size))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self(DEFAULT_PAGE_SIZE)
    }
}

impl TryFrom<u32> for PageSize {
    type Error = JobError;

    fn try_from(size: u32) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl From<PageSize> for u32 {
    fn from(size: PageSize) -> Self {
        size.0
    }
}

/// Load of a `start` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub request_body: Value,
    pub page_size: PageSize,
}

/// Response of a `start` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub id: JobId,
}

/// Load of a `continue` or `cancel` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: JobId,
}

/// One continue-response increment of a job's result.
///
/// A non-null `error` fails the job and `load` is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub load: Value,
    #[serde(default)]
    pub finish: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A state transition reported to a job's callback.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// A `continue` returned more data and the job is still running.
    Progress { job_id: JobId, load: Value },
    /// The final page.
    Done { job_id: JobId, load: Value },
    /// The job failed. `job_id` is `None` when `start` itself failed.
    Failed {
        job_id: Option<JobId>,
        error: JobError,
    },
}

impl JobUpdate {
    pub fn state(&self) -> JobState {
        match self {
            Self::Progress { .. } => JobState::Pending,
            Self::Done { .. } => JobState::Done,
            Self::Failed { .. } => JobState::Fail,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Progress { job_id, .. } | Self::Done { job_id, .. } => Some(job_id),
            Self::Failed { job_id, .. } => job_id.as_ref(),
        }
    }

    /// Page payload for `Progress`/`Done`, `None` for failures.
    pub fn load(&self) -> Option<&Value> {
        match self {
            Self::Progress { load, .. } | Self::Done { load, .. } => Some(load),
            Self::Failed { .. } => None,
        }
    }
}

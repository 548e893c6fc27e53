// crates/jobs/src/controller.rs
//! Per-job state machine: start, poll until finished, cancel.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use jobstream_core::{
    Intention, JobError, JobId, JobRef, JobState, JobUpdate, Page, PageSize, StartRequest,
    StartResponse, TransportError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::Transport;

/// Receives every update of one job, in order.
pub type JobCallback = Arc<dyn Fn(JobUpdate) + Send + Sync>;

/// Handle to one remote job.
///
/// Cloning yields another handle to the same job. The polling loop keeps the
/// job alive on its own, so dropping every handle does not stop it.
#[derive(Clone)]
pub struct JobController {
    shared: Arc<Shared>,
}

struct Shared {
    endpoint: String,
    transport: Arc<dyn Transport>,
    callback: JobCallback,
    status: AtomicU8,
    job_id: RwLock<Option<JobId>>,
    pages: AtomicU64,
    /// Set by whichever path sends the remote cancel, so it goes out once.
    remote_cancel_sent: AtomicBool,
    /// Held while a transition is checked and its callback runs.
    delivery: Mutex<()>,
    settled: watch::Sender<bool>,
}

impl JobController {
    /// Send `start` and begin polling on the current tokio runtime.
    ///
    /// Returns immediately with the job in `Pending`.
    pub fn start(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        request_body: Value,
        page_size: PageSize,
        callback: JobCallback,
    ) -> Self {
        let (settled, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            endpoint: endpoint.into(),
            transport,
            callback,
            status: AtomicU8::new(JobState::Pending as u8),
            job_id: RwLock::new(None),
            pages: AtomicU64::new(0),
            remote_cancel_sent: AtomicBool::new(false),
            delivery: Mutex::new(()),
            settled,
        });

        let runner = Arc::clone(&shared);
        tokio::spawn(async move {
            runner
                .run(StartRequest {
                    request_body,
                    page_size,
                })
                .await;
        });

        Self { shared }
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Remote id, once `start` has returned one.
    pub fn job_id(&self) -> Option<JobId> {
        self.shared.job_id()
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Number of continue pages delivered so far.
    pub fn pages(&self) -> u64 {
        self.shared.pages.load(Ordering::Relaxed)
    }

    /// Cancel the job.
    ///
    /// The local state flips to `Fail` before this returns and no later
    /// continue response is delivered. The remote cancel and the final
    /// callback run on the returned task. Returns `None` (and does nothing)
    /// when the job already finished.
    pub fn cancel(&self) -> Option<JoinHandle<()>> {
        let shared = &self.shared;
        if !shared.transition(JobState::Fail) {
            tracing::warn!(
                endpoint = %shared.endpoint,
                job_id = ?shared.job_id(),
                state = %shared.state(),
                "cancel ignored, job already finished"
            );
            return None;
        }

        let shared = Arc::clone(shared);
        Some(tokio::spawn(async move {
            let job_id = shared.job_id();
            let acknowledged = match &job_id {
                Some(id) if shared.claim_remote_cancel() => shared.remote_cancel(id).await,
                // No id yet, or the start path already sent the remote cancel.
                _ => true,
            };
            let _delivery = shared.lock_delivery();
            tracing::info!(
                endpoint = %shared.endpoint,
                job_id = ?job_id,
                acknowledged,
                "job canceled"
            );
            (shared.callback)(JobUpdate::Failed {
                job_id,
                error: JobError::Canceled { acknowledged },
            });
            shared.settle();
        }))
    }

    /// Wait until the terminal callback has been delivered. Returns the
    /// final state.
    pub async fn wait(&self) -> JobState {
        let mut settled = self.shared.settled.subscribe();
        if settled.wait_for(|done| *done).await.is_err() {
            tracing::error!(endpoint = %self.shared.endpoint, "job settle channel closed");
        }
        self.state()
    }
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("endpoint", &self.shared.endpoint)
            .field("job_id", &self.job_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn state(&self) -> JobState {
        JobState::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Pending -> `to`. False if the job already left `Pending`.
    fn transition(&self, to: JobState) -> bool {
        self.status
            .compare_exchange(
                JobState::Pending as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn job_id(&self) -> Option<JobId> {
        match self.job_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_job_id(&self, id: JobId) {
        match self.job_id.write() {
            Ok(mut guard) => *guard = Some(id),
            Err(e) => {
                tracing::error!("RwLock poisoned writing job id: {e}");
                *e.into_inner() = Some(id);
            }
        }
    }

    fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True for the first caller only.
    fn claim_remote_cancel(&self) -> bool {
        !self.remote_cancel_sent.swap(true, Ordering::SeqCst)
    }

    fn settle(&self) {
        self.settled.send_replace(true);
    }

    async fn run(&self, request: StartRequest) {
        tracing::debug!(
            endpoint = %self.endpoint,
            transport = self.transport.name(),
            page_size = request.page_size.get(),
            "starting job"
        );
        let job_id = match self.call::<StartResponse, _>(Intention::Start, &request).await {
            Ok(started) => started.id,
            Err(error) => {
                self.fail(None, error);
                return;
            }
        };
        self.set_job_id(job_id.clone());

        if self.state() != JobState::Pending {
            // Canceled while start was in flight.
            if self.claim_remote_cancel() {
                self.remote_cancel(&job_id).await;
            }
            return;
        }
        tracing::info!(endpoint = %self.endpoint, job_id = %job_id, "job started");

        let job = JobRef { id: job_id };
        // Re-checked before every call: a callback or another task may have
        // canceled the job since the last page.
        while self.state() == JobState::Pending {
            let page = self.call::<Page, _>(Intention::Continue, &job).await;
            if !self.deliver_page(&job.id, page) {
                return;
            }
        }
    }

    /// Apply one continue outcome. Returns true while polling should go on.
    fn deliver_page(&self, job_id: &JobId, page: Result<Page, JobError>) -> bool {
        let _delivery = self.lock_delivery();
        if self.state() != JobState::Pending {
            tracing::warn!(
                endpoint = %self.endpoint,
                job_id = %job_id,
                "discarding continue response for a finished job"
            );
            return false;
        }

        let page = match page {
            Ok(page) => page,
            Err(error) => return self.fail_locked(Some(job_id.clone()), error),
        };
        if let Some(message) = page.error {
            return self.fail_locked(Some(job_id.clone()), JobError::Remote(message));
        }

        self.pages.fetch_add(1, Ordering::Relaxed);
        if !page.finish {
            (self.callback)(JobUpdate::Progress {
                job_id: job_id.clone(),
                load: page.load,
            });
            return true;
        }

        if self.transition(JobState::Done) {
            tracing::info!(
                endpoint = %self.endpoint,
                job_id = %job_id,
                pages = self.pages.load(Ordering::Relaxed),
                "job done"
            );
            (self.callback)(JobUpdate::Done {
                job_id: job_id.clone(),
                load: page.load,
            });
            self.settle();
        }
        false
    }

    fn fail(&self, job_id: Option<JobId>, error: JobError) {
        let _delivery = self.lock_delivery();
        self.fail_locked(job_id, error);
    }

    /// Caller holds the delivery lock. Always returns false (stop polling).
    fn fail_locked(&self, job_id: Option<JobId>, error: JobError) -> bool {
        if self.transition(JobState::Fail) {
            tracing::warn!(
                endpoint = %self.endpoint,
                job_id = ?job_id,
                error = %error,
                "job failed"
            );
            (self.callback)(JobUpdate::Failed { job_id, error });
            self.settle();
        }
        false
    }

    /// Best-effort remote cancel. True if the remote acknowledged it.
    async fn remote_cancel(&self, id: &JobId) -> bool {
        let job = JobRef { id: id.clone() };
        match self.call::<Value, _>(Intention::Cancel, &job).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    job_id = %id,
                    "remote cancel failed: {e}"
                );
                false
            }
        }
    }

    async fn call<R, L>(&self, intention: Intention, load: &L) -> Result<R, JobError>
    where
        R: DeserializeOwned,
        L: Serialize,
    {
        let load = serde_json::to_value(load).map_err(|e| {
            JobError::transport(intention, TransportError::Protocol(e.to_string()))
        })?;
        let response = self
            .transport
            .send(&self.endpoint, intention, load)
            .await
            .map_err(|e| JobError::transport(intention, e))?;
        serde_json::from_value(response).map_err(|e| {
            JobError::transport(
                intention,
                TransportError::Protocol(format!("unexpected {intention} response: {e}")),
            )
        })
    }
}

// crates/jobs/src/sink.rs
//! Glue between a job and the result store: every page load is decoded and
//! appended to one store slot, in callback order.

use std::sync::Arc;

use jobstream_core::{
    JobState, JobUpdate, ResultStore, SlotWriter, StoreError, StreamingDecoder,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::JobCallback;

/// Outcome of one sink once its job finished.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkReport {
    /// Elements appended to the slot.
    pub elements: usize,
    /// Last state observed. `Pending` only if the job vanished mid-flight.
    pub terminal: JobState,
    /// First job or decode error, if any.
    pub error: Option<String>,
}

pub struct SinkHandle {
    task: JoinHandle<SinkReport>,
}

impl SinkHandle {
    /// Wait for the terminal update to be stored.
    pub async fn finished(self) -> SinkReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("store sink task failed: {e}");
                SinkReport {
                    elements: 0,
                    terminal: JobState::Fail,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

pub struct StoreSink;

impl StoreSink {
    /// Claim the slot `namespace`/`key`, clear it, and return the job
    /// callback that fills it.
    ///
    /// Updates are queued to a single consumer task so loads are decoded and
    /// appended strictly in arrival order. `downstream`, if set, sees every
    /// update after its load has been stored. Fails with `WriterBusy` when
    /// another sink owns the slot.
    pub fn attach(
        store: &Arc<ResultStore>,
        decoder: StreamingDecoder,
        namespace: &str,
        key: &str,
        downstream: Option<JobCallback>,
    ) -> Result<(JobCallback, SinkHandle), StoreError> {
        let writer = store.claim_writer(namespace, key, format!("store-sink:{namespace}/{key}"))?;
        writer.reset();

        let (tx, rx) = mpsc::unbounded_channel::<JobUpdate>();
        let task = tokio::spawn(consume(rx, writer, decoder, downstream));

        let callback: JobCallback = Arc::new(move |update: JobUpdate| {
            if tx.send(update).is_err() {
                tracing::debug!("store sink closed, dropping job update");
            }
        });
        Ok((callback, SinkHandle { task }))
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<JobUpdate>,
    writer: SlotWriter<Value>,
    decoder: StreamingDecoder,
    downstream: Option<JobCallback>,
) -> SinkReport {
    let mut report = SinkReport {
        elements: 0,
        terminal: JobState::Pending,
        error: None,
    };
    // After a decode failure the slot keeps what it has and later loads are skipped.
    let mut decoding = true;

    while let Some(update) = rx.recv().await {
        let state = update.state();

        // A completion-only page carries no load; it adds nothing to the slot.
        let load = update.load().filter(|load| decoding && !load.is_null());
        if let Some(load) = load {
            let stored = decoder
                .decode::<Value>(load.clone())
                .for_each_batch(|batch| writer.append(batch.elements))
                .await;
            match stored {
                Ok(count) => report.elements += count,
                Err(e) => {
                    tracing::warn!(
                        namespace = writer.namespace(),
                        key = writer.key(),
                        "decode failed, slot keeps {} elements: {e}",
                        writer.size()
                    );
                    report.elements = writer.size();
                    report.error.get_or_insert_with(|| e.to_string());
                    decoding = false;
                }
            }
        }

        if let JobUpdate::Failed { error, .. } = &update {
            report.error.get_or_insert_with(|| error.to_string());
        }
        if let Some(downstream) = &downstream {
            downstream(update);
        }
        if state.is_terminal() {
            report.terminal = state;
            tracing::debug!(
                namespace = writer.namespace(),
                key = writer.key(),
                elements = report.elements,
                state = %state,
                "store sink finished"
            );
            return report;
        }
    }

    report
        .error
        .get_or_insert_with(|| "job updates ended before a terminal state".to_string());
    report
}

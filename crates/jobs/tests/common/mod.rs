//! Scripted transport shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jobstream_core::{Intention, JobUpdate, TransportError};
use jobstream_jobs::{JobCallback, Transport};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// One scripted reply. `Gated` replies wait until the gate is notified.
pub enum Step {
    Reply(Value),
    Fail(TransportError),
    Gated(Arc<Notify>, Result<Value, TransportError>),
}

impl Step {
    pub fn page(load: Value, finish: bool) -> Self {
        Step::Reply(json!({ "load": load, "finish": finish, "error": null }))
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    starts: Mutex<VecDeque<Step>>,
    continues: Mutex<VecDeque<Step>>,
    cancels: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Intention, Value)>>,
    call_seen: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, intention: Intention, step: Step) -> &Self {
        let queue = match intention {
            Intention::Start => &self.starts,
            Intention::Continue => &self.continues,
            Intention::Cancel => &self.cancels,
        };
        queue.lock().unwrap().push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<(Intention, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, intention: Intention) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == intention)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls have been received.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.call_seen.notified();
            if self.calls.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }

    fn next_step(&self, intention: Intention) -> Option<Step> {
        let queue = match intention {
            Intention::Start => &self.starts,
            Intention::Continue => &self.continues,
            Intention::Cancel => &self.cancels,
        };
        queue.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _endpoint: &str,
        intention: Intention,
        load: Value,
    ) -> Result<Value, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push((intention, load));
        self.call_seen.notify_waiters();

        let step = self.next_step(intention);
        let result = match step {
            Some(Step::Reply(value)) => Ok(value),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Gated(gate, result)) => {
                gate.notified().await;
                result
            }
            None if intention == Intention::Cancel => Ok(json!({})),
            None => Err(TransportError::Protocol(format!("no scripted {intention} reply"))),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Callback that records every update.
pub fn recorder() -> (JobCallback, Arc<Mutex<Vec<JobUpdate>>>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let callback: JobCallback =
        Arc::new(move |update: JobUpdate| sink.lock().unwrap().push(update));
    (callback, updates)
}

//! In-process FIFO import queue
//!
//! Exactly one job runs at a time. Enqueuing wakes a drain task if none is
//! running; the drain task pops jobs until the queue is empty. Every queued
//! job owns a [`CancellationToken`] created at enqueue time.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::models::QueueStatus;
use crate::error::{PipelineError, Result};

/// Executes one job to a terminal state
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job_id: Uuid, cancel: CancellationToken);

    /// Called when `run` panicked; must leave the job in a terminal state
    async fn abort(&self, job_id: Uuid, message: String);
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    current: Option<Uuid>,
    processing: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    idle: watch::Sender<bool>,
    runner: Arc<dyn JobRunner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap to clone; clones share the same queue
#[derive(Clone)]
pub struct ImportQueue {
    inner: Arc<Inner>,
}

impl ImportQueue {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                tokens: Mutex::new(HashMap::new()),
                idle,
                runner,
            }),
        }
    }

    /// Append `job_id` to the tail and start the worker if idle
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, job_id: Uuid) -> Result<()> {
        let start_worker = {
            let mut state = lock(&self.inner.state);
            if state.current == Some(job_id) || state.pending.contains(&job_id) {
                return Err(PipelineError::InvalidState(format!(
                    "Job {} is already queued",
                    job_id
                )));
            }

            lock(&self.inner.tokens).insert(job_id, CancellationToken::new());
            state.pending.push_back(job_id);
            debug!(job_id = %job_id, position = state.pending.len(), "Job enqueued");

            if state.processing {
                false
            } else {
                state.processing = true;
                self.inner.idle.send_replace(false);
                true
            }
        };

        if start_worker {
            let inner = self.inner.clone();
            tokio::spawn(drain(inner));
        }

        Ok(())
    }

    /// Take a not-yet-started job out of the queue
    pub fn remove_from_queue(&self, job_id: Uuid) -> bool {
        let removed = {
            let mut state = lock(&self.inner.state);
            let before = state.pending.len();
            state.pending.retain(|id| *id != job_id);
            state.pending.len() != before
        };
        if removed {
            lock(&self.inner.tokens).remove(&job_id);
            debug!(job_id = %job_id, "Job removed from queue");
        }
        removed
    }

    /// Fire the job's cancellation token, returning whether one existed
    pub fn cancel_token(&self, job_id: Uuid) -> bool {
        match lock(&self.inner.tokens).get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            },
            None => false,
        }
    }

    pub fn status(&self) -> QueueStatus {
        let state = lock(&self.inner.state);
        QueueStatus {
            is_processing: state.processing,
            current_job_id: state.current,
            queue_length: state.pending.len(),
            ordered_queue: state.pending.iter().copied().collect(),
        }
    }

    /// Resolves once no job is running or waiting
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as `self`
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

async fn drain(inner: Arc<Inner>) {
    info!("Import worker started");

    loop {
        let next = {
            let mut state = lock(&inner.state);
            match state.pending.pop_front() {
                Some(job_id) => {
                    state.current = Some(job_id);
                    Some(job_id)
                },
                None => {
                    state.current = None;
                    state.processing = false;
                    inner.idle.send_replace(true);
                    None
                },
            }
        };

        let Some(job_id) = next else {
            break;
        };

        let token = lock(&inner.tokens).get(&job_id).cloned().unwrap_or_default();
        let runner = inner.runner.clone();
        let run = tokio::spawn(async move { runner.run(job_id, token).await });

        if let Err(e) = run.await {
            let message = if e.is_panic() {
                format!("Import worker panicked: {}", panic_message(e.into_panic()))
            } else {
                format!("Import worker stopped unexpectedly: {}", e)
            };
            error!(job_id = %job_id, error = %message, "Job run aborted");
            inner.runner.abort(job_id, message).await;
        }

        lock(&inner.tokens).remove(&job_id);
    }

    info!("Import worker idle");
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Worker Registry (C11): named, deduplicated background tasks with
//! cooperative cancellation.
//!
//! Grounded in the same idiom the teacher crate uses for its connection
//! registry (`Arc<RwLock<HashMap<..>>>` guarding handles), generalized here
//! to own `tokio::task::JoinHandle`s keyed by worker name instead of
//! connections keyed by host.

use novahv_common::{log_error, log_warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{EventSender, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

struct WorkerHandle {
    state: WorkerState,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

/// Cooperative-cancellation token handed to every worker closure; checking it
/// is how a long-running action notices `Cancel`/`CancelAll`.
#[derive(Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Returns `Err(Error::Cancelled)` if cancellation was requested; intended
    /// for use at natural checkpoints inside a long-running worker body.
    pub fn check(&self) -> Result<()> {
        if self.0.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// C11: named workers with per-name exclusivity and cooperative cancellation.
///
/// Used directly by C9 (bulk fan-out) and C10 (console/tunnel supervision),
/// and indirectly by every other component to keep hypervisor calls off
/// whatever thread called into `Core`.
pub struct WorkerRegistry {
    workers: Arc<RwLock<HashMap<String, WorkerHandle>>>,
    events: EventSender,
}

impl WorkerRegistry {
    pub fn new(events: EventSender) -> Self {
        Self { workers: Arc::new(RwLock::new(HashMap::new())), events }
    }

    /// Spawns `f(cancel_handle)` under `name`. If `exclusive` and a worker of
    /// the same name is still `Running`/`Pending`, the call is skipped and
    /// `Ok(false)` is returned; `Ok(true)` means it was scheduled.
    pub async fn run<F, Fut>(&self, name: &str, exclusive: bool, f: F) -> Result<bool>
    where
        F: FnOnce(CancelHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        {
            let workers = self.workers.read().await;
            if exclusive {
                if let Some(existing) = workers.get(name) {
                    if matches!(existing.state, WorkerState::Pending | WorkerState::Running) {
                        return Ok(false);
                    }
                }
            }
        }

        let cancel = CancellationToken::new();
        let handle = CancelHandle(cancel.clone());
        let events = self.events.clone();
        let workers_map = self.workers.clone();
        let task_name = name.to_string();

        self.set_state(name, WorkerState::Running).await;
        let _ = events.send(Event::WorkerState { name: task_name.clone(), state: WorkerState::Running });

        let join = tokio::spawn(async move {
            let result = f(handle).await;
            let final_state = match &result {
                Ok(()) => WorkerState::Success,
                Err(Error::Cancelled) => WorkerState::Cancelled,
                Err(e) => {
                    log_error!("worker", e, "worker '{}' failed", task_name);
                    WorkerState::Error
                }
            };
            if let Some(w) = workers_map.write().await.get_mut(&task_name) {
                w.state = final_state;
            }
            let _ = events.send(Event::WorkerState { name: task_name.clone(), state: final_state });
        });

        self.workers.write().await.insert(
            name.to_string(),
            WorkerHandle { state: WorkerState::Running, cancel, join },
        );
        Ok(true)
    }

    async fn set_state(&self, name: &str, state: WorkerState) {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(w) => w.state = state,
            None => {
                workers.insert(
                    name.to_string(),
                    WorkerHandle { state, cancel: CancellationToken::new(), join: tokio::spawn(async {}) },
                );
            }
        }
    }

    pub async fn state(&self, name: &str) -> Option<WorkerState> {
        self.workers.read().await.get(name).map(|w| w.state)
    }

    /// Requests cooperative cancellation of the named worker; it is up to the
    /// worker body to observe `CancelHandle::check`.
    pub async fn cancel(&self, name: &str) {
        if let Some(w) = self.workers.read().await.get(name) {
            w.cancel.cancel();
        }
    }

    /// Cancels every registered worker and waits for them to finish.
    pub async fn cancel_all(&self) {
        let names: Vec<String> = self.workers.read().await.keys().cloned().collect();
        for name in &names {
            self.cancel(name).await;
        }
        let mut workers = self.workers.write().await;
        for (name, w) in workers.drain() {
            if let Err(e) = w.join.await {
                log_warn!("worker", "worker '{}' panicked during shutdown: {}", name, e);
            }
        }
    }
}

//! Bounded invocation dispatcher
//!
//! Admission is limited to `workers + queue_capacity` calls. Past that the
//! overflow policy either rejects immediately or waits for a slot. Admitted
//! calls then wait for one of `workers` execution permits and run under a
//! per-call timeout.

use crate::error::InvocationError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Fail with `queue_full` when every slot is taken
    #[default]
    Reject,
    /// Wait for a slot
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub timeout: Duration,
    pub drain: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            overflow: OverflowPolicy::Reject,
            timeout: Duration::from_millis(30_000),
            drain: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub workers: usize,
    pub queue_capacity: usize,
    pub running: usize,
    pub admitted: usize,
    pub closed: bool,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    /// No new admissions once cancelled
    closing: CancellationToken,
    /// Running calls are abandoned once cancelled
    abort: CancellationToken,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(config.workers)),
            slots: Arc::new(Semaphore::new(config.workers + config.queue_capacity)),
            closing: CancellationToken::new(),
            abort: CancellationToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn capacity(&self) -> usize {
        self.config.workers + self.config.queue_capacity
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.config.workers,
            queue_capacity: self.config.queue_capacity,
            running: self.config.workers - self.workers.available_permits(),
            admitted: self.capacity() - self.slots.available_permits(),
            closed: self.closing.is_cancelled(),
        }
    }

    /// Run `work` under the pool limits and the call timeout
    ///
    /// `work` receives the time budget so runners that can interrupt
    /// themselves (the Lua hook) stop on their own.
    pub async fn submit<F, Fut>(&self, name: &str, work: F) -> Result<JsonValue, InvocationError>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = Result<JsonValue, InvocationError>>,
    {
        if self.closing.is_cancelled() {
            return Err(InvocationError::ShuttingDown);
        }

        let _slot = match self.config.overflow {
            OverflowPolicy::Reject => match self.slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    debug!(name, "Invocation rejected: queue full");
                    return Err(InvocationError::QueueFull(self.config.queue_capacity));
                }
                Err(TryAcquireError::Closed) => return Err(InvocationError::ShuttingDown),
            },
            OverflowPolicy::Block => tokio::select! {
                permit = self.slots.clone().acquire_owned() => {
                    permit.map_err(|_| InvocationError::ShuttingDown)?
                }
                _ = self.closing.cancelled() => return Err(InvocationError::ShuttingDown),
            },
        };

        let _worker = tokio::select! {
            permit = self.workers.clone().acquire_owned() => {
                permit.map_err(|_| InvocationError::ShuttingDown)?
            }
            _ = self.abort.cancelled() => return Err(InvocationError::ShuttingDown),
        };

        let budget = self.config.timeout;
        let guarded = async {
            tokio::select! {
                result = work(budget) => result,
                _ = self.abort.cancelled() => Err(InvocationError::ShuttingDown),
            }
        };
        match tokio::time::timeout(budget, guarded).await {
            Ok(result) => result,
            Err(_) => {
                warn!(name, timeout_ms = budget.as_millis() as u64, "Invocation timed out");
                Err(InvocationError::Timeout {
                    name: name.to_string(),
                    timeout_ms: budget.as_millis() as u64,
                })
            }
        }
    }

    /// Refuse new work, let admitted work drain, then cancel the rest
    ///
    /// Returns `true` when everything finished within the drain window.
    pub async fn shutdown(&self) -> bool {
        self.closing.cancel();
        let total = self.capacity() as u32;
        let drained = tokio::time::timeout(self.config.drain, self.slots.acquire_many(total))
            .await
            .is_ok();
        if !drained {
            warn!(
                remaining = self.stats().admitted,
                "Drain window elapsed, cancelling in-flight invocations"
            );
        }
        self.abort.cancel();
        self.slots.close();
        self.workers.close();
        drained
    }
}

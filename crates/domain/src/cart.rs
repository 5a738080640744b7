//! Cart reconciliation after a committed order.
//!
//! Clearing the cart is best-effort: the cart store is a convenience cache and
//! shares no transaction with the order store. Jobs run on a fixed pool of
//! tokio tasks fed by a bounded queue, so submitting never blocks the order
//! response, and shutdown drains what was already accepted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::UserId;
use store::{CartStore, cart_key};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;

use crate::error::OrderError;

/// Retry budget for a single cart clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after the n-th failed attempt is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Sizing of the reconciliation pool.
#[derive(Debug, Clone)]
pub struct CartWorkerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// Upper bound on how long shutdown waits for queued jobs.
    pub drain_timeout: Duration,
}

impl Default for CartWorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
            retry: RetryPolicy::default(),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Clears a user's cart, retrying with linear backoff.
///
/// Returns the number of attempts used. When the budget is exhausted the
/// failure is logged and returned as [`OrderError::CleanupFailure`]; callers
/// must not let it affect the order.
pub async fn clear_cart<C: CartStore + ?Sized>(
    carts: &C,
    user_id: UserId,
    policy: &RetryPolicy,
) -> Result<u32, OrderError> {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match carts.clear(user_id).await {
            Ok(()) => {
                tracing::debug!(%user_id, attempt, "cart cleared");
                return Ok(attempt);
            }
            Err(e) => {
                tracing::debug!(%user_id, attempt, error = %e, "cart clear attempt failed");
                if attempt < max_attempts {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
            }
        }
    }

    let err = OrderError::CleanupFailure {
        user_id,
        attempts: max_attempts,
    };
    metrics::counter!("cart_cleanup_failures_total").increment(1);
    tracing::warn!(%user_id, key = %cart_key(user_id), error = %err, "cart cleanup gave up");
    Err(err)
}

/// Cheap, cloneable handle used to enqueue cart cleanups.
#[derive(Clone)]
pub struct CartReconcilerHandle {
    sender: mpsc::Sender<UserId>,
    closed: Arc<AtomicBool>,
}

impl CartReconcilerHandle {
    /// Enqueues a cleanup without waiting. Returns false if the job was
    /// dropped because the queue is full or shutting down.
    pub fn submit(&self, user_id: UserId) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(%user_id, code = "CLEANUP_FAILURE", "cart cleanup rejected: shutting down");
            metrics::counter!("cart_cleanup_failures_total").increment(1);
            return false;
        }
        match self.sender.try_send(user_id) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%user_id, code = "CLEANUP_FAILURE", "cart cleanup dropped: queue full");
                metrics::counter!("cart_cleanup_failures_total").increment(1);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(%user_id, code = "CLEANUP_FAILURE", "cart cleanup dropped: workers gone");
                metrics::counter!("cart_cleanup_failures_total").increment(1);
                false
            }
        }
    }
}

/// Owner of the reconciliation worker pool.
pub struct CartReconciler {
    handle: CartReconcilerHandle,
    shutdown: watch::Sender<bool>,
    workers: JoinSet<()>,
    drain_timeout: Duration,
}

impl CartReconciler {
    /// Spawns the worker pool on the current tokio runtime.
    pub fn start<C>(carts: Arc<C>, config: CartWorkerConfig) -> Self
    where
        C: CartStore + ?Sized + 'static,
    {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut workers = JoinSet::new();
        for worker in 0..config.workers.max(1) {
            workers.spawn(run_worker(
                worker,
                receiver.clone(),
                shutdown_rx.clone(),
                carts.clone(),
                config.retry,
            ));
        }
        tracing::info!(workers = workers.len(), "cart reconciler started");

        Self {
            handle: CartReconcilerHandle {
                sender,
                closed: Arc::new(AtomicBool::new(false)),
            },
            shutdown,
            workers,
            drain_timeout: config.drain_timeout,
        }
    }

    pub fn handle(&self) -> CartReconcilerHandle {
        self.handle.clone()
    }

    /// Stops accepting jobs, lets workers finish everything already queued,
    /// and waits up to the drain timeout. Returns false if workers had to be
    /// aborted.
    pub async fn shutdown(mut self) -> bool {
        self.handle.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("cart reconciler drained");
        } else {
            tracing::warn!(
                remaining = self.workers.len(),
                "cart reconciler drain timed out, aborting workers"
            );
            self.workers.abort_all();
        }
        drained
    }
}

async fn run_worker<C: CartStore + ?Sized>(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<UserId>>>,
    mut shutdown: watch::Receiver<bool>,
    carts: Arc<C>,
    retry: RetryPolicy,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                job = receiver.recv() => job,
                _ = shutdown.changed() => None,
            }
        };
        match job {
            Some(user_id) => {
                let _ = clear_cart(carts.as_ref(), user_id, &retry).await;
            }
            None => break,
        }
    }

    // Drain whatever was accepted before shutdown.
    loop {
        let job = receiver.lock().await.try_recv();
        match job {
            Ok(user_id) => {
                let _ = clear_cart(carts.as_ref(), user_id, &retry).await;
            }
            Err(_) => break,
        }
    }
    tracing::debug!(worker, "cart worker stopped");
}

//! Request queue: bounded concurrency, FIFO scheduling, retry by front-of-queue reinsertion.
//!
//! Every network call to the model service goes through here. At most `max_concurrent`
//! operations run at once; a failed item with retries left jumps ahead of fresh work.

use crate::endpoint::Endpoint;
use crate::error::ServiceError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Retries granted to each queued item before it fails with `MaxRetriesExceeded`.
pub const DEFAULT_RETRIES: u32 = 3;

type Attempt = Box<dyn Fn() -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync>;
type Reject = Box<dyn FnOnce(ServiceError) + Send>;

/// One pending or retrying unit of work. The attempt resolves the caller itself on success.
struct QueueItem {
    id: u64,
    attempt: Attempt,
    reject: Reject,
    retries: u32,
    attempts: u32,
}

struct QueueState {
    pending: VecDeque<QueueItem>,
    in_flight: usize,
    next_id: u64,
}

struct Inner {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    retries: u32,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to the queue. Clones schedule onto the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_retries(max_concurrent, DEFAULT_RETRIES)
    }

    pub fn with_retries(max_concurrent: usize, retries: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    in_flight: 0,
                    next_id: 0,
                }),
                max_concurrent: max_concurrent.max(1),
                retries,
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Queue `op` and wait for its final outcome. `op` is called once per attempt.
    /// Retryable failures are retried up to the queue's budget; others fail immediately.
    /// Must be called within a tokio runtime.
    pub async fn enqueue<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let resolve = Arc::clone(&slot);
        let attempt: Attempt = Box::new(move || {
            let fut = op();
            let resolve = Arc::clone(&resolve);
            async move {
                let value = fut.await?;
                if let Some(tx) = resolve.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    let _ = tx.send(Ok(value));
                }
                Ok(())
            }
            .boxed()
        });
        let reject: Reject = Box::new(move |err| {
            if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(Err(err));
            }
        });

        {
            let mut state = self.inner.lock();
            let id = state.next_id;
            state.next_id += 1;
            log::debug!("queue: enqueue #{} ({} pending, {} in flight)", id, state.pending.len(), state.in_flight);
            state.pending.push_back(QueueItem {
                id,
                attempt,
                reject,
                retries: self.inner.retries,
                attempts: 0,
            });
        }
        schedule(&self.inner);

        rx.await.unwrap_or_else(|_| {
            Err(ServiceError::Transport(
                "request queue dropped the operation".to_string(),
            ))
        })
    }

    /// Like [`enqueue`](Self::enqueue), but a connection-refused attempt against a `localhost`
    /// endpoint switches the endpoint to 127.0.0.1 and retries once inline, without spending
    /// the item's retry budget.
    pub async fn enqueue_with_fallback<T, F, Fut>(
        &self,
        endpoint: &Endpoint,
        op: F,
    ) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
        T: Send + 'static,
    {
        let endpoint = endpoint.clone();
        let op = Arc::new(op);
        self.enqueue(move || {
            let endpoint = endpoint.clone();
            let op = Arc::clone(&op);
            async move {
                match op().await {
                    Err(err) if err.is_connection_refused() && endpoint.fallback_to_loopback() => {
                        op().await
                    }
                    other => other,
                }
            }
        })
        .await
    }
}

/// Start pending items while below the concurrency limit. Items are popped under the lock,
/// so re-entrant calls from completions never dispatch the same item twice.
fn schedule(inner: &Arc<Inner>) {
    let mut state = inner.lock();
    while state.in_flight < inner.max_concurrent {
        let Some(item) = state.pending.pop_front() else {
            break;
        };
        state.in_flight += 1;
        tokio::spawn(run_item(Arc::clone(inner), item));
    }
}

async fn run_item(inner: Arc<Inner>, mut item: QueueItem) {
    item.attempts += 1;
    let result = (item.attempt)().await;

    let rejected = {
        let mut state = inner.lock();
        state.in_flight -= 1;
        match result {
            Ok(()) => {
                log::debug!("queue: #{} done after {} attempt(s)", item.id, item.attempts);
                None
            }
            Err(err) if err.is_retryable() && item.retries > 0 => {
                item.retries -= 1;
                log::debug!(
                    "queue: #{} failed ({}), retrying ({} left)",
                    item.id,
                    err,
                    item.retries
                );
                state.pending.push_front(item);
                None
            }
            Err(err) => {
                let err = if err.is_retryable() {
                    ServiceError::MaxRetriesExceeded {
                        attempts: item.attempts,
                        last: Box::new(err),
                    }
                } else {
                    err
                };
                log::debug!("queue: #{} failed: {}", item.id, err);
                Some((item.reject, err))
            }
        }
    };
    if let Some((reject, err)) = rejected {
        reject(err);
    }
    schedule(&inner);
}

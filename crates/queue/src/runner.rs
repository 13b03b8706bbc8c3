//! [`RequestQueue`]: FIFO task runner with a fixed minimum spacing.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::QueueError;

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Point-in-time view of the queue, for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Tasks waiting to start.
    pub pending: usize,
    /// Whether the drain loop is currently alive.
    pub draining: bool,
    /// Tasks that ran to completion (whatever they returned).
    pub completed: u64,
    /// Tasks that panicked.
    pub aborted: u64,
    pub delay_ms: u64,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueStats {{ pending: {}, draining: {}, completed: {}, aborted: {} }}",
            self.pending, self.draining, self.completed, self.aborted
        )
    }
}

struct State {
    jobs: VecDeque<Job>,
    draining: bool,
    last_finished: Option<Instant>,
}

struct Inner {
    delay: Duration,
    state: Mutex<State>,
    completed: AtomicU64,
    aborted: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // The lock is never held across an await or user code.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-consumer, multi-producer task runner.
///
/// Tasks execute strictly in submission order and never overlap. After a task
/// finishes, the next one starts no sooner than `delay` later. The drain loop
/// exits as soon as the queue is empty and the next [`submit`](Self::submit)
/// starts a new one; the spacing is measured from the last finished task, so
/// it also holds across restarts.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                delay,
                state: Mutex::new(State {
                    jobs: VecDeque::new(),
                    draining: false,
                    last_finished: None,
                }),
                completed: AtomicU64::new(0),
                aborted: AtomicU64::new(0),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Enqueue `task` and return a future resolving to its output.
    ///
    /// The task is queued immediately, before the returned future is polled,
    /// and runs to completion even if that future is dropped. A task's
    /// failure (an `Err` output or a panic) is delivered only to its own
    /// waiter; the loop carries on with the next task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut, T>(&self, task: F) -> impl Future<Output = Result<T, QueueError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let output = task().await;
                // Waiter may have gone away; the work still counts as done.
                let _ = tx.send(output);
            })
        });

        let start_loop = {
            let mut state = self.inner.lock();
            state.jobs.push_back(job);
            !std::mem::replace(&mut state.draining, true)
        };
        if start_loop {
            debug!("request queue drain loop starting");
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }

        async move { rx.await.map_err(|_| QueueError::TaskAborted) }
    }

    pub fn stats(&self) -> QueueStats {
        let (pending, draining) = {
            let state = self.inner.lock();
            (state.jobs.len(), state.draining)
        };
        QueueStats {
            pending,
            draining,
            completed: self.inner.completed.load(Ordering::Relaxed),
            aborted: self.inner.aborted.load(Ordering::Relaxed),
            delay_ms: self.inner.delay.as_millis() as u64,
        }
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("delay", &self.inner.delay)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn drain(inner: Arc<Inner>) {
    loop {
        let (job, not_before) = {
            let mut state = inner.lock();
            match state.jobs.pop_front() {
                Some(job) => (job, state.last_finished.map(|t| t + inner.delay)),
                None => {
                    state.draining = false;
                    debug!("request queue drained");
                    return;
                }
            }
        };

        if let Some(at) = not_before {
            tokio::time::sleep_until(at).await;
        }

        // Run on its own task so a panic is contained to this job.
        match tokio::spawn(job()).await {
            Ok(()) => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                inner.aborted.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "queued task aborted");
            }
        }

        inner.lock().last_finished = Some(Instant::now());
    }
}

//! Per-source fan-out of "new frame" notifications.
//!
//! Two consumer shapes are served: blocking waiters (generation counter +
//! condvar per handle, broadcast on publish, slow waiters coalesce missed
//! frames) and asynchronous callbacks (a small fixed worker pool fed by a
//! bounded queue, so producer latency is never coupled to callback duration).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::foundation::core::{Frame, lock};
use crate::foundation::error::{StrobeError, StrobeResult};

/// Asynchronous per-frame consumer, invoked off the producer thread with the
/// frame and its capture instant.
pub type FrameCallback = Arc<dyn Fn(&Frame, Instant) + Send + Sync>;

/// Registration cap for asynchronous callbacks.
pub const MAX_CALLBACKS: usize = 100;

const DISPATCH_QUEUE_CAP: usize = 8;
const DISPATCH_WORKERS: usize = 2;

struct WaiterInner {
    generation: Mutex<u64>,
    cv: Condvar,
}

/// Blocking wait handle returned by `subscribe()`.
///
/// Signals coalesce: a waiter that sleeps through several publishes wakes
/// once. Dropping the handle unregisters it lazily.
pub struct FrameWaiter {
    inner: Arc<WaiterInner>,
    seen: u64,
}

impl FrameWaiter {
    /// Block until a frame newer than the last observed one is published or
    /// `timeout` elapses. Returns `true` when woken by a new frame.
    pub fn wait_for_frame(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = lock(&self.inner.generation);
        while *generation == self.seen {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _timed_out) = self
                .inner
                .cv
                .wait_timeout(generation, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            generation = g;
        }
        self.seen = *generation;
        true
    }
}

struct DispatchJob {
    cb: FrameCallback,
    frame: Frame,
    captured_at: Instant,
}

struct DispatchPool {
    tx: SyncSender<DispatchJob>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    fn spawn() -> Self {
        let (tx, rx) = sync_channel::<DispatchJob>(DISPATCH_QUEUE_CAP);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..DISPATCH_WORKERS)
            .map(|i| {
                let rx = Arc::clone(&rx);
                std::thread::Builder::new()
                    .name(format!("strobe-cb-{i}"))
                    .spawn(move || worker_loop(&rx))
                    .expect("spawning a callback worker thread")
            })
            .collect();
        Self { tx, workers }
    }
}

fn worker_loop(rx: &Arc<Mutex<Receiver<DispatchJob>>>) {
    loop {
        // Hold the receiver lock only for the dequeue, never across a job.
        let job = { lock(rx).recv() };
        let Ok(job) = job else {
            return;
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| (job.cb)(&job.frame, job.captured_at)));
        if outcome.is_err() {
            tracing::warn!("frame callback panicked; sibling callbacks unaffected");
        }
    }
}

/// Fan-out hub owned by each source.
#[derive(Default)]
pub struct SubscriberHub {
    waiters: Mutex<Vec<Weak<WaiterInner>>>,
    callbacks: Mutex<Vec<FrameCallback>>,
    pool: Mutex<Option<DispatchPool>>,
}

impl SubscriberHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a new blocking waiter.
    pub(crate) fn subscribe(&self) -> FrameWaiter {
        let inner = Arc::new(WaiterInner {
            generation: Mutex::new(0),
            cv: Condvar::new(),
        });
        lock(&self.waiters).push(Arc::downgrade(&inner));
        FrameWaiter { inner, seen: 0 }
    }

    /// Remove a waiter registration. Dropping the handle has the same effect
    /// on the next publish.
    pub(crate) fn unsubscribe(&self, waiter: &FrameWaiter) {
        lock(&self.waiters).retain(|w| {
            w.upgrade()
                .is_some_and(|inner| !Arc::ptr_eq(&inner, &waiter.inner))
        });
    }

    /// Register an asynchronous callback. Registering the same `Arc` twice is
    /// a no-op; exceeding [`MAX_CALLBACKS`] is a validation error.
    pub(crate) fn add_callback(&self, cb: FrameCallback) -> StrobeResult<()> {
        let mut callbacks = lock(&self.callbacks);
        if callbacks.iter().any(|existing| Arc::ptr_eq(existing, &cb)) {
            return Ok(());
        }
        if callbacks.len() >= MAX_CALLBACKS {
            return Err(StrobeError::validation(format!(
                "frame callback limit of {MAX_CALLBACKS} reached"
            )));
        }
        callbacks.push(cb);
        drop(callbacks);

        let mut pool = lock(&self.pool);
        if pool.is_none() {
            *pool = Some(DispatchPool::spawn());
        }
        Ok(())
    }

    /// Broadcast a newly published frame to every waiter, then enqueue one
    /// dispatch job per registered callback. Never blocks: a full queue drops
    /// the job for that callback.
    pub(crate) fn notify(&self, frame: &Frame, captured_at: Instant) {
        {
            let mut waiters = lock(&self.waiters);
            waiters.retain(|w| {
                let Some(inner) = w.upgrade() else {
                    return false;
                };
                *lock(&inner.generation) += 1;
                inner.cv.notify_all();
                true
            });
        }

        let callbacks: Vec<FrameCallback> = lock(&self.callbacks).clone();
        if callbacks.is_empty() {
            return;
        }
        let pool = lock(&self.pool);
        let Some(pool) = pool.as_ref() else {
            return;
        };
        for cb in callbacks {
            let job = DispatchJob {
                cb,
                frame: frame.clone(),
                captured_at,
            };
            match pool.tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("callback queue full; dropping frame dispatch");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl Drop for SubscriberHub {
    fn drop(&mut self) {
        // Close the queue, then let in-flight jobs finish.
        let Some(pool) = lock(&self.pool).take() else {
            return;
        };
        drop(pool.tx);
        for worker in pool.workers {
            let _ = worker.join();
        }
    }
}

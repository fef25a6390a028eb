//! Per-task serial event queue.
//!
//! Blocks are delivered strictly in FIFO order and never overlap. There is no
//! dedicated thread: a mutex-protected work list is drained by whichever tokio
//! worker picks up the drain job.

use crate::future::TaskFuture;
use crate::sync::MutexExt;
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{error, trace, warn};

type Job = Box<dyn FnOnce() + Send>;

/// Jobs run by one drain pass before yielding the worker back to tokio
const DRAIN_BATCH: usize = 64;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_QUEUE: Cell<u64> = const { Cell::new(0) };
}

struct QueueState {
    jobs: VecDeque<Job>,
    draining: bool,
    suspended: usize,
}

struct QueueInner {
    id: u64,
    label: String,
    handle: Option<Handle>,
    state: Mutex<QueueState>,
}

/// Serial FIFO with asynchronous dispatch only
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

impl EventQueue {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                handle: Handle::try_current().ok(),
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    draining: false,
                    suspended: 0,
                }),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Schedule a block; returns immediately
    pub fn dispatch<F>(&self, block: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let start_drain = {
            let mut state = self.inner.state.locked();
            state.jobs.push_back(Box::new(block));
            if state.draining || state.suspended > 0 {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_drain {
            self.schedule_drain();
        }
    }

    /// Run `block` on this queue once `future` completes
    pub fn dispatch_notify<T, F>(&self, future: &TaskFuture<T>, block: F)
    where
        T: Clone + Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let queue = self.clone();
        future.on_complete(move |value| queue.dispatch(move || block(value)));
    }

    /// Suspend this queue, run `block` on `other`, then resume this queue.
    ///
    /// While the block runs no other block of this queue can run, so the
    /// block is mutually exclusive with both queues.
    pub fn dispatch_synchronized<F>(&self, other: &EventQueue, block: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            self.dispatch(block);
            return;
        }

        let local = self.clone();
        let other = other.clone();
        self.dispatch(move || {
            local.suspend();
            let guard = ResumeGuard(local);
            other.dispatch(move || {
                let _guard = guard;
                block();
            });
        });
    }

    /// Stop delivering blocks until a matching `resume`
    pub fn suspend(&self) {
        self.inner.state.locked().suspended += 1;
    }

    pub fn resume(&self) {
        let start_drain = {
            let mut state = self.inner.state.locked();
            if state.suspended == 0 {
                warn!("EventQueue '{}' resumed while not suspended", self.inner.label);
                return;
            }
            state.suspended -= 1;
            if state.suspended == 0 && !state.draining && !state.jobs.is_empty() {
                state.draining = true;
                true
            } else {
                false
            }
        };

        if start_drain {
            self.schedule_drain();
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.locked().suspended > 0
    }

    /// Whether the calling code is running as a block of this queue
    pub fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == self.inner.id)
    }

    pub fn debug_assert_current(&self) {
        debug_assert!(
            self.is_current(),
            "code confined to event queue '{}' ran outside of it",
            self.inner.label
        );
    }

    /// Spawn a future on the runtime this queue belongs to
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        spawn_on(self.inner.handle.as_ref(), &self.inner.label, future);
    }

    fn schedule_drain(&self) {
        let inner = Arc::clone(&self.inner);
        spawn_on(self.inner.handle.as_ref(), &self.inner.label, async move {
            drain(inner)
        });
    }
}

pub(crate) fn spawn_on<F>(handle: Option<&Handle>, label: &str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(current) => {
            current.spawn(future);
        }
        Err(_) => match handle {
            Some(handle) => {
                handle.spawn(future);
            }
            None => panic!(
                "event queue '{}' was used outside of a tokio runtime",
                label
            ),
        },
    }
}

fn drain(inner: Arc<QueueInner>) {
    let mut ran = 0;
    loop {
        let job = {
            let mut state = inner.state.locked();
            if state.suspended > 0 || state.jobs.is_empty() {
                state.draining = false;
                return;
            }
            if ran == DRAIN_BATCH {
                drop(state);
                trace!("EventQueue '{}' yielding after {} jobs", inner.label, ran);
                let next = Arc::clone(&inner);
                spawn_on(inner.handle.as_ref(), &inner.label, async move { drain(next) });
                return;
            }
            state.jobs.pop_front()
        };

        let Some(job) = job else {
            continue;
        };

        let previous = CURRENT_QUEUE.with(|current| current.replace(inner.id));
        let outcome = catch_unwind(AssertUnwindSafe(job));
        CURRENT_QUEUE.with(|current| current.set(previous));

        if let Err(panic) = outcome {
            error!("Block on event queue '{}' panicked", inner.label);
            let resume_draining = {
                let mut state = inner.state.locked();
                let pending = state.suspended == 0 && !state.jobs.is_empty();
                state.draining = pending;
                pending
            };
            if resume_draining {
                let next = Arc::clone(&inner);
                spawn_on(inner.handle.as_ref(), &inner.label, async move { drain(next) });
            }
            resume_unwind(panic);
        }
        ran += 1;
    }
}

struct ResumeGuard(EventQueue);

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        self.0.resume();
    }
}

use crate::future::{TaskFuture, TaskPromise};
use crate::task::Task;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Lifecycle points that can be deferred by holding a `PendingEvent`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PendingEventKind {
    PostDidAttach,
    AddOperation,
    PostDidAddOperation,
    Execute,
    PostDidExecute,
    PostDidCancel,
    Finish,
    PostDidFinish,
}

impl fmt::Display for PendingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PendingEventKind::PostDidAttach => "post-did-attach",
            PendingEventKind::AddOperation => "add-operation",
            PendingEventKind::PostDidAddOperation => "post-did-add-operation",
            PendingEventKind::Execute => "execute",
            PendingEventKind::PostDidExecute => "post-did-execute",
            PendingEventKind::PostDidCancel => "post-did-cancel",
            PendingEventKind::Finish => "finish",
            PendingEventKind::PostDidFinish => "post-did-finish",
        };
        f.write_str(name)
    }
}

struct PendingEventInner {
    kind: PendingEventKind,
    task_name: String,
    promise: TaskPromise<()>,
}

impl Drop for PendingEventInner {
    fn drop(&mut self) {
        trace!("Pending event {} of {} fired", self.kind, self.task_name);
        self.promise.complete(());
    }
}

/// A lifecycle event that fires once every clone has been dropped.
///
/// Observers receive a clone; anything they need to happen strictly before the
/// event can be done through `do_before_event` or by holding the clone.
#[derive(Clone)]
pub struct PendingEvent {
    inner: Arc<PendingEventInner>,
}

impl fmt::Debug for PendingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEvent")
            .field("kind", &self.inner.kind)
            .field("task", &self.inner.task_name)
            .finish()
    }
}

impl PendingEvent {
    pub(crate) fn new(kind: PendingEventKind, task: &Task) -> (PendingEvent, TaskFuture<()>) {
        let promise = TaskPromise::new();
        let fired = promise.future();
        let event = PendingEvent {
            inner: Arc::new(PendingEventInner {
                kind,
                task_name: task.name().to_string(),
                promise,
            }),
        };
        (event, fired)
    }

    pub fn kind(&self) -> PendingEventKind {
        self.inner.kind
    }

    /// Run `block` now, guaranteeing it completes before the event fires
    pub fn do_before_event<F, R>(&self, block: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _hold = self.clone();
        block()
    }
}

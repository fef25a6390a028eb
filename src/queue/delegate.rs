use crate::error::TaskError;
use crate::future::TaskFuture;
use crate::queue::TaskQueue;
use crate::task::{Task, TaskId};
use uuid::Uuid;

/// Non-task work submitted with `TaskQueue::add_work`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    id: Uuid,
    name: String,
}

impl WorkItem {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Anything a queue reports to its delegate
#[derive(Clone, Debug)]
pub enum QueueItem {
    Task(Task),
    Work(WorkItem),
}

impl QueueItem {
    pub fn id(&self) -> TaskId {
        match self {
            QueueItem::Task(task) => task.id(),
            QueueItem::Work(work) => work.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            QueueItem::Task(task) => task.name(),
            QueueItem::Work(work) => work.name(),
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            QueueItem::Task(task) => Some(task),
            QueueItem::Work(_) => None,
        }
    }
}

/// Lifecycle notifications from a `TaskQueue`.
///
/// `will_add` precedes every other callback for an item and `will_finish`
/// precedes `did_finish`. A returned future makes the queue wait for it
/// before continuing the add or the finish.
pub trait TaskQueueDelegate: Send + Sync + 'static {
    fn will_add(&self, _queue: &TaskQueue, _item: &QueueItem) -> Option<TaskFuture<()>> {
        None
    }

    fn did_add(&self, _queue: &TaskQueue, _item: &QueueItem) {}

    /// Tasks only; work items get `did_finish` alone
    fn will_finish(
        &self,
        _queue: &TaskQueue,
        _task: &Task,
        _errors: &[TaskError],
    ) -> Option<TaskFuture<()>> {
        None
    }

    fn did_finish(&self, _queue: &TaskQueue, _item: &QueueItem, _errors: &[TaskError]) {}
}

use crate::error::TaskError;
use crate::event_queue::EventQueue;
use crate::task::{PendingEvent, Task};

/// Lifecycle callbacks delivered on the task's event queue.
///
/// Every method has a no-op default so observers only implement the events
/// they care about. An observer that returns an `event_queue` has its
/// callbacks hopped onto that queue while the task's queue is held.
pub trait TaskObserver: Send + Sync + 'static {
    fn did_attach(&self, _task: &Task) {}

    fn will_execute(&self, _task: &Task, _pending_execute: &PendingEvent) {}

    fn did_execute(&self, _task: &Task) {}

    fn did_cancel(&self, _task: &Task, _errors: &[TaskError]) {}

    fn will_add(&self, _task: &Task, _new_task: &Task) {}

    fn did_add(&self, _task: &Task, _new_task: &Task) {}

    fn will_finish(&self, _task: &Task, _errors: &[TaskError], _pending_finish: &PendingEvent) {}

    fn did_finish(&self, _task: &Task, _errors: &[TaskError]) {}

    fn event_queue(&self) -> Option<EventQueue> {
        None
    }
}

type TaskBlock = Box<dyn Fn(&Task) + Send + Sync>;
type PendingBlock = Box<dyn Fn(&Task, &PendingEvent) + Send + Sync>;
type ErrorsBlock = Box<dyn Fn(&Task, &[TaskError]) + Send + Sync>;
type PendingErrorsBlock = Box<dyn Fn(&Task, &[TaskError], &PendingEvent) + Send + Sync>;
type AddBlock = Box<dyn Fn(&Task, &Task) + Send + Sync>;

/// Observer assembled from closures
#[derive(Default)]
pub struct BlockObserver {
    did_attach: Option<TaskBlock>,
    will_execute: Option<PendingBlock>,
    did_execute: Option<TaskBlock>,
    did_cancel: Option<ErrorsBlock>,
    will_add: Option<AddBlock>,
    did_add: Option<AddBlock>,
    will_finish: Option<PendingErrorsBlock>,
    did_finish: Option<ErrorsBlock>,
    queue: Option<EventQueue>,
}

impl BlockObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_did_attach(mut self, block: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.did_attach = Some(Box::new(block));
        self
    }

    pub fn on_will_execute(
        mut self,
        block: impl Fn(&Task, &PendingEvent) + Send + Sync + 'static,
    ) -> Self {
        self.will_execute = Some(Box::new(block));
        self
    }

    pub fn on_did_execute(mut self, block: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.did_execute = Some(Box::new(block));
        self
    }

    pub fn on_did_cancel(
        mut self,
        block: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static,
    ) -> Self {
        self.did_cancel = Some(Box::new(block));
        self
    }

    pub fn on_will_add(mut self, block: impl Fn(&Task, &Task) + Send + Sync + 'static) -> Self {
        self.will_add = Some(Box::new(block));
        self
    }

    pub fn on_did_add(mut self, block: impl Fn(&Task, &Task) + Send + Sync + 'static) -> Self {
        self.did_add = Some(Box::new(block));
        self
    }

    pub fn on_will_finish(
        mut self,
        block: impl Fn(&Task, &[TaskError], &PendingEvent) + Send + Sync + 'static,
    ) -> Self {
        self.will_finish = Some(Box::new(block));
        self
    }

    pub fn on_did_finish(
        mut self,
        block: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static,
    ) -> Self {
        self.did_finish = Some(Box::new(block));
        self
    }

    /// Deliver callbacks on `queue` instead of the task's own queue
    pub fn with_event_queue(mut self, queue: EventQueue) -> Self {
        self.queue = Some(queue);
        self
    }
}

impl TaskObserver for BlockObserver {
    fn did_attach(&self, task: &Task) {
        if let Some(block) = &self.did_attach {
            block(task);
        }
    }

    fn will_execute(&self, task: &Task, pending_execute: &PendingEvent) {
        if let Some(block) = &self.will_execute {
            block(task, pending_execute);
        }
    }

    fn did_execute(&self, task: &Task) {
        if let Some(block) = &self.did_execute {
            block(task);
        }
    }

    fn did_cancel(&self, task: &Task, errors: &[TaskError]) {
        if let Some(block) = &self.did_cancel {
            block(task, errors);
        }
    }

    fn will_add(&self, task: &Task, new_task: &Task) {
        if let Some(block) = &self.will_add {
            block(task, new_task);
        }
    }

    fn did_add(&self, task: &Task, new_task: &Task) {
        if let Some(block) = &self.did_add {
            block(task, new_task);
        }
    }

    fn will_finish(&self, task: &Task, errors: &[TaskError], pending_finish: &PendingEvent) {
        if let Some(block) = &self.will_finish {
            block(task, errors, pending_finish);
        }
    }

    fn did_finish(&self, task: &Task, errors: &[TaskError]) {
        if let Some(block) = &self.did_finish {
            block(task, errors);
        }
    }

    fn event_queue(&self) -> Option<EventQueue> {
        self.queue.clone()
    }
}

impl Task {
    pub fn add_did_finish_block(&self, block: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static) {
        self.add_observer(BlockObserver::new().on_did_finish(block));
    }

    pub fn add_will_finish_block(
        &self,
        block: impl Fn(&Task, &[TaskError], &PendingEvent) + Send + Sync + 'static,
    ) {
        self.add_observer(BlockObserver::new().on_will_finish(block));
    }

    pub fn add_did_cancel_block(&self, block: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static) {
        self.add_observer(BlockObserver::new().on_did_cancel(block));
    }

    pub fn add_will_execute_block(
        &self,
        block: impl Fn(&Task, &PendingEvent) + Send + Sync + 'static,
    ) {
        self.add_observer(BlockObserver::new().on_will_execute(block));
    }

    pub fn add_did_execute_block(&self, block: impl Fn(&Task) + Send + Sync + 'static) {
        self.add_observer(BlockObserver::new().on_did_execute(block));
    }
}

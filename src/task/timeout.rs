use crate::error::TaskError;
use crate::task::{Delay, PendingEvent, Task, TaskObserver};
use tracing::warn;

/// Cancels a task with `TimedOut` when it has not finished in time.
///
/// The timer is armed when the task is about to execute and disarmed once it
/// finished.
#[derive(Clone, Debug)]
pub struct TimeoutObserver {
    delay: Delay,
}

impl TimeoutObserver {
    pub fn new(delay: impl Into<Delay>) -> Self {
        Self {
            delay: delay.into(),
        }
    }

    pub fn delay(&self) -> Delay {
        self.delay
    }
}

impl TaskObserver for TimeoutObserver {
    fn will_execute(&self, task: &Task, _pending_execute: &PendingEvent) {
        let delay = self.delay;
        let remaining = delay.remaining();
        let finished = task.finished_future();
        let weak = task.downgrade();

        task.event_queue().spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {
                    let Some(task) = weak.upgrade() else {
                        return;
                    };
                    if !task.is_finished() {
                        warn!("Task {} ({}) timed out after {:?}", task.name(), task.id(), remaining);
                        task.cancel(vec![TaskError::TimedOut(delay)]);
                    }
                }
                _ = finished.wait() => {}
            }
        });
    }
}

impl Task {
    /// Cancel this task with `TimedOut` if it runs longer than `delay`
    pub fn with_timeout(self, delay: impl Into<Delay>) -> Task {
        self.add_observer(TimeoutObserver::new(delay));
        self
    }
}

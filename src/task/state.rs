use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for tasks
pub type TaskId = uuid::Uuid;

/// Lifecycle states, in order
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskState {
    Initialized,
    WillEnqueue,
    Pending,
    Started,
    Executing,
    Finishing,
    Finished,
}

impl TaskState {
    /// Legal edges are the consecutive pairs plus `Started -> Finishing`
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Initialized, WillEnqueue)
                | (WillEnqueue, Pending)
                | (Pending, Started)
                | (Started, Executing)
                | (Started, Finishing)
                | (Executing, Finishing)
                | (Finishing, Finished)
        )
    }

    /// Move to `next`.
    ///
    /// # Panics
    ///
    /// Panics on an illegal transition.
    pub fn transition(&mut self, next: TaskState) {
        if !self.can_transition_to(next) {
            panic!("illegal task state transition {} -> {}", self, next);
        }
        *self = next;
    }

    pub fn is_terminal(self) -> bool {
        self == TaskState::Finished
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Initialized => "initialized",
            TaskState::WillEnqueue => "will-enqueue",
            TaskState::Pending => "pending",
            TaskState::Started => "started",
            TaskState::Executing => "executing",
            TaskState::Finishing => "finishing",
            TaskState::Finished => "finished",
        };
        f.write_str(name)
    }
}

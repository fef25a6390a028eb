use crate::task::{Task, TaskBody};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A relative or absolute point in time
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delay {
    By(Duration),
    Until(DateTime<Utc>),
}

impl Delay {
    /// Time left from now; zero when the deadline has passed
    pub fn remaining(&self) -> Duration {
        match self {
            Delay::By(duration) => *duration,
            Delay::Until(deadline) => (*deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO),
        }
    }
}

impl From<Duration> for Delay {
    fn from(duration: Duration) -> Self {
        Delay::By(duration)
    }
}

/// Body that waits out a delay and then finishes.
///
/// Cancelling the task finishes it immediately.
pub struct DelayBody {
    delay: Delay,
}

impl DelayBody {
    pub fn new(delay: Delay) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl TaskBody for DelayBody {
    async fn execute(&self, task: Task) {
        let remaining = self.delay.remaining();
        if remaining.is_zero() {
            task.finish(Vec::new());
            return;
        }

        debug!("Task {} sleeping for {:?}", task.name(), remaining);
        let cancelled = task.cancelled_future();
        tokio::select! {
            _ = tokio::time::sleep(remaining) => task.finish(Vec::new()),
            _ = cancelled.wait() => {}
        }
    }
}

impl Task {
    /// Task that finishes after `delay`
    pub fn delay(delay: impl Into<Delay>) -> Task {
        Task::new("Delay", DelayBody::new(delay.into()))
    }
}

use crate::config::RetryConfig;
use crate::group::{FailureInfo, PayloadSource, RepeatMode, RepeatPayload, RepeatSchedule, RepeatTask, WaitStrategy};
use crate::task::Task;
use std::ops::Deref;
use std::sync::Arc;

/// A repeating group that adds another attempt only when the current one fails.
///
/// The handler sees every failure and returns the payload to retry with, or
/// `None` to give up; the last attempt's errors then become the group's.
#[derive(Clone)]
pub struct RetryTask {
    repeat: RepeatTask,
}

impl Deref for RetryTask {
    type Target = RepeatTask;

    fn deref(&self) -> &RepeatTask {
        &self.repeat
    }
}

impl RetryTask {
    /// # Panics
    ///
    /// Panics when `source` yields no initial payload.
    pub fn new<H>(name: impl Into<String>, source: impl PayloadSource, handler: H) -> Self
    where
        H: Fn(FailureInfo, RepeatPayload) -> Option<RepeatPayload> + Send + Sync + 'static,
    {
        let repeat = RepeatTask::with_mode(
            name.into(),
            Box::new(source),
            RepeatMode::Retry(Arc::new(handler)),
        );
        RetryTask { repeat }
    }

    /// Retry up to `max_attempts` attempts in total, waiting per `wait`
    pub fn up_to(
        name: impl Into<String>,
        max_attempts: usize,
        wait: WaitStrategy,
        factory: impl FnMut(usize) -> Option<Task> + Send + 'static,
    ) -> Self {
        let schedule = RepeatSchedule::new(factory)
            .with_wait(wait)
            .with_limit(max_attempts);
        Self::new(name, schedule, |_, payload| Some(payload))
    }

    pub fn from_config(
        name: impl Into<String>,
        config: &RetryConfig,
        factory: impl FnMut(usize) -> Option<Task> + Send + 'static,
    ) -> Self {
        let attempts = usize::try_from(config.max_attempts).unwrap_or(usize::MAX);
        Self::up_to(name, attempts.max(1), config.wait.to_strategy(), factory)
    }

    pub fn repeat(&self) -> &RepeatTask {
        &self.repeat
    }

    pub fn into_task(self) -> Task {
        self.repeat.into_task()
    }
}

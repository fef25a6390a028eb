use crate::error::TaskError;
use crate::task::Task;
use async_trait::async_trait;
use std::future::Future;

/// The work a task performs.
///
/// `execute` is only invoked once the task legally reached `Executing`. The
/// body signals completion through `task.finish(errors)`; a body that never
/// finishes leaves its task executing.
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    async fn execute(&self, task: Task);

    /// Synchronous hook run when the task is cancelled
    fn on_cancel(&self, _task: &Task, _errors: &[TaskError]) {}
}

/// Body that finishes immediately without errors
pub struct EmptyBody;

#[async_trait]
impl TaskBody for EmptyBody {
    async fn execute(&self, task: Task) {
        task.finish(Vec::new());
    }
}

/// Body built from an async closure; the task finishes with the closure's error, if any
pub struct FnBody<F> {
    block: F,
}

impl<F> FnBody<F> {
    pub fn new(block: F) -> Self {
        Self { block }
    }
}

#[async_trait]
impl<F, Fut> TaskBody for FnBody<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn execute(&self, task: Task) {
        let outcome = (self.block)(task.clone()).await;
        match outcome {
            Ok(()) => task.finish(Vec::new()),
            Err(error) => task.finish(vec![error]),
        }
    }
}

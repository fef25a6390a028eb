//! Single-assignment promise/future pair used to sequence pipeline stages
//! without blocking a thread.

use crate::error::TaskError;
use crate::event_queue::EventQueue;
use crate::sync::MutexExt;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A future whose value is either a result or the error that prevented it
pub type FutureResult<T> = TaskFuture<Result<T, TaskError>>;

type Continuation<T> = Box<dyn FnOnce(T) + Send>;

struct PromiseState<T> {
    value: Option<T>,
    continuations: Vec<Continuation<T>>,
}

struct Shared<T> {
    state: Mutex<PromiseState<T>>,
    notify: Notify,
}

impl<T> Shared<T> {
    fn new(value: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState {
                value,
                continuations: Vec::new(),
            }),
            notify: Notify::new(),
        })
    }
}

/// Write side: completes exactly once
pub struct TaskPromise<T = ()> {
    shared: Arc<Shared<T>>,
}

/// Read side: many continuations, async wait, fan-in
pub struct TaskFuture<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskPromise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for TaskPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let completed = self.shared.state.locked().value.is_some();
        f.debug_struct("TaskPromise")
            .field("completed", &completed)
            .finish()
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let completed = self.shared.state.locked().value.is_some();
        f.debug_struct("TaskFuture")
            .field("completed", &completed)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for TaskPromise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> TaskPromise<T> {
    pub fn new() -> Self {
        Self {
            shared: Shared::new(None),
        }
    }

    /// Read side of this promise
    pub fn future(&self) -> TaskFuture<T> {
        TaskFuture {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.shared.state.locked().value.is_some()
    }

    /// Complete the promise.
    ///
    /// # Panics
    ///
    /// Panics when the promise was already completed.
    pub fn complete(&self, value: T) {
        if let Err(error) = self.try_complete(value) {
            panic!("{}", error);
        }
    }

    /// Complete the promise, reporting a second completion as an error
    pub fn try_complete(&self, value: T) -> Result<(), TaskError> {
        let continuations = {
            let mut state = self.shared.state.locked();
            if state.value.is_some() {
                return Err(TaskError::ProgrammingError(
                    "promise completed more than once".to_string(),
                ));
            }
            state.value = Some(value.clone());
            std::mem::take(&mut state.continuations)
        };

        for continuation in continuations {
            continuation(value.clone());
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

impl<T: Clone + Send + 'static> TaskPromise<Result<T, TaskError>> {
    pub fn complete_with_result(&self, value: T) {
        self.complete(Ok(value));
    }

    pub fn complete_with_failure(&self, error: TaskError) {
        self.complete(Err(error));
    }
}

impl<T: Clone + Send + 'static> TaskFuture<T> {
    /// An already completed future
    pub fn completed(value: T) -> Self {
        Self {
            shared: Shared::new(Some(value)),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.shared.state.locked().value.is_some()
    }

    /// Value if completed
    pub fn value(&self) -> Option<T> {
        self.shared.state.locked().value.clone()
    }

    /// Register a continuation; runs inline when the future is already complete
    pub(crate) fn on_complete<F>(&self, block: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let value = {
            let mut state = self.shared.state.locked();
            match state.value.clone() {
                Some(value) => value,
                None => {
                    state.continuations.push(Box::new(block));
                    return;
                }
            }
        };
        block(value);
    }

    /// Schedule `block` on `queue` once this future completes
    pub fn then<U, F>(&self, queue: &EventQueue, block: F) -> TaskFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let promise = TaskPromise::new();
        let future = promise.future();
        let queue = queue.clone();
        self.on_complete(move |value| {
            queue.dispatch(move || promise.complete(block(value)));
        });
        future
    }

    /// Wait for the value without blocking a thread
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.value() {
                return value;
            }
            notified.await;
        }
    }

    /// Fan-in: completes once every member has completed
    pub fn all<I>(futures: I) -> TaskFuture<()>
    where
        I: IntoIterator<Item = TaskFuture<T>>,
    {
        let futures: Vec<_> = futures.into_iter().collect();
        if futures.is_empty() {
            return TaskFuture::completed(());
        }

        let promise = TaskPromise::new();
        let remaining = Arc::new(AtomicUsize::new(futures.len()));
        for future in &futures {
            let promise = promise.clone();
            let remaining = Arc::clone(&remaining);
            future.on_complete(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    promise.complete(());
                }
            });
        }
        promise.future()
    }
}

impl<T: Clone + Send + 'static> IntoFuture for TaskFuture<T> {
    type Output = T;
    type IntoFuture = BoxFuture<'static, T>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.wait().await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn test_promise_completes_future() {
        let promise = TaskPromise::<u32>::new();
        let future = promise.future();
        assert!(!future.is_completed());

        promise.complete(7);
        assert!(future.is_completed());
        assert_eq!(future.value(), Some(7));
        assert_eq!(future.await, 7);
    }

    #[test]
    #[should_panic(expected = "promise completed more than once")]
    fn test_second_complete_panics() {
        let promise = TaskPromise::<u32>::new();
        promise.complete(1);
        promise.complete(2);
    }

    #[test]
    fn test_try_complete_rejects_second_value() {
        let promise = TaskPromise::<u32>::new();
        assert!(promise.try_complete(1).is_ok());
        assert!(matches!(
            promise.try_complete(2),
            Err(TaskError::ProgrammingError(_))
        ));
        assert_eq!(promise.future().value(), Some(1));
    }

    #[tokio::test]
    async fn test_wait_from_another_task() {
        let promise = TaskPromise::<String>::new();
        let future = promise.future();

        let waiter = tokio::spawn(async move { future.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        promise.complete("done".to_string());

        assert_eq!(waiter.await.unwrap(), "done");
    }

    #[test]
    fn test_on_complete_runs_inline_when_ready() {
        let future = TaskFuture::completed(3);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        future.on_complete(move |value| {
            assert_eq!(value, 3);
            flag.store(true, Ordering::SeqCst);
        });
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_then_runs_on_event_queue() {
        let queue = EventQueue::new("then");
        let promise = TaskPromise::<u32>::new();
        let observed = queue.clone();
        let doubled = promise.future().then(&queue, move |value| {
            assert!(observed.is_current());
            value * 2
        });

        promise.complete(21);
        assert_eq!(doubled.await, 42);
    }

    #[tokio::test]
    async fn test_all_fans_in() {
        let promises: Vec<TaskPromise<()>> = (0..3).map(|_| TaskPromise::new()).collect();
        let all = TaskFuture::all(promises.iter().map(|p| p.future()));

        promises[0].complete(());
        promises[2].complete(());
        assert!(!all.is_completed());

        promises[1].complete(());
        assert!(all.is_completed());
    }

    #[test]
    fn test_all_of_nothing_is_complete() {
        let all = TaskFuture::<()>::all(Vec::new());
        assert!(all.is_completed());
    }

    #[tokio::test]
    async fn test_future_result_helpers() {
        let promise: TaskPromise<Result<u8, TaskError>> = TaskPromise::new();
        let future: FutureResult<u8> = promise.future();
        promise.complete_with_failure(TaskError::NoQueue);
        assert_eq!(future.await, Err(TaskError::NoQueue));
    }
}

use crate::config::QueueConfig;
use crate::error::TaskError;
use crate::event_queue::spawn_on;
use crate::exclusivity::ExclusivityManager;
use crate::future::{TaskFuture, TaskPromise};
use crate::queue::{QueueItem, TaskQueueDelegate, WorkItem};
use crate::sync::MutexExt;
use crate::task::{PendingEvent, Readiness, Task, TaskId, TaskObserver};
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, watch};
use tracing::{debug, info};
use uuid::Uuid;

struct QueueInner {
    config: QueueConfig,
    exclusivity: Arc<ExclusivityManager>,
    delegate: Mutex<Option<Arc<dyn TaskQueueDelegate>>>,
    tasks: DashMap<TaskId, Task>,
    work: DashMap<Uuid, WorkItem>,
    suspended: watch::Sender<bool>,
    semaphore: Option<Arc<Semaphore>>,
    idle: Notify,
    handle: Option<Handle>,
}

/// Scheduler running tasks once their dependencies and preconditions allow
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

/// Non-owning queue handle held by tasks
#[derive(Clone)]
pub struct WeakTaskQueue {
    inner: Weak<QueueInner>,
}

impl WeakTaskQueue {
    pub fn upgrade(&self) -> Option<TaskQueue> {
        self.inner.upgrade().map(|inner| TaskQueue { inner })
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.config.name)
            .field("tasks", &self.inner.tasks.len())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(QueueConfig::new(name))
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self::with_exclusivity(config, ExclusivityManager::shared())
    }

    /// Queue registering exclusivity categories with `exclusivity`
    pub fn with_exclusivity(config: QueueConfig, exclusivity: Arc<ExclusivityManager>) -> Self {
        let semaphore = config
            .max_concurrent_tasks
            .map(|max| Arc::new(Semaphore::new(max.max(1))));
        let suspended = watch::Sender::new(config.start_suspended);
        Self {
            inner: Arc::new(QueueInner {
                config,
                exclusivity,
                delegate: Mutex::new(None),
                tasks: DashMap::new(),
                work: DashMap::new(),
                suspended,
                semaphore,
                idle: Notify::new(),
                handle: Handle::try_current().ok(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn exclusivity(&self) -> &Arc<ExclusivityManager> {
        &self.inner.exclusivity
    }

    pub fn downgrade(&self) -> WeakTaskQueue {
        WeakTaskQueue {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn TaskQueueDelegate>>) {
        *self.inner.delegate.locked() = delegate;
    }

    pub fn delegate(&self) -> Option<Arc<dyn TaskQueueDelegate>> {
        self.inner.delegate.locked().clone()
    }

    pub fn set_suspended(&self, suspended: bool) {
        debug!("Queue {} suspended: {}", self.name(), suspended);
        self.inner.suspended.send_replace(suspended);
    }

    pub fn is_suspended(&self) -> bool {
        *self.inner.suspended.borrow()
    }

    /// Tasks added and not yet finished
    pub fn tasks(&self) -> Vec<Task> {
        self.inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.len() + self.inner.work.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_all(&self, errors: Vec<TaskError>) {
        let tasks = self.tasks();
        info!("Cancelling {} tasks on queue {}", tasks.len(), self.name());
        for task in tasks {
            task.cancel(errors.clone());
        }
    }

    /// Wait until every added task and work item finished
    pub async fn wait_until_all_finished(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Submit a task; the returned future completes once it is pending on
    /// this queue.
    ///
    /// # Panics
    ///
    /// Panics when the task was already added to a queue.
    pub fn add(&self, task: Task) -> TaskFuture<()> {
        self.add_task(task, true)
    }

    /// Submit several tasks in order
    pub fn add_all<I>(&self, tasks: I) -> TaskFuture<()>
    where
        I: IntoIterator<Item = Task>,
    {
        let added: Vec<_> = tasks.into_iter().map(|task| self.add(task)).collect();
        TaskFuture::all(added)
    }

    /// Submit a task without delegate notifications
    pub(crate) fn add_silently(&self, task: Task) -> TaskFuture<()> {
        self.add_task(task, false)
    }

    fn add_task(&self, task: Task, notify: bool) -> TaskFuture<()> {
        task.will_enqueue(self.downgrade());
        debug!("Adding task {} ({}) to queue {}", task.name(), task.id(), self.name());

        let promise = TaskPromise::new();
        let added = promise.future();

        let delegate = if notify { self.delegate() } else { None };
        if notify {
            task.add_observer(QueueObserver {
                queue: self.downgrade(),
            });
        }

        let will_add = delegate
            .as_ref()
            .and_then(|delegate| delegate.will_add(self, &QueueItem::Task(task.clone())));

        let queue = self.clone();
        let proceed = move || queue.enqueue(task, notify, promise);
        match will_add {
            Some(wait) => wait.on_complete(move |_| proceed()),
            None => proceed(),
        }
        added
    }

    fn enqueue(&self, task: Task, notify: bool, promise: TaskPromise<()>) {
        for category in task.mutually_exclusive_categories() {
            self.inner.exclusivity.add(&task, &category);
        }

        task.pending_queue_start();
        self.inner.tasks.insert(task.id(), task.clone());

        let queue = self.clone();
        let executed = task.clone();
        spawn_on(self.inner.handle.as_ref(), self.name(), async move {
            queue.run_task(executed).await
        });

        if notify {
            if let Some(delegate) = self.delegate() {
                delegate.did_add(self, &QueueItem::Task(task.clone()));
            }
        }
        promise.complete(());
    }

    /// Executor: wait for readiness, resumption and a permit, then start
    async fn run_task(self, task: Task) {
        let cancelled = task.cancelled_future();
        let mut suspended = self.inner.suspended.subscribe();

        // Conditions are evaluated only once the queue runs
        if suspended.wait_for(|suspended| !*suspended).await.is_ok() {
            task.post_queue_add();
            self.drive(&task, &cancelled, &mut suspended).await;
        }

        self.inner.tasks.remove(&task.id());
        self.inner.idle.notify_waiters();
    }

    async fn drive(
        &self,
        task: &Task,
        cancelled: &TaskFuture<()>,
        suspended: &mut watch::Receiver<bool>,
    ) {
        loop {
            let blockers = task.blockers();
            if !blockers.is_empty() {
                let blocked = TaskFuture::all(blockers);
                tokio::select! {
                    _ = blocked.wait() => {}
                    _ = cancelled.wait() => {}
                }
                continue;
            }

            if suspended.wait_for(|suspended| !*suspended).await.is_err() {
                break;
            }

            let Some(permit) = self.acquire_permit().await else {
                break;
            };

            match task.try_start() {
                Readiness::Started => {
                    task.wait_until_finished().await;
                    drop(permit);
                    break;
                }
                Readiness::Waiting => continue,
                Readiness::Gone => break,
            }
        }
    }

    async fn acquire_permit(&self) -> Option<Option<OwnedSemaphorePermit>> {
        match &self.inner.semaphore {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok().map(Some),
            None => Some(None),
        }
    }

    /// Run a future as a work item; the delegate sees only add and finish
    pub fn add_work<F>(&self, name: impl Into<String>, work: F) -> TaskFuture<()>
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let item = WorkItem::new(name);
        let promise = TaskPromise::new();
        let added = promise.future();
        self.inner.work.insert(item.id(), item.clone());

        let delegate = self.delegate();
        let will_add = delegate
            .as_ref()
            .and_then(|delegate| delegate.will_add(self, &QueueItem::Work(item.clone())));

        let queue = self.clone();
        let proceed = move || {
            if let Some(delegate) = queue.delegate() {
                delegate.did_add(&queue, &QueueItem::Work(item.clone()));
            }
            promise.complete(());
            let runner = queue.clone();
            spawn_on(queue.inner.handle.as_ref(), queue.name(), async move {
                runner.run_work(item, work).await
            });
        };
        match will_add {
            Some(wait) => wait.on_complete(move |_| proceed()),
            None => proceed(),
        }
        added
    }

    async fn run_work<F>(self, item: WorkItem, work: F)
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let mut suspended = self.inner.suspended.subscribe();
        let errors = if suspended.wait_for(|suspended| !*suspended).await.is_err() {
            Vec::new()
        } else {
            let permit = self.acquire_permit().await;
            let outcome = work.await;
            drop(permit);
            outcome.err().into_iter().collect::<Vec<_>>()
        };

        debug!("Work item {} finished on queue {}", item.name(), self.name());
        if let Some(delegate) = self.delegate() {
            delegate.did_finish(&self, &QueueItem::Work(item.clone()), &errors);
        }
        self.inner.work.remove(&item.id());
        self.inner.idle.notify_waiters();
    }
}

/// Forwards a task's finish to the queue delegate
struct QueueObserver {
    queue: WeakTaskQueue,
}

impl TaskObserver for QueueObserver {
    fn will_finish(&self, task: &Task, errors: &[TaskError], pending_finish: &PendingEvent) {
        let Some(queue) = self.queue.upgrade() else {
            return;
        };
        let Some(delegate) = queue.delegate() else {
            return;
        };
        if let Some(wait) = delegate.will_finish(&queue, task, errors) {
            let hold = pending_finish.clone();
            wait.on_complete(move |_| drop(hold));
        }
    }

    fn did_finish(&self, task: &Task, errors: &[TaskError]) {
        let Some(queue) = self.queue.upgrade() else {
            return;
        };
        if let Some(delegate) = queue.delegate() {
            delegate.did_finish(&queue, &QueueItem::Task(task.clone()), errors);
        }
    }
}

use crate::condition::{Condition, ConditionEvaluator};
use crate::error::TaskError;
use crate::event_queue::EventQueue;
use crate::future::{TaskFuture, TaskPromise};
use crate::queue::{TaskQueue, WeakTaskQueue};
use crate::sync::MutexExt;
use crate::task::{
    EmptyBody, FnBody, PendingEvent, PendingEventKind, TaskBody, TaskId, TaskObserver, TaskState,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type ObserverCallback = dyn Fn(&dyn TaskObserver, &Task, &PendingEvent) + Send + Sync;
type DidFinishHook = Box<dyn FnOnce(&Task) + Send>;

/// Construction-time behaviour switches
#[derive(Clone, Debug, Default)]
pub struct TaskOptions {
    automatic_finishing_disabled: bool,
    external_finish_forbidden: bool,
}

impl TaskOptions {
    /// The body alone decides when the task finishes, even after cancellation
    pub fn with_automatic_finishing_disabled(mut self) -> Self {
        self.automatic_finishing_disabled = true;
        self
    }

    pub(crate) fn with_external_finish_forbidden(mut self) -> Self {
        self.external_finish_forbidden = true;
        self
    }

    pub fn automatic_finishing_disabled(&self) -> bool {
        self.automatic_finishing_disabled
    }
}

/// Serializable point-in-time view of a task
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub is_cancelled: bool,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of an executor readiness check
pub(crate) enum Readiness {
    Started,
    Waiting,
    Gone,
}

struct TaskCore {
    state: TaskState,
    is_cancelled: bool,
    finished_handling_cancel: bool,
    handling_finish: bool,
    pending_finish: Option<Vec<TaskError>>,
    pending_automatic_finish: bool,
    errors: Vec<TaskError>,
    dependencies: Vec<Task>,
    gates: Vec<TaskFuture<()>>,
    conditions: Vec<Arc<dyn Condition>>,
    observers: Vec<Arc<dyn TaskObserver>>,
    queue: Option<WeakTaskQueue>,
    evaluator: Option<ConditionEvaluator>,
    did_finish_hooks: Vec<DidFinishHook>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

struct TaskInner {
    id: TaskId,
    name: String,
    body: Arc<dyn TaskBody>,
    event_queue: EventQueue,
    options: TaskOptions,
    core: Mutex<TaskCore>,
    finished: TaskPromise<()>,
    cancelled: TaskPromise<()>,
    created_at: DateTime<Utc>,
}

/// Schedulable unit of asynchronous work
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

/// Non-owning task handle
#[derive(Clone)]
pub struct WeakTask {
    inner: Weak<TaskInner>,
}

impl WeakTask {
    pub fn upgrade(&self) -> Option<Task> {
        self.inner.upgrade().map(|inner| Task { inner })
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    pub fn new(name: impl Into<String>, body: impl TaskBody) -> Task {
        Self::with_options(name, body, TaskOptions::default())
    }

    pub fn with_options(name: impl Into<String>, body: impl TaskBody, options: TaskOptions) -> Task {
        let name = name.into();
        let event_queue = EventQueue::new(name.clone());
        Task {
            inner: Arc::new(TaskInner {
                id: Uuid::new_v4(),
                name,
                body: Arc::new(body),
                event_queue,
                options,
                core: Mutex::new(TaskCore {
                    state: TaskState::Initialized,
                    is_cancelled: false,
                    finished_handling_cancel: false,
                    handling_finish: false,
                    pending_finish: None,
                    pending_automatic_finish: false,
                    errors: Vec::new(),
                    dependencies: Vec::new(),
                    gates: Vec::new(),
                    conditions: Vec::new(),
                    observers: Vec::new(),
                    queue: None,
                    evaluator: None,
                    did_finish_hooks: Vec::new(),
                    started_at: None,
                    finished_at: None,
                }),
                finished: TaskPromise::new(),
                cancelled: TaskPromise::new(),
                created_at: Utc::now(),
            }),
        }
    }

    /// Task running an async closure, finishing with its error if it returns one
    pub fn from_fn<F, Fut>(name: impl Into<String>, block: F) -> Task
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self::new(name, FnBody::new(block))
    }

    /// Task that finishes as soon as it executes
    pub fn empty(name: impl Into<String>) -> Task {
        Self::new(name, EmptyBody)
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> TaskState {
        self.inner.core.locked().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.core.locked().is_cancelled
    }

    pub fn is_executing(&self) -> bool {
        self.state() == TaskState::Executing
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    pub fn errors(&self) -> Vec<TaskError> {
        self.inner.core.locked().errors.clone()
    }

    pub fn failed(&self) -> bool {
        !self.inner.core.locked().errors.is_empty()
    }

    pub fn options(&self) -> &TaskOptions {
        &self.inner.options
    }

    pub fn dependencies(&self) -> Vec<Task> {
        self.inner.core.locked().dependencies.clone()
    }

    pub fn conditions(&self) -> Vec<Arc<dyn Condition>> {
        self.inner.core.locked().conditions.clone()
    }

    pub fn event_queue(&self) -> &EventQueue {
        &self.inner.event_queue
    }

    /// Queue the task was submitted to, while it is alive and the task unfinished
    pub fn queue(&self) -> Option<TaskQueue> {
        self.inner
            .core
            .locked()
            .queue
            .as_ref()
            .and_then(|queue| queue.upgrade())
    }

    pub fn downgrade(&self) -> WeakTask {
        WeakTask {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let core = self.inner.core.locked();
        TaskSnapshot {
            id: self.inner.id,
            name: self.inner.name.clone(),
            state: core.state,
            is_cancelled: core.is_cancelled,
            errors: core.errors.iter().map(|e| e.to_string()).collect(),
            created_at: self.inner.created_at,
            started_at: core.started_at,
            finished_at: core.finished_at,
        }
    }

    /// Completes once the task finished and its did-finish observers ran
    pub fn finished_future(&self) -> TaskFuture<()> {
        self.inner.finished.future()
    }

    /// Completes when the task is cancelled
    pub fn cancelled_future(&self) -> TaskFuture<()> {
        self.inner.cancelled.future()
    }

    pub async fn wait_until_finished(&self) {
        self.inner.finished.future().wait().await;
    }

    /// # Panics
    ///
    /// Panics once the task has started.
    pub fn add_dependency(&self, dependency: &Task) {
        if !self.try_add_dependency(dependency) {
            panic!(
                "cannot add a dependency to task '{}' after it started",
                self.inner.name
            );
        }
    }

    /// # Panics
    ///
    /// Panics once the task has started.
    pub fn remove_dependency(&self, dependency: &Task) {
        let mut core = self.inner.core.locked();
        if core.state >= TaskState::Started {
            panic!(
                "cannot remove a dependency from task '{}' after it started",
                self.inner.name
            );
        }
        core.dependencies.retain(|existing| existing != dependency);
    }

    /// # Panics
    ///
    /// Panics once the task is pending on a queue, or when the condition is
    /// already attached to another task.
    pub fn add_condition(&self, condition: impl Condition) {
        self.add_condition_arc(Arc::new(condition));
    }

    pub fn add_condition_arc(&self, condition: Arc<dyn Condition>) {
        {
            let core = self.inner.core.locked();
            if core.state >= TaskState::Pending {
                panic!(
                    "cannot add a condition to task '{}' once it is {}",
                    self.inner.name, core.state
                );
            }
        }
        condition.will_attach(self);
        self.inner.core.locked().conditions.push(condition);
    }

    /// # Panics
    ///
    /// Panics once the task has started.
    pub fn add_observer(&self, observer: impl TaskObserver) {
        self.add_observer_arc(Arc::new(observer));
    }

    pub fn add_observer_arc(&self, observer: Arc<dyn TaskObserver>) {
        {
            let mut core = self.inner.core.locked();
            if core.state > TaskState::Pending {
                panic!(
                    "cannot add an observer to task '{}' once it is {}",
                    self.inner.name, core.state
                );
            }
            core.observers.push(Arc::clone(&observer));
        }

        let (event, _) = PendingEvent::new(PendingEventKind::PostDidAttach, self);
        let callback: Arc<ObserverCallback> =
            Arc::new(|observer: &dyn TaskObserver, task: &Task, _: &PendingEvent| {
                observer.did_attach(task)
            });
        self.deliver(observer, event, callback);
    }

    /// Cancel the task. The first call wins; later calls are no-ops.
    pub fn cancel(&self, errors: Vec<TaskError>) {
        let evaluator = {
            let mut core = self.inner.core.locked();
            if core.state > TaskState::Executing || core.handling_finish || core.is_cancelled {
                debug!(
                    "Ignoring cancel of task {} in state {}",
                    self.inner.name, core.state
                );
                return;
            }
            core.is_cancelled = true;
            core.errors.extend(errors.iter().cloned());
            core.evaluator.clone()
        };

        if errors.is_empty() {
            info!("Task {} ({}) cancelled", self.inner.name, self.inner.id);
        } else {
            info!(
                "Task {} ({}) cancelled with {} errors",
                self.inner.name,
                self.inner.id,
                errors.len()
            );
        }

        self.inner.cancelled.complete(());
        self.inner.body.on_cancel(self, &errors);
        if let Some(evaluator) = evaluator {
            evaluator.cancel();
        }

        let observed = self.dispatch_observers(
            PendingEventKind::PostDidCancel,
            move |observer, task, _| observer.did_cancel(task, &errors),
        );
        let task = self.clone();
        self.inner
            .event_queue
            .dispatch_notify(&observed, move |_| task.did_handle_cancel());
    }

    /// Finish the task. The first call wins; later calls are dropped.
    ///
    /// # Panics
    ///
    /// Panics for a task group, which only finishes through its barrier, and
    /// when the task has not started and is not cancelled.
    pub fn finish(&self, errors: Vec<TaskError>) {
        if self.inner.options.external_finish_forbidden {
            panic!(
                "finish() must not be called on task group '{}'",
                self.inner.name
            );
        }
        self.finish_internal(errors);
    }

    /// Add `new_task` to this task's queue; the add completes before `before` fires
    pub fn produce(
        &self,
        new_task: Task,
        before: Option<PendingEvent>,
    ) -> Result<TaskFuture<()>, TaskError> {
        let queue = self.queue().ok_or(TaskError::NoQueue)?;
        let promise = TaskPromise::new();
        let produced = promise.future();

        debug!("Task {} producing {}", self.inner.name, new_task.name());

        self.announce_add(new_task, before, move |task| queue.add(task), promise);
        Ok(produced)
    }

    /// Run `add` for `new_task` between this task's will-add and did-add
    /// observers, then complete `promise`. `before` is held until then.
    pub(crate) fn announce_add<F>(
        &self,
        new_task: Task,
        before: Option<PendingEvent>,
        add: F,
        promise: TaskPromise<()>,
    ) where
        F: FnOnce(Task) -> TaskFuture<()> + Send + 'static,
    {
        let announced = new_task.clone();
        let will_add = self.dispatch_observers(
            PendingEventKind::AddOperation,
            move |observer, task, _| observer.will_add(task, &announced),
        );

        let task = self.clone();
        let event_queue = self.inner.event_queue.clone();
        self.inner.event_queue.dispatch_notify(&will_add, move |_| {
            let added = add(new_task.clone());
            added.then(&event_queue, move |_| {
                let _before = before;
                task.dispatch_observers(
                    PendingEventKind::PostDidAddOperation,
                    move |observer, task, _| observer.did_add(task, &new_task),
                );
                promise.complete(());
            });
        });
    }

    /// Will-add observers only; the returned future completes once they ran
    pub(crate) fn announce_will_add(&self, new_task: &Task) -> TaskFuture<()> {
        let announced = new_task.clone();
        self.dispatch_observers(PendingEventKind::AddOperation, move |observer, task, _| {
            observer.will_add(task, &announced)
        })
    }

    pub(crate) fn announce_did_add(&self, new_task: &Task) -> TaskFuture<()> {
        let announced = new_task.clone();
        self.dispatch_observers(
            PendingEventKind::PostDidAddOperation,
            move |observer, task, _| observer.did_add(task, &announced),
        )
    }

    pub(crate) fn try_add_dependency(&self, dependency: &Task) -> bool {
        if dependency == self {
            panic!("task '{}' cannot depend on itself", self.inner.name);
        }
        let mut core = self.inner.core.locked();
        if core.state >= TaskState::Started {
            return false;
        }
        if !core.dependencies.contains(dependency) {
            core.dependencies.push(dependency.clone());
        }
        true
    }

    /// Exclusivity categories requested by the attached conditions
    pub(crate) fn mutually_exclusive_categories(&self) -> Vec<String> {
        let mut categories = Vec::new();
        for condition in self.conditions() {
            for category in condition.mutually_exclusive_categories() {
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
        }
        categories
    }

    pub(crate) fn add_did_finish_hook(&self, hook: impl FnOnce(&Task) + Send + 'static) {
        self.inner.core.locked().did_finish_hooks.push(Box::new(hook));
    }

    /// # Panics
    ///
    /// Panics when the task was already submitted to a queue.
    pub(crate) fn will_enqueue(&self, queue: WeakTaskQueue) {
        let mut core = self.inner.core.locked();
        if core.state != TaskState::Initialized {
            panic!(
                "task '{}' was added to a queue more than once",
                self.inner.name
            );
        }
        core.state.transition(TaskState::WillEnqueue);
        core.queue = Some(queue);
    }

    /// Create the condition evaluator and mark the task pending
    pub(crate) fn pending_queue_start(&self) {
        let conditions = {
            let core = self.inner.core.locked();
            if core.is_cancelled {
                Vec::new()
            } else {
                core.conditions.clone()
            }
        };

        let evaluator = if conditions.is_empty() {
            None
        } else {
            Some(ConditionEvaluator::new(self, conditions))
        };

        let mut core = self.inner.core.locked();
        if let Some(evaluator) = evaluator {
            core.gates.push(evaluator.gate());
            core.evaluator = Some(evaluator);
        }
        core.state.transition(TaskState::Pending);
    }

    pub(crate) fn post_queue_add(&self) {
        let evaluator = self.inner.core.locked().evaluator.clone();
        if let Some(evaluator) = evaluator {
            if self.is_cancelled() {
                evaluator.cancel();
            } else {
                evaluator.start();
            }
        }
    }

    /// Signals the task still waits for; empty once cancelled
    pub(crate) fn blockers(&self) -> Vec<TaskFuture<()>> {
        Self::blockers_of(&self.inner.core.locked())
    }

    fn blockers_of(core: &TaskCore) -> Vec<TaskFuture<()>> {
        if core.is_cancelled {
            return Vec::new();
        }
        core.dependencies
            .iter()
            .map(|dependency| dependency.finished_future())
            .chain(core.gates.iter().cloned())
            .filter(|future| !future.is_completed())
            .collect()
    }

    /// Start the task if its dependencies and gates allow it
    pub(crate) fn try_start(&self) -> Readiness {
        {
            let mut core = self.inner.core.locked();
            if core.state != TaskState::Pending {
                return Readiness::Gone;
            }
            if !Self::blockers_of(&core).is_empty() {
                return Readiness::Waiting;
            }
            core.state.transition(TaskState::Started);
            core.started_at = Some(Utc::now());
        }

        debug!("Task {} ({}) started", self.inner.name, self.inner.id);
        let task = self.clone();
        self.inner.event_queue.dispatch(move || task.handle_start());
        Readiness::Started
    }

    pub(crate) fn finish_internal(&self, errors: Vec<TaskError>) {
        {
            let mut core = self.inner.core.locked();
            if core.state >= TaskState::Finishing || core.handling_finish {
                debug!(
                    "Task {} already finishing; dropping finish with {} errors",
                    self.inner.name,
                    errors.len()
                );
                return;
            }
            if core.state < TaskState::Started {
                if !core.is_cancelled {
                    panic!(
                        "task '{}' cannot finish before it started unless cancelled",
                        self.inner.name
                    );
                }
                core.handling_finish = true;
                core.pending_finish = Some(errors);
                return;
            }
            core.handling_finish = true;
        }

        let task = self.clone();
        self.inner
            .event_queue
            .dispatch(move || task.handle_finish(errors));
    }

    fn handle_start(&self) {
        self.inner.event_queue.debug_assert_current();

        let (pending_finish, cancelled) = {
            let mut core = self.inner.core.locked();
            (core.pending_finish.take(), core.is_cancelled)
        };

        if let Some(errors) = pending_finish {
            self.handle_finish(errors);
            return;
        }
        if cancelled && !self.inner.options.automatic_finishing_disabled {
            self.queue_automatic_finish();
            return;
        }

        let observed = self.dispatch_observers(PendingEventKind::Execute, |observer, task, event| {
            observer.will_execute(task, event)
        });
        let task = self.clone();
        self.inner
            .event_queue
            .dispatch_notify(&observed, move |_| task.handle_execute());
    }

    fn handle_execute(&self) {
        self.inner.event_queue.debug_assert_current();

        {
            let mut core = self.inner.core.locked();
            if core.state > TaskState::Started || core.handling_finish {
                return;
            }
            if core.is_cancelled && !self.inner.options.automatic_finishing_disabled {
                drop(core);
                self.queue_automatic_finish();
                return;
            }
            core.state.transition(TaskState::Executing);
        }

        info!("Executing task {} ({})", self.inner.name, self.inner.id);
        self.dispatch_observers(PendingEventKind::PostDidExecute, |observer, task, _| {
            observer.did_execute(task)
        });

        let body = Arc::clone(&self.inner.body);
        let task = self.clone();
        self.inner.event_queue.spawn(async move {
            let outcome = AssertUnwindSafe(body.execute(task.clone()))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!("Body of task {} ({}) panicked", task.name(), task.id());
                task.finish_internal(vec![TaskError::Unknown(
                    "task body panicked".to_string(),
                )]);
            }
        });
    }

    fn queue_automatic_finish(&self) {
        let finish_now = {
            let mut core = self.inner.core.locked();
            if core.finished_handling_cancel || !core.is_cancelled {
                true
            } else {
                core.pending_automatic_finish = true;
                false
            }
        };
        if finish_now {
            self.finish_internal(Vec::new());
        }
    }

    fn did_handle_cancel(&self) {
        let finish = {
            let mut core = self.inner.core.locked();
            core.finished_handling_cancel = true;
            if core.pending_automatic_finish {
                core.pending_automatic_finish = false;
                true
            } else {
                core.state == TaskState::Executing && !self.inner.options.automatic_finishing_disabled
            }
        };

        let evaluator = self.inner.core.locked().evaluator.clone();
        if let Some(evaluator) = evaluator {
            evaluator.cancel();
        }
        if finish {
            self.finish_internal(Vec::new());
        }
    }

    fn handle_finish(&self, errors: Vec<TaskError>) {
        self.inner.event_queue.debug_assert_current();

        let all_errors = {
            let mut core = self.inner.core.locked();
            core.errors.extend(errors);
            core.state.transition(TaskState::Finishing);
            core.errors.clone()
        };

        let observed = self.dispatch_observers(PendingEventKind::Finish, move |observer, task, event| {
            observer.will_finish(task, &all_errors, event)
        });
        let task = self.clone();
        self.inner
            .event_queue
            .dispatch_notify(&observed, move |_| task.handle_finished());
    }

    fn handle_finished(&self) {
        self.inner.event_queue.debug_assert_current();

        let (errors, hooks) = {
            let mut core = self.inner.core.locked();
            core.state.transition(TaskState::Finished);
            core.finished_at = Some(Utc::now());
            core.queue = None;
            core.evaluator = None;
            (
                core.errors.clone(),
                std::mem::take(&mut core.did_finish_hooks),
            )
        };

        for hook in hooks {
            hook(self);
        }

        let reported = errors.clone();
        let observed = self.dispatch_observers(PendingEventKind::PostDidFinish, move |observer, task, _| {
            observer.did_finish(task, &reported)
        });

        let task = self.clone();
        self.inner.event_queue.dispatch_notify(&observed, move |_| {
            if errors.is_empty() {
                info!("Task {} ({}) finished", task.name(), task.id());
            } else {
                warn!(
                    "Task {} ({}) finished with {} errors",
                    task.name(),
                    task.id(),
                    errors.len()
                );
            }
            {
                let mut core = task.inner.core.locked();
                core.observers.clear();
                core.gates.clear();
            }
            task.inner.finished.complete(());
        });
    }

    /// Deliver a callback to every observer in order; the returned future
    /// completes when all deliveries ran and every clone of the event dropped.
    fn dispatch_observers<F>(&self, kind: PendingEventKind, callback: F) -> TaskFuture<()>
    where
        F: Fn(&dyn TaskObserver, &Task, &PendingEvent) + Send + Sync + 'static,
    {
        let observers = self.inner.core.locked().observers.clone();
        let (event, fired) = PendingEvent::new(kind, self);
        let callback: Arc<ObserverCallback> = Arc::new(callback);
        for observer in observers {
            self.deliver(observer, event.clone(), Arc::clone(&callback));
        }
        fired
    }

    fn deliver(
        &self,
        observer: Arc<dyn TaskObserver>,
        event: PendingEvent,
        callback: Arc<ObserverCallback>,
    ) {
        let affinity = observer.event_queue();
        let task = self.clone();
        let job = move || callback(observer.as_ref(), &task, &event);
        match affinity {
            Some(queue) => self.inner.event_queue.dispatch_synchronized(&queue, job),
            None => self.inner.event_queue.dispatch(job),
        }
    }
}

use crate::config::QueueConfig;
use crate::error::TaskError;
use crate::future::{TaskFuture, TaskPromise};
use crate::queue::{QueueItem, TaskQueue, TaskQueueDelegate};
use crate::sync::MutexExt;
use crate::task::{PendingEvent, Task, TaskBody, TaskId, TaskOptions, WeakTask};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::{debug, error, info, warn};

/// Recovery hooks consulted when a child of a group is about to finish
pub trait GroupHooks: Send + Sync + 'static {
    /// Return `true` when the group will try to recover from `errors`.
    ///
    /// Errors of a child under recovery are kept apart from the fatal errors
    /// until `child_did_recover` or `child_did_not_recover` settles them.
    fn child_will_attempt_recovery(
        &self,
        _group: &TaskGroup,
        _child: &Task,
        _errors: &[TaskError],
    ) -> bool {
        false
    }

    fn child_will_finish_without_errors(&self, _group: &TaskGroup, _child: &Task) {}
}

/// Rewrites or filters a child's errors before the group records them
pub type ChildErrorTransform = dyn Fn(&Task, &mut Vec<TaskError>) + Send + Sync;

/// Hooks for a plain group: every child error is fatal
pub struct NoRecovery;

impl GroupHooks for NoRecovery {}

#[derive(Default)]
struct GroupState {
    children: Vec<Task>,
    child_ids: HashSet<TaskId>,
    started: bool,
    suspended: bool,
    is_finishing: bool,
    /// Produced tasks whose did-add the group still owes its observers
    announced: HashSet<TaskId>,
    fatal_errors: Vec<TaskError>,
    attempted_recovery: HashMap<TaskId, Vec<TaskError>>,
}

struct GroupInner {
    name: String,
    task: OnceLock<WeakTask>,
    queue: TaskQueue,
    hooks: Arc<dyn GroupHooks>,
    transform_child_errors: Mutex<Option<Arc<ChildErrorTransform>>>,
    state: Mutex<GroupState>,
}

/// A task running its children on a private queue.
///
/// The group finishes once every child finished, including children added
/// while it runs, with the errors its children did not recover from.
#[derive(Clone)]
pub struct TaskGroup {
    task: Task,
    inner: Arc<GroupInner>,
}

impl Deref for TaskGroup {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.task
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task", &self.task)
            .field("children", &self.inner.state.locked().children.len())
            .finish()
    }
}

impl TaskGroup {
    pub fn new(name: impl Into<String>, children: Vec<Task>) -> Self {
        Self::with_hooks(name, children, Arc::new(NoRecovery))
    }

    pub fn with_hooks(
        name: impl Into<String>,
        children: Vec<Task>,
        hooks: Arc<dyn GroupHooks>,
    ) -> Self {
        let name = name.into();
        let config = QueueConfig::new(format!("{}-children", name));
        Self::with_config(name, config, children, hooks)
    }

    /// Group whose private queue uses `config`; the queue always starts suspended
    pub fn with_config(
        name: impl Into<String>,
        config: QueueConfig,
        children: Vec<Task>,
        hooks: Arc<dyn GroupHooks>,
    ) -> Self {
        let name = name.into();
        let state = GroupState {
            child_ids: children.iter().map(|child| child.id()).collect(),
            children,
            ..Default::default()
        };
        let inner = Arc::new(GroupInner {
            name: name.clone(),
            task: OnceLock::new(),
            queue: TaskQueue::with_config(config.with_start_suspended(true)),
            hooks,
            transform_child_errors: Mutex::new(None),
            state: Mutex::new(state),
        });

        let options = TaskOptions::default()
            .with_automatic_finishing_disabled()
            .with_external_finish_forbidden();
        let task = Task::with_options(
            name,
            GroupBody {
                inner: Arc::clone(&inner),
            },
            options,
        );
        let _ = inner.task.set(task.downgrade());
        inner
            .queue
            .set_delegate(Some(Arc::new(GroupQueueDelegate {
                group: Arc::downgrade(&inner),
            })));

        TaskGroup { task, inner }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// The private queue children run on
    pub fn child_queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    /// Add a child; the group's will-add and did-add observers see it.
    ///
    /// The returned future completes after did-add.
    ///
    /// # Panics
    ///
    /// Panics once the group started to finish.
    pub fn add_child(&self, child: Task) -> TaskFuture<()> {
        self.inner.add_child(child, None)
    }

    /// Add a child; `before` does not fire until the child was added
    pub fn add_child_before(&self, child: Task, before: PendingEvent) -> TaskFuture<()> {
        self.inner.add_child(child, Some(before))
    }

    pub fn add_children<I>(&self, children: I) -> TaskFuture<()>
    where
        I: IntoIterator<Item = Task>,
    {
        let added: Vec<_> = children
            .into_iter()
            .map(|child| self.inner.add_child(child, None))
            .collect();
        TaskFuture::all(added)
    }

    /// Suspend or resume the children.
    ///
    /// A group suspended before it executes keeps its children pending
    /// until it is resumed.
    pub fn set_suspended(&self, suspended: bool) {
        let mut state = self.inner.state.locked();
        state.suspended = suspended;
        if state.started {
            self.inner.queue.set_suspended(suspended);
        }
        debug!("Group {} suspended: {}", self.inner.name, suspended);
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.locked().suspended
    }

    /// Install a block rewriting each child's errors before the group
    /// records them. An emptied list counts as a child finishing cleanly.
    pub fn set_child_error_transform<F>(&self, transform: F)
    where
        F: Fn(&Task, &mut Vec<TaskError>) + Send + Sync + 'static,
    {
        *self.inner.transform_child_errors.locked() = Some(Arc::new(transform));
    }

    pub fn children(&self) -> Vec<Task> {
        self.inner.state.locked().children.clone()
    }

    pub fn is_finishing(&self) -> bool {
        self.inner.state.locked().is_finishing
    }

    pub fn fatal_errors(&self) -> Vec<TaskError> {
        self.inner.state.locked().fatal_errors.clone()
    }

    /// Errors of children whose recovery is still undecided
    pub fn attempted_recovery(&self) -> HashMap<TaskId, Vec<TaskError>> {
        self.inner.state.locked().attempted_recovery.clone()
    }

    pub fn append_fatal_errors(&self, errors: Vec<TaskError>) {
        self.inner.state.locked().fatal_errors.extend(errors);
    }

    /// Discard the errors recorded while `child` was being recovered
    pub fn child_did_recover(&self, child: &Task) {
        if self
            .inner
            .state
            .locked()
            .attempted_recovery
            .remove(&child.id())
            .is_some()
        {
            info!(
                "Group {} recovered from errors in {}",
                self.inner.name,
                child.name()
            );
        }
    }

    /// Promote the errors recorded while `child` was being recovered to fatal
    pub fn child_did_not_recover(&self, child: &Task) {
        info!(
            "Group {} failed to recover from errors in {}",
            self.inner.name,
            child.name()
        );
        let mut state = self.inner.state.locked();
        if let Some(errors) = state.attempted_recovery.remove(&child.id()) {
            state.fatal_errors.extend(errors);
        }
    }

    fn from_inner(inner: &Arc<GroupInner>) -> Option<TaskGroup> {
        let task = inner.task.get()?.upgrade()?;
        Some(TaskGroup {
            task,
            inner: Arc::clone(inner),
        })
    }
}

impl GroupInner {
    fn task(&self) -> Option<Task> {
        self.task.get().and_then(|task| task.upgrade())
    }

    fn is_cancelled(&self) -> bool {
        self.task().is_some_and(|task| task.is_cancelled())
    }

    fn add_child(&self, child: Task, before: Option<PendingEvent>) -> TaskFuture<()> {
        let enqueue = {
            let mut state = self.state.locked();
            if state.is_finishing {
                None
            } else {
                if state.child_ids.insert(child.id()) {
                    state.children.push(child.clone());
                }
                Some(state.started)
            }
        };

        let Some(enqueue) = enqueue else {
            panic!(
                "cannot add child '{}' to group '{}' once it started to finish",
                child.name(),
                self.name
            );
        };

        debug!("Group {} adding child {}", self.name, child.name());
        if self.is_cancelled() {
            child.cancel(Vec::new());
        }

        let queue = self.queue.clone();
        let add = move |child: Task| {
            if enqueue {
                queue.add(child)
            } else {
                TaskFuture::completed(())
            }
        };
        let Some(group) = self.task() else {
            return add(child);
        };
        let promise = TaskPromise::new();
        let added = promise.future();
        group.announce_add(child, before, add, promise);
        added
    }

    /// Record a task produced onto the private queue as a child.
    ///
    /// Returns the group's will-add announcement for a newly adopted task.
    fn adopt(&self, task: &Task) -> Option<TaskFuture<()>> {
        {
            let mut state = self.state.locked();
            if state.child_ids.contains(&task.id()) {
                return None;
            }
            if state.is_finishing {
                error!(
                    "Task {} was produced into group {} after it started to finish",
                    task.name(),
                    self.name
                );
                return None;
            }
            state.child_ids.insert(task.id());
            state.children.push(task.clone());
            state.announced.insert(task.id());
        }

        debug!("Group {} adopted produced task {}", self.name, task.name());
        if self.is_cancelled() {
            task.cancel(Vec::new());
        }
        self.task().map(|group| group.announce_will_add(task))
    }

    fn adopted(&self, task: &Task) {
        if !self.state.locked().announced.remove(&task.id()) {
            return;
        }
        if let Some(group) = self.task() {
            group.announce_did_add(task);
        }
    }

    fn install_barrier(self: &Arc<Self>, waiting_on: &[Task]) {
        let group = Arc::downgrade(self);
        let barrier = Task::from_fn(format!("{}-barrier", self.name), move |_| {
            let group = group.clone();
            async move {
                if let Some(inner) = group.upgrade() {
                    inner.barrier_ready();
                }
                Ok(())
            }
        });
        for child in waiting_on {
            barrier.add_dependency(child);
        }
        self.queue.add_silently(barrier);
    }

    fn barrier_ready(self: &Arc<Self>) {
        let outcome = {
            let mut state = self.state.locked();
            let active: Vec<Task> = state
                .children
                .iter()
                .filter(|child| !child.finished_future().is_completed())
                .cloned()
                .collect();
            if active.is_empty() {
                state.is_finishing = true;
                Ok(state.fatal_errors.clone())
            } else {
                Err(active)
            }
        };

        match outcome {
            Ok(fatal) => {
                if let Some(task) = self.task() {
                    task.finish_internal(fatal);
                }
            }
            Err(active) => {
                debug!(
                    "Group {} cannot finish yet, {} children still active",
                    self.name,
                    active.len()
                );
                self.install_barrier(&active);
            }
        }
    }
}

struct GroupBody {
    inner: Arc<GroupInner>,
}

#[async_trait]
impl TaskBody for GroupBody {
    async fn execute(&self, _task: Task) {
        let children = {
            let mut state = self.inner.state.locked();
            state.started = true;
            state.children.clone()
        };

        info!(
            "Group {} starting {} children",
            self.inner.name,
            children.len()
        );
        for child in &children {
            self.inner.queue.add(child.clone());
        }
        self.inner.install_barrier(&children);

        let state = self.inner.state.locked();
        if state.suspended {
            info!("Group {} stays suspended", self.inner.name);
        } else {
            self.inner.queue.set_suspended(false);
        }
    }

    fn on_cancel(&self, _task: &Task, errors: &[TaskError]) {
        let children = self.inner.state.locked().children.clone();
        let wrapped: Vec<TaskError> = errors
            .iter()
            .map(|error| TaskError::ParentCancelledWithError(Box::new(error.clone())))
            .collect();
        for child in children {
            child.cancel(wrapped.clone());
        }
    }
}

struct GroupQueueDelegate {
    group: Weak<GroupInner>,
}

impl TaskQueueDelegate for GroupQueueDelegate {
    fn will_add(&self, _queue: &TaskQueue, item: &QueueItem) -> Option<TaskFuture<()>> {
        let inner = self.group.upgrade()?;
        inner.adopt(item.as_task()?)
    }

    fn did_add(&self, _queue: &TaskQueue, item: &QueueItem) {
        if let (Some(inner), Some(task)) = (self.group.upgrade(), item.as_task()) {
            inner.adopted(task);
        }
    }

    fn will_finish(
        &self,
        _queue: &TaskQueue,
        task: &Task,
        errors: &[TaskError],
    ) -> Option<TaskFuture<()>> {
        let inner = self.group.upgrade()?;
        let group = TaskGroup::from_inner(&inner)?;
        if group.is_cancelled() {
            return None;
        }

        let mut errors = errors.to_vec();
        let transform = inner.transform_child_errors.locked().clone();
        if let Some(transform) = transform {
            transform(task, &mut errors);
        }

        if errors.is_empty() {
            inner.hooks.child_will_finish_without_errors(&group, task);
            return None;
        }

        // Recorded before the hook runs so a retry finishing early can settle it
        inner
            .state
            .locked()
            .attempted_recovery
            .insert(task.id(), errors.clone());
        if !inner.hooks.child_will_attempt_recovery(&group, task, &errors) {
            warn!(
                "Child {} of group {} finished with {} fatal errors",
                task.name(),
                inner.name,
                errors.len()
            );
            let mut state = inner.state.locked();
            state.attempted_recovery.remove(&task.id());
            state.fatal_errors.extend(errors);
        }
        None
    }
}

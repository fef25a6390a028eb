//! Precondition evaluation: contexts, evaluation units and the per-task
//! evaluator gating execution.

use crate::condition::{
    AggregationMode, AlreadyFinished, Condition, ConditionResult, ConditionResultAggregator,
    DependencyRequirements, run_evaluation,
};
use crate::error::TaskError;
use crate::future::{TaskFuture, TaskPromise};
use crate::queue::TaskQueue;
use crate::sync::MutexExt;
use crate::task::{Task, WeakTask};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

struct ContextState {
    cancelled: bool,
    queue: Option<TaskQueue>,
    sub_contexts: Vec<EvaluationContext>,
}

struct ContextInner {
    aggregator: ConditionResultAggregator,
    cancelled: TaskPromise<()>,
    state: Mutex<ContextState>,
}

/// Scope of one evaluation pass; cancelling it cancels everything it spawned
#[derive(Clone)]
pub struct EvaluationContext {
    inner: Arc<ContextInner>,
}

impl EvaluationContext {
    pub fn new(mode: AggregationMode) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                aggregator: ConditionResultAggregator::new(mode),
                cancelled: TaskPromise::new(),
                state: Mutex::new(ContextState {
                    cancelled: false,
                    queue: None,
                    sub_contexts: Vec::new(),
                }),
            }),
        }
    }

    /// Nested context cancelled together with this one
    pub fn sub_context(&self, mode: AggregationMode) -> EvaluationContext {
        let sub = EvaluationContext::new(mode);
        let cancelled = {
            let mut state = self.inner.state.locked();
            if !state.cancelled {
                state.sub_contexts.push(sub.clone());
            }
            state.cancelled
        };
        if cancelled {
            sub.cancel();
        }
        sub
    }

    pub fn aggregator(&self) -> &ConditionResultAggregator {
        &self.inner.aggregator
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.locked().cancelled
    }

    pub fn cancel(&self) {
        let (queue, sub_contexts) = {
            let mut state = self.inner.state.locked();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            (state.queue.take(), std::mem::take(&mut state.sub_contexts))
        };

        if let Some(queue) = queue {
            queue.cancel_all(vec![TaskError::ConditionEvaluationCancelled]);
        }
        for sub in sub_contexts {
            sub.cancel();
        }
        self.inner
            .aggregator
            .cancel(ConditionResult::Failed(TaskError::ConditionEvaluationCancelled));
        let _ = self.inner.cancelled.try_complete(());
    }

    /// Internal queue for evaluation units and produced dependencies,
    /// created on first use
    fn queue(&self) -> Option<TaskQueue> {
        let mut state = self.inner.state.locked();
        if state.cancelled {
            return None;
        }
        let queue = state
            .queue
            .get_or_insert_with(|| TaskQueue::new("condition-evaluation"));
        Some(queue.clone())
    }

    fn cancelled_future(&self) -> TaskFuture<()> {
        self.inner.cancelled.future()
    }
}

/// Evaluate `conditions` for `task` within `context` and return the verdict.
///
/// Conditions without dependencies are evaluated immediately; the others get
/// an evaluation unit that waits on their dependencies. The context is
/// cancelled once a verdict exists.
pub async fn evaluate_conditions(
    task: &Task,
    conditions: &[Arc<dyn Condition>],
    context: &EvaluationContext,
) -> ConditionResult {
    let aggregator = context.aggregator();

    for condition in conditions {
        if let Err(AlreadyFinished(result)) = aggregator.expect_result() {
            debug!(
                "Condition evaluation for {} short-circuited before '{}'",
                task.name(),
                condition.name()
            );
            context.cancel();
            return result;
        }

        let dependencies = condition.dependencies();
        let produced = condition.produced_dependencies();

        if dependencies.is_empty() && produced.is_empty() {
            let mut evaluation = Box::pin(evaluate_and_fulfill(
                Arc::clone(condition),
                task.clone(),
                context.clone(),
            ));
            if futures::poll!(evaluation.as_mut()).is_pending() {
                task.event_queue().spawn(evaluation);
            }
            continue;
        }

        let Some(queue) = context.queue() else {
            aggregator.fulfill(ConditionResult::Failed(
                TaskError::ConditionEvaluationCancelled,
            ));
            continue;
        };

        let unit = evaluation_unit(Arc::clone(condition), task, context);
        for dependency in dependencies.iter().chain(produced.iter()) {
            unit.add_dependency(dependency);
        }
        for dependency in produced {
            queue.add(dependency);
        }
        queue.add(unit);
    }

    aggregator.seal();
    let result = aggregator.finished().await;
    context.cancel();
    result
}

async fn evaluate_and_fulfill(
    condition: Arc<dyn Condition>,
    task: Task,
    context: EvaluationContext,
) {
    let cancelled = context.cancelled_future();
    let result = tokio::select! {
        biased;
        result = run_evaluation(&condition, &task, &context) => result,
        _ = cancelled.wait() => ConditionResult::Failed(TaskError::ConditionEvaluationCancelled),
    };
    context.aggregator().fulfill(result);
}

fn evaluation_unit(
    condition: Arc<dyn Condition>,
    host: &Task,
    context: &EvaluationContext,
) -> Task {
    let host = host.clone();
    let context = context.clone();
    let name = format!("Evaluate {} for {}", condition.name(), host.name());

    Task::from_fn(name, move |_unit| {
        let condition = Arc::clone(&condition);
        let host = host.clone();
        let context = context.clone();
        async move {
            let result = match verify_dependency_requirements(condition.as_ref()) {
                Some(failure) => {
                    condition.core().set_output(failure.clone());
                    failure
                }
                None => run_evaluation(&condition, &host, &context).await,
            };
            context.aggregator().fulfill(result);
            Ok(())
        }
    })
}

/// Check the condition's requirements against its finished dependencies;
/// failures are reported before cancellations
pub(crate) fn verify_dependency_requirements(condition: &dyn Condition) -> Option<ConditionResult> {
    let requirements = condition.dependency_requirements();
    if requirements.is_empty() {
        return None;
    }

    let dependencies: Vec<Task> = condition
        .dependencies()
        .into_iter()
        .chain(condition.produced_dependencies())
        .collect();
    let ignore_cancelled_failures =
        requirements.contains(DependencyRequirements::IGNORE_FAILED_IF_CANCELLED);

    let any_failed = dependencies.iter().any(|dependency| {
        dependency.failed() && !(ignore_cancelled_failures && dependency.is_cancelled())
    });
    if requirements.contains(DependencyRequirements::NO_FAILED) && any_failed {
        return Some(ConditionResult::Failed(
            TaskError::ConditionDependenciesFailed {
                condition: condition.name(),
            },
        ));
    }

    let any_cancelled = dependencies.iter().any(|dependency| dependency.is_cancelled());
    if requirements.contains(DependencyRequirements::NO_CANCELLED) && any_cancelled {
        return Some(ConditionResult::Failed(
            TaskError::ConditionDependenciesCancelled {
                condition: condition.name(),
            },
        ));
    }

    None
}

struct EvaluatorInner {
    task: WeakTask,
    conditions: Vec<Arc<dyn Condition>>,
    context: EvaluationContext,
    done: TaskPromise<()>,
    started: AtomicBool,
}

/// Gate between a task's dependencies finishing and the task starting.
///
/// Waits for the host's direct dependencies, evaluates its conditions with
/// AND semantics and cancels the host on a non-satisfied verdict.
#[derive(Clone)]
pub(crate) struct ConditionEvaluator {
    inner: Arc<EvaluatorInner>,
}

impl ConditionEvaluator {
    pub(crate) fn new(task: &Task, conditions: Vec<Arc<dyn Condition>>) -> Self {
        Self {
            inner: Arc::new(EvaluatorInner {
                task: task.downgrade(),
                conditions,
                context: EvaluationContext::new(AggregationMode::And),
                done: TaskPromise::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Completes when evaluation finished or was cancelled
    pub(crate) fn gate(&self) -> TaskFuture<()> {
        self.inner.done.future()
    }

    pub(crate) fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(task) = self.inner.task.upgrade() else {
            self.complete();
            return;
        };

        let evaluator = self.clone();
        task.event_queue().spawn(async move { evaluator.run().await });
    }

    pub(crate) fn cancel(&self) {
        self.inner.context.cancel();
        self.complete();
    }

    fn complete(&self) {
        let _ = self.inner.done.try_complete(());
    }

    async fn run(&self) {
        let Some(task) = self.inner.task.upgrade() else {
            self.complete();
            return;
        };

        let dependencies = TaskFuture::all(
            task.dependencies()
                .iter()
                .map(|dependency| dependency.finished_future()),
        );
        let cancelled = task.cancelled_future();
        tokio::select! {
            _ = dependencies.wait() => {}
            _ = cancelled.wait() => {}
        }

        if task.is_cancelled() || self.inner.context.is_cancelled() {
            self.complete();
            return;
        }

        debug!(
            "Evaluating {} conditions of task {}",
            self.inner.conditions.len(),
            task.name()
        );
        let result = evaluate_conditions(&task, &self.inner.conditions, &self.inner.context).await;
        match result {
            ConditionResult::Satisfied => {
                debug!("Conditions of task {} satisfied", task.name());
            }
            ConditionResult::NotSatisfied => {
                info!("Conditions of task {} not satisfied", task.name());
                task.cancel(Vec::new());
            }
            ConditionResult::Failed(error) => {
                info!("Conditions of task {} failed: {}", task.name(), error);
                task.cancel(vec![error]);
            }
        }
        self.complete();
    }
}

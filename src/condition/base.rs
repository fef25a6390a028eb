use crate::condition::{ConditionResult, DependencyRequirements, EvaluationContext};
use crate::pending::Pending;
use crate::sync::MutexExt;
use crate::task::{Task, WeakTask};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

struct CoreState {
    name: String,
    dependencies: Vec<Task>,
    produced_dependencies: Vec<Task>,
    categories: Vec<String>,
    requirements: DependencyRequirements,
    attached: Option<WeakTask>,
    evaluated: bool,
    output: Pending<ConditionResult>,
}

/// State shared by every condition implementation
pub struct ConditionCore {
    id: Uuid,
    state: Mutex<CoreState>,
}

impl ConditionCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(CoreState {
                name: name.into(),
                dependencies: Vec::new(),
                produced_dependencies: Vec::new(),
                categories: Vec::new(),
                requirements: DependencyRequirements::NONE,
                attached: None,
                evaluated: false,
                output: Pending::Pending,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> String {
        self.state.locked().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.state.locked().name = name.into();
    }

    pub fn dependencies(&self) -> Vec<Task> {
        self.state.locked().dependencies.clone()
    }

    pub fn add_dependency(&self, task: &Task) {
        let mut state = self.state.locked();
        if !state.dependencies.contains(task) {
            state.dependencies.push(task.clone());
        }
    }

    pub fn produced_dependencies(&self) -> Vec<Task> {
        self.state.locked().produced_dependencies.clone()
    }

    pub fn produce_dependency(&self, task: Task) {
        let mut state = self.state.locked();
        if !state.produced_dependencies.contains(&task) {
            state.produced_dependencies.push(task);
        }
    }

    pub fn categories(&self) -> Vec<String> {
        self.state.locked().categories.clone()
    }

    pub fn add_category(&self, category: &str) {
        let mut state = self.state.locked();
        if !state.categories.iter().any(|existing| existing == category) {
            state.categories.push(category.to_string());
        }
    }

    pub fn requirements(&self) -> DependencyRequirements {
        self.state.locked().requirements
    }

    pub fn set_requirements(&self, requirements: DependencyRequirements) {
        self.state.locked().requirements = requirements;
    }

    /// Result of the evaluation, once it ran
    pub fn output(&self) -> Pending<ConditionResult> {
        self.state.locked().output.clone()
    }

    /// Task the condition is attached to
    pub fn task(&self) -> Option<Task> {
        self.state
            .locked()
            .attached
            .as_ref()
            .and_then(|task| task.upgrade())
    }

    /// # Panics
    ///
    /// Panics when the condition is already attached to a task.
    pub fn attach(&self, task: &Task) {
        let mut state = self.state.locked();
        if state.attached.is_some() {
            panic!(
                "condition '{}' is already attached to a task and cannot be attached to '{}'",
                state.name,
                task.name()
            );
        }
        state.attached = Some(task.downgrade());
    }

    fn begin_evaluation(&self) {
        let mut state = self.state.locked();
        if state.evaluated {
            panic!("condition '{}' was evaluated more than once", state.name);
        }
        state.evaluated = true;
    }

    pub(crate) fn set_output(&self, result: ConditionResult) {
        let mut state = self.state.locked();
        if state.output.is_pending() {
            state.output = Pending::Ready(result);
        }
    }
}

/// A precondition evaluated before a task may execute
#[async_trait]
pub trait Condition: Send + Sync + 'static {
    fn core(&self) -> &ConditionCore;

    async fn evaluate(&self, task: &Task) -> ConditionResult;

    /// Evaluation with access to the surrounding context; compound conditions
    /// use it to nest sub-contexts
    async fn evaluate_in_context(&self, task: &Task, _context: &EvaluationContext) -> ConditionResult {
        self.evaluate(task).await
    }

    fn id(&self) -> Uuid {
        self.core().id()
    }

    fn name(&self) -> String {
        self.core().name()
    }

    /// Tasks that must finish before evaluation
    fn dependencies(&self) -> Vec<Task> {
        self.core().dependencies()
    }

    /// Tasks the condition schedules itself and waits on
    fn produced_dependencies(&self) -> Vec<Task> {
        self.core().produced_dependencies()
    }

    fn mutually_exclusive_categories(&self) -> Vec<String> {
        self.core().categories()
    }

    fn dependency_requirements(&self) -> DependencyRequirements {
        self.core().requirements()
    }

    fn add_dependency(&self, task: &Task) {
        self.core().add_dependency(task);
    }

    fn produce_dependency(&self, task: Task) {
        self.core().produce_dependency(task);
    }

    fn add_mutually_exclusive_category(&self, category: &str) {
        self.core().add_category(category);
    }

    fn set_dependency_requirements(&self, requirements: DependencyRequirements) {
        self.core().set_requirements(requirements);
    }

    fn output(&self) -> Pending<ConditionResult> {
        self.core().output()
    }

    fn will_attach(&self, task: &Task) {
        self.core().attach(task);
    }
}

/// Evaluate a condition exactly once and record its output.
///
/// # Panics
///
/// Panics when the same condition instance is evaluated twice.
pub(crate) async fn run_evaluation(
    condition: &Arc<dyn Condition>,
    task: &Task,
    context: &EvaluationContext,
) -> ConditionResult {
    condition.core().begin_evaluation();
    let result = condition.evaluate_in_context(task, context).await;
    debug!(
        "Condition '{}' of task {} evaluated to {:?}",
        condition.name(),
        task.name(),
        result
    );
    condition.core().set_output(result.clone());
    result
}

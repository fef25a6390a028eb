use crate::condition::{
    AggregationMode, Condition, ConditionCore, ConditionResult, DependencyRequirements,
    EvaluationContext, evaluate_conditions, run_evaluation,
};
use crate::error::TaskError;
use crate::task::Task;
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps another condition, adding its own dependencies and categories to
/// the wrapped ones
pub struct ComposedCondition {
    core: ConditionCore,
    inner: Arc<dyn Condition>,
}

impl ComposedCondition {
    pub fn new(condition: impl Condition) -> Self {
        Self::from_arc(Arc::new(condition))
    }

    pub fn from_arc(condition: Arc<dyn Condition>) -> Self {
        Self {
            core: ConditionCore::new(format!("Composed<{}>", condition.name())),
            inner: condition,
        }
    }

    pub fn inner(&self) -> &Arc<dyn Condition> {
        &self.inner
    }
}

#[async_trait]
impl Condition for ComposedCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        let context = EvaluationContext::new(AggregationMode::And);
        self.evaluate_in_context(task, &context).await
    }

    async fn evaluate_in_context(&self, task: &Task, context: &EvaluationContext) -> ConditionResult {
        run_evaluation(&self.inner, task, context).await
    }

    fn dependencies(&self) -> Vec<Task> {
        merge(self.core.dependencies(), self.inner.dependencies())
    }

    fn produced_dependencies(&self) -> Vec<Task> {
        merge(
            self.core.produced_dependencies(),
            self.inner.produced_dependencies(),
        )
    }

    fn mutually_exclusive_categories(&self) -> Vec<String> {
        merge(
            self.core.categories(),
            self.inner.mutually_exclusive_categories(),
        )
    }

    fn dependency_requirements(&self) -> DependencyRequirements {
        self.core.requirements() | self.inner.dependency_requirements()
    }
}

/// Satisfied exactly when the wrapped condition is not
pub struct NegatedCondition {
    core: ConditionCore,
    composed: ComposedCondition,
}

impl NegatedCondition {
    pub fn new(condition: impl Condition) -> Self {
        let composed = ComposedCondition::new(condition);
        Self {
            core: ConditionCore::new(format!("Not<{}>", composed.inner.name())),
            composed,
        }
    }
}

#[async_trait]
impl Condition for NegatedCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        let context = EvaluationContext::new(AggregationMode::And);
        self.evaluate_in_context(task, &context).await
    }

    async fn evaluate_in_context(&self, task: &Task, context: &EvaluationContext) -> ConditionResult {
        match self.composed.evaluate_in_context(task, context).await {
            ConditionResult::Satisfied => ConditionResult::Failed(TaskError::ConditionFailed),
            _ => ConditionResult::Satisfied,
        }
    }

    fn dependencies(&self) -> Vec<Task> {
        self.composed.dependencies()
    }

    fn produced_dependencies(&self) -> Vec<Task> {
        self.composed.produced_dependencies()
    }

    fn mutually_exclusive_categories(&self) -> Vec<String> {
        self.composed.mutually_exclusive_categories()
    }

    fn dependency_requirements(&self) -> DependencyRequirements {
        self.composed.dependency_requirements()
    }
}

/// Turns a failure of the wrapped condition into `NotSatisfied`
pub struct IgnoredCondition {
    core: ConditionCore,
    composed: ComposedCondition,
}

impl IgnoredCondition {
    pub fn new(condition: impl Condition) -> Self {
        let composed = ComposedCondition::new(condition);
        Self {
            core: ConditionCore::new(format!("Ignored<{}>", composed.inner.name())),
            composed,
        }
    }
}

#[async_trait]
impl Condition for IgnoredCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        let context = EvaluationContext::new(AggregationMode::And);
        self.evaluate_in_context(task, &context).await
    }

    async fn evaluate_in_context(&self, task: &Task, context: &EvaluationContext) -> ConditionResult {
        match self.composed.evaluate_in_context(task, context).await {
            ConditionResult::Failed(_) => ConditionResult::NotSatisfied,
            other => other,
        }
    }

    fn dependencies(&self) -> Vec<Task> {
        self.composed.dependencies()
    }

    fn produced_dependencies(&self) -> Vec<Task> {
        self.composed.produced_dependencies()
    }

    fn mutually_exclusive_categories(&self) -> Vec<String> {
        self.composed.mutually_exclusive_categories()
    }

    fn dependency_requirements(&self) -> DependencyRequirements {
        self.composed.dependency_requirements()
    }
}

/// Evaluates the wrapped condition without scheduling its produced dependencies
pub struct SilentCondition {
    core: ConditionCore,
    composed: ComposedCondition,
}

impl SilentCondition {
    pub fn new(condition: impl Condition) -> Self {
        let composed = ComposedCondition::new(condition);
        Self {
            core: ConditionCore::new(format!("Silent<{}>", composed.inner.name())),
            composed,
        }
    }
}

#[async_trait]
impl Condition for SilentCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        let context = EvaluationContext::new(AggregationMode::And);
        self.evaluate_in_context(task, &context).await
    }

    async fn evaluate_in_context(&self, task: &Task, context: &EvaluationContext) -> ConditionResult {
        self.composed.evaluate_in_context(task, context).await
    }

    fn dependencies(&self) -> Vec<Task> {
        self.composed.dependencies()
    }

    fn produced_dependencies(&self) -> Vec<Task> {
        Vec::new()
    }

    fn mutually_exclusive_categories(&self) -> Vec<String> {
        self.composed.mutually_exclusive_categories()
    }

    fn dependency_requirements(&self) -> DependencyRequirements {
        self.composed.dependency_requirements()
    }
}

/// AND/OR combination of conditions evaluated in a nested context.
///
/// Adding the same condition instance twice keeps the first.
pub struct CompoundCondition {
    core: ConditionCore,
    mode: AggregationMode,
    conditions: Vec<Arc<dyn Condition>>,
}

impl CompoundCondition {
    /// Satisfied when every member is
    pub fn all() -> Self {
        Self::new(AggregationMode::And)
    }

    /// Satisfied when any member is
    pub fn any() -> Self {
        Self::new(AggregationMode::Or)
    }

    fn new(mode: AggregationMode) -> Self {
        let compound = Self {
            core: ConditionCore::new(""),
            mode,
            conditions: Vec::new(),
        };
        compound.refresh_name();
        compound
    }

    pub fn with(self, condition: impl Condition) -> Self {
        self.with_arc(Arc::new(condition))
    }

    pub fn with_arc(mut self, condition: Arc<dyn Condition>) -> Self {
        if !self.conditions.iter().any(|c| c.id() == condition.id()) {
            self.conditions.push(condition);
        }
        self.refresh_name();
        self
    }

    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    pub fn conditions(&self) -> &[Arc<dyn Condition>] {
        &self.conditions
    }

    fn refresh_name(&self) {
        let prefix = match self.mode {
            AggregationMode::And => "All",
            AggregationMode::Or => "Any",
        };
        let names: Vec<String> = self.conditions.iter().map(|c| c.name()).collect();
        self.core.set_name(format!("{}<{}>", prefix, names.join(", ")));
    }
}

#[async_trait]
impl Condition for CompoundCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        let context = EvaluationContext::new(self.mode);
        evaluate_conditions(task, &self.conditions, &context).await
    }

    async fn evaluate_in_context(&self, task: &Task, context: &EvaluationContext) -> ConditionResult {
        let sub_context = context.sub_context(self.mode);
        evaluate_conditions(task, &self.conditions, &sub_context).await
    }

    fn mutually_exclusive_categories(&self) -> Vec<String> {
        self.conditions
            .iter()
            .fold(self.core.categories(), |categories, condition| {
                merge(categories, condition.mutually_exclusive_categories())
            })
    }
}

fn merge<T: PartialEq>(mut first: Vec<T>, second: Vec<T>) -> Vec<T> {
    for item in second {
        if !first.contains(&item) {
            first.push(item);
        }
    }
    first
}

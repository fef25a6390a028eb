use crate::condition::{Condition, ConditionCore, ConditionResult};
use crate::error::TaskError;
use crate::task::Task;
use async_trait::async_trait;

/// Always satisfied
pub struct TrueCondition {
    core: ConditionCore,
}

impl TrueCondition {
    pub fn new() -> Self {
        Self {
            core: ConditionCore::new("True Condition"),
        }
    }
}

impl Default for TrueCondition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Condition for TrueCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, _task: &Task) -> ConditionResult {
        ConditionResult::Satisfied
    }
}

/// Always fails with `TaskError::FalseCondition`
pub struct FalseCondition {
    core: ConditionCore,
}

impl FalseCondition {
    pub fn new() -> Self {
        Self {
            core: ConditionCore::new("False Condition"),
        }
    }
}

impl Default for FalseCondition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Condition for FalseCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, _task: &Task) -> ConditionResult {
        ConditionResult::Failed(TaskError::FalseCondition)
    }
}

type ConditionBlock = Box<dyn Fn() -> Result<bool, TaskError> + Send + Sync>;

/// Satisfied when the block returns `Ok(true)`.
///
/// `Ok(false)` fails with `ConditionFailed`; an error fails with that error.
pub struct BlockCondition {
    core: ConditionCore,
    block: ConditionBlock,
}

impl BlockCondition {
    pub fn new<F>(block: F) -> Self
    where
        F: Fn() -> Result<bool, TaskError> + Send + Sync + 'static,
    {
        Self::named("Block Condition", block)
    }

    pub fn named<F>(name: impl Into<String>, block: F) -> Self
    where
        F: Fn() -> Result<bool, TaskError> + Send + Sync + 'static,
    {
        Self {
            core: ConditionCore::new(name),
            block: Box::new(block),
        }
    }
}

#[async_trait]
impl Condition for BlockCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, _task: &Task) -> ConditionResult {
        ConditionResult::from((self.block)())
    }
}

/// Fails when any of the task's direct dependencies failed or was cancelled.
///
/// With `ignoring_cancellations`, cancelled dependencies make the condition
/// not satisfied instead, which cancels the task without an error.
pub struct NoFailedDependenciesCondition {
    core: ConditionCore,
    ignore_cancellations: bool,
}

impl NoFailedDependenciesCondition {
    pub fn new() -> Self {
        Self {
            core: ConditionCore::new("No Failed Dependencies"),
            ignore_cancellations: false,
        }
    }

    pub fn ignoring_cancellations() -> Self {
        Self {
            core: ConditionCore::new("No Failed Dependencies"),
            ignore_cancellations: true,
        }
    }
}

impl Default for NoFailedDependenciesCondition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Condition for NoFailedDependenciesCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        let dependencies = task.dependencies();
        let cancelled = dependencies.iter().any(|d| d.is_cancelled());
        let failed = dependencies.iter().any(|d| d.failed() && !d.is_cancelled());

        if self.ignore_cancellations {
            if failed {
                ConditionResult::Failed(TaskError::DependenciesFailed)
            } else if cancelled {
                ConditionResult::NotSatisfied
            } else {
                ConditionResult::Satisfied
            }
        } else if cancelled {
            ConditionResult::Failed(TaskError::DependenciesCancelled)
        } else if failed {
            ConditionResult::Failed(TaskError::DependenciesFailed)
        } else {
            ConditionResult::Satisfied
        }
    }
}

/// Serializes every task carrying the same category
pub struct MutuallyExclusive {
    core: ConditionCore,
}

impl MutuallyExclusive {
    pub fn new(category: impl Into<String>) -> Self {
        let category = category.into();
        let core = ConditionCore::new(format!("MutuallyExclusive<{}>", category));
        core.add_category(&category);
        Self { core }
    }
}

#[async_trait]
impl Condition for MutuallyExclusive {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    async fn evaluate(&self, _task: &Task) -> ConditionResult {
        ConditionResult::Satisfied
    }
}

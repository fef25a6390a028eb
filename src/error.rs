//! Error taxonomy shared by tasks, conditions, queues and groups.

use crate::task::Delay;
use thiserror::Error;

/// Result type used throughout the library
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Errors a task can accumulate or a library API can return
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("Programming error: {0}")]
    ProgrammingError(String),

    #[error("Condition failed")]
    ConditionFailed,

    #[error("Conditions failed: {}", format_errors(.errors))]
    FailedConditions { errors: Vec<TaskError> },

    #[error("False condition")]
    FalseCondition,

    #[error("Condition evaluation was cancelled")]
    ConditionEvaluationCancelled,

    #[error("Dependencies of condition '{condition}' failed")]
    ConditionDependenciesFailed { condition: String },

    #[error("Dependencies of condition '{condition}' were cancelled")]
    ConditionDependenciesCancelled { condition: String },

    #[error("Dependencies failed")]
    DependenciesFailed,

    #[error("Dependencies were cancelled")]
    DependenciesCancelled,

    #[error("Dependency finished with error: {0}")]
    DependencyFinishedWithError(Box<TaskError>),

    #[error("Dependency cancelled with error: {0}")]
    DependencyCancelledWithError(Box<TaskError>),

    #[error("Parent cancelled with error: {0}")]
    ParentCancelledWithError(Box<TaskError>),

    #[error("Task is not attached to a queue")]
    NoQueue,

    #[error("Requirement not satisfied")]
    RequirementNotSatisfied,

    #[error("Timed out after {0:?}")]
    TimedOut(Delay),

    #[error("Component error: {0}")]
    Component(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("{0}")]
    Custom(String),
}

impl TaskError {
    /// Caller-defined error
    pub fn custom(message: impl Into<String>) -> Self {
        TaskError::Custom(message.into())
    }

    /// Merge two condition failures into one aggregate, flattening nested aggregates
    pub fn merge(self, other: TaskError) -> TaskError {
        let mut errors = self.into_causes();
        errors.extend(other.into_causes());
        TaskError::FailedConditions { errors }
    }

    /// Underlying causes of an aggregate, or the error itself
    pub fn into_causes(self) -> Vec<TaskError> {
        match self {
            TaskError::FailedConditions { errors } => errors,
            other => vec![other],
        }
    }

    /// Whether this error was produced by a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::TimedOut(_))
    }

    /// Whether this is a (possibly aggregated) precondition failure
    pub fn is_condition_failure(&self) -> bool {
        matches!(
            self,
            TaskError::ConditionFailed
                | TaskError::FailedConditions { .. }
                | TaskError::FalseCondition
                | TaskError::ConditionDependenciesFailed { .. }
                | TaskError::ConditionDependenciesCancelled { .. }
        )
    }
}

fn format_errors(errors: &[TaskError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_merge_flattens_aggregates() {
        let first = TaskError::custom("a").merge(TaskError::custom("b"));
        let merged = first.merge(TaskError::FalseCondition);

        match merged {
            TaskError::FailedConditions { errors } => {
                assert_eq!(errors.len(), 3);
                assert_eq!(errors[0], TaskError::custom("a"));
                assert_eq!(errors[2], TaskError::FalseCondition);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let error = TaskError::DependencyFinishedWithError(Box::new(TaskError::custom("boom")));
        assert_eq!(error.to_string(), "Dependency finished with error: boom");

        let timeout = TaskError::TimedOut(Delay::By(Duration::from_millis(100)));
        assert!(timeout.is_timeout());
        assert!(timeout.to_string().starts_with("Timed out after"));
    }

    #[test]
    fn test_condition_failure_classification() {
        assert!(TaskError::FalseCondition.is_condition_failure());
        assert!(
            TaskError::ConditionDependenciesFailed {
                condition: "c".to_string()
            }
            .is_condition_failure()
        );
        assert!(!TaskError::NoQueue.is_condition_failure());
    }
}

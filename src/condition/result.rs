use crate::error::TaskError;
use std::ops::BitOr;

/// Outcome of evaluating a condition
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionResult {
    Satisfied,
    NotSatisfied,
    Failed(TaskError),
}

impl ConditionResult {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, ConditionResult::Satisfied)
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            ConditionResult::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Combine with a later result; failures accumulate every cause
    pub fn fold(self, next: ConditionResult) -> ConditionResult {
        match (self, next) {
            (ConditionResult::Failed(current), ConditionResult::Failed(next)) => {
                ConditionResult::Failed(current.merge(next))
            }
            (_, ConditionResult::Failed(next)) => ConditionResult::Failed(next),
            (ConditionResult::NotSatisfied, next) => next,
            (current, _) => current,
        }
    }
}

impl From<Result<bool, TaskError>> for ConditionResult {
    fn from(outcome: Result<bool, TaskError>) -> Self {
        match outcome {
            Ok(true) => ConditionResult::Satisfied,
            Ok(false) => ConditionResult::Failed(TaskError::ConditionFailed),
            Err(error) => ConditionResult::Failed(error),
        }
    }
}

/// What a condition requires of its dependencies before it is evaluated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DependencyRequirements(u8);

impl DependencyRequirements {
    pub const NONE: Self = Self(0);
    pub const NO_FAILED: Self = Self(1);
    pub const IGNORE_FAILED_IF_CANCELLED: Self = Self(1 << 1);
    pub const NO_CANCELLED: Self = Self(1 << 2);
    pub const NO_FAILED_OR_CANCELLED: Self = Self(1 | 1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DependencyRequirements {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

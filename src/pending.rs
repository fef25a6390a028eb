//! Two-state value wrapper for task inputs and outputs.

use crate::error::TaskError;
use crate::sync::MutexExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// A value that is either not yet available or ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pending<T> {
    Pending,
    Ready(T),
}

impl<T> Default for Pending<T> {
    fn default() -> Self {
        Pending::Pending
    }
}

impl<T> Pending<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Pending::Pending)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Pending::Pending => None,
            Pending::Ready(value) => Some(value),
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Pending::Pending => None,
            Pending::Ready(value) => Some(value),
        }
    }
}

impl<T> From<Option<T>> for Pending<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Pending::Ready(value),
            None => Pending::Pending,
        }
    }
}

/// Shared, lockable `Pending<T>` cell used as a task input or output slot
pub struct Slot<T> {
    inner: Arc<Mutex<Pending<T>>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&*self.inner.locked()).finish()
    }
}

impl<T: Clone> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Slot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Pending::Pending)),
        }
    }

    pub fn ready(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Pending::Ready(value))),
        }
    }

    pub fn set(&self, value: T) {
        *self.inner.locked() = Pending::Ready(value);
    }

    /// Snapshot of the current contents
    pub fn get(&self) -> Pending<T> {
        self.inner.locked().clone()
    }

    /// Read the value, failing while it is still pending
    pub fn value(&self) -> Result<T, TaskError> {
        self.get()
            .into_value()
            .ok_or(TaskError::RequirementNotSatisfied)
    }

    pub fn is_pending(&self) -> bool {
        self.inner.locked().is_pending()
    }
}

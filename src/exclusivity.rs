//! Registry serializing tasks that share a mutual-exclusion category.

use crate::sync::MutexExt;
use crate::task::Task;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Category to in-flight tasks, oldest first
#[derive(Default)]
pub struct ExclusivityManager {
    categories: Mutex<HashMap<String, Vec<Task>>>,
}

impl ExclusivityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default instance used by queues built without an explicit manager
    pub fn shared() -> Arc<ExclusivityManager> {
        static SHARED: OnceLock<Arc<ExclusivityManager>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(ExclusivityManager::new())))
    }

    /// Register `task` under `category` behind every earlier holder and
    /// return the previous holder, if any.
    ///
    /// The task is removed again once it finished.
    pub fn add(self: &Arc<Self>, task: &Task, category: &str) -> Option<Task> {
        let earlier = {
            let mut categories = self.categories.locked();
            let holders = categories.entry(category.to_string()).or_default();
            let earlier = holders.clone();
            holders.push(task.clone());
            earlier
        };

        for holder in &earlier {
            task.add_dependency(holder);
        }

        let manager = Arc::downgrade(self);
        let category_name = category.to_string();
        task.add_did_finish_hook(move |task| {
            if let Some(manager) = manager.upgrade() {
                manager.remove(task, &category_name);
            }
        });

        let previous = earlier.last().cloned();
        debug!(
            "Task {} joined exclusivity category '{}' behind {:?}",
            task.name(),
            category,
            previous.as_ref().map(|p| p.name().to_string())
        );
        previous
    }

    pub fn remove(&self, task: &Task, category: &str) {
        let mut categories = self.categories.locked();
        if let Some(holders) = categories.get_mut(category) {
            holders.retain(|holder| holder != task);
            if holders.is_empty() {
                categories.remove(category);
            }
        }
    }

    /// Task currently allowed to run in `category`
    pub fn current(&self, category: &str) -> Option<Task> {
        self.categories
            .locked()
            .get(category)
            .and_then(|holders| holders.first().cloned())
    }

    pub fn holders(&self, category: &str) -> Vec<Task> {
        self.categories
            .locked()
            .get(category)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_chains_dependencies() {
        let manager = Arc::new(ExclusivityManager::new());
        let first = Task::empty("first");
        let second = Task::empty("second");
        let third = Task::empty("third");

        assert!(manager.add(&first, "db").is_none());
        assert_eq!(manager.add(&second, "db"), Some(first.clone()));
        assert_eq!(manager.add(&third, "db"), Some(second.clone()));

        assert!(second.dependencies().contains(&first));
        assert!(third.dependencies().contains(&first));
        assert!(third.dependencies().contains(&second));
        assert_eq!(manager.current("db"), Some(first.clone()));
    }

    #[tokio::test]
    async fn test_remove_releases_category() {
        let manager = Arc::new(ExclusivityManager::new());
        let task = Task::empty("only");
        manager.add(&task, "files");
        assert_eq!(manager.holders("files").len(), 1);

        manager.remove(&task, "files");
        assert!(manager.current("files").is_none());
        assert!(manager.holders("files").is_empty());
    }

    #[test]
    fn test_shared_is_a_single_instance() {
        let a = ExclusivityManager::shared();
        let b = ExclusivityManager::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

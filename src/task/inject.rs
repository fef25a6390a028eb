use crate::error::TaskError;
use crate::pending::{Pending, Slot};
use crate::task::{BlockObserver, Task};
use tracing::debug;

impl Task {
    /// Make this task depend on `dependency` and hand it the dependency's output.
    ///
    /// When the dependency is about to finish, `block` receives this task and
    /// the ready output value. A pending output cancels this task with
    /// `RequirementNotSatisfied`; a failed or cancelled dependency cancels it
    /// with the wrapped cause.
    pub fn inject_result<T, F>(&self, dependency: &Task, output: Slot<T>, block: F)
    where
        T: Clone + Send + 'static,
        F: Fn(&Task, T) + Send + Sync + 'static,
    {
        self.add_dependency(dependency);

        let dependent = self.downgrade();
        dependency.add_observer(BlockObserver::new().on_will_finish(
            move |dependency, errors, _| {
                let Some(dependent) = dependent.upgrade() else {
                    return;
                };

                if dependency.is_cancelled() {
                    let error = match errors.first() {
                        Some(error) => TaskError::DependencyCancelledWithError(Box::new(error.clone())),
                        None => TaskError::DependenciesCancelled,
                    };
                    dependent.cancel(vec![error]);
                    return;
                }

                if let Some(error) = errors.first() {
                    dependent.cancel(vec![TaskError::DependencyFinishedWithError(Box::new(
                        error.clone(),
                    ))]);
                    return;
                }

                match output.get() {
                    Pending::Ready(value) => {
                        debug!(
                            "Injecting result of {} into {}",
                            dependency.name(),
                            dependent.name()
                        );
                        block(&dependent, value);
                    }
                    Pending::Pending => dependent.cancel(vec![TaskError::RequirementNotSatisfied]),
                }
            },
        ));
    }

    /// Inject the dependency's output straight into `input`
    pub fn inject_into<T>(&self, dependency: &Task, output: Slot<T>, input: Slot<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inject_result(dependency, output, move |_, value| input.set(value));
    }
}

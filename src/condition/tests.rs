#[cfg(test)]
mod tests {
    use crate::condition::*;
    use crate::error::TaskError;
    use crate::queue::TaskQueue;
    use crate::task::Task;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn single(condition: impl Condition) -> Vec<Arc<dyn Condition>> {
        let condition: Arc<dyn Condition> = Arc::new(condition);
        vec![condition]
    }

    async fn evaluate(mode: AggregationMode, list: Vec<Arc<dyn Condition>>) -> ConditionResult {
        let task = Task::empty("host");
        let context = EvaluationContext::new(mode);
        evaluate_conditions(&task, &list, &context).await
    }

    #[test]
    fn test_and_aggregator_short_circuits_on_failure() {
        let aggregator = ConditionResultAggregator::new(AggregationMode::And);
        aggregator.expect_result().unwrap();
        aggregator.expect_result().unwrap();

        aggregator.fulfill(ConditionResult::Failed(TaskError::FalseCondition));
        assert_eq!(
            aggregator.verdict(),
            Some(ConditionResult::Failed(TaskError::FalseCondition))
        );
        assert_eq!(
            aggregator.expect_result(),
            Err(AlreadyFinished(ConditionResult::Failed(
                TaskError::FalseCondition
            )))
        );

        // The outstanding result is still accepted and ignored
        aggregator.fulfill(ConditionResult::Satisfied);
        assert_eq!(
            aggregator.verdict(),
            Some(ConditionResult::Failed(TaskError::FalseCondition))
        );
    }

    #[test]
    fn test_or_aggregator_short_circuits_on_success() {
        let aggregator = ConditionResultAggregator::new(AggregationMode::Or);
        aggregator.expect_result().unwrap();
        aggregator.expect_result().unwrap();

        aggregator.fulfill(ConditionResult::Failed(TaskError::FalseCondition));
        assert!(aggregator.verdict().is_none());
        aggregator.fulfill(ConditionResult::Satisfied);
        assert_eq!(aggregator.verdict(), Some(ConditionResult::Satisfied));
    }

    #[test]
    fn test_aggregator_verdict_after_seal() {
        let aggregator = ConditionResultAggregator::new(AggregationMode::And);
        aggregator.expect_result().unwrap();
        aggregator.fulfill(ConditionResult::Satisfied);
        assert!(aggregator.verdict().is_none());

        aggregator.seal();
        assert_eq!(aggregator.verdict(), Some(ConditionResult::Satisfied));

        let empty_or = ConditionResultAggregator::new(AggregationMode::Or);
        empty_or.seal();
        assert_eq!(empty_or.verdict(), Some(ConditionResult::NotSatisfied));
    }

    #[test]
    fn test_or_aggregator_accumulates_failures() {
        let aggregator = ConditionResultAggregator::new(AggregationMode::Or);
        aggregator.expect_result().unwrap();
        aggregator.expect_result().unwrap();
        aggregator.seal();

        aggregator.fulfill(ConditionResult::Failed(TaskError::custom("a")));
        aggregator.fulfill(ConditionResult::Failed(TaskError::custom("b")));

        assert_eq!(
            aggregator.verdict(),
            Some(ConditionResult::Failed(TaskError::FailedConditions {
                errors: vec![TaskError::custom("a"), TaskError::custom("b")],
            }))
        );
    }

    #[test]
    #[should_panic(expected = "Mis-matched fulfill")]
    fn test_fulfill_without_expectation_panics() {
        let aggregator = ConditionResultAggregator::new(AggregationMode::And);
        aggregator.fulfill(ConditionResult::Satisfied);
    }

    #[tokio::test]
    async fn test_aggregator_cancel_wakes_waiter() {
        let aggregator = Arc::new(ConditionResultAggregator::new(AggregationMode::And));
        aggregator.expect_result().unwrap();
        aggregator.seal();

        let waiter = {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move { aggregator.finished().await })
        };
        aggregator.cancel(ConditionResult::Failed(
            TaskError::ConditionEvaluationCancelled,
        ));

        assert_eq!(
            waiter.await.unwrap(),
            ConditionResult::Failed(TaskError::ConditionEvaluationCancelled)
        );
    }

    #[test]
    fn test_result_from_block_outcome() {
        assert_eq!(ConditionResult::from(Ok(true)), ConditionResult::Satisfied);
        assert_eq!(
            ConditionResult::from(Ok(false)),
            ConditionResult::Failed(TaskError::ConditionFailed)
        );
        assert_eq!(
            ConditionResult::from(Err(TaskError::custom("e"))),
            ConditionResult::Failed(TaskError::custom("e"))
        );
    }

    #[test]
    fn test_dependency_requirements_flags() {
        let requirements = DependencyRequirements::NO_FAILED | DependencyRequirements::NO_CANCELLED;
        assert_eq!(requirements, DependencyRequirements::NO_FAILED_OR_CANCELLED);
        assert!(requirements.contains(DependencyRequirements::NO_FAILED));
        assert!(!requirements.contains(DependencyRequirements::IGNORE_FAILED_IF_CANCELLED));
        assert!(DependencyRequirements::NONE.is_empty());
        assert!(DependencyRequirements::default().is_empty());
    }

    #[tokio::test]
    async fn test_builtin_conditions() {
        assert_eq!(
            evaluate(AggregationMode::And, single(TrueCondition::new())).await,
            ConditionResult::Satisfied
        );
        assert_eq!(
            evaluate(AggregationMode::And, single(FalseCondition::new())).await,
            ConditionResult::Failed(TaskError::FalseCondition)
        );
        assert_eq!(
            evaluate(
                AggregationMode::And,
                single(BlockCondition::new(|| Ok(false)))
            )
            .await,
            ConditionResult::Failed(TaskError::ConditionFailed)
        );
        assert_eq!(
            evaluate(
                AggregationMode::And,
                single(MutuallyExclusive::new("db"))
            )
            .await,
            ConditionResult::Satisfied
        );
    }

    #[tokio::test]
    async fn test_empty_condition_list_is_satisfied() {
        assert_eq!(
            evaluate(AggregationMode::And, Vec::new()).await,
            ConditionResult::Satisfied
        );
    }

    #[tokio::test]
    async fn test_condition_output_is_recorded() {
        let condition: Arc<dyn Condition> = Arc::new(BlockCondition::named("answer", || Ok(true)));
        assert!(condition.output().is_pending());

        evaluate(AggregationMode::And, vec![Arc::clone(&condition)]).await;

        assert_eq!(condition.output().into_value(), Some(ConditionResult::Satisfied));
    }

    #[tokio::test]
    async fn test_negated_and_ignored_conditions() {
        assert_eq!(
            evaluate(
                AggregationMode::And,
                single(NegatedCondition::new(FalseCondition::new()))
            )
            .await,
            ConditionResult::Satisfied
        );
        assert_eq!(
            evaluate(
                AggregationMode::And,
                single(NegatedCondition::new(TrueCondition::new()))
            )
            .await,
            ConditionResult::Failed(TaskError::ConditionFailed)
        );
        assert_eq!(
            evaluate(
                AggregationMode::And,
                single(IgnoredCondition::new(FalseCondition::new()))
            )
            .await,
            ConditionResult::NotSatisfied
        );
    }

    #[tokio::test]
    async fn test_compound_conditions() {
        let all = CompoundCondition::all()
            .with(TrueCondition::new())
            .with(FalseCondition::new());
        assert_eq!(all.name(), "All<True Condition, False Condition>");
        assert_eq!(
            evaluate(AggregationMode::And, single(all)).await,
            ConditionResult::Failed(TaskError::FalseCondition)
        );

        let any = CompoundCondition::any()
            .with(FalseCondition::new())
            .with(TrueCondition::new());
        assert_eq!(any.mode(), AggregationMode::Or);
        assert_eq!(
            evaluate(AggregationMode::And, single(any)).await,
            ConditionResult::Satisfied
        );
    }

    #[test]
    fn test_compound_ignores_duplicate_instances() {
        let shared: Arc<dyn Condition> = Arc::new(TrueCondition::new());
        let compound = CompoundCondition::all()
            .with_arc(Arc::clone(&shared))
            .with_arc(shared)
            .with(MutuallyExclusive::new("disk"));

        assert_eq!(compound.conditions().len(), 2);
        assert_eq!(compound.mutually_exclusive_categories(), vec!["disk".to_string()]);
    }

    #[test]
    fn test_composed_merges_dependencies_and_categories() {
        let first = Task::empty("first");
        let second = Task::empty("second");
        let inner = MutuallyExclusive::new("network");
        inner.add_dependency(&first);

        let composed = ComposedCondition::new(inner);
        composed.add_dependency(&second);
        composed.add_mutually_exclusive_category("disk");
        composed.set_dependency_requirements(DependencyRequirements::NO_FAILED);

        assert_eq!(composed.dependencies(), vec![second, first]);
        assert_eq!(
            composed.mutually_exclusive_categories(),
            vec!["disk".to_string(), "network".to_string()]
        );
        assert!(
            composed
                .dependency_requirements()
                .contains(DependencyRequirements::NO_FAILED)
        );
    }

    #[tokio::test]
    async fn test_silent_condition_does_not_schedule_produced_dependencies() {
        let produced = Task::empty("never-run");
        let inner = TrueCondition::new();
        inner.produce_dependency(produced.clone());
        let silent = SilentCondition::new(inner);
        assert!(silent.produced_dependencies().is_empty());

        assert_eq!(
            evaluate(AggregationMode::And, single(silent)).await,
            ConditionResult::Satisfied
        );
        assert!(!produced.is_finished());
    }

    #[tokio::test]
    async fn test_produced_dependency_runs_before_evaluation() {
        let produced = Task::from_fn("produced", |_| async { Ok(()) });
        let witness = produced.clone();
        let condition = BlockCondition::new(move || Ok(witness.is_finished()));
        condition.produce_dependency(produced.clone());

        assert_eq!(
            evaluate(AggregationMode::And, single(condition)).await,
            ConditionResult::Satisfied
        );
        assert!(produced.is_finished());
    }

    #[tokio::test]
    async fn test_failed_dependency_requirement_skips_evaluation() {
        let evaluated = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&evaluated);
        let condition = BlockCondition::named("guarded", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(true)
        });
        condition.produce_dependency(Task::from_fn("broken", |_| async {
            Err(TaskError::custom("broken"))
        }));
        condition.set_dependency_requirements(DependencyRequirements::NO_FAILED);

        assert_eq!(
            evaluate(AggregationMode::And, single(condition)).await,
            ConditionResult::Failed(TaskError::ConditionDependenciesFailed {
                condition: "guarded".to_string(),
            })
        );
        assert!(!evaluated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    #[should_panic(expected = "was evaluated more than once")]
    async fn test_condition_evaluated_twice_panics() {
        let condition: Arc<dyn Condition> = Arc::new(TrueCondition::new());
        evaluate(AggregationMode::And, vec![Arc::clone(&condition), condition]).await;
    }

    #[test]
    #[should_panic(expected = "is already attached to a task")]
    fn test_condition_attached_twice_panics() {
        let condition: Arc<dyn Condition> = Arc::new(TrueCondition::new());
        Task::empty("first").add_condition_arc(Arc::clone(&condition));
        Task::empty("second").add_condition_arc(condition);
    }

    #[tokio::test]
    async fn test_failing_condition_cancels_task_with_its_error() {
        let queue = TaskQueue::new("conditions");
        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);
        let task = Task::from_fn("guarded", move |_| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        task.add_condition(BlockCondition::new(|| Ok(true)));
        task.add_condition(BlockCondition::new(|| Err(TaskError::custom("E"))));

        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(!executed.load(Ordering::SeqCst));
        assert!(task.is_cancelled());
        assert_eq!(task.errors(), vec![TaskError::custom("E")]);
    }

    #[tokio::test]
    async fn test_ignored_condition_cancels_without_errors() {
        let queue = TaskQueue::new("conditions");
        let task = Task::empty("ignored");
        task.add_condition(IgnoredCondition::new(FalseCondition::new()));

        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(task.is_cancelled());
        assert!(task.errors().is_empty());
    }

    #[tokio::test]
    async fn test_no_failed_dependencies_condition() {
        let queue = TaskQueue::new("conditions");
        let dependency = Task::from_fn("dependency", |_| async { Err(TaskError::custom("x")) });
        let task = Task::empty("dependent");
        task.add_dependency(&dependency);
        task.add_condition(NoFailedDependenciesCondition::new());

        queue.add(dependency);
        queue.add(task.clone());
        task.wait_until_finished().await;

        assert_eq!(task.errors(), vec![TaskError::DependenciesFailed]);
    }

    #[tokio::test]
    async fn test_no_failed_dependencies_ignoring_cancellations() {
        let queue = TaskQueue::new("conditions");
        let dependency = Task::empty("dependency");
        dependency.cancel(Vec::new());
        let task = Task::empty("dependent");
        task.add_dependency(&dependency);
        task.add_condition(NoFailedDependenciesCondition::ignoring_cancellations());

        queue.add(dependency);
        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(task.is_cancelled());
        assert!(task.errors().is_empty());
    }
}

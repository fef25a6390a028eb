#[cfg(test)]
mod tests {
    use crate::error::TaskError;
    use crate::pending::Slot;
    use crate::queue::TaskQueue;
    use crate::task::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // Helper recording every observer callback by name
    fn recording_observer(events: Arc<Mutex<Vec<String>>>) -> BlockObserver {
        let will_execute = Arc::clone(&events);
        let did_execute = Arc::clone(&events);
        let did_cancel = Arc::clone(&events);
        let will_finish = Arc::clone(&events);
        let did_finish = events;
        BlockObserver::new()
            .on_will_execute(move |_, _| will_execute.lock().unwrap().push("will_execute".into()))
            .on_did_execute(move |_| did_execute.lock().unwrap().push("did_execute".into()))
            .on_did_cancel(move |_, _| did_cancel.lock().unwrap().push("did_cancel".into()))
            .on_will_finish(move |_, _, _| will_finish.lock().unwrap().push("will_finish".into()))
            .on_did_finish(move |_, _| did_finish.lock().unwrap().push("did_finish".into()))
    }

    #[test]
    fn test_state_transition_table() {
        use TaskState::*;
        let order = [
            Initialized,
            WillEnqueue,
            Pending,
            Started,
            Executing,
            Finishing,
            Finished,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Started.can_transition_to(Finishing));
        assert!(!Pending.can_transition_to(Executing));
        assert!(!Finished.can_transition_to(Initialized));
        assert!(!Executing.can_transition_to(Started));
        assert!(Finished.is_terminal());
        assert!(!Finishing.is_terminal());
    }

    #[test]
    #[should_panic(expected = "illegal task state transition")]
    fn test_illegal_transition_panics() {
        let mut state = TaskState::Pending;
        state.transition(TaskState::Executing);
    }

    #[test]
    fn test_delay_remaining() {
        assert_eq!(
            Delay::from(Duration::from_millis(5)).remaining(),
            Duration::from_millis(5)
        );
        let past = Delay::Until(chrono::Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(past.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_task_runs_to_finished() {
        let queue = TaskQueue::new("lifecycle");
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = Task::from_fn("simple", move |_| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });
        assert_eq!(task.state(), TaskState::Initialized);

        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(task.state(), TaskState::Finished);
        assert!(!task.failed());
        assert!(!task.is_cancelled());
        assert!(task.queue().is_none());
    }

    #[tokio::test]
    async fn test_body_error_is_recorded() {
        let queue = TaskQueue::new("lifecycle");
        let task = Task::from_fn("failing", |_| async { Err(TaskError::custom("boom")) });

        queue.add(task.clone());
        task.wait_until_finished().await;

        assert_eq!(task.errors(), vec![TaskError::custom("boom")]);
    }

    #[tokio::test]
    async fn test_panicking_body_finishes_with_unknown_error() {
        let queue = TaskQueue::new("lifecycle");
        let task = Task::from_fn("panicking", |_| async { panic!("body exploded") });

        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(matches!(task.errors().as_slice(), [TaskError::Unknown(_)]));
    }

    #[tokio::test]
    async fn test_first_finish_wins() {
        let queue = TaskQueue::new("lifecycle");
        let task = Task::from_fn("double-finish", |task| async move {
            task.finish(vec![TaskError::custom("first")]);
            task.finish(vec![TaskError::custom("second")]);
            Ok(())
        });

        queue.add(task.clone());
        task.wait_until_finished().await;

        assert_eq!(task.errors(), vec![TaskError::custom("first")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancel_records_one_winner() {
        let task = Task::empty("cancel-race");
        let mut handles = Vec::new();
        for i in 0..8 {
            let task = task.clone();
            handles.push(tokio::spawn(async move {
                task.cancel(vec![TaskError::custom(format!("cancel {}", i))]);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(task.is_cancelled());
        assert_eq!(task.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_never_executes() {
        let queue = TaskQueue::new("lifecycle");
        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);
        let task = Task::from_fn("cancelled", move |_| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        task.cancel(vec![TaskError::custom("stop")]);
        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(!executed.load(Ordering::SeqCst));
        assert!(task.is_cancelled());
        assert_eq!(task.errors(), vec![TaskError::custom("stop")]);
    }

    #[tokio::test]
    async fn test_cancel_while_executing_finishes_automatically() {
        let queue = TaskQueue::new("lifecycle");
        let task = Task::from_fn("long", |task| async move {
            task.cancelled_future().wait().await;
            Ok(())
        });

        queue.add(task.clone());
        while !task.is_executing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        task.cancel(Vec::new());
        task.wait_until_finished().await;

        assert!(task.is_cancelled());
        assert!(task.errors().is_empty());
    }

    #[tokio::test]
    async fn test_automatic_finishing_disabled_waits_for_body() {
        let queue = TaskQueue::new("lifecycle");
        let release = crate::future::TaskPromise::new();
        let gate = release.future();
        let task = Task::with_options(
            "manual",
            FnBody::new(move |_| {
                let gate = gate.clone();
                async move {
                    gate.wait().await;
                    Ok(())
                }
            }),
            TaskOptions::default().with_automatic_finishing_disabled(),
        );

        queue.add(task.clone());
        while !task.is_executing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        task.cancel(Vec::new());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.state(), TaskState::Executing);

        release.complete(());
        task.wait_until_finished().await;
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn test_observer_callbacks_in_order() {
        let queue = TaskQueue::new("lifecycle");
        let events = Arc::new(Mutex::new(Vec::new()));
        let task = Task::empty("observed");
        task.add_observer(recording_observer(Arc::clone(&events)));

        queue.add(task.clone());
        task.wait_until_finished().await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["will_execute", "did_execute", "will_finish", "did_finish"]
        );
    }

    #[tokio::test]
    async fn test_pending_finish_defers_finished() {
        let queue = TaskQueue::new("lifecycle");
        let held = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&held);
        let task = Task::empty("deferred");
        task.add_will_finish_block(move |_, _, pending| {
            *slot.lock().unwrap() = Some(pending.clone());
        });

        queue.add(task.clone());
        while held.lock().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.state(), TaskState::Finishing);

        let event = held.lock().unwrap().take().unwrap();
        assert_eq!(event.kind(), PendingEventKind::Finish);
        drop(event);
        task.wait_until_finished().await;
        assert!(task.is_finished());
    }

    #[tokio::test]
    async fn test_produce_without_queue_is_an_error() {
        let task = Task::empty("orphan");
        let result = task.produce(Task::empty("child"), None);
        assert!(matches!(result, Err(TaskError::NoQueue)));
    }

    #[tokio::test]
    async fn test_produce_adds_to_same_queue() {
        let queue = TaskQueue::new("produce");
        let produced = Task::empty("produced");
        let child = produced.clone();
        let added = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&added);

        let parent = Task::from_fn("parent", move |task| {
            let child = child.clone();
            async move {
                task.produce(child, None)?.wait().await;
                Ok(())
            }
        });
        parent.add_observer(BlockObserver::new().on_did_add(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        queue.add(parent.clone());
        parent.wait_until_finished().await;
        produced.wait_until_finished().await;

        assert!(!parent.failed());
        assert!(produced.is_finished());
        assert_eq!(added.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependency_runs_first() {
        let queue = TaskQueue::new("dependencies");
        let order = Arc::new(Mutex::new(Vec::new()));

        let first_order = Arc::clone(&order);
        let first = Task::from_fn("first", move |_| {
            let order = Arc::clone(&first_order);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().unwrap().push("first");
                Ok(())
            }
        });
        let second_order = Arc::clone(&order);
        let second = Task::from_fn("second", move |_| {
            let order = Arc::clone(&second_order);
            async move {
                order.lock().unwrap().push("second");
                Ok(())
            }
        });
        second.add_dependency(&first);

        queue.add(second.clone());
        queue.add(first);
        second.wait_until_finished().await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    #[should_panic(expected = "cannot depend on itself")]
    fn test_self_dependency_panics() {
        let task = Task::empty("self");
        task.add_dependency(&task.clone());
    }

    #[tokio::test]
    #[should_panic(expected = "added to a queue more than once")]
    async fn test_double_enqueue_panics() {
        let queue = TaskQueue::new("twice");
        let task = Task::empty("twice");
        queue.add(task.clone());
        queue.add(task);
    }

    #[tokio::test]
    async fn test_inject_result_hands_value_over() {
        let queue = TaskQueue::new("inject");
        let output = Slot::new();
        let input = Slot::new();

        let producer_output = output.clone();
        let producer = Task::from_fn("producer", move |_| {
            let output = producer_output.clone();
            async move {
                output.set(42u32);
                Ok(())
            }
        });
        let consumer_input = input.clone();
        let consumer = Task::from_fn("consumer", move |_| {
            let input = consumer_input.clone();
            async move {
                assert_eq!(input.value()?, 42);
                Ok(())
            }
        });
        consumer.inject_into(&producer, output, input.clone());

        queue.add(consumer.clone());
        queue.add(producer);
        consumer.wait_until_finished().await;

        assert!(!consumer.failed());
        assert_eq!(input.value().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_inject_pending_output_cancels_dependent() {
        let queue = TaskQueue::new("inject");
        let producer = Task::empty("silent-producer");
        let consumer = Task::empty("consumer");
        consumer.inject_result(&producer, Slot::<u32>::new(), |_, _| {});

        queue.add(consumer.clone());
        queue.add(producer);
        consumer.wait_until_finished().await;

        assert!(consumer.is_cancelled());
        assert_eq!(consumer.errors(), vec![TaskError::RequirementNotSatisfied]);
    }

    #[tokio::test]
    async fn test_inject_failed_dependency_cancels_dependent() {
        let queue = TaskQueue::new("inject");
        let producer = Task::from_fn("failing-producer", |_| async {
            Err(TaskError::custom("no data"))
        });
        let consumer = Task::empty("consumer");
        consumer.inject_result(&producer, Slot::<u32>::new(), |_, _| {});

        queue.add(consumer.clone());
        queue.add(producer);
        consumer.wait_until_finished().await;

        assert_eq!(
            consumer.errors(),
            vec![TaskError::DependencyFinishedWithError(Box::new(
                TaskError::custom("no data")
            ))]
        );
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_finishes() {
        let queue = TaskQueue::new("timeout");
        let task = Task::from_fn("stuck", |task| async move {
            task.cancelled_future().wait().await;
            Ok(())
        })
        .with_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(task.is_cancelled());
        assert!(task.errors().iter().any(TaskError::is_timeout));
    }

    #[tokio::test]
    async fn test_delay_task_waits() {
        let queue = TaskQueue::new("delay");
        let task = Task::delay(Duration::from_millis(30));

        let started = std::time::Instant::now();
        queue.add(task.clone());
        task.wait_until_finished().await;

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!task.failed());
    }

    #[tokio::test]
    async fn test_cancelled_delay_finishes_early() {
        let queue = TaskQueue::new("delay");
        let task = Task::delay(Duration::from_secs(60));

        queue.add(task.clone());
        while !task.is_executing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        task.cancel(Vec::new());
        task.wait_until_finished().await;
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let queue = TaskQueue::new("snapshot");
        let task = Task::from_fn("snap", |_| async { Err(TaskError::custom("bad")) });
        queue.add(task.clone());
        task.wait_until_finished().await;

        let snapshot = task.snapshot();
        assert_eq!(snapshot.state, TaskState::Finished);
        assert_eq!(snapshot.errors, vec!["bad".to_string()]);
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.finished_at.is_some());

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: TaskSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, snapshot);
    }
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use taskkit::{BlockObserver, Slot, Task, TaskError, TaskQueue, TaskState};

#[tokio::test]
async fn test_timeout_cancels_then_auto_finishes() {
    let queue = TaskQueue::new("timeouts");
    let task = Task::from_fn("never-finishes", |task| async move {
        // Only cancellation ends this body
        task.cancelled_future().wait().await;
        Ok(())
    })
    .with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    queue.add(task.clone());
    task.wait_until_finished().await;
    let elapsed = started.elapsed();

    assert!(task.is_cancelled(), "Task should be cancelled by its timeout");
    assert!(
        task.errors().iter().any(TaskError::is_timeout),
        "Errors should contain a timeout, got {:?}",
        task.errors()
    );
    assert!(elapsed >= Duration::from_millis(100), "Finished too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "Finished too late: {:?}", elapsed);
}

#[tokio::test]
async fn test_pipeline_passes_results_between_tasks() {
    let queue = TaskQueue::new("pipeline");

    let fetched: Slot<String> = Slot::new();
    let output = fetched.clone();
    let fetch = Task::from_fn("fetch", move |_| {
        let output = output.clone();
        async move {
            output.set("payload".to_string());
            Ok(())
        }
    });

    let received: Slot<String> = Slot::new();
    let input = received.clone();
    let stored = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&stored);
    let store = Task::from_fn("store", move |_| {
        let input = input.clone();
        let sink = Arc::clone(&sink);
        async move {
            *sink.lock().unwrap() = Some(input.value()?.to_uppercase());
            Ok(())
        }
    });
    store.inject_into(&fetch, fetched, received);

    queue.add_all([fetch, store.clone()]);
    store.wait_until_finished().await;

    assert!(!store.failed(), "Store failed: {:?}", store.errors());
    assert_eq!(stored.lock().unwrap().as_deref(), Some("PAYLOAD"));
}

#[tokio::test]
async fn test_failed_dependency_cancels_injected_task() {
    let queue = TaskQueue::new("pipeline");
    let output: Slot<u32> = Slot::new();
    let producer = Task::from_fn("producer", |_| async { Err(TaskError::custom("no data")) });
    let consumer = Task::empty("consumer");
    consumer.inject_into(&producer, output, Slot::new());

    queue.add_all([producer, consumer.clone()]);
    consumer.wait_until_finished().await;

    assert!(consumer.is_cancelled());
    assert_eq!(
        consumer.errors(),
        vec![TaskError::DependencyFinishedWithError(Box::new(
            TaskError::custom("no data")
        ))]
    );
}

#[tokio::test]
async fn test_observer_sees_every_transition() {
    let queue = TaskQueue::new("observed");
    let states = Arc::new(Mutex::new(Vec::new()));
    let on_execute = Arc::clone(&states);
    let on_finish = Arc::clone(&states);

    let task = Task::empty("observed");
    task.add_observer(
        BlockObserver::new()
            .on_will_execute(move |task, _| on_execute.lock().unwrap().push(task.state()))
            .on_did_finish(move |task, _| on_finish.lock().unwrap().push(task.state())),
    );

    queue.add(task.clone());
    task.wait_until_finished().await;

    assert_eq!(
        *states.lock().unwrap(),
        vec![TaskState::Started, TaskState::Finished]
    );
}

use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskkit::config::QueueConfig;
use taskkit::{BlockObserver, ExclusivityManager, MutuallyExclusive, Task, TaskQueue};

fn exclusive_task(name: &str, category: &str, log: &Arc<Mutex<Vec<String>>>) -> Task {
    let task = Task::from_fn(name, |_| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(())
    });
    task.add_condition(MutuallyExclusive::new(category));

    let started = Arc::clone(log);
    let finished = Arc::clone(log);
    task.add_observer(
        BlockObserver::new()
            .on_will_execute(move |task, _| {
                started.lock().unwrap().push(format!("{} started", task.name()))
            })
            .on_did_finish(move |task, _| {
                finished.lock().unwrap().push(format!("{} finished", task.name()))
            }),
    );
    task
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_category_serializes_tasks() {
    let manager = Arc::new(ExclusivityManager::new());
    let queue = TaskQueue::with_exclusivity(QueueConfig::new("exclusive"), Arc::clone(&manager));
    let log = Arc::new(Mutex::new(Vec::new()));

    let t1 = exclusive_task("t1", "X", &log);
    let t2 = exclusive_task("t2", "X", &log);
    queue.add_all([t1.clone(), t2.clone()]);
    queue.wait_until_all_finished().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "t1 started".to_string(),
            "t1 finished".to_string(),
            "t2 started".to_string(),
            "t2 finished".to_string(),
        ]
    );
    assert!(manager.current("X").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_tasks_run_in_submission_order() {
    let manager = Arc::new(ExclusivityManager::new());
    let queue = TaskQueue::with_exclusivity(QueueConfig::new("exclusive"), Arc::clone(&manager));
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = exclusive_task("a", "X", &log);
    let b = exclusive_task("b", "X", &log);
    let c = exclusive_task("c", "X", &log);
    queue.add_all([a.clone(), b.clone(), c.clone()]);

    // Every later holder waits on every earlier one
    assert!(c.dependencies().contains(&a));
    assert!(c.dependencies().contains(&b));
    assert!(b.dependencies().contains(&a));

    queue.wait_until_all_finished().await;
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "a started".to_string(),
            "a finished".to_string(),
            "b started".to_string(),
            "b finished".to_string(),
            "c started".to_string(),
            "c finished".to_string(),
        ]
    );
    assert!(manager.current("X").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_category_spans_queues_sharing_a_manager() {
    let manager = Arc::new(ExclusivityManager::new());
    let first = TaskQueue::with_exclusivity(QueueConfig::new("first"), Arc::clone(&manager));
    let second = TaskQueue::with_exclusivity(QueueConfig::new("second"), Arc::clone(&manager));

    let running = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));
    let make = |name: &str| {
        let running = Arc::clone(&running);
        let overlapped = Arc::clone(&overlapped);
        let task = Task::from_fn(name, move |_| {
            let running = Arc::clone(&running);
            let overlapped = Arc::clone(&overlapped);
            async move {
                if running.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlapped.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        task.add_condition(MutuallyExclusive::new("disk"));
        task
    };

    let tasks: Vec<Task> = (0..4).map(|i| make(&format!("writer-{}", i))).collect();
    for (i, task) in tasks.iter().enumerate() {
        let queue = if i % 2 == 0 { &first } else { &second };
        queue.add(task.clone());
    }
    first.wait_until_all_finished().await;
    second.wait_until_all_finished().await;

    assert!(tasks.iter().all(|task| task.is_finished()));
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn test_default_queues_share_the_process_manager() {
    let first = TaskQueue::new("default-a");
    let second = TaskQueue::new("default-b");
    assert!(Arc::ptr_eq(first.exclusivity(), second.exclusivity()));
    assert!(Arc::ptr_eq(first.exclusivity(), &ExclusivityManager::shared()));
}

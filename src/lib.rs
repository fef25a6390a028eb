//! # taskkit
//!
//! An in-process concurrency-coordination library built on tokio. A
//! [`Task`] is a composable unit of asynchronous work with dependencies,
//! preconditions, cancellation, retry and observation; a [`TaskQueue`]
//! schedules tasks with ordering and mutual-exclusion guarantees a bare
//! worker pool does not give.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Task state machine, observers, pending events and helpers
//! - **[`condition`]**: Precondition evaluation with AND/OR aggregation
//! - **[`queue`]**: Task scheduling and the delegate protocol
//! - **[`group`]**: Composite tasks with a finish-barrier, repeat and retry
//! - **[`event_queue`]**: Per-task serial event delivery
//!
//! ## Features
//!
//! ### 🎯 Task Lifecycle
//! - **Strict State Machine**: Illegal transitions are programming errors
//! - **Cooperative Cancellation**: Monotonic, first caller wins
//! - **Ordered Observers**: Callbacks never overlap for one task
//! - **Result Injection**: Typed `Pending<T>` slots flow between tasks
//!
//! ### 🔒 Preconditions & Exclusivity
//! - **Conditions With Dependencies**: Evaluated once the host's dependencies finished
//! - **Short-Circuit Aggregation**: AND fails fast, OR succeeds fast
//! - **Mutual Exclusion**: One running task per category, in submission order
//!
//! ### 🔄 Groups & Recovery
//! - **Finish-Barrier**: Late children delay the group's completion
//! - **Error Recovery**: Provisional child errors promoted or discarded
//! - **Repeat/Retry**: Pluggable wait strategies between attempts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskkit::{Task, TaskQueue, TrueCondition};
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = TaskQueue::new("main");
//!
//!     let fetch = Task::from_fn("fetch", |_| async { Ok(()) });
//!     let store = Task::from_fn("store", |_| async { Ok(()) });
//!     store.add_dependency(&fetch);
//!     store.add_condition(TrueCondition::new());
//!
//!     queue.add(fetch);
//!     queue.add(store.clone());
//!     store.wait_until_finished().await;
//!     assert!(!store.failed());
//! }
//! ```

/// Configuration loading and logging bootstrap.
///
/// TOML configuration with per-field defaults, discovery through the
/// environment, and `tracing` subscriber installation.
pub mod config;

/// Precondition evaluation engine.
///
/// Conditions with their own dependencies, result aggregation with AND/OR
/// short-circuiting, built-in conditions and composing wrappers.
pub mod condition;

/// Error types shared by every component.
pub mod error;

/// Per-task serial event queue.
pub mod event_queue;

/// Mutual-exclusion registry keyed by category.
pub mod exclusivity;

/// Single-assignment promise and future.
pub mod future;

/// Composite tasks.
///
/// Task groups driven by a finish-barrier, with child error recovery, plus
/// the repeating and retrying groups built on them.
pub mod group;

/// Two-state value wrapper and shared slots.
pub mod pending;

/// Task scheduling.
///
/// Queues wiring dependencies, preconditions and exclusivity before handing
/// ready tasks to the executor, with delegate notifications.
pub mod queue;

/// Task lifecycle management.
///
/// The task state machine, its observers, pending events, timeouts, delays
/// and dependency result injection.
pub mod task;

mod sync;

// Re-export main task types
pub use task::{
    BlockObserver, Delay, PendingEvent, Task, TaskBody, TaskId, TaskObserver, TaskOptions,
    TaskSnapshot, TaskState, TimeoutObserver,
};

// Re-export condition types
pub use condition::{
    BlockCondition, CompoundCondition, Condition, ConditionResult, DependencyRequirements,
    FalseCondition, MutuallyExclusive, NegatedCondition, NoFailedDependenciesCondition,
    SilentCondition, TrueCondition,
};

// Re-export scheduling types
pub use exclusivity::ExclusivityManager;
pub use group::{RepeatTask, RetryTask, TaskGroup, WaitStrategy};
pub use queue::{TaskQueue, TaskQueueDelegate};

pub use config::{KitConfig, init_tracing};
pub use error::{TaskError, TaskResult};
pub use event_queue::EventQueue;
pub use future::{TaskFuture, TaskPromise};
pub use pending::{Pending, Slot};

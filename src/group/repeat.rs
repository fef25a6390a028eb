use crate::error::TaskError;
use crate::group::{GroupHooks, TaskGroup};
use crate::sync::MutexExt;
use crate::task::{Delay, Task};
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Reconfigures each task before it is added
pub type ConfigureBlock = Arc<dyn Fn(&Task) + Send + Sync>;

/// Backoff between consecutive payloads
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WaitStrategy {
    #[default]
    Immediate,
    Constant(Duration),
    Random {
        min: Duration,
        max: Duration,
    },
    /// `max(0, initial + increment * n)`
    Incrementing {
        initial: chrono::Duration,
        increment: chrono::Duration,
    },
    /// `period * fib(n)`, clamped to `max`
    Fibonacci {
        period: Duration,
        max: Duration,
    },
    /// `period * power^n`, clamped to `max`
    Exponential {
        power: f64,
        period: Duration,
        max: Duration,
    },
}

impl WaitStrategy {
    /// Wait before the payload with zero-based index `n`
    pub fn interval(&self, n: u32) -> Duration {
        match *self {
            WaitStrategy::Immediate => Duration::ZERO,
            WaitStrategy::Constant(interval) => interval,
            WaitStrategy::Random { min, max } => {
                if max <= min {
                    return min;
                }
                min + (max - min).mul_f64(rand::random::<f64>())
            }
            WaitStrategy::Incrementing { initial, increment } => {
                let steps = i32::try_from(n).unwrap_or(i32::MAX);
                increment
                    .checked_mul(steps)
                    .and_then(|total| initial.checked_add(&total))
                    .and_then(|interval| interval.to_std().ok())
                    .unwrap_or(Duration::ZERO)
            }
            WaitStrategy::Fibonacci { period, max } => {
                let factor = u32::try_from(fibonacci(n)).unwrap_or(u32::MAX);
                period.checked_mul(factor).unwrap_or(max).min(max)
            }
            WaitStrategy::Exponential { power, period, max } => {
                let seconds = period.as_secs_f64() * power.powi(i32::try_from(n).unwrap_or(i32::MAX));
                Duration::try_from_secs_f64(seconds.max(0.0))
                    .unwrap_or(max)
                    .min(max)
            }
        }
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut current, mut next) = (0u64, 1u64);
    for _ in 0..n {
        let sum = current.saturating_add(next);
        current = next;
        next = sum;
    }
    current
}

/// One repetition: the task, an optional wait before it and an optional
/// replacement configure block
#[derive(Clone)]
pub struct RepeatPayload {
    pub task: Task,
    pub delay: Option<Delay>,
    pub configure: Option<ConfigureBlock>,
}

impl RepeatPayload {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            delay: None,
            configure: None,
        }
    }

    pub fn with_delay(mut self, delay: impl Into<Delay>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    pub fn with_configure(mut self, block: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.configure = Some(Arc::new(block));
        self
    }

    pub fn set_delay(mut self, delay: Option<Delay>) -> Self {
        self.delay = delay;
        self
    }
}

impl std::fmt::Debug for RepeatPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatPayload")
            .field("task", &self.task)
            .field("delay", &self.delay)
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

/// Yields the payloads of a repeating task; `None` ends the repetition
pub trait PayloadSource: Send + 'static {
    fn next_payload(&mut self) -> Option<RepeatPayload>;
}

type TaskFactory = Box<dyn FnMut(usize) -> Option<Task> + Send>;

/// Payload source built from a task factory and a wait strategy
pub struct RepeatSchedule {
    factory: TaskFactory,
    wait: WaitStrategy,
    limit: Option<usize>,
    produced: usize,
}

impl RepeatSchedule {
    /// `factory` receives the zero-based attempt index
    pub fn new(factory: impl FnMut(usize) -> Option<Task> + Send + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            wait: WaitStrategy::Immediate,
            limit: None,
            produced: 0,
        }
    }

    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Total number of payloads, the first one included
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn produced(&self) -> usize {
        self.produced
    }
}

impl PayloadSource for RepeatSchedule {
    fn next_payload(&mut self) -> Option<RepeatPayload> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }
        let index = self.produced;
        let task = (self.factory)(index)?;
        self.produced += 1;

        let wait = self.wait.interval(u32::try_from(index).unwrap_or(u32::MAX));
        let payload = RepeatPayload::new(task);
        Some(if wait.is_zero() {
            payload
        } else {
            payload.with_delay(wait)
        })
    }
}

/// Decides whether a failed attempt is retried, and with which payload
pub type RetryHandler = dyn Fn(FailureInfo, RepeatPayload) -> Option<RepeatPayload> + Send + Sync;

/// What the retry handler learns about a failed attempt
#[derive(Clone, Debug)]
pub struct FailureInfo {
    pub task: Task,
    pub errors: Vec<TaskError>,
    /// Errors of every earlier failed attempt, oldest first
    pub historical_errors: Vec<TaskError>,
    /// Attempts made so far, the failed one included
    pub count: usize,
}

pub(crate) enum RepeatMode {
    Repeat,
    Retry(Arc<RetryHandler>),
}

struct Progress {
    source: Box<dyn PayloadSource>,
    current: Task,
    previous: Option<Task>,
    retried: Vec<Task>,
    failures: Vec<TaskError>,
    count: usize,
    configure: Option<ConfigureBlock>,
}

pub(crate) struct Repeater {
    mode: RepeatMode,
    progress: Mutex<Progress>,
}

impl Repeater {
    fn is_current(&self, task: &Task) -> bool {
        self.progress.locked().current == *task
    }

    /// Pull the next payload, make it current and add it to `group`
    fn add_next(&self, group: &TaskGroup, failure: Option<FailureInfo>) -> bool {
        if group.is_cancelled() {
            return false;
        }

        let Some(payload) = self.progress.locked().source.next_payload() else {
            return false;
        };
        let payload = match (&self.mode, failure) {
            (RepeatMode::Retry(handler), Some(info)) => match handler(info, payload) {
                Some(retried) => retried,
                None => return false,
            },
            _ => payload,
        };

        let configure = {
            let mut progress = self.progress.locked();
            if let Some(configure) = payload.configure.clone() {
                progress.configure = Some(configure);
            }
            progress.count += 1;
            let previous = std::mem::replace(&mut progress.current, payload.task.clone());
            progress.previous = Some(previous);
            progress.configure.clone()
        };
        if let Some(configure) = configure {
            configure(&payload.task);
        }

        debug!(
            "{} adding next task {}",
            group.name(),
            payload.task.name()
        );
        match payload.delay {
            Some(delay) => {
                let wait = Task::delay(delay);
                payload.task.add_dependency(&wait);
                group.add_children([wait, payload.task]);
            }
            None => {
                group.add_child(payload.task);
            }
        }
        true
    }
}

impl GroupHooks for Repeater {
    fn child_will_attempt_recovery(
        &self,
        group: &TaskGroup,
        child: &Task,
        errors: &[TaskError],
    ) -> bool {
        if !self.is_current(child) {
            return false;
        }
        match &self.mode {
            RepeatMode::Repeat => {
                self.add_next(group, None);
                false
            }
            RepeatMode::Retry(_) => {
                let info = {
                    let mut progress = self.progress.locked();
                    let historical_errors = progress.failures.clone();
                    progress.failures.extend(errors.iter().cloned());
                    FailureInfo {
                        task: child.clone(),
                        errors: errors.to_vec(),
                        historical_errors,
                        count: progress.count,
                    }
                };
                let retrying = self.add_next(group, Some(info));
                info!(
                    "{} {} recovery from {} errors in {}",
                    group.name(),
                    if retrying { "will attempt" } else { "will not attempt" },
                    errors.len(),
                    child.name()
                );
                if retrying {
                    self.progress.locked().retried.push(child.clone());
                }
                retrying
            }
        }
    }

    fn child_will_finish_without_errors(&self, group: &TaskGroup, child: &Task) {
        if !self.is_current(child) {
            return;
        }
        match &self.mode {
            RepeatMode::Repeat => {
                self.add_next(group, None);
            }
            RepeatMode::Retry(_) => {
                let retried = std::mem::take(&mut self.progress.locked().retried);
                for attempt in &retried {
                    group.child_did_recover(attempt);
                }
            }
        }
    }
}

/// A group adding the next payload whenever the current child will finish
#[derive(Clone)]
pub struct RepeatTask {
    group: TaskGroup,
    repeater: Arc<Repeater>,
}

impl Deref for RepeatTask {
    type Target = TaskGroup;

    fn deref(&self) -> &TaskGroup {
        &self.group
    }
}

impl RepeatTask {
    /// # Panics
    ///
    /// Panics when `source` yields no initial payload.
    pub fn new(name: impl Into<String>, source: impl PayloadSource) -> Self {
        Self::with_mode(name.into(), Box::new(source), RepeatMode::Repeat)
    }

    pub(crate) fn with_mode(name: String, mut source: Box<dyn PayloadSource>, mode: RepeatMode) -> Self {
        let Some(first) = source.next_payload() else {
            panic!("payload source of '{}' yielded no initial task", name);
        };
        if let Some(configure) = &first.configure {
            configure(&first.task);
        }

        let repeater = Arc::new(Repeater {
            mode,
            progress: Mutex::new(Progress {
                source,
                current: first.task.clone(),
                previous: None,
                retried: Vec::new(),
                failures: Vec::new(),
                count: 1,
                configure: first.configure,
            }),
        });
        let hooks: Arc<dyn GroupHooks> = repeater.clone();
        let group = TaskGroup::with_hooks(name, vec![first.task], hooks);
        RepeatTask { group, repeater }
    }

    pub fn group(&self) -> &TaskGroup {
        &self.group
    }

    pub fn into_task(self) -> Task {
        self.group.into_task()
    }

    pub fn current(&self) -> Task {
        self.repeater.progress.locked().current.clone()
    }

    pub fn previous(&self) -> Option<Task> {
        self.repeater.progress.locked().previous.clone()
    }

    /// Payloads added so far, the first one included
    pub fn count(&self) -> usize {
        self.repeater.progress.locked().count
    }

    /// Errors of every failed attempt so far, oldest first
    pub fn historical_errors(&self) -> Vec<TaskError> {
        self.repeater.progress.locked().failures.clone()
    }

    /// Run `block` after the current configure block on later payloads
    pub fn append_configure(&self, block: impl Fn(&Task) + Send + Sync + 'static) {
        let mut progress = self.repeater.progress.locked();
        let configure: ConfigureBlock = match progress.configure.take() {
            Some(existing) => Arc::new(move |task: &Task| {
                existing(task);
                block(task);
            }),
            None => Arc::new(block),
        };
        progress.configure = Some(configure);
    }

    pub fn replace_configure(&self, block: impl Fn(&Task) + Send + Sync + 'static) {
        self.repeater.progress.locked().configure = Some(Arc::new(block));
    }
}

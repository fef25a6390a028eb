use crate::condition::ConditionResult;
use crate::sync::MutexExt;
use std::sync::Mutex;
use tokio::sync::Notify;

/// How results of a condition collection combine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregationMode {
    /// First non-satisfied result decides
    And,
    /// First satisfied result decides
    Or,
}

/// Returned by `expect_result` once a verdict was reached
#[derive(Debug, Clone, PartialEq)]
pub struct AlreadyFinished(pub ConditionResult);

struct AggregatorState {
    outstanding: usize,
    sealed: bool,
    accumulated: ConditionResult,
    verdict: Option<ConditionResult>,
}

/// Funnels condition results into one verdict with AND/OR short-circuiting
pub struct ConditionResultAggregator {
    mode: AggregationMode,
    state: Mutex<AggregatorState>,
    notify: Notify,
}

impl ConditionResultAggregator {
    pub fn new(mode: AggregationMode) -> Self {
        let accumulated = match mode {
            AggregationMode::And => ConditionResult::Satisfied,
            AggregationMode::Or => ConditionResult::NotSatisfied,
        };
        Self {
            mode,
            state: Mutex::new(AggregatorState {
                outstanding: 0,
                sealed: false,
                accumulated,
                verdict: None,
            }),
            notify: Notify::new(),
        }
    }

    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    /// Register one more result to wait for
    pub fn expect_result(&self) -> Result<(), AlreadyFinished> {
        let mut state = self.state.locked();
        if let Some(verdict) = &state.verdict {
            return Err(AlreadyFinished(verdict.clone()));
        }
        state.outstanding += 1;
        Ok(())
    }

    /// # Panics
    ///
    /// Panics without a matching `expect_result`.
    pub fn fulfill(&self, result: ConditionResult) {
        {
            let mut state = self.state.locked();
            if state.outstanding == 0 {
                panic!("Mis-matched fulfill: no condition result was expected");
            }
            state.outstanding -= 1;
            if state.verdict.is_some() {
                return;
            }

            let decisive = match self.mode {
                AggregationMode::And => !result.is_satisfied(),
                AggregationMode::Or => result.is_satisfied(),
            };
            if decisive {
                state.verdict = Some(result);
            } else {
                let accumulated =
                    std::mem::replace(&mut state.accumulated, ConditionResult::NotSatisfied);
                state.accumulated = accumulated.fold(result);
                Self::settle(&mut state);
            }
        }
        self.notify.notify_waiters();
    }

    /// No more expectations will be registered
    pub fn seal(&self) {
        {
            let mut state = self.state.locked();
            state.sealed = true;
            Self::settle(&mut state);
        }
        self.notify.notify_waiters();
    }

    /// Force a verdict unless one exists
    pub fn cancel(&self, result: ConditionResult) {
        {
            let mut state = self.state.locked();
            if state.verdict.is_none() {
                state.verdict = Some(result);
            }
        }
        self.notify.notify_waiters();
    }

    pub fn verdict(&self) -> Option<ConditionResult> {
        self.state.locked().verdict.clone()
    }

    /// Wait for the verdict
    pub async fn finished(&self) -> ConditionResult {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(verdict) = self.verdict() {
                return verdict;
            }
            notified.await;
        }
    }

    fn settle(state: &mut AggregatorState) {
        if state.sealed && state.outstanding == 0 && state.verdict.is_none() {
            state.verdict = Some(state.accumulated.clone());
        }
    }
}

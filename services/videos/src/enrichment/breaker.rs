//! Circuit breaker guarding owner enrichment.
//!
//! Closed: calls run and their outcomes are recorded in a rolling window.
//! Once the failure percentage in the window exceeds the threshold (and the
//! window holds at least `volume_threshold` calls) the breaker opens and
//! rejects calls without running them. After `reset_timeout` it is half-open
//! and admits exactly one trial call: success closes it, failure (or the
//! trial being dropped) opens it again for a fresh `reset_timeout`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Budget for a single call; exceeding it counts as a failure
    pub timeout: Duration,
    /// Failure percentage above which the breaker opens
    pub error_threshold_percentage: u8,
    /// Span of the outcome window
    pub rolling_window: Duration,
    /// Calls the window must hold before the breaker may open
    pub volume_threshold: u32,
    /// Time spent open before a trial call is admitted
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            error_threshold_percentage: 50,
            rolling_window: Duration::from_secs(10),
            volume_threshold: 0,
            reset_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without running
    Open,
    /// One trial call decides whether to close again
    HalfOpen,
}

#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("Circuit breaker is open")]
    Open,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

struct State {
    phase: Phase,
    /// (completed at, succeeded) for calls finished while closed
    outcomes: VecDeque<(Instant, bool)>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                phase: Phase::Closed,
                outcomes: VecDeque::new(),
            }),
        }
    }

    /// Current state. An open breaker whose cooldown has elapsed reports
    /// `HalfOpen` even before the trial call arrives.
    pub fn state(&self) -> CircuitState {
        match self.state.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { until } if Instant::now() < until => CircuitState::Open,
            Phase::Open { .. } | Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Run `call` through the breaker.
    ///
    /// `call` is only invoked when the breaker admits it. The produced future
    /// is dropped once the timeout elapses; side effects it already started
    /// are not undone.
    pub async fn call<F, Fut, T, E>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.admit() else {
            metrics::counter!("videos.breaker.rejected").increment(1);
            return Err(BreakerError::Open);
        };

        match tokio::time::timeout(self.config.timeout, call()).await {
            Ok(Ok(value)) => {
                permit.settle(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.settle(false);
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                permit.settle(false);
                metrics::counter!("videos.breaker.timeouts").increment(1);
                Err(BreakerError::Timeout(self.config.timeout))
            }
        }
    }

    fn admit(&self) -> Option<Permit<'_>> {
        let mut state = self.state.lock();

        if let Phase::Open { until } = state.phase {
            if Instant::now() >= until {
                info!("Circuit breaker half-open, admitting trial call");
                state.phase = Phase::HalfOpen {
                    trial_in_flight: false,
                };
            }
        }

        let trial = match &mut state.phase {
            Phase::Closed => false,
            Phase::Open { .. } => return None,
            Phase::HalfOpen { trial_in_flight } if *trial_in_flight => return None,
            Phase::HalfOpen { trial_in_flight } => {
                *trial_in_flight = true;
                true
            }
        };

        Some(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record(&self, trial: bool, success: bool) {
        let mut state = self.state.lock();
        let now = Instant::now();

        if trial {
            if success {
                info!("Circuit breaker closed after successful trial");
                state.phase = Phase::Closed;
                state.outcomes.clear();
            } else {
                self.trip(&mut state, now);
            }
            return;
        }

        // Calls admitted while closed may finish after the breaker opened.
        if !matches!(state.phase, Phase::Closed) {
            return;
        }

        state.outcomes.push_back((now, success));
        if let Some(horizon) = now.checked_sub(self.config.rolling_window) {
            while matches!(state.outcomes.front(), Some((at, _)) if *at < horizon) {
                state.outcomes.pop_front();
            }
        }

        if success {
            return;
        }

        let total = state.outcomes.len();
        let failures = state.outcomes.iter().filter(|(_, ok)| !ok).count();
        let threshold = usize::from(self.config.error_threshold_percentage);

        if total >= self.config.volume_threshold as usize && failures * 100 > threshold * total {
            self.trip(&mut state, now);
        }
    }

    fn trip(&self, state: &mut State, now: Instant) {
        warn!(
            reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
            "Circuit breaker opened"
        );
        metrics::counter!("videos.breaker.opened").increment(1);
        state.phase = Phase::Open {
            until: now + self.config.reset_timeout,
        };
        state.outcomes.clear();
    }
}

/// Admission for one call; reports its outcome exactly once
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.trial, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // An abandoned trial must not leave the breaker half-open forever.
        if !self.settled && self.trial {
            self.breaker.record(true, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_pending;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    async fn fail(breaker: &CircuitBreaker) {
        let result = breaker.call(|| async { Err::<(), _>(Boom) }).await;
        assert!(matches!(result, Err(BreakerError::Inner(Boom))));
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<Boom>> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_failure_and_stops_calling() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Boom>(()) }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await;

        // 1 of 3 failed
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_outcomes_leave_the_window() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            volume_threshold: 2,
            ..Default::default()
        });
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        tokio::time::advance(Duration::from_secs(11)).await;
        succeed(&breaker).await.unwrap();
        fail(&breaker).await;

        // The first failure aged out: 1 of 2 failed, not above 50%.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let mut trial = tokio_test::task::spawn(
            breaker.call(|| std::future::pending::<Result<(), Boom>>()),
        );
        assert_pending!(trial.poll());

        let concurrent = succeed(&breaker).await;
        assert!(matches!(concurrent, Err(BreakerError::Open)));

        // Abandoning the trial reopens the breaker.
        drop(trial);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_trial_closes() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        succeed(&breaker).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_cooldown() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());

        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Boom>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout(d)) if d == Duration::from_secs(3)));
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}

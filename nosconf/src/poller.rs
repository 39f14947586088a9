//! Bounded polling for asynchronous device workflows.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{Error, Result};

/// Classification of one observed status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Not terminal yet; carries the observed status.
    Continue(String),
    /// Terminal success; carries the observed status.
    Success(String),
    /// Terminal failure; carries the device-reported reason.
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Timeout,
}

/// Bookkeeping of one wait.
#[derive(Debug, Clone, Default)]
pub struct PollState {
    pub elapsed: Duration,
    pub attempts: u32,
    pub last_status: Option<String>,
    pub terminal: bool,
    pub outcome: Option<Outcome>,
}

impl PollState {
    pub fn timed_out(&self) -> bool {
        self.outcome == Some(Outcome::Timeout)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Some(Outcome::Success)
    }

    fn finish(&mut self, outcome: Outcome) {
        self.terminal = true;
        self.outcome = Some(outcome);
    }
}

/// Polls a status source at a fixed interval until it settles or the budget
/// runs out.
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
    initial_delay: Duration,
    max_attempts: Option<u32>,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            initial_delay: Duration::ZERO,
            max_attempts: None,
        }
    }

    /// Grace period before the first read. Counts against the timeout.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Stop after this many reads even if time is left.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Run `check` until it reports success or failure, or the budget is spent.
    ///
    /// Success and timeout are returned as a [`PollState`]; what a timeout
    /// means is up to the caller. A failure becomes a device error carrying the
    /// reported reason. No read is issued once the budget is spent.
    pub async fn await_terminal<F, Fut>(&self, mut check: F) -> Result<PollState>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Tick>>,
    {
        let start = Instant::now();
        let mut state = PollState::default();

        if !self.initial_delay.is_zero() {
            debug!(delay = ?self.initial_delay, "Waiting before first poll");
            sleep(self.initial_delay).await;
        }

        loop {
            state.attempts += 1;
            let tick = check().await?;
            state.elapsed = start.elapsed();
            debug!(attempt = state.attempts, elapsed = ?state.elapsed, tick = ?tick, "Poll tick");

            match tick {
                Tick::Success(status) => {
                    state.last_status = Some(status);
                    state.finish(Outcome::Success);
                    return Ok(state);
                }
                Tick::Failure(reason) => {
                    return Err(Error::device(reason));
                }
                Tick::Continue(status) => {
                    state.last_status = Some(status);
                }
            }

            let attempts_spent = self.max_attempts.is_some_and(|max| state.attempts >= max);
            if attempts_spent || state.elapsed + self.interval > self.timeout {
                state.finish(Outcome::Timeout);
                return Ok(state);
            }

            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn script(ticks: Vec<Tick>) -> Mutex<VecDeque<Tick>> {
        Mutex::new(ticks.into_iter().collect())
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_continues() {
        let ticks = script(vec![
            Tick::Continue("uploading".into()),
            Tick::Continue("importing".into()),
            Tick::Success("replicated".into()),
        ]);
        let ticks = &ticks;
        let poller = Poller::new(Duration::from_secs(1), Duration::from_secs(10));
        let state = poller
            .await_terminal(move || async move { Ok(ticks.lock().unwrap().pop_front().unwrap()) })
            .await
            .unwrap();

        assert!(state.succeeded());
        assert!(state.terminal);
        assert_eq!(state.attempts, 3);
        assert_eq!(state.last_status.as_deref(), Some("replicated"));
        assert_eq!(state.elapsed, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_device_error() {
        let poller = Poller::new(Duration::from_secs(1), Duration::from_secs(10));
        let err = poller
            .await_terminal(|| async { Ok(Tick::Failure("verification-failed".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Device { .. }));
        assert_eq!(err.to_string(), "verification-failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_reading() {
        let reads = Mutex::new(0u32);
        let counter = &reads;
        let poller = Poller::new(Duration::from_secs(1), Duration::from_secs(2));
        let state = poller
            .await_terminal(move || async move {
                *counter.lock().unwrap() += 1;
                Ok(Tick::Continue("absent".into()))
            })
            .await
            .unwrap();

        assert!(state.timed_out());
        // Reads at 0s, 1s and 2s; a fourth would start past the budget.
        assert_eq!(*reads.lock().unwrap(), 3);
        assert!(state.elapsed <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_counts_against_timeout() {
        let poller = Poller::new(Duration::from_secs(1), Duration::from_secs(3))
            .with_initial_delay(Duration::from_secs(2));
        let state = poller
            .await_terminal(|| async { Ok(Tick::Continue("booting".into())) })
            .await
            .unwrap();
        assert!(state.timed_out());
        assert_eq!(state.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget() {
        let poller = Poller::new(Duration::ZERO, Duration::from_secs(3600)).with_max_attempts(4);
        let state = poller
            .await_terminal(|| async { Ok(Tick::Continue("importing".into())) })
            .await
            .unwrap();
        assert!(state.timed_out());
        assert_eq!(state.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_propagates() {
        let poller = Poller::new(Duration::from_secs(1), Duration::from_secs(5));
        let err = poller
            .await_terminal(|| async { Err(Error::device_status(500, "boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Device { code: Some(500), .. }));
    }
}

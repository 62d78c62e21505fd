//! Poll-until-predicate primitive.
//!
//! Every wait on a backend-driven transition (pause, resume, context sync,
//! deletion) goes through [`StatusPoller`], so timeout and interval
//! semantics are defined once.

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::result::{OperationError, OperationResult};

/// Verdict of a single poll attempt.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// Terminal success.
    Done(T),
    /// Not there yet; sleep and ask again.
    Continue,
    /// Terminal failure; stop polling.
    Failed(OperationError),
}

/// Fixed-interval poller bounded by a deadline.
///
/// Each attempt is also bounded: by the time left before the deadline and,
/// when set, by a per-attempt limit. An attempt that runs over is a
/// [`OperationError::TimedOut`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPoller {
    timeout: Duration,
    interval: Duration,
    attempt_timeout: Option<Duration>,
}

impl StatusPoller {
    /// Create a poller. A zero interval is treated as one millisecond.
    #[must_use]
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(Duration::from_millis(1)),
            attempt_timeout: None,
        }
    }

    /// Bound every single attempt by `limit` as well as by the deadline.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub const fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    fn timed_out<T>(
        request_id: String,
        waiting_for: &str,
        elapsed: Duration,
        attempt: u32,
    ) -> OperationResult<T> {
        tracing::warn!(%request_id, attempt, ?elapsed, "Timed out waiting for {waiting_for}");
        OperationResult::fail(
            request_id,
            OperationError::TimedOut {
                waiting_for: waiting_for.to_string(),
                waited_ms: elapsed.as_millis(),
            },
        )
    }

    /// Run `check` until it yields [`PollOutcome::Done`] or
    /// [`PollOutcome::Failed`], or until the deadline passes.
    ///
    /// The first attempt happens immediately. The returned result always
    /// carries `request_id`, the id of the call that started the wait.
    pub async fn poll_until<T, F, Fut>(
        &self,
        request_id: impl Into<String>,
        waiting_for: &str,
        mut check: F,
    ) -> OperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome<T>>,
    {
        let request_id = request_id.into();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let remaining = self.timeout.saturating_sub(started.elapsed());
            let bound = self.attempt_timeout.map_or(remaining, |limit| limit.min(remaining));
            let Ok(outcome) = tokio::time::timeout(bound, check()).await else {
                return Self::timed_out(request_id, waiting_for, started.elapsed(), attempt);
            };
            match outcome {
                PollOutcome::Done(value) => {
                    tracing::debug!(%request_id, attempt, "Poll reached terminal state");
                    return OperationResult::ok(request_id, value);
                }
                PollOutcome::Failed(err) => {
                    tracing::debug!(%request_id, attempt, error = %err, "Poll failed");
                    return OperationResult::fail(request_id, err);
                }
                PollOutcome::Continue => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Self::timed_out(request_id, waiting_for, elapsed, attempt);
            }

            tracing::debug!(%request_id, attempt, "Waiting for {waiting_for}");
            tokio::time::sleep(self.interval.min(self.timeout - elapsed)).await;
        }
    }
}

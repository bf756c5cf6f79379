//! Fixed-interval polling with optional bounds, plus the cancellation token
//! threaded through every wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep};

/// How often to poll and when to give up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Sleep between consecutive attempts.
    pub interval: Duration,
    /// Stop once this much time has elapsed since the first attempt.
    pub max_wait: Option<Duration>,
    /// Stop after this many attempts.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    /// Polls forever at `interval`.
    #[must_use]
    pub const fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
            max_attempts: None,
        }
    }

    /// Polls at `interval` until `max_wait` has elapsed.
    #[must_use]
    pub const fn bounded(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval,
            max_wait: Some(max_wait),
            max_attempts: None,
        }
    }

    /// Adds an attempt cap to the policy.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Starts a fresh poll; the clock begins now.
    #[must_use]
    pub fn start(&self) -> Poller {
        Poller {
            policy: *self,
            started: Instant::now(),
            attempts: 0,
        }
    }
}

/// Why a poll stopped before the awaited condition held.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollStop {
    /// The attempt or time bound was reached.
    Exhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Time since the poll started.
        elapsed: Duration,
    },
    /// The cancellation token fired.
    Cancelled,
}

/// Running state of one poll.
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    started: Instant,
    attempts: u32,
}

impl Poller {
    /// Records a failed attempt and sleeps one interval before the next.
    ///
    /// Callers make their first attempt before calling this, so N failures
    /// followed by a success cost N sleeps.
    ///
    /// # Errors
    ///
    /// Returns [`PollStop::Exhausted`] when the failed attempt hit a bound,
    /// or [`PollStop::Cancelled`] when `cancel` fires before or during the
    /// sleep.
    pub async fn next_attempt(&mut self, cancel: &CancelToken) -> Result<(), PollStop> {
        if cancel.is_cancelled() {
            return Err(PollStop::Cancelled);
        }
        self.attempts = self.attempts.saturating_add(1);
        let elapsed = self.started.elapsed();
        let attempts_spent = self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max);
        let time_spent = self
            .policy
            .max_wait
            .is_some_and(|max| elapsed.saturating_add(self.policy.interval) > max);
        if attempts_spent || time_spent {
            return Err(PollStop::Exhausted {
                attempts: self.attempts,
                elapsed,
            });
        }

        tokio::select! {
            () = sleep(self.policy.interval) => Ok(()),
            () = cancel.cancelled() => Err(PollStop::Cancelled),
        }
    }

    /// Attempts recorded so far, counting the one in progress.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts.saturating_add(1)
    }

    /// Time since the poll started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Cloneable flag that aborts in-flight polls.
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Fires the token. Every clone observes the cancellation.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when the token fires.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

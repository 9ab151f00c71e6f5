//! Debounce timer for reconciles triggered by typing.
//!
//! Every keystroke pushes the deadline back, so a burst of edits produces a
//! single reconcile once the editor has been quiet for `delay`.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Default quiet period before an automatic reconcile.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel any pending deadline and schedule a new one `delay` from now.
    pub fn touch(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when the pending deadline passes, clearing it.
    ///
    /// Pends forever while nothing is scheduled. Cancel-safe: dropping the
    /// future keeps the deadline, so it can sit in a `select!` loop.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

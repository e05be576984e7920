//! State-change waiter
//!
//! Provisioning calls return immediately with a provisional id while the
//! backend converges over minutes. The waiter polls the resource until its
//! status lands in a target set, leaves the pending set, or the deadline
//! passes.
//!
//! ```text
//!            ┌──────────── pending ────────────┐
//!            ▼                                 │
//!   delay ─► Waiting ──poll──► status ─────────┘
//!                               │  target   ─► Succeeded
//!                               │  other    ─► Failed(unexpected status)
//!            elapsed ≥ timeout  └─ error    ─► (retry; Failed(last error) at deadline)
//!                    ─► TimedOut
//! ```

use crate::error::{CloudError, Result};
use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// A family-scoped lifecycle status usable in a [`WaitSpec`].
pub trait LifecycleStatus: Clone + Eq + Hash + Display + Debug + Send + Sync {}

impl<T> LifecycleStatus for T where T: Clone + Eq + Hash + Display + Debug + Send + Sync {}

/// Polling configuration for one resource family.
#[derive(Debug, Clone)]
pub struct WaitSpec<S> {
    /// Statuses that mean "still converging"
    pub pending: HashSet<S>,

    /// Statuses that mean "ready"
    pub target: HashSet<S>,

    /// Wall-clock limit for the whole wait
    pub timeout: Duration,

    /// Slept once before the first poll
    pub delay: Duration,

    /// Ceiling of the delay between polls
    pub poll_interval: Duration,

    /// Floor of the delay between polls
    pub min_poll_interval: Duration,
}

impl<S: LifecycleStatus> WaitSpec<S> {
    pub fn new(pending: impl IntoIterator<Item = S>, target: impl IntoIterator<Item = S>) -> Self {
        Self {
            pending: pending.into_iter().collect(),
            target: target.into_iter().collect(),
            timeout: Duration::from_secs(600),
            delay: Duration::ZERO,
            poll_interval: Duration::from_secs(10),
            min_poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_min_poll_interval(mut self, min_poll_interval: Duration) -> Self {
        self.min_poll_interval = min_poll_interval;
        self
    }

    /// Check the invariants the waiter relies on.
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(CloudError::InvalidConfig(
                "wait spec needs at least one target status".to_string(),
            ));
        }
        if let Some(status) = self.pending.intersection(&self.target).next() {
            return Err(CloudError::InvalidConfig(format!(
                "status {status} is both pending and target"
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(CloudError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.min_poll_interval.is_zero() {
            return Err(CloudError::InvalidConfig(
                "minimum poll interval must be greater than zero".to_string(),
            ));
        }
        if self.min_poll_interval > self.poll_interval {
            return Err(CloudError::InvalidConfig(format!(
                "minimum poll interval {:?} exceeds poll interval {:?}",
                self.min_poll_interval, self.poll_interval
            )));
        }
        Ok(())
    }

    /// Transition taken after observing `status`.
    pub fn classify(&self, status: &S) -> WaitState {
        if self.target.contains(status) {
            WaitState::Succeeded
        } else if self.pending.contains(status) {
            WaitState::Waiting
        } else {
            WaitState::Failed(format!("unexpected status {status}"))
        }
    }

    /// Delay before the next poll: a tenth of the elapsed time, clamped
    /// between the floor and the ceiling.
    pub fn next_interval(&self, elapsed: Duration) -> Duration {
        (elapsed / 10)
            .max(self.min_poll_interval)
            .min(self.poll_interval)
    }
}

/// States of the polling state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    Waiting,
    Succeeded,
    Failed(String),
    TimedOut,
}

/// Polls a resource until it reaches a terminal [`WaitState`].
pub struct StateChangeWaiter<S> {
    spec: WaitSpec<S>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<S: LifecycleStatus> StateChangeWaiter<S> {
    pub fn new(spec: WaitSpec<S>) -> Self {
        Self { spec, cancel: None }
    }

    /// Abort the wait once `cancel` flips to `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Poll until the resource is ready and return the last snapshot.
    ///
    /// `poll` returns the current snapshot together with its status. Poll
    /// errors are treated as transient until the deadline passes.
    pub async fn wait<T, F, Fut>(mut self, resource: &str, mut poll: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, S)>>,
    {
        self.spec.validate()?;

        let started = Instant::now();
        let mut last_status: Option<S> = None;
        let mut polls: u32 = 0;

        let delay = self.spec.delay;
        if !delay.is_zero() {
            self.pause(resource, started, delay).await?;
        }

        loop {
            if self.is_cancelled() {
                return Err(cancelled(resource, started));
            }

            polls += 1;
            let last_error = match poll().await {
                Ok((snapshot, status)) => {
                    match self.spec.classify(&status) {
                        WaitState::Succeeded => {
                            tracing::info!(
                                resource,
                                status = %status,
                                polls,
                                elapsed = ?started.elapsed(),
                                "Resource reached target status"
                            );
                            return Ok(snapshot);
                        }
                        WaitState::Failed(reason) => {
                            tracing::warn!(resource, status = %status, "Resource entered unexpected status");
                            return Err(CloudError::WaitFailed {
                                resource: resource.to_string(),
                                reason,
                                last_status: Some(status.to_string()),
                                elapsed: started.elapsed(),
                            });
                        }
                        WaitState::Waiting | WaitState::TimedOut => {
                            tracing::debug!(resource, status = %status, polls, "Still waiting");
                            last_status = Some(status);
                        }
                    }
                    None
                }
                Err(err) => {
                    tracing::warn!(resource, polls, error = %err, "Poll failed, will retry");
                    Some(err.to_string())
                }
            };

            let elapsed = started.elapsed();
            if elapsed >= self.spec.timeout {
                let last_status = last_status.map(|s| s.to_string());
                return Err(match last_error {
                    Some(reason) => CloudError::WaitFailed {
                        resource: resource.to_string(),
                        reason,
                        last_status,
                        elapsed,
                    },
                    None => CloudError::WaitTimedOut {
                        resource: resource.to_string(),
                        last_status,
                        elapsed,
                    },
                });
            }

            let next = self
                .spec
                .next_interval(elapsed)
                .min(self.spec.timeout - elapsed);
            self.pause(resource, started, next).await?;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }

    /// Sleep for `duration` unless cancelled first.
    async fn pause(&mut self, resource: &str, started: Instant, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            let Some(cancel) = self.cancel.as_mut() else {
                sleep_until(deadline).await;
                return Ok(());
            };
            if *cancel.borrow() {
                return Err(cancelled(resource, started));
            }
            let sender_gone = tokio::select! {
                _ = sleep_until(deadline) => return Ok(()),
                changed = cancel.changed() => changed.is_err(),
            };
            if sender_gone {
                if self.is_cancelled() {
                    return Err(cancelled(resource, started));
                }
                self.cancel = None;
            }
        }
    }
}

fn cancelled(resource: &str, started: Instant) -> CloudError {
    tracing::info!(resource, "Wait cancelled");
    CloudError::WaitCancelled {
        resource: resource.to_string(),
        elapsed: started.elapsed(),
    }
}

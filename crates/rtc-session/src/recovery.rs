//! Recovery Supervisor.
//!
//! Pure reconnection policy for one connection. The connection actor feeds
//! it transport signals and carries out the returned [`RecoveryAction`];
//! timers and renegotiation live in the actor.
//!
//! With the defaults (3 attempts, 2s unit) a connection that keeps failing
//! retries after 2s, 4s and 6s, and is declared exhausted on the 4th
//! failure.

use crate::types::TransportState;

use std::time::Duration;
use tracing::{debug, info, warn};

/// What the connection should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Schedule ICE-restart attempt `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// A retry is already pending; the signal is absorbed.
    AlreadyScheduled,
    /// Attempts are used up; the connection fails terminally.
    Exhausted { attempts: u32 },
    /// The transport came back after `previous_attempts` attempts.
    Recovered { previous_attempts: u32 },
    /// Nothing to do.
    None,
}

/// Bounded-retry reconnection policy with linear backoff.
#[derive(Debug, Clone)]
pub struct RecoverySupervisor {
    max_attempts: u32,
    backoff_base: Duration,
    attempts: u32,
    retry_pending: bool,
    exhausted: bool,
}

impl RecoverySupervisor {
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
            attempts: 0,
            retry_pending: false,
            exhausted: false,
        }
    }

    /// Attempts made since the last successful connection.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Delay before attempt `attempts + 1`: `base * (attempts + 1)`.
    #[must_use]
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        self.backoff_base.saturating_mul(attempts.saturating_add(1))
    }

    /// React to a transport connectivity signal.
    pub fn on_transport_state(&mut self, state: TransportState) -> RecoveryAction {
        match state {
            TransportState::Connected => {
                let previous_attempts = self.attempts;
                self.attempts = 0;
                self.retry_pending = false;
                self.exhausted = false;
                if previous_attempts > 0 {
                    info!(
                        target: "rtc.recovery",
                        previous_attempts = previous_attempts,
                        "Connection recovered"
                    );
                    RecoveryAction::Recovered { previous_attempts }
                } else {
                    RecoveryAction::None
                }
            }
            TransportState::Disconnected | TransportState::Failed => self.on_failure(),
            TransportState::New | TransportState::Connecting | TransportState::Closed => {
                RecoveryAction::None
            }
        }
    }

    /// Record a connectivity failure.
    pub fn on_failure(&mut self) -> RecoveryAction {
        if self.exhausted {
            return RecoveryAction::None;
        }
        if self.retry_pending {
            debug!(target: "rtc.recovery", attempts = self.attempts, "Retry already scheduled");
            return RecoveryAction::AlreadyScheduled;
        }
        if self.attempts >= self.max_attempts {
            self.exhausted = true;
            warn!(
                target: "rtc.recovery",
                attempts = self.attempts,
                max_attempts = self.max_attempts,
                "Reconnection attempts exhausted"
            );
            return RecoveryAction::Exhausted {
                attempts: self.attempts,
            };
        }

        let delay = self.backoff_for(self.attempts);
        self.attempts += 1;
        self.retry_pending = true;
        debug!(
            target: "rtc.recovery",
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnection scheduled"
        );
        RecoveryAction::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// The scheduled retry is firing now.
    pub fn on_attempt_started(&mut self) {
        self.retry_pending = false;
    }

    /// The renegotiation itself failed (e.g. offer creation); counts as a failure.
    pub fn on_attempt_failed(&mut self) -> RecoveryAction {
        self.retry_pending = false;
        self.on_failure()
    }

    /// Drop any pending retry (connection closing).
    pub fn cancel_pending(&mut self) {
        self.retry_pending = false;
    }

    /// Manual retry from the terminal Failed state.
    pub fn manual_restart(&mut self) -> RecoveryAction {
        self.attempts = 0;
        self.retry_pending = false;
        self.exhausted = false;
        self.on_failure()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn supervisor() -> RecoverySupervisor {
        RecoverySupervisor::new(3, Duration::from_secs(2))
    }

    #[test]
    fn test_backoff_is_linear() {
        let s = supervisor();
        assert_eq!(s.backoff_for(0), Duration::from_secs(2));
        assert_eq!(s.backoff_for(1), Duration::from_secs(4));
        assert_eq!(s.backoff_for(2), Duration::from_secs(6));
    }

    #[test]
    fn test_four_failures_three_attempts_then_exhausted() {
        let mut s = supervisor();
        let mut delays = Vec::new();

        for _ in 0..3 {
            match s.on_transport_state(TransportState::Failed) {
                RecoveryAction::Retry { delay, .. } => delays.push(delay),
                other => panic!("expected retry, got {other:?}"),
            }
            s.on_attempt_started();
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6)
            ]
        );
        assert_eq!(
            s.on_transport_state(TransportState::Failed),
            RecoveryAction::Exhausted { attempts: 3 }
        );
        assert!(s.is_exhausted());
        assert_eq!(s.on_transport_state(TransportState::Failed), RecoveryAction::None);
    }

    #[test]
    fn test_signals_while_pending_are_absorbed() {
        let mut s = supervisor();
        assert!(matches!(
            s.on_transport_state(TransportState::Disconnected),
            RecoveryAction::Retry { attempt: 1, .. }
        ));
        assert_eq!(
            s.on_transport_state(TransportState::Failed),
            RecoveryAction::AlreadyScheduled
        );
        assert_eq!(s.attempts(), 1);
    }

    #[test]
    fn test_connected_resets_attempts() {
        let mut s = supervisor();
        s.on_transport_state(TransportState::Failed);
        s.on_attempt_started();
        s.on_transport_state(TransportState::Failed);
        s.on_attempt_started();

        assert_eq!(
            s.on_transport_state(TransportState::Connected),
            RecoveryAction::Recovered {
                previous_attempts: 2
            }
        );
        assert_eq!(s.attempts(), 0);
        assert!(matches!(
            s.on_transport_state(TransportState::Failed),
            RecoveryAction::Retry {
                attempt: 1,
                delay
            } if delay == Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_connected_without_attempts_is_noop() {
        let mut s = supervisor();
        assert_eq!(
            s.on_transport_state(TransportState::Connected),
            RecoveryAction::None
        );
        assert_eq!(
            s.on_transport_state(TransportState::Connecting),
            RecoveryAction::None
        );
    }

    #[test]
    fn test_failed_attempt_reenters_policy() {
        let mut s = supervisor();
        s.on_transport_state(TransportState::Failed);
        s.on_attempt_started();

        assert!(matches!(
            s.on_attempt_failed(),
            RecoveryAction::Retry { attempt: 2, delay } if delay == Duration::from_secs(4)
        ));
    }

    #[test]
    fn test_manual_restart_after_exhaustion() {
        let mut s = RecoverySupervisor::new(1, Duration::from_secs(2));
        s.on_transport_state(TransportState::Failed);
        s.on_attempt_started();
        assert!(matches!(
            s.on_transport_state(TransportState::Failed),
            RecoveryAction::Exhausted { attempts: 1 }
        ));

        assert!(matches!(
            s.manual_restart(),
            RecoveryAction::Retry { attempt: 1, .. }
        ));
        assert!(!s.is_exhausted());
    }

    #[test]
    fn test_cancel_pending() {
        let mut s = supervisor();
        s.on_transport_state(TransportState::Failed);
        assert!(s.retry_pending());
        s.cancel_pending();
        assert!(!s.retry_pending());
    }

    #[test]
    fn test_zero_attempts_exhausts_immediately() {
        let mut s = RecoverySupervisor::new(0, Duration::from_secs(2));
        assert_eq!(
            s.on_transport_state(TransportState::Failed),
            RecoveryAction::Exhausted { attempts: 0 }
        );
    }
}

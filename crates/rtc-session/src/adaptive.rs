//! Adaptive Controller.
//!
//! Maps each quality level to a target outgoing video bitrate:
//!
//! | Level            | Multiplier |
//! |------------------|------------|
//! | Excellent        | 1.0        |
//! | Good             | 0.8        |
//! | Fair             | 0.6        |
//! | Poor, Unknown    | 0.3        |
//!
//! `target = max_bandwidth * multiplier(level)`.

use crate::observability::metrics;
use crate::quality::QualityLevel;
use crate::transport::PeerTransport;

use tracing::{debug, warn};

/// Bitrate multiplier for a level. Unknown is treated as Poor.
#[must_use]
pub const fn multiplier(level: QualityLevel) -> f64 {
    match level {
        QualityLevel::Excellent => 1.0,
        QualityLevel::Good => 0.8,
        QualityLevel::Fair => 0.6,
        QualityLevel::Poor | QualityLevel::Unknown => 0.3,
    }
}

/// Target bitrate in bits per second.
#[must_use]
pub fn target_bitrate(max_bandwidth_bps: u64, level: QualityLevel) -> u64 {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let target = (max_bandwidth_bps as f64 * multiplier(level)).round() as u64;
    target
}

/// Result of one adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// The encoder accepted a new target.
    Applied(u64),
    /// The target equals the last applied one; encoder untouched.
    Unchanged(u64),
    /// The encoder rejected the target; retried on the next sample.
    Deferred(u64),
}

impl AdjustOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AdjustOutcome::Applied(_) => "applied",
            AdjustOutcome::Unchanged(_) => "unchanged",
            AdjustOutcome::Deferred(_) => "deferred",
        }
    }
}

/// Per-connection bitrate policy.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    max_bandwidth_bps: u64,
    applied_bps: Option<u64>,
}

impl AdaptiveController {
    #[must_use]
    pub fn new(max_bandwidth_bps: u64) -> Self {
        Self {
            max_bandwidth_bps,
            applied_bps: None,
        }
    }

    /// Last target the encoder accepted.
    #[must_use]
    pub fn applied_bps(&self) -> Option<u64> {
        self.applied_bps
    }

    /// Apply the target for `level` to the transport's video encoder.
    pub async fn apply(&mut self, level: QualityLevel, transport: &dyn PeerTransport) -> AdjustOutcome {
        let target = target_bitrate(self.max_bandwidth_bps, level);

        let outcome = if self.applied_bps == Some(target) {
            AdjustOutcome::Unchanged(target)
        } else {
            match transport.set_video_bitrate(target).await {
                Ok(()) => {
                    debug!(
                        target: "rtc.adaptive",
                        level = level.as_str(),
                        previous_bps = ?self.applied_bps,
                        target_bps = target,
                        "Outgoing bitrate adjusted"
                    );
                    self.applied_bps = Some(target);
                    AdjustOutcome::Applied(target)
                }
                Err(e) => {
                    warn!(
                        target: "rtc.adaptive",
                        level = level.as_str(),
                        target_bps = target,
                        error = %e,
                        "Bitrate adjustment failed, will retry next sample"
                    );
                    AdjustOutcome::Deferred(target)
                }
            }
        };

        metrics::record_bitrate_adjustment(outcome.as_str());
        outcome
    }

    /// Forget the applied target so the next sample re-primes the encoder.
    pub fn reset(&mut self) {
        self.applied_bps = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;

    const MAX: u64 = 2_500_000;

    #[test]
    fn test_multiplier_mapping() {
        assert_eq!(multiplier(QualityLevel::Poor), 0.3);
        assert_eq!(multiplier(QualityLevel::Fair), 0.6);
        assert_eq!(multiplier(QualityLevel::Good), 0.8);
        assert_eq!(multiplier(QualityLevel::Excellent), 1.0);
        assert_eq!(multiplier(QualityLevel::Unknown), 0.3);
    }

    #[test]
    fn test_target_bitrate() {
        assert_eq!(target_bitrate(MAX, QualityLevel::Excellent), 2_500_000);
        assert_eq!(target_bitrate(MAX, QualityLevel::Good), 2_000_000);
        assert_eq!(target_bitrate(MAX, QualityLevel::Fair), 1_500_000);
        assert_eq!(target_bitrate(MAX, QualityLevel::Poor), 750_000);
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let transport = StubTransport::steady(0, 0);
        let mut controller = AdaptiveController::new(MAX);

        let first = controller.apply(QualityLevel::Good, &transport).await;
        let second = controller.apply(QualityLevel::Good, &transport).await;

        assert_eq!(first, AdjustOutcome::Applied(2_000_000));
        assert_eq!(second, AdjustOutcome::Unchanged(2_000_000));
        assert_eq!(transport.bitrates(), vec![2_000_000]);
    }

    #[tokio::test]
    async fn test_failed_apply_retries_next_tick() {
        let transport = StubTransport::steady(0, 0);
        transport.set_encoder_ready(false);
        let mut controller = AdaptiveController::new(MAX);

        let outcome = controller.apply(QualityLevel::Poor, &transport).await;
        assert_eq!(outcome, AdjustOutcome::Deferred(750_000));
        assert_eq!(controller.applied_bps(), None);

        transport.set_encoder_ready(true);
        let outcome = controller.apply(QualityLevel::Poor, &transport).await;
        assert_eq!(outcome, AdjustOutcome::Applied(750_000));
        assert_eq!(transport.bitrates(), vec![750_000]);
    }

    #[tokio::test]
    async fn test_unknown_treated_as_poor() {
        let transport = StubTransport::steady(0, 0);
        let mut controller = AdaptiveController::new(MAX);

        controller.apply(QualityLevel::Poor, &transport).await;
        let outcome = controller.apply(QualityLevel::Unknown, &transport).await;
        assert_eq!(outcome, AdjustOutcome::Unchanged(750_000));
    }

    #[tokio::test]
    async fn test_reset_reprimes_encoder() {
        let transport = StubTransport::steady(0, 0);
        let mut controller = AdaptiveController::new(MAX);

        controller.apply(QualityLevel::Excellent, &transport).await;
        controller.reset();
        let outcome = controller.apply(QualityLevel::Excellent, &transport).await;

        assert_eq!(outcome, AdjustOutcome::Applied(2_500_000));
        assert_eq!(transport.bitrates(), vec![2_500_000, 2_500_000]);
    }
}

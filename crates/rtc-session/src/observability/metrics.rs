//! Metric emitters for the session connection manager.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rtc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Connection Metrics
// ============================================================================

/// Set the number of live peer connections.
///
/// Metric: `rtc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rtc_connections_active").set(count as f64);
}

/// Record a negotiation state entry.
///
/// Metric: `rtc_connection_transitions_total`
/// Labels: `state`
///
/// Cardinality: 7 (bounded by `NegotiationState`)
pub fn record_connection_transition(state: &str) {
    counter!("rtc_connection_transitions_total", "state" => state.to_string()).increment(1);
}

// ============================================================================
// Quality & Adaptation Metrics
// ============================================================================

/// Record one quality sample.
///
/// Metric: `rtc_quality_samples_total`
/// Labels: `level`
pub fn record_quality_sample(level: &str) {
    counter!("rtc_quality_samples_total", "level" => level.to_string()).increment(1);
}

/// Record a failed stats read.
///
/// Metric: `rtc_stats_read_failures_total`
pub fn record_stats_read_failure() {
    counter!("rtc_stats_read_failures_total").increment(1);
}

/// Record an adaptive controller decision.
///
/// Metric: `rtc_bitrate_adjustments_total`
/// Labels: `outcome` (applied, unchanged, deferred)
pub fn record_bitrate_adjustment(outcome: &str) {
    counter!("rtc_bitrate_adjustments_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Recovery Metrics
// ============================================================================

/// Record an ICE-restart attempt.
///
/// Metric: `rtc_reconnect_attempts_total`
pub fn record_reconnect_attempt() {
    counter!("rtc_reconnect_attempts_total").increment(1);
}

/// Record a connection that exhausted its reconnection attempts.
///
/// Metric: `rtc_recovery_exhausted_total`
///
/// Non-zero values mean users saw a failed connection.
pub fn record_recovery_exhausted() {
    counter!("rtc_recovery_exhausted_total").increment(1);
}

/// Record the time from entering Reconnecting to Connected again.
///
/// Metric: `rtc_recovery_duration_seconds`
pub fn record_recovery_duration(duration: Duration) {
    histogram!("rtc_recovery_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Messaging Metrics
// ============================================================================

/// Record a chat send result.
///
/// Metric: `rtc_messages_sent_total`
/// Labels: `outcome` (success, not_ready, error)
pub fn record_message_sent(outcome: &str) {
    counter!("rtc_messages_sent_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `rtc_messages_received_total`
pub fn record_message_received() {
    counter!("rtc_messages_received_total").increment(1);
}

/// Metric: `rtc_messages_deduplicated_total`
pub fn record_message_deduplicated() {
    counter!("rtc_messages_deduplicated_total").increment(1);
}

/// Record a data channel frame that could not be decoded.
///
/// Metric: `rtc_frames_rejected_total`
pub fn record_frame_rejected() {
    counter!("rtc_frames_rejected_total").increment(1);
}

// ============================================================================
// Event & Actor Metrics
// ============================================================================

/// Record a UI event dropped because the consumer fell behind.
///
/// Metric: `rtc_events_dropped_total`
/// Labels: `event`
pub fn record_event_dropped(event: &str) {
    counter!("rtc_events_dropped_total", "event" => event.to_string()).increment(1);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rtc_actor_mailbox_depth`
/// Labels: `actor_type` (registry, connection)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rtc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Record an actor panic event.
///
/// Metric: `rtc_actor_panics_total`
/// Labels: `actor_type`
///
/// Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &str) {
    counter!("rtc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Record the media profile chosen at session start.
///
/// Metric: `rtc_media_profiles_total`
/// Labels: `tier` (low, medium, high)
pub fn record_media_profile(tier: &str) {
    counter!("rtc_media_profiles_total", "tier" => tier.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests exercise the emitters against the global no-op recorder
    // (none is installed), so they only check that recording never panics.

    #[test]
    fn test_connection_metrics() {
        set_connections_active(0);
        set_connections_active(12);
        record_connection_transition("connected");
        record_connection_transition("closed");
    }

    #[test]
    fn test_quality_metrics() {
        record_quality_sample("excellent");
        record_quality_sample("unknown");
        record_stats_read_failure();
        record_bitrate_adjustment("applied");
        record_bitrate_adjustment("deferred");
    }

    #[test]
    fn test_recovery_metrics() {
        record_reconnect_attempt();
        record_recovery_exhausted();
        record_recovery_duration(Duration::from_secs(2));
    }

    #[test]
    fn test_messaging_metrics() {
        record_message_sent("success");
        record_message_sent("not_ready");
        record_message_received();
        record_message_deduplicated();
        record_frame_rejected();
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        use metrics_util::debugging::DebuggingRecorder;

        // Local recorder, so parallel tests do not interfere
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_connections_active(2);
            record_quality_sample("good");
            record_bitrate_adjustment("applied");
            record_reconnect_attempt();
            record_message_sent("success");
            record_event_dropped("message_received");
        });

        let recorded = snapshotter.snapshot().into_vec();
        assert_eq!(recorded.len(), 6);
        assert!(recorded
            .iter()
            .all(|(key, ..)| key.key().name().starts_with("rtc_")));
    }

    #[test]
    fn test_actor_and_event_metrics() {
        record_event_dropped("quality_changed");
        set_actor_mailbox_depth("connection", 3);
        record_actor_panic("connection");
        record_media_profile("high");
    }
}

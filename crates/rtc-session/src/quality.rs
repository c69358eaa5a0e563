//! Quality Monitor.
//!
//! Samples transport statistics on a fixed interval and reduces each
//! interval to a [`QualitySample`] with a discrete [`QualityLevel`].
//!
//! # Scoring
//!
//! ```text
//! bitrate     = Δbytes * 8 / Δt
//! packet_loss = Δlost / (Δlost + Δreceived)          (0 when both are 0)
//! score       = 0.4 * min(bitrate / max_bandwidth, 1)
//!             + 0.4 * (1 - packet_loss)
//!             + 0.2 * latency_term(rtt)
//! ```
//!
//! | Score  | Level     |
//! |--------|-----------|
//! | ≥ 0.8  | Excellent |
//! | ≥ 0.6  | Good      |
//! | ≥ 0.4  | Fair      |
//! | else   | Poor      |
//!
//! Half or more of the packets lost is Poor regardless of the score.

use crate::actors::messages::ConnectionMessage;
use crate::observability::metrics;
use crate::transport::{MediaKind, PeerTransport};
use crate::types::ConnectionKey;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Packet-loss ratio at or above which quality is Poor.
pub const SEVERE_LOSS_RATIO: f64 = 0.5;

/// How long `detach` waits for the sampling task before aborting it.
const DETACH_TIMEOUT: Duration = Duration::from_secs(1);

/// Discrete connection quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
    /// Stats could not be read for several consecutive ticks.
    Unknown,
}

impl QualityLevel {
    /// Map a score in [0, 1] to a level.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityLevel::Excellent
        } else if score >= 0.6 {
            QualityLevel::Good
        } else if score >= 0.4 {
            QualityLevel::Fair
        } else {
            QualityLevel::Poor
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
            QualityLevel::Unknown => "unknown",
        }
    }
}

/// One entry of a transport statistics report.
///
/// Fields the transport did not report are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEntry {
    InboundRtp {
        id: String,
        kind: MediaKind,
        bytes_received: Option<u64>,
        packets_received: Option<u64>,
        /// Cumulative loss; may be negative when duplicates arrive.
        packets_lost: Option<i64>,
        jitter_secs: Option<f64>,
    },
    CandidatePair {
        id: String,
        nominated: bool,
        current_round_trip_time_secs: Option<f64>,
    },
    Other {
        id: String,
        kind: String,
    },
}

/// Raw statistics report returned by the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub entries: Vec<StatsEntry>,
}

/// Cumulative transport counters extracted from a report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransportStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub rtt_ms: f64,
    pub jitter_ms: f64,
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => 0.0,
    }
}

/// Reduce a report to cumulative counters.
///
/// Inbound RTP counters are summed across tracks and jitter is the worst
/// track's. RTT comes from the nominated candidate pair, falling back to
/// the first pair that reports one. Missing or non-finite values are 0.
#[must_use]
pub fn extract_transport_stats(report: &StatsReport) -> TransportStats {
    let mut stats = TransportStats::default();
    let mut nominated_rtt = None;
    let mut any_rtt = None;

    for entry in &report.entries {
        match entry {
            StatsEntry::InboundRtp {
                bytes_received,
                packets_received,
                packets_lost,
                jitter_secs,
                ..
            } => {
                stats.bytes_received = stats
                    .bytes_received
                    .saturating_add(bytes_received.unwrap_or(0));
                stats.packets_received = stats
                    .packets_received
                    .saturating_add(packets_received.unwrap_or(0));
                let lost = packets_lost.unwrap_or(0).max(0).unsigned_abs();
                stats.packets_lost = stats.packets_lost.saturating_add(lost);
                stats.jitter_ms = stats.jitter_ms.max(finite_or_zero(*jitter_secs) * 1000.0);
            }
            StatsEntry::CandidatePair {
                nominated,
                current_round_trip_time_secs,
                ..
            } => {
                if let Some(rtt) = current_round_trip_time_secs.filter(|v| v.is_finite()) {
                    if *nominated && nominated_rtt.is_none() {
                        nominated_rtt = Some(rtt);
                    }
                    if any_rtt.is_none() {
                        any_rtt = Some(rtt);
                    }
                }
            }
            StatsEntry::Other { .. } => {}
        }
    }

    stats.rtt_ms = finite_or_zero(nominated_rtt.or(any_rtt)) * 1000.0;
    stats
}

/// Bits per second over an interval.
#[must_use]
pub fn bitrate_bps(delta_bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let bits = delta_bytes as f64 * 8.0;
    bits / secs
}

/// Loss ratio in [0, 1]; 0 when nothing was lost or received.
#[must_use]
pub fn packet_loss_ratio(lost: u64, received: u64) -> f64 {
    let total = lost.saturating_add(received);
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = lost as f64 / total as f64;
    ratio.clamp(0.0, 1.0)
}

#[must_use]
pub fn latency_term(rtt_ms: f64) -> f64 {
    if rtt_ms < 100.0 {
        1.0
    } else if rtt_ms < 200.0 {
        0.7
    } else if rtt_ms < 500.0 {
        0.4
    } else {
        0.1
    }
}

/// Weighted quality score in [0, 1].
#[must_use]
pub fn quality_score(bitrate_bps: f64, max_bandwidth_bps: u64, packet_loss: f64, rtt_ms: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let max = max_bandwidth_bps as f64;
    let bandwidth_ratio = if max > 0.0 {
        (bitrate_bps / max).clamp(0.0, 1.0)
    } else {
        0.0
    };
    0.4 * bandwidth_ratio + 0.4 * (1.0 - packet_loss.clamp(0.0, 1.0)) + 0.2 * latency_term(rtt_ms)
}

/// Level for a score, applying the severe-loss gate.
#[must_use]
pub fn classify(score: f64, packet_loss: f64) -> QualityLevel {
    if packet_loss >= SEVERE_LOSS_RATIO {
        QualityLevel::Poor
    } else {
        QualityLevel::from_score(score)
    }
}

/// Quality of one sampling interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySample {
    pub bitrate_bps: f64,
    pub packet_loss: f64,
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub score: f64,
    pub level: QualityLevel,
}

impl QualitySample {
    #[must_use]
    pub fn compute(
        bitrate_bps: f64,
        packet_loss: f64,
        rtt_ms: f64,
        jitter_ms: f64,
        max_bandwidth_bps: u64,
    ) -> Self {
        let score = quality_score(bitrate_bps, max_bandwidth_bps, packet_loss, rtt_ms);
        Self {
            bitrate_bps,
            packet_loss,
            rtt_ms,
            jitter_ms,
            score,
            level: classify(score, packet_loss),
        }
    }
}

/// Delta computation between consecutive successful reads.
#[derive(Debug, Default)]
pub struct StatsWindow {
    previous: Option<(Instant, TransportStats)>,
}

impl StatsWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read. Returns `None` for the baseline read, when a counter
    /// went backwards (re-baselined), or when no time has elapsed.
    pub fn observe(
        &mut self,
        at: Instant,
        stats: TransportStats,
        max_bandwidth_bps: u64,
    ) -> Option<QualitySample> {
        let Some((prev_at, prev)) = self.previous else {
            self.previous = Some((at, stats));
            return None;
        };

        if stats.bytes_received < prev.bytes_received
            || stats.packets_received < prev.packets_received
            || stats.packets_lost < prev.packets_lost
        {
            self.previous = Some((at, stats));
            return None;
        }

        let elapsed = at.saturating_duration_since(prev_at);
        if elapsed.is_zero() {
            return None;
        }
        self.previous = Some((at, stats));

        let bitrate = bitrate_bps(stats.bytes_received - prev.bytes_received, elapsed);
        let loss = packet_loss_ratio(
            stats.packets_lost - prev.packets_lost,
            stats.packets_received - prev.packets_received,
        );
        Some(QualitySample::compute(
            bitrate,
            loss,
            stats.rtt_ms,
            stats.jitter_ms,
            max_bandwidth_bps,
        ))
    }
}

/// What the monitor reports to its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityReport {
    Sample(QualitySample),
    Unknown { consecutive_failures: u32 },
}

/// Monitor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Sampling,
    Stopped,
}

/// Sampling parameters.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub max_bandwidth_bps: u64,
    pub failure_threshold: u32,
}

/// Handle to a running sampling task.
#[derive(Debug)]
pub struct QualityMonitorHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<MonitorState>,
}

impl QualityMonitorHandle {
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Stop sampling and wait for the task to finish.
    pub async fn detach(mut self) {
        self.cancel_token.cancel();
        if tokio::time::timeout(DETACH_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            warn!(target: "rtc.quality", "Quality monitor did not stop in time, aborting");
            self.task.abort();
        }
    }
}

/// Per-connection sampling loop.
pub struct QualityMonitor {
    key: ConnectionKey,
    transport: Arc<dyn PeerTransport>,
    sink: mpsc::Sender<ConnectionMessage>,
    settings: MonitorSettings,
    cancel_token: CancellationToken,
    state: watch::Sender<MonitorState>,
}

impl QualityMonitor {
    /// Start sampling `transport`, reporting to `sink`.
    pub fn attach(
        key: ConnectionKey,
        transport: Arc<dyn PeerTransport>,
        sink: mpsc::Sender<ConnectionMessage>,
        settings: MonitorSettings,
        cancel_token: CancellationToken,
    ) -> QualityMonitorHandle {
        let (state_tx, state_rx) = watch::channel(MonitorState::Idle);
        let monitor = Self {
            key,
            transport,
            sink,
            settings,
            cancel_token: cancel_token.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(monitor.run());

        QualityMonitorHandle {
            cancel_token,
            task,
            state: state_rx,
        }
    }

    #[instrument(
        skip_all,
        name = "rtc.quality",
        fields(
            session_id = %self.key.session_id,
            participant_id = %self.key.participant_id
        )
    )]
    async fn run(self) {
        self.state.send_replace(MonitorState::Sampling);
        debug!(
            target: "rtc.quality",
            interval_ms = self.settings.interval.as_millis() as u64,
            "Quality sampling started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut window = StatsWindow::new();
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let read = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                read = self.transport.read_stats() => read,
            };

            let report = match read {
                Ok(report) => {
                    failures = 0;
                    let stats = extract_transport_stats(&report);
                    match window.observe(Instant::now(), stats, self.settings.max_bandwidth_bps) {
                        Some(sample) => {
                            metrics::record_quality_sample(sample.level.as_str());
                            QualityReport::Sample(sample)
                        }
                        None => continue,
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    metrics::record_stats_read_failure();
                    warn!(
                        target: "rtc.quality",
                        error = %e,
                        consecutive_failures = failures,
                        "Stats read failed, skipping tick"
                    );
                    if failures != self.settings.failure_threshold {
                        continue;
                    }
                    metrics::record_quality_sample(QualityLevel::Unknown.as_str());
                    QualityReport::Unknown {
                        consecutive_failures: failures,
                    }
                }
            };

            match self.sink.try_send(ConnectionMessage::Quality { report }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(target: "rtc.quality", "Connection mailbox full, quality report dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }

        self.state.send_replace(MonitorState::Stopped);
        debug!(target: "rtc.quality", "Quality sampling stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;

    const MAX: u64 = 2_500_000;

    fn inbound(bytes: u64, packets: u64, lost: i64) -> StatsEntry {
        StatsEntry::InboundRtp {
            id: "in-video".to_string(),
            kind: MediaKind::Video,
            bytes_received: Some(bytes),
            packets_received: Some(packets),
            packets_lost: Some(lost),
            jitter_secs: Some(0.004),
        }
    }

    fn pair(nominated: bool, rtt: f64) -> StatsEntry {
        StatsEntry::CandidatePair {
            id: format!("pair-{nominated}"),
            nominated,
            current_round_trip_time_secs: Some(rtt),
        }
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(QualityLevel::from_score(1.0), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_score(0.8), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_score(0.79), QualityLevel::Good);
        assert_eq!(QualityLevel::from_score(0.6), QualityLevel::Good);
        assert_eq!(QualityLevel::from_score(0.4), QualityLevel::Fair);
        assert_eq!(QualityLevel::from_score(0.39), QualityLevel::Poor);
    }

    #[test]
    fn test_latency_term_bands() {
        assert_eq!(latency_term(50.0), 1.0);
        assert_eq!(latency_term(150.0), 0.7);
        assert_eq!(latency_term(300.0), 0.4);
        assert_eq!(latency_term(800.0), 0.1);
    }

    #[test]
    fn test_perfect_link_is_excellent() {
        let sample = QualitySample::compute(MAX as f64, 0.0, 50.0, 2.0, MAX);
        assert_eq!(sample.level, QualityLevel::Excellent);
        assert!((sample.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_heavy_loss_is_poor_regardless_of_bitrate_and_rtt() {
        let sample = QualitySample::compute(MAX as f64, 0.5, 10.0, 1.0, MAX);
        assert_eq!(sample.level, QualityLevel::Poor);

        let sample = QualitySample::compute(10.0 * MAX as f64, 0.5, 0.0, 0.0, MAX);
        assert_eq!(sample.level, QualityLevel::Poor);
    }

    #[test]
    fn test_moderate_loss_follows_the_score() {
        let sample = QualitySample::compute(MAX as f64, 0.15, 50.0, 1.0, MAX);
        assert!((sample.score - 0.94).abs() < 1e-9);
        assert_eq!(sample.level, QualityLevel::Excellent);

        let sample = QualitySample::compute(MAX as f64, 0.49, 50.0, 1.0, MAX);
        assert_eq!(sample.level, QualityLevel::Excellent);

        // Same score, but the loss reaches the gate
        let sample = QualitySample::compute(MAX as f64, 0.5, 50.0, 1.0, MAX);
        assert!((sample.score - 0.8).abs() < 1e-9);
        assert_eq!(sample.level, QualityLevel::Poor);
    }

    #[test]
    fn test_bandwidth_ratio_is_clamped() {
        let over = quality_score(10.0 * MAX as f64, MAX, 0.0, 50.0);
        let exact = quality_score(MAX as f64, MAX, 0.0, 50.0);
        assert!((over - exact).abs() < 1e-9);
        assert!((quality_score(MAX as f64, 0, 0.0, 50.0) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_packet_loss_ratio_edges() {
        assert_eq!(packet_loss_ratio(0, 0), 0.0);
        assert_eq!(packet_loss_ratio(5, 95), 0.05);
        assert_eq!(packet_loss_ratio(10, 0), 1.0);
    }

    #[test]
    fn test_bitrate_zero_elapsed() {
        assert_eq!(bitrate_bps(1000, Duration::ZERO), 0.0);
        assert_eq!(bitrate_bps(1000, Duration::from_secs(2)), 4000.0);
    }

    #[test]
    fn test_extract_sums_tracks_and_prefers_nominated_pair() {
        let report = StatsReport {
            entries: vec![
                inbound(1000, 10, 1),
                StatsEntry::InboundRtp {
                    id: "in-audio".to_string(),
                    kind: MediaKind::Audio,
                    bytes_received: Some(500),
                    packets_received: Some(5),
                    packets_lost: Some(-2),
                    jitter_secs: Some(0.010),
                },
                pair(false, 0.300),
                pair(true, 0.050),
                StatsEntry::Other {
                    id: "codec".to_string(),
                    kind: "codec".to_string(),
                },
            ],
        };

        let stats = extract_transport_stats(&report);
        assert_eq!(stats.bytes_received, 1500);
        assert_eq!(stats.packets_received, 15);
        assert_eq!(stats.packets_lost, 1);
        assert!((stats.rtt_ms - 50.0).abs() < 1e-9);
        assert!((stats.jitter_ms - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_extract_missing_and_non_finite_fields() {
        let report = StatsReport {
            entries: vec![
                StatsEntry::InboundRtp {
                    id: "in".to_string(),
                    kind: MediaKind::Video,
                    bytes_received: None,
                    packets_received: None,
                    packets_lost: None,
                    jitter_secs: Some(f64::NAN),
                },
                StatsEntry::CandidatePair {
                    id: "p".to_string(),
                    nominated: true,
                    current_round_trip_time_secs: Some(f64::INFINITY),
                },
            ],
        };

        assert_eq!(extract_transport_stats(&report), TransportStats::default());
        assert_eq!(
            extract_transport_stats(&StatsReport::default()),
            TransportStats::default()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_baseline_then_delta() {
        let mut window = StatsWindow::new();
        let t0 = Instant::now();
        let first = TransportStats {
            bytes_received: 1_000,
            packets_received: 100,
            packets_lost: 0,
            rtt_ms: 40.0,
            jitter_ms: 1.0,
        };
        assert!(window.observe(t0, first, MAX).is_none());

        let second = TransportStats {
            bytes_received: 1_000 + 625_000,
            packets_received: 600,
            packets_lost: 0,
            ..first
        };
        let sample = window
            .observe(t0 + Duration::from_secs(2), second, MAX)
            .expect("second read yields a sample");
        assert!((sample.bitrate_bps - 2_500_000.0).abs() < 1e-6);
        assert_eq!(sample.packet_loss, 0.0);
        assert_eq!(sample.level, QualityLevel::Excellent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rebaselines_on_counter_regression() {
        let mut window = StatsWindow::new();
        let t0 = Instant::now();
        let high = TransportStats {
            bytes_received: 10_000,
            packets_received: 100,
            ..TransportStats::default()
        };
        let low = TransportStats {
            bytes_received: 100,
            packets_received: 1,
            ..TransportStats::default()
        };

        assert!(window.observe(t0, high, MAX).is_none());
        assert!(window
            .observe(t0 + Duration::from_secs(2), low, MAX)
            .is_none());

        let next = TransportStats {
            bytes_received: 200,
            packets_received: 2,
            ..TransportStats::default()
        };
        let sample = window
            .observe(t0 + Duration::from_secs(4), next, MAX)
            .unwrap();
        assert!((sample.bitrate_bps - 400.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_emits_samples_every_interval() {
        let transport = Arc::new(StubTransport::steady(625_000, 500));
        let (tx, mut rx) = mpsc::channel(16);
        let settings = MonitorSettings {
            interval: Duration::from_secs(2),
            max_bandwidth_bps: MAX,
            failure_threshold: 3,
        };

        let handle = QualityMonitor::attach(
            ConnectionKey::new("S1", "A"),
            transport,
            tx,
            settings,
            CancellationToken::new(),
        );

        // Baseline at t=0, first sample at t=2s.
        let msg = rx.recv().await.unwrap();
        match msg {
            ConnectionMessage::Quality {
                report: QualityReport::Sample(sample),
            } => assert_eq!(sample.level, QualityLevel::Excellent),
            _ => panic!("expected a quality sample"),
        }
        assert_eq!(handle.state(), MonitorState::Sampling);

        handle.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_marks_unknown_after_threshold_failures() {
        let transport = Arc::new(StubTransport::failing());
        let (tx, mut rx) = mpsc::channel(16);
        let settings = MonitorSettings {
            interval: Duration::from_secs(2),
            max_bandwidth_bps: MAX,
            failure_threshold: 3,
        };

        let handle = QualityMonitor::attach(
            ConnectionKey::new("S1", "A"),
            Arc::clone(&transport) as Arc<dyn PeerTransport>,
            tx,
            settings,
            CancellationToken::new(),
        );

        let start = Instant::now();
        let msg = rx.recv().await.unwrap();
        assert!(matches!(
            msg,
            ConnectionMessage::Quality {
                report: QualityReport::Unknown {
                    consecutive_failures: 3
                }
            }
        ));
        // Ticks at 0s, 2s, 4s.
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        // Reported once, not on every later failure.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_err());

        handle.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_sampling() {
        let transport = Arc::new(StubTransport::steady(1_000, 10));
        let (tx, mut rx) = mpsc::channel(16);
        let settings = MonitorSettings {
            interval: Duration::from_secs(2),
            max_bandwidth_bps: MAX,
            failure_threshold: 3,
        };

        let handle = QualityMonitor::attach(
            ConnectionKey::new("S1", "A"),
            Arc::clone(&transport) as Arc<dyn PeerTransport>,
            tx,
            settings,
            CancellationToken::new(),
        );
        let mut state = handle.state.clone();
        handle.detach().await;
        assert_eq!(*state.borrow_and_update(), MonitorState::Stopped);

        let reads = transport.stats_reads();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(transport.stats_reads(), reads);

        // Sender dropped with the task.
        while rx.try_recv().is_ok() {}
        assert!(rx.recv().await.is_none());
    }
}

//! Actor metrics and mailbox monitoring.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Registry   | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |

use crate::observability::metrics;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the registry actor.
pub const REGISTRY_MAILBOX_NORMAL: usize = 100;
pub const REGISTRY_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// ConnectionRegistryActor (one per session).
    Registry,
    /// ConnectionActor (one per remote participant).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth for one actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message taken off the mailbox.
    ///
    /// `queued` is the mailbox length when the message was received,
    /// counting the message itself.
    pub fn record_received(&self, queued: usize) {
        let previous = self.depth.swap(queued, Ordering::Relaxed);
        self.peak_depth.fetch_max(queued, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), queued);

        match self.level_for_depth(queued) {
            MailboxLevel::Critical => {
                warn!(
                    target: "rtc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if self.level_for_depth(previous) == MailboxLevel::Normal => {
                debug!(
                    target: "rtc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    "Mailbox depth elevated"
                );
            }
            MailboxLevel::Warning | MailboxLevel::Normal => {}
        }
    }

    /// Record a message finished processing, with `remaining` messages
    /// still waiting.
    pub fn record_processed(&self, remaining: usize) {
        self.depth.store(remaining, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), remaining);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Counters shared across the actor system of one registry.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Connections currently alive.
    pub active_connections: AtomicUsize,
    /// Actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_created(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_connections_active(count);
    }

    pub fn connection_closed(&self) {
        let previous = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            })
            .unwrap_or(0);
        metrics::set_connections_active(previous.saturating_sub(1));
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        metrics::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "rtc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_thresholds() {
        assert_eq!(ActorType::Registry.as_str(), "registry");
        assert_eq!(ActorType::Connection.as_str(), "connection");
        assert_eq!(ActorType::Registry.normal_threshold(), 100);
        assert_eq!(ActorType::Registry.warning_threshold(), 500);
        assert_eq!(ActorType::Connection.normal_threshold(), 50);
        assert_eq!(ActorType::Connection.warning_threshold(), 200);
    }

    #[test]
    fn test_mailbox_monitor_tracks_depth() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "S1/A");

        monitor.record_received(3);
        assert_eq!(monitor.current_depth(), 3);
        monitor.record_processed(2);
        assert_eq!(monitor.current_depth(), 2);

        monitor.record_received(2);
        monitor.record_processed(0);
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 2);
    }

    #[tokio::test]
    async fn test_mailbox_levels_follow_queue_backlog() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "S1/A");
        let (sender, mut receiver) = tokio::sync::mpsc::channel::<u32>(300);

        for i in 0..75 {
            sender.send(i).await.unwrap();
        }
        receiver.recv().await.unwrap();
        monitor.record_received(receiver.len() + 1);
        assert_eq!(monitor.current_depth(), 75);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for i in 0..150 {
            sender.send(i).await.unwrap();
        }
        receiver.recv().await.unwrap();
        monitor.record_received(receiver.len() + 1);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        while receiver.try_recv().is_ok() {}
        monitor.record_processed(receiver.len());
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
        assert_eq!(monitor.peak_depth(), 224);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();
        metrics.connection_created();
        metrics.connection_created();
        assert_eq!(metrics.connection_count(), 2);

        metrics.connection_closed();
        metrics.connection_closed();
        metrics.connection_closed();
        assert_eq!(metrics.connection_count(), 0);
    }

    #[test]
    fn test_actor_metrics_panics() {
        let metrics = ActorMetrics::new();
        metrics.record_panic(ActorType::Connection);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 1);
    }
}

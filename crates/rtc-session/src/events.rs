//! Outbound UI events.
//!
//! Connection actors never block on the consumer: events go through a
//! bounded channel with `try_send`, and a full channel drops the event.

use crate::messaging::{ChatMessage, DeliveryStatus};
use crate::observability::metrics;
use crate::quality::{QualityLevel, QualitySample};
use crate::types::{ConnectionKey, NegotiationState};

use chrono::{DateTime, Utc};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// An event tagged with the connection it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: String,
    pub participant_id: String,
    pub kind: SessionEventKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    ConnectionStateChanged {
        from: NegotiationState,
        to: NegotiationState,
    },
    QualityChanged {
        level: QualityLevel,
        /// `None` when the level is `Unknown`.
        sample: Option<QualitySample>,
    },
    MessageReceived {
        message: ChatMessage,
    },
    MessageAcknowledged {
        message_id: String,
        status: DeliveryStatus,
    },
    RecoveryExhausted {
        attempts: u32,
    },
}

impl SessionEventKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionEventKind::ConnectionStateChanged { .. } => "connection_state_changed",
            SessionEventKind::QualityChanged { .. } => "quality_changed",
            SessionEventKind::MessageReceived { .. } => "message_received",
            SessionEventKind::MessageAcknowledged { .. } => "message_acknowledged",
            SessionEventKind::RecoveryExhausted { .. } => "recovery_exhausted",
        }
    }
}

/// Producer side, cloned into every connection actor.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<SessionEvent>,
}

impl EventSender {
    /// Create a bounded event channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (EventSender, SessionEvents) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (EventSender { sender }, SessionEvents { receiver })
    }

    /// Emit without blocking. Returns `false` if the event was dropped.
    pub fn emit(&self, key: &ConnectionKey, kind: SessionEventKind) -> bool {
        let name = kind.as_str();
        let event = SessionEvent {
            session_id: key.session_id.clone(),
            participant_id: key.participant_id.clone(),
            kind,
            at: Utc::now(),
        };

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::record_event_dropped(name);
                warn!(
                    target: "rtc.events",
                    session_id = %key.session_id,
                    participant_id = %key.participant_id,
                    event = name,
                    "Event channel full, event dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "rtc.events",
                    session_id = %key.session_id,
                    event = name,
                    "Event consumer gone"
                );
                false
            }
        }
    }
}

/// Consumer side handed to the UI.
#[derive(Debug)]
pub struct SessionEvents {
    receiver: mpsc::Receiver<SessionEvent>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_tags_connection() {
        let (sender, mut events) = EventSender::channel(4);
        let key = ConnectionKey::new("S1", "A");

        assert!(sender.emit(&key, SessionEventKind::RecoveryExhausted { attempts: 3 }));

        let event = events.recv().await.unwrap();
        assert_eq!(event.session_id, "S1");
        assert_eq!(event.participant_id, "A");
        assert_eq!(event.kind, SessionEventKind::RecoveryExhausted { attempts: 3 });
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (sender, mut events) = EventSender::channel(1);
        let key = ConnectionKey::new("S1", "A");
        let kind = SessionEventKind::ConnectionStateChanged {
            from: NegotiationState::New,
            to: NegotiationState::Offering,
        };

        assert!(sender.emit(&key, kind.clone()));
        assert!(!sender.emit(&key, kind));

        assert!(events.try_recv().is_some());
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_closed_consumer() {
        let (sender, events) = EventSender::channel(1);
        drop(events);
        assert!(!sender.emit(
            &ConnectionKey::new("S1", "A"),
            SessionEventKind::RecoveryExhausted { attempts: 1 }
        ));
    }
}

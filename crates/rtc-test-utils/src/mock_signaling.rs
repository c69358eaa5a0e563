//! Recording signaling sink.
//!
//! Keeps every message the core hands to signaling so tests can assert on
//! offers, answers and trickled candidates per participant.

use async_trait::async_trait;
use rtc_session::errors::TransportError;
use rtc_session::transport::{SignalingKind, SignalingMessage, SignalingSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

use crate::mock_transport::WAIT_TIMEOUT;

/// Signaling sink that records messages and can be made to fail.
#[derive(Debug)]
pub struct RecordingSignaling {
    messages: Mutex<Vec<SignalingMessage>>,
    count: watch::Sender<usize>,
    failing: AtomicBool,
}

impl Default for RecordingSignaling {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            messages: Mutex::new(Vec::new()),
            count,
            failing: AtomicBool::new(false),
        }
    }
}

impl RecordingSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent send.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn messages(&self) -> Vec<SignalingMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Messages of one kind addressed to one participant.
    #[must_use]
    pub fn messages_for(&self, participant_id: &str, kind: SignalingKind) -> Vec<SignalingMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.participant_id == participant_id && m.kind == kind)
            .collect()
    }

    /// Wait until at least `n` messages were sent.
    pub async fn wait_for_messages(&self, n: usize) {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|count| *count >= n))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} signaling messages"))
            .expect("signaling counter alive");
    }
}

#[async_trait]
impl SignalingSink for RecordingSignaling {
    async fn send(&self, message: SignalingMessage) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("signaling unavailable".to_string()));
        }
        self.messages.lock().unwrap().push(message);
        self.count.send_modify(|count| *count += 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_session::transport::SessionDescription;
    use rtc_session::types::ConnectionKey;

    #[tokio::test]
    async fn test_records_and_filters() {
        let signaling = RecordingSignaling::new();
        let a = ConnectionKey::new("S1", "A");
        let b = ConnectionKey::new("S1", "B");

        signaling
            .send(SignalingMessage::offer(&a, SessionDescription::offer("o")))
            .await
            .unwrap();
        signaling
            .send(SignalingMessage::answer(&b, SessionDescription::answer("a")))
            .await
            .unwrap();

        signaling.wait_for_messages(2).await;
        assert_eq!(signaling.messages_for("A", SignalingKind::Offer).len(), 1);
        assert!(signaling.messages_for("B", SignalingKind::Offer).is_empty());
    }

    #[tokio::test]
    async fn test_failing_sink() {
        let signaling = RecordingSignaling::new();
        signaling.set_failing(true);

        let key = ConnectionKey::new("S1", "A");
        let result = signaling
            .send(SignalingMessage::offer(&key, SessionDescription::offer("o")))
            .await;
        assert!(result.is_err());
        assert!(signaling.messages().is_empty());
    }
}

//! Test fixtures: a collaborator harness, event helpers and chat messages.

use crate::mock_media::{MockMediaProvider, MockNetworkProbe};
use crate::mock_signaling::RecordingSignaling;
use crate::mock_transport::{MockTransportFactory, WAIT_TIMEOUT};
use anyhow::{anyhow, Context};
use rtc_session::events::{SessionEvent, SessionEventKind, SessionEvents};
use rtc_session::messaging::ChatMessage;
use rtc_session::transport::Collaborators;
use rtc_session::types::NegotiationState;
use rtc_session::{Config, RtcError, Session};
use std::sync::Arc;

/// Install a test log subscriber honoring `RUST_LOG` (e.g. `RUST_LOG=rtc=debug`).
///
/// Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mock collaborators kept together so tests can drive and inspect them.
#[derive(Debug, Clone)]
pub struct TestHarness {
    pub transports: Arc<MockTransportFactory>,
    pub signaling: Arc<RecordingSignaling>,
    pub media: Arc<MockMediaProvider>,
    pub network: Arc<MockNetworkProbe>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new(
            MockTransportFactory::builder().build(),
            MockMediaProvider::default(),
            MockNetworkProbe::new(25.0),
        )
    }
}

impl TestHarness {
    #[must_use]
    pub fn new(
        transports: MockTransportFactory,
        media: MockMediaProvider,
        network: MockNetworkProbe,
    ) -> Self {
        Self {
            transports: Arc::new(transports),
            signaling: Arc::new(RecordingSignaling::new()),
            media: Arc::new(media),
            network: Arc::new(network),
        }
    }

    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transports: self.transports.clone(),
            signaling: self.signaling.clone(),
            media: self.media.clone(),
            network: self.network.clone(),
        }
    }

    /// A session over these collaborators with the default config.
    ///
    /// # Panics
    ///
    /// Never in practice: the default config always validates.
    #[must_use]
    pub fn session(&self, id: &str, participants: &[&str]) -> (Session, SessionEvents) {
        self.session_with(Config::default(), id, participants)
            .expect("default config is valid")
    }

    pub fn session_with(
        &self,
        config: Config,
        id: &str,
        participants: &[&str],
    ) -> Result<(Session, SessionEvents), RtcError> {
        Session::new(
            config,
            self.collaborators(),
            id,
            participants.iter().copied(),
        )
    }
}

/// Receive events until one matches, failing after [`WAIT_TIMEOUT`].
pub async fn wait_for_event<F>(events: &mut SessionEvents, mut matches: F) -> anyhow::Result<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if matches(&event) {
                return Ok(event);
            }
        }
        Err(anyhow!("event stream closed"))
    })
    .await
    .context("timed out waiting for event")?
}

/// Wait until a participant's connection enters `state`.
pub async fn wait_for_state(
    events: &mut SessionEvents,
    participant_id: &str,
    state: NegotiationState,
) -> anyhow::Result<SessionEvent> {
    wait_for_event(events, |event| {
        event.participant_id == participant_id
            && matches!(event.kind, SessionEventKind::ConnectionStateChanged { to, .. } if to == state)
    })
    .await
    .with_context(|| format!("{participant_id} never reached {state}"))
}

/// Drain whatever is queued right now.
pub fn drain_events(events: &mut SessionEvents) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Some(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// A text message with a fixed id.
#[must_use]
pub fn chat(id: &str, sender_id: &str, receiver_id: &str, content: &str) -> ChatMessage {
    ChatMessage::text(sender_id, receiver_id, content).with_id(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_fixture() {
        let message = chat("m1", "doctor", "patient", "hello");
        assert_eq!(message.id, "m1");
        assert_eq!(message.sender_id, "doctor");
        assert!(!message.flags.sent);
    }

    #[tokio::test]
    async fn test_harness_session_waits() {
        let harness = TestHarness::default();
        let (session, mut events) = harness.session("S1", &["A", "B"]);

        assert_eq!(session.id(), "S1");
        assert_eq!(session.participants().len(), 2);
        assert!(drain_events(&mut events).is_empty());
    }
}

//! Session lifecycle.
//!
//! A `Session` owns the local media and the connection registry of one
//! consultation. `start()` negotiates constraints, acquires media once and
//! creates one connection per remote participant; `end()` releases all of
//! it. The session also ends on its own once no connection is left, whether
//! they were closed by the caller or stopped with their transport.

use crate::actors::{ConnectionHandle, ConnectionRegistryHandle};
use crate::config::Config;
use crate::errors::RtcError;
use crate::events::{EventSender, SessionEvents};
use crate::messaging::{ChatMessage, Delivered, MessageStream};
use crate::negotiator::{CapabilityNegotiator, MediaConstraintProfile, QualityTier};
use crate::transport::{
    Collaborators, IceCandidate, MediaCaptureProvider, MediaHandle, SessionDescription,
};
use crate::types::ConnectionKey;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, not started.
    Waiting,
    /// Media acquired and connections created.
    Active,
    /// All resources released. Terminal.
    Ended,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Waiting => "waiting",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
        }
    }
}

/// One consultation session.
pub struct Session {
    id: String,
    participants: Vec<String>,
    config: Config,
    collaborators: Collaborators,
    events: EventSender,
    registry: Option<ConnectionRegistryHandle>,
    profile: Option<MediaConstraintProfile>,
    lifecycle: Arc<Lifecycle>,
    /// Ends the session when the registry reports no connections left.
    idle_watch: Option<JoinHandle<()>>,
}

/// State shared between the session and its idle watch.
struct Lifecycle {
    session_id: String,
    state: watch::Sender<SessionState>,
    /// Set by whichever caller releases the resources.
    ending: AtomicBool,
    local_media: watch::Sender<Option<MediaHandle>>,
    media: Arc<dyn MediaCaptureProvider>,
}

impl Lifecycle {
    /// Close every connection, stop the registry and release local media.
    ///
    /// Concurrent callers return once the first one has released everything.
    async fn finish(&self, registry: Option<&ConnectionRegistryHandle>) {
        if self.ending.swap(true, Ordering::AcqRel) {
            let mut state = self.state.subscribe();
            let _ = state.wait_for(|s| *s == SessionState::Ended).await;
            return;
        }

        if let Some(registry) = registry {
            match registry.close_all(self.session_id.clone()).await {
                Ok(closed) => {
                    debug!(
                        target: "rtc.session",
                        session_id = %self.session_id,
                        closed = closed,
                        "Connections closed"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "rtc.session",
                        session_id = %self.session_id,
                        error = %e,
                        "Closing connections failed"
                    );
                }
            }
            if let Err(e) = registry.shutdown().await {
                debug!(
                    target: "rtc.session",
                    session_id = %self.session_id,
                    error = %e,
                    "Registry already stopped"
                );
            }
        }

        if let Some(media) = self.local_media.send_replace(None) {
            self.media.release_local_media(&media).await;
        }

        if self.state.send_replace(SessionState::Ended) != SessionState::Ended {
            info!(target: "rtc.session", session_id = %self.session_id, "Session ended");
        }
    }
}

impl Session {
    /// Create a session in `Waiting` and the UI event stream it reports to.
    ///
    /// Duplicate participant ids are ignored, keeping first-seen order.
    ///
    /// # Errors
    ///
    /// Returns `RtcError::Config` if `config` does not validate.
    pub fn new<I, P>(
        config: Config,
        collaborators: Collaborators,
        id: impl Into<String>,
        participants: I,
    ) -> Result<(Self, SessionEvents), RtcError>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        config.validate()?;

        let mut unique: Vec<String> = Vec::new();
        for participant in participants {
            let participant = participant.into();
            if !unique.contains(&participant) {
                unique.push(participant);
            }
        }

        let id = id.into();
        let (events, receiver) = EventSender::channel(config.event_buffer);
        let lifecycle = Arc::new(Lifecycle {
            session_id: id.clone(),
            state: watch::Sender::new(SessionState::Waiting),
            ending: AtomicBool::new(false),
            local_media: watch::Sender::new(None),
            media: Arc::clone(&collaborators.media),
        });
        let session = Self {
            id,
            participants: unique,
            config,
            collaborators,
            events,
            registry: None,
            profile: None,
            lifecycle,
            idle_watch: None,
        };
        Ok((session, receiver))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.lifecycle.state.borrow()
    }

    #[must_use]
    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    /// Profile chosen at start, if started.
    #[must_use]
    pub fn profile(&self) -> Option<MediaConstraintProfile> {
        self.profile
    }

    /// Local media while the session holds it.
    #[must_use]
    pub fn local_media(&self) -> Option<MediaHandle> {
        self.lifecycle.local_media.borrow().clone()
    }

    /// Start the session.
    ///
    /// Negotiates constraints, acquires local media and creates one
    /// connection per participant. Media acquisition failure ends the
    /// session. Starting an active session returns its profile.
    pub async fn start(
        &mut self,
        requested: QualityTier,
    ) -> Result<MediaConstraintProfile, RtcError> {
        match self.state() {
            SessionState::Ended => return Err(RtcError::SessionEnded),
            SessionState::Active => {
                return self
                    .profile
                    .ok_or_else(|| RtcError::Internal("active session without profile".to_string()));
            }
            SessionState::Waiting => {}
        }

        let negotiator = CapabilityNegotiator::new(
            Arc::clone(&self.collaborators.media),
            Arc::clone(&self.collaborators.network),
        );
        let profile = negotiator.negotiate(requested).await;

        let media = match self.collaborators.media.acquire_local_media(&profile).await {
            Ok(media) => media,
            Err(e) => {
                error!(
                    target: "rtc.session",
                    session_id = %self.id,
                    error = %e,
                    "Local media acquisition failed, ending session"
                );
                self.lifecycle.finish(None).await;
                return Err(RtcError::MediaAcquisitionFailed(e));
            }
        };

        self.lifecycle.local_media.send_replace(Some(media.clone()));
        self.profile = Some(profile);
        let registry = match ConnectionRegistryHandle::new(
            self.config.clone(),
            Arc::clone(&self.collaborators.transports),
            Arc::clone(&self.collaborators.signaling),
            self.events.clone(),
            Some(media),
        ) {
            Ok(registry) => registry,
            Err(e) => {
                self.end().await;
                return Err(e);
            }
        };
        self.registry = Some(registry.clone());

        for participant in self.participants.clone() {
            if let Err(e) = registry.create(self.id.clone(), participant).await {
                error!(
                    target: "rtc.session",
                    session_id = %self.id,
                    error = %e,
                    "Connection creation failed, ending session"
                );
                self.end().await;
                return Err(e);
            }
        }

        self.lifecycle.state.send_replace(SessionState::Active);
        self.idle_watch = Some(tokio::spawn(watch_idle(
            registry,
            Arc::clone(&self.lifecycle),
            self.participants.is_empty(),
        )));
        info!(
            target: "rtc.session",
            session_id = %self.id,
            participants = self.participants.len(),
            tier = profile.tier.as_str(),
            "Session started"
        );
        Ok(profile)
    }

    /// Add a participant to an active session.
    pub async fn add_participant(
        &mut self,
        participant_id: impl Into<String>,
    ) -> Result<ConnectionHandle, RtcError> {
        let participant_id = participant_id.into();
        let handle = self
            .registry()?
            .create(self.id.clone(), participant_id.clone())
            .await?;
        if !self.participants.contains(&participant_id) {
            self.participants.push(participant_id);
        }
        Ok(handle)
    }

    /// Handle of a participant's connection.
    pub async fn connection(&self, participant_id: &str) -> Result<ConnectionHandle, RtcError> {
        self.registry()?
            .get(self.id.clone(), participant_id)
            .await?
            .ok_or_else(|| {
                RtcError::ConnectionNotFound(
                    ConnectionKey::new(self.id.clone(), participant_id).to_string(),
                )
            })
    }

    /// Create the initial offer for a participant and hand it to signaling.
    pub async fn start_negotiation(
        &self,
        participant_id: &str,
    ) -> Result<SessionDescription, RtcError> {
        self.connection(participant_id)
            .await?
            .start_negotiation()
            .await
    }

    pub async fn handle_remote_offer(
        &self,
        participant_id: &str,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RtcError> {
        self.registry()?
            .handle_remote_offer(self.id.clone(), participant_id, offer)
            .await
    }

    pub async fn handle_remote_answer(
        &self,
        participant_id: &str,
        answer: SessionDescription,
    ) -> Result<(), RtcError> {
        self.registry()?
            .handle_remote_answer(self.id.clone(), participant_id, answer)
            .await
    }

    pub async fn handle_remote_candidate(
        &self,
        participant_id: &str,
        candidate: IceCandidate,
    ) -> Result<(), RtcError> {
        self.registry()?
            .handle_remote_candidate(self.id.clone(), participant_id, candidate)
            .await
    }

    pub async fn send_message(
        &self,
        participant_id: &str,
        message: ChatMessage,
    ) -> Result<Delivered, RtcError> {
        self.connection(participant_id)
            .await?
            .send_message(message)
            .await
    }

    pub async fn on_message(&self, participant_id: &str) -> Result<MessageStream, RtcError> {
        self.connection(participant_id).await?.on_message().await
    }

    pub async fn mark_read(
        &self,
        participant_id: &str,
        message_id: impl Into<String>,
    ) -> Result<(), RtcError> {
        self.connection(participant_id)
            .await?
            .mark_read(message_id)
            .await
    }

    /// Manual reconnection of a connection whose recovery was exhausted.
    pub async fn restart(&self, participant_id: &str) -> Result<(), RtcError> {
        self.connection(participant_id).await?.restart().await
    }

    /// Close one participant's connection; ends the session if it was the last.
    pub async fn close_participant(&mut self, participant_id: &str) -> Result<(), RtcError> {
        let registry = self.registry()?.clone();
        registry.close(self.id.clone(), participant_id).await?;
        self.participants.retain(|p| p != participant_id);

        // A stopped registry holds no connections
        if registry.count(self.id.clone()).await.unwrap_or(0) == 0 {
            debug!(
                target: "rtc.session",
                session_id = %self.id,
                "Last connection closed"
            );
            self.end().await;
        }
        Ok(())
    }

    /// End the session: close every connection, stop the registry and
    /// release local media. Idempotent.
    pub async fn end(&mut self) {
        self.lifecycle.finish(self.registry.as_ref()).await;
        self.registry = None;
        if let Some(idle_watch) = self.idle_watch.take() {
            idle_watch.abort();
        }
    }

    fn registry(&self) -> Result<&ConnectionRegistryHandle, RtcError> {
        match self.state() {
            SessionState::Waiting => Err(RtcError::SessionNotActive),
            SessionState::Ended => Err(RtcError::SessionEnded),
            SessionState::Active => self.registry.as_ref().ok_or(RtcError::SessionNotActive),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The watch holds a registry handle; without it the registry stops
        // once the session's handle is gone.
        if let Some(idle_watch) = self.idle_watch.take() {
            if !self.lifecycle.ending.load(Ordering::Acquire) {
                idle_watch.abort();
            }
        }
    }
}

/// End the session once the registry holds none of its connections.
///
/// With `await_first` the watch first waits for a connection to appear.
async fn watch_idle(
    registry: ConnectionRegistryHandle,
    lifecycle: Arc<Lifecycle>,
    await_first: bool,
) {
    let mut counts = registry.session_counts();
    let session_id = lifecycle.session_id.clone();

    if await_first
        && counts
            .wait_for(|live| live.contains_key(&session_id))
            .await
            .is_err()
    {
        return;
    }
    if counts
        .wait_for(|live| !live.contains_key(&session_id))
        .await
        .is_err()
    {
        return;
    }

    debug!(
        target: "rtc.session",
        session_id = %session_id,
        "No connections left, ending session"
    );
    lifecycle.finish(Some(&registry)).await;
}

//! `ConnectionActor` - one actor per remote participant.
//!
//! Each `ConnectionActor`:
//! - Owns the negotiation state machine of one peer connection
//! - Owns the connection's quality sampling task and adaptive controller
//! - Drives ICE-restart recovery with the backoff timer in its own loop
//! - Is the messaging endpoint of the connection's data channel
//!
//! All state changes of a connection are serialized through its mailbox;
//! different connections run in parallel.
//!
//! # Lifecycle
//!
//! 1. Spawned by the registry after the transport is created and local
//!    media plus the data channel are attached
//! 2. Runs until closed by the registry, cancelled, or the transport
//!    reports Closed
//! 3. Cancellation via child token propagates from the registry

use crate::adaptive::AdaptiveController;
use crate::config::Config;
use crate::errors::RtcError;
use crate::events::{EventSender, SessionEventKind};
use crate::messaging::{
    ChatMessage, DataChannelFrame, Delivered, DeliveryStatus, MessageDeduplicator, MessageFanout,
    MessageStream,
};
use crate::observability::metrics;
use crate::quality::{
    MonitorSettings, QualityLevel, QualityMonitor, QualityMonitorHandle, QualityReport,
    QualitySample,
};
use crate::recovery::{RecoveryAction, RecoverySupervisor};
use crate::transport::{
    IceCandidate, MediaTrack, PeerTransport, SessionDescription, SignalingMessage, SignalingSink,
};
use crate::types::{ConnectionKey, DataChannelState, NegotiationState, TransportState};

use super::messages::{ConnectionMessage, ConnectionSnapshot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
///
/// Requests to an actor that has exited fail with `ConnectionNotFound`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    key: ConnectionKey,
}

impl ConnectionHandle {
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Create the initial offer, hand it to signaling, and move to Offering.
    ///
    /// Only valid from New.
    pub async fn start_negotiation(&self) -> Result<SessionDescription, RtcError> {
        self.request(|respond_to| ConnectionMessage::StartNegotiation { respond_to })
            .await?
    }

    /// Apply a remote offer and return the answer (also sent via signaling).
    pub async fn handle_remote_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RtcError> {
        self.request(|respond_to| ConnectionMessage::RemoteOffer { offer, respond_to })
            .await?
    }

    pub async fn handle_remote_answer(&self, answer: SessionDescription) -> Result<(), RtcError> {
        self.request(|respond_to| ConnectionMessage::RemoteAnswer { answer, respond_to })
            .await?
    }

    pub async fn handle_remote_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        self.request(|respond_to| ConnectionMessage::RemoteCandidate {
            candidate,
            respond_to,
        })
        .await?
    }

    /// Send a chat message over the data channel.
    ///
    /// Fails immediately with `ChannelNotReady` unless the transport is
    /// connected and the channel open. Nothing is queued.
    pub async fn send_message(&self, message: ChatMessage) -> Result<Delivered, RtcError> {
        self.request(|respond_to| ConnectionMessage::SendChat {
            message,
            respond_to,
        })
        .await?
    }

    /// Send a read receipt for an inbound message.
    pub async fn mark_read(&self, message_id: impl Into<String>) -> Result<(), RtcError> {
        let message_id = message_id.into();
        self.request(|respond_to| ConnectionMessage::MarkRead {
            message_id,
            respond_to,
        })
        .await?
    }

    /// Subscribe to inbound chat messages.
    pub async fn on_message(&self) -> Result<MessageStream, RtcError> {
        self.request(|respond_to| ConnectionMessage::SubscribeMessages { respond_to })
            .await
    }

    /// Manual reconnection from the Failed state.
    pub async fn restart(&self) -> Result<(), RtcError> {
        self.request(|respond_to| ConnectionMessage::Restart { respond_to })
            .await?
    }

    pub async fn snapshot(&self) -> Result<ConnectionSnapshot, RtcError> {
        self.request(|respond_to| ConnectionMessage::GetSnapshot { respond_to })
            .await
    }

    pub async fn state(&self) -> Result<NegotiationState, RtcError> {
        Ok(self.snapshot().await?.state)
    }

    /// Close the connection and wait until its resources are released.
    pub(crate) async fn close(&self, reason: impl Into<String>) -> Result<(), RtcError> {
        let reason = reason.into();
        self.request(|respond_to| ConnectionMessage::Close { reason, respond_to })
            .await
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the actor has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ConnectionMessage,
    ) -> Result<T, RtcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    fn gone(&self) -> RtcError {
        RtcError::ConnectionNotFound(self.key.to_string())
    }
}

/// Everything a connection actor needs besides its mailbox.
pub(crate) struct ConnectionContext {
    pub transport: Arc<dyn PeerTransport>,
    pub signaling: Arc<dyn SignalingSink>,
    pub events: EventSender,
    pub config: Config,
    pub metrics: Arc<ActorMetrics>,
    pub local_track_ids: Vec<String>,
    /// Where the actor reports its key once it stops.
    pub exited: Option<mpsc::UnboundedSender<ConnectionKey>>,
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    key: ConnectionKey,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    transport: Arc<dyn PeerTransport>,
    signaling: Arc<dyn SignalingSink>,
    events: EventSender,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
    exited: Option<mpsc::UnboundedSender<ConnectionKey>>,

    state: NegotiationState,
    transport_state: TransportState,
    data_channel: DataChannelState,

    recovery: RecoverySupervisor,
    /// Deadline of the pending reconnection attempt.
    retry_at: Option<Instant>,
    reconnecting_since: Option<Instant>,

    adaptive: AdaptiveController,
    monitor: Option<QualityMonitorHandle>,
    quality_level: Option<QualityLevel>,
    last_sample: Option<QualitySample>,

    dedup: MessageDeduplicator,
    fanout: MessageFanout,

    local_track_ids: Vec<String>,
    remote_tracks: Vec<MediaTrack>,
}

impl ConnectionActor {
    /// Create the mailbox. The sender is also handed to the transport
    /// (via `TransportEventSender`) before the actor is spawned.
    pub(crate) fn channel() -> (
        mpsc::Sender<ConnectionMessage>,
        mpsc::Receiver<ConnectionMessage>,
    ) {
        mpsc::channel(CONNECTION_CHANNEL_BUFFER)
    }

    /// Spawn the actor and attach its quality monitor.
    ///
    /// Returns a handle and the task join handle.
    pub(crate) fn spawn(
        key: ConnectionKey,
        sender: mpsc::Sender<ConnectionMessage>,
        receiver: mpsc::Receiver<ConnectionMessage>,
        cancel_token: CancellationToken,
        context: ConnectionContext,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let config = context.config;
        let monitor = QualityMonitor::attach(
            key.clone(),
            Arc::clone(&context.transport),
            sender.clone(),
            MonitorSettings {
                interval: config.quality_sample_interval,
                max_bandwidth_bps: config.max_bandwidth_bps,
                failure_threshold: config.stats_failure_threshold,
            },
            cancel_token.child_token(),
        );

        let actor = Self {
            key: key.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            transport: context.transport,
            signaling: context.signaling,
            events: context.events,
            metrics: context.metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, key.to_string()),
            exited: context.exited,
            state: NegotiationState::New,
            transport_state: TransportState::New,
            data_channel: DataChannelState::Connecting,
            recovery: RecoverySupervisor::new(
                config.max_reconnect_attempts,
                config.reconnect_backoff_base,
            ),
            retry_at: None,
            reconnecting_since: None,
            adaptive: AdaptiveController::new(config.max_bandwidth_bps),
            monitor: Some(monitor),
            quality_level: None,
            last_sample: None,
            dedup: MessageDeduplicator::new(config.message_dedup_window),
            fanout: MessageFanout::new(),
            local_track_ids: context.local_track_ids,
            remote_tracks: Vec::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            key,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "rtc.actor.connection",
        fields(
            session_id = %self.key.session_id,
            participant_id = %self.key.participant_id
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "rtc.actor.connection",
            session_id = %self.key.session_id,
            participant_id = %self.key.participant_id,
            "ConnectionActor started"
        );

        loop {
            let retry_at = self.retry_at;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rtc.actor.connection",
                        participant_id = %self.key.participant_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.shutdown("cancelled").await;
                    break;
                }

                () = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.run_reconnect_attempt().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len() + 1);
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_processed(self.receiver.len());
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            self.shutdown("channel closed").await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rtc.actor.connection",
            session_id = %self.key.session_id,
            participant_id = %self.key.participant_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );

        // Handles observe the close before the registry hears of the exit
        self.receiver.close();
        if let Some(exited) = self.exited.take() {
            let _ = exited.send(self.key.clone());
        }
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::StartNegotiation { respond_to } => {
                let result = self.start_negotiation().await;
                let _ = respond_to.send(result);
            }
            ConnectionMessage::RemoteOffer { offer, respond_to } => {
                let result = self.handle_remote_offer(offer).await;
                let _ = respond_to.send(result);
            }
            ConnectionMessage::RemoteAnswer { answer, respond_to } => {
                let result = self.handle_remote_answer(answer).await;
                let _ = respond_to.send(result);
            }
            ConnectionMessage::RemoteCandidate {
                candidate,
                respond_to,
            } => {
                let result = self
                    .transport
                    .add_remote_candidate(&candidate)
                    .await
                    .map_err(RtcError::from);
                let _ = respond_to.send(result);
            }
            ConnectionMessage::SendChat {
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.send_chat(message));
            }
            ConnectionMessage::MarkRead {
                message_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.mark_read(message_id));
            }
            ConnectionMessage::SubscribeMessages { respond_to } => {
                let _ = respond_to.send(self.fanout.subscribe());
            }
            ConnectionMessage::Restart { respond_to } => {
                let _ = respond_to.send(self.restart());
            }
            ConnectionMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            ConnectionMessage::Close { reason, respond_to } => {
                self.shutdown(&reason).await;
                let _ = respond_to.send(());
                return true;
            }

            ConnectionMessage::TransportStateChanged { state } => {
                return self.handle_transport_state(state).await;
            }
            ConnectionMessage::DataChannelStateChanged { state } => {
                debug!(
                    target: "rtc.actor.connection",
                    participant_id = %self.key.participant_id,
                    from = self.data_channel.as_str(),
                    to = state.as_str(),
                    "Data channel state changed"
                );
                self.data_channel = state;
            }
            ConnectionMessage::DataReceived { data } => {
                self.handle_data(&data);
            }
            ConnectionMessage::LocalCandidate { candidate } => {
                let message = SignalingMessage::candidate(&self.key, candidate);
                if let Err(e) = self.signaling.send(message).await {
                    warn!(
                        target: "rtc.actor.connection",
                        participant_id = %self.key.participant_id,
                        error = %e,
                        "Failed to forward local candidate"
                    );
                }
            }
            ConnectionMessage::RemoteTrackAdded { track } => {
                if !self.remote_tracks.iter().any(|t| t.id == track.id) {
                    self.remote_tracks.push(track);
                }
            }
            ConnectionMessage::RemoteTrackRemoved { track_id } => {
                self.remote_tracks.retain(|t| t.id != track_id);
            }

            ConnectionMessage::Quality { report } => {
                self.handle_quality(report).await;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    async fn start_negotiation(&mut self) -> Result<SessionDescription, RtcError> {
        if self.state != NegotiationState::New {
            return Err(RtcError::InvalidTransition {
                from: self.state,
                to: NegotiationState::Offering,
            });
        }

        let offer = self
            .transport
            .create_offer(false)
            .await
            .map_err(|e| RtcError::Negotiation(format!("offer creation failed: {e}")))?;
        self.signaling
            .send(SignalingMessage::offer(&self.key, offer.clone()))
            .await
            .map_err(|e| RtcError::Negotiation(format!("offer signaling failed: {e}")))?;

        self.transition(NegotiationState::Offering)?;
        Ok(offer)
    }

    async fn handle_remote_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RtcError> {
        let answer = self
            .transport
            .create_answer(&offer)
            .await
            .map_err(|e| RtcError::Negotiation(format!("answer creation failed: {e}")))?;
        self.signaling
            .send(SignalingMessage::answer(&self.key, answer.clone()))
            .await
            .map_err(|e| RtcError::Negotiation(format!("answer signaling failed: {e}")))?;

        // Renegotiation on an established connection keeps its state; the
        // transport's connectivity signal decides what comes next.
        if matches!(
            self.state,
            NegotiationState::New | NegotiationState::Offering
        ) {
            self.transition(NegotiationState::Answering)?;
        }
        Ok(answer)
    }

    async fn handle_remote_answer(&mut self, answer: SessionDescription) -> Result<(), RtcError> {
        if matches!(
            self.state,
            NegotiationState::New | NegotiationState::Answering
        ) {
            return Err(RtcError::Negotiation(
                "answer received without a pending local offer".to_string(),
            ));
        }

        self.transport
            .apply_answer(&answer)
            .await
            .map_err(|e| RtcError::Negotiation(format!("applying answer failed: {e}")))
    }

    fn transition(&mut self, to: NegotiationState) -> Result<(), RtcError> {
        let from = self.state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(RtcError::InvalidTransition { from, to });
        }

        self.state = to;
        metrics::record_connection_transition(to.as_str());
        info!(
            target: "rtc.actor.connection",
            session_id = %self.key.session_id,
            participant_id = %self.key.participant_id,
            from = from.as_str(),
            to = to.as_str(),
            "Negotiation state changed"
        );
        self.events
            .emit(&self.key, SessionEventKind::ConnectionStateChanged { from, to });
        Ok(())
    }

    fn transition_or_log(&mut self, to: NegotiationState) {
        if let Err(e) = self.transition(to) {
            warn!(
                target: "rtc.actor.connection",
                participant_id = %self.key.participant_id,
                error = %e,
                "Ignoring state change"
            );
        }
    }

    // ------------------------------------------------------------------
    // Connectivity and recovery
    // ------------------------------------------------------------------

    /// Returns true if the actor should exit.
    async fn handle_transport_state(&mut self, state: TransportState) -> bool {
        let previous = self.transport_state;
        self.transport_state = state;
        debug!(
            target: "rtc.actor.connection",
            participant_id = %self.key.participant_id,
            from = previous.as_str(),
            to = state.as_str(),
            "Transport state changed"
        );

        match state {
            TransportState::Connected => {
                self.retry_at = None;
                if let RecoveryAction::Recovered { .. } = self.recovery.on_transport_state(state) {
                    self.adaptive.reset();
                }
                if let Some(since) = self.reconnecting_since.take() {
                    metrics::record_recovery_duration(since.elapsed());
                }
                self.transition_or_log(NegotiationState::Connected);
                false
            }
            TransportState::Disconnected | TransportState::Failed => {
                let action = self.recovery.on_transport_state(state);
                self.apply_recovery_action(action);
                false
            }
            TransportState::Closed => {
                self.shutdown("transport closed").await;
                true
            }
            TransportState::New | TransportState::Connecting => false,
        }
    }

    fn apply_recovery_action(&mut self, action: RecoveryAction) {
        match action {
            RecoveryAction::Retry { attempt, delay } => {
                let now = Instant::now();
                self.retry_at = Some(now + delay);
                self.reconnecting_since.get_or_insert(now);
                info!(
                    target: "rtc.recovery",
                    session_id = %self.key.session_id,
                    participant_id = %self.key.participant_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnection scheduled"
                );
                self.transition_or_log(NegotiationState::Reconnecting);
            }
            RecoveryAction::Exhausted { attempts } => {
                self.retry_at = None;
                self.reconnecting_since = None;
                self.transition_or_log(NegotiationState::Failed);
                metrics::record_recovery_exhausted();
                warn!(
                    target: "rtc.recovery",
                    session_id = %self.key.session_id,
                    participant_id = %self.key.participant_id,
                    attempts = attempts,
                    "Connection recovery exhausted"
                );
                self.events
                    .emit(&self.key, SessionEventKind::RecoveryExhausted { attempts });
            }
            RecoveryAction::AlreadyScheduled
            | RecoveryAction::Recovered { .. }
            | RecoveryAction::None => {}
        }
    }

    async fn run_reconnect_attempt(&mut self) {
        self.recovery.on_attempt_started();
        let attempt = self.recovery.attempts();
        metrics::record_reconnect_attempt();
        info!(
            target: "rtc.recovery",
            session_id = %self.key.session_id,
            participant_id = %self.key.participant_id,
            attempt = attempt,
            "Attempting ICE restart"
        );

        let result = match self.transport.create_offer(true).await {
            Ok(offer) => self
                .signaling
                .send(SignalingMessage::offer(&self.key, offer))
                .await
                .map_err(|e| format!("restart offer signaling failed: {e}")),
            Err(e) => Err(format!("restart offer creation failed: {e}")),
        };

        if let Err(reason) = result {
            warn!(
                target: "rtc.recovery",
                participant_id = %self.key.participant_id,
                attempt = attempt,
                error = %reason,
                "Reconnection attempt failed"
            );
            let action = self.recovery.on_attempt_failed();
            self.apply_recovery_action(action);
        }
    }

    fn restart(&mut self) -> Result<(), RtcError> {
        if self.state != NegotiationState::Failed {
            return Err(RtcError::InvalidTransition {
                from: self.state,
                to: NegotiationState::Reconnecting,
            });
        }
        let action = self.recovery.manual_restart();
        self.apply_recovery_action(action);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Quality and adaptation
    // ------------------------------------------------------------------

    async fn handle_quality(&mut self, report: QualityReport) {
        let (level, sample) = match report {
            QualityReport::Sample(sample) => (sample.level, Some(sample)),
            QualityReport::Unknown {
                consecutive_failures,
            } => {
                debug!(
                    target: "rtc.quality",
                    participant_id = %self.key.participant_id,
                    consecutive_failures = consecutive_failures,
                    "Quality unknown"
                );
                (QualityLevel::Unknown, None)
            }
        };

        self.last_sample = sample.clone();
        if self.quality_level != Some(level) {
            self.quality_level = Some(level);
            self.events
                .emit(&self.key, SessionEventKind::QualityChanged { level, sample });
        }

        if self.state == NegotiationState::Connected {
            self.adaptive.apply(level, self.transport.as_ref()).await;
        }
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    fn channel_ready(&self) -> bool {
        self.transport_state == TransportState::Connected
            && self.data_channel == DataChannelState::Open
    }

    fn send_chat(&mut self, mut message: ChatMessage) -> Result<Delivered, RtcError> {
        if !self.channel_ready() {
            metrics::record_message_sent("not_ready");
            return Err(RtcError::ChannelNotReady);
        }

        message.flags.sent = true;
        let message_id = message.id.clone();
        let content_len = message.content.len();
        let data = DataChannelFrame::Chat { message }.encode()?;

        match self.transport.send_data(data) {
            Ok(()) => {
                metrics::record_message_sent("success");
                debug!(
                    target: "rtc.messaging",
                    participant_id = %self.key.participant_id,
                    message_id = %message_id,
                    content_len = content_len,
                    "Chat message sent"
                );
                Ok(Delivered {
                    message_id,
                    sent_at: Utc::now(),
                })
            }
            Err(e) => {
                metrics::record_message_sent("error");
                Err(RtcError::SendFailed(e.to_string()))
            }
        }
    }

    fn mark_read(&mut self, message_id: String) -> Result<(), RtcError> {
        if !self.channel_ready() {
            return Err(RtcError::ChannelNotReady);
        }
        let frame = DataChannelFrame::Receipt {
            message_id,
            status: DeliveryStatus::Read,
        };
        self.transport
            .send_data(frame.encode()?)
            .map_err(|e| RtcError::SendFailed(e.to_string()))
    }

    fn handle_data(&mut self, data: &Bytes) {
        let frame = match DataChannelFrame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::record_frame_rejected();
                warn!(
                    target: "rtc.messaging",
                    participant_id = %self.key.participant_id,
                    frame_len = data.len(),
                    error = %e,
                    "Dropping undecodable data channel frame"
                );
                return;
            }
        };

        match frame {
            DataChannelFrame::Chat { mut message } => {
                if !self.dedup.insert(&message.id) {
                    metrics::record_message_deduplicated();
                    debug!(
                        target: "rtc.messaging",
                        participant_id = %self.key.participant_id,
                        message_id = %message.id,
                        "Duplicate message ignored"
                    );
                    return;
                }

                message.flags.delivered = true;
                self.send_receipt(&message.id, DeliveryStatus::Delivered);
                metrics::record_message_received();

                self.fanout.publish(&message);
                self.events
                    .emit(&self.key, SessionEventKind::MessageReceived { message });
            }
            DataChannelFrame::Receipt { message_id, status } => {
                debug!(
                    target: "rtc.messaging",
                    participant_id = %self.key.participant_id,
                    message_id = %message_id,
                    status = status.as_str(),
                    "Receipt received"
                );
                self.events.emit(
                    &self.key,
                    SessionEventKind::MessageAcknowledged { message_id, status },
                );
            }
        }
    }

    /// Best-effort receipt; failures are only logged.
    fn send_receipt(&self, message_id: &str, status: DeliveryStatus) {
        if !self.channel_ready() {
            return;
        }
        let frame = DataChannelFrame::Receipt {
            message_id: message_id.to_string(),
            status,
        };
        let sent = frame
            .encode()
            .and_then(|data| self.transport.send_data(data).map_err(RtcError::from));
        if let Err(e) = sent {
            debug!(
                target: "rtc.messaging",
                participant_id = %self.key.participant_id,
                error = %e,
                "Receipt not sent"
            );
        }
    }

    // ------------------------------------------------------------------
    // Snapshot and teardown
    // ------------------------------------------------------------------

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            key: self.key.clone(),
            state: self.state,
            transport_state: self.transport_state,
            data_channel: self.data_channel,
            reconnect_attempts: self.recovery.attempts(),
            retry_pending: self.retry_at.is_some(),
            quality_level: self.quality_level,
            last_sample: self.last_sample.clone(),
            applied_bitrate_bps: self.adaptive.applied_bps(),
            local_track_ids: self.local_track_ids.clone(),
            remote_track_ids: self.remote_tracks.iter().map(|t| t.id.clone()).collect(),
        }
    }

    /// Release everything this connection owns. The session's local media
    /// is only dereferenced, never stopped.
    async fn shutdown(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }

        debug!(
            target: "rtc.actor.connection",
            participant_id = %self.key.participant_id,
            reason = %reason,
            "Closing connection"
        );

        self.retry_at = None;
        self.reconnecting_since = None;
        self.recovery.cancel_pending();

        if let Some(monitor) = self.monitor.take() {
            monitor.detach().await;
        }

        if self.data_channel != DataChannelState::Closed {
            self.transport.close_data_channel().await;
            self.data_channel = DataChannelState::Closed;
        }
        self.transport.close().await;
        self.transport_state = TransportState::Closed;

        self.local_track_ids.clear();
        self.remote_tracks.clear();
        self.fanout.close();

        self.transition_or_log(NegotiationState::Closed);
    }
}

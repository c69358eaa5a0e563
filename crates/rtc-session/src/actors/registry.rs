//! `ConnectionRegistryActor` - single owner of a session's peer connections.
//!
//! The registry is the top-level actor of the connection hierarchy:
//!
//! - One per session (owned by `Session`)
//! - Supervises N `ConnectionActor` instances keyed by (session, participant)
//! - Creates transports through the injected factory and attaches the
//!   session's local media plus the data channel before a connection starts
//! - Owns the root `CancellationToken` of its connections
//! - Reaps connection actors that exit on their own and detects panics
//! - Publishes the live connection count of every session
//!
//! # Shutdown
//!
//! `shutdown()` closes every connection, stops accepting new ones and ends
//! the actor. Cancelling the handle does the same without a reply.

use crate::config::Config;
use crate::errors::RtcError;
use crate::events::EventSender;
use crate::transport::{
    DataChannelConfig, IceCandidate, MediaHandle, PeerTransport, SessionDescription,
    SignalingSink, TransportEventSender, TransportFactory,
};
use crate::types::ConnectionKey;

use super::connection::{ConnectionActor, ConnectionContext, ConnectionHandle};
use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 500;

/// How long a removed connection task may take to finish.
const CONNECTION_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `ConnectionRegistryActor`.
///
/// All methods fail with `RegistryClosed` once the registry has shut down.
#[derive(Clone, Debug)]
pub struct ConnectionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    session_counts: watch::Receiver<BTreeMap<String, usize>>,
}

impl ConnectionRegistryHandle {
    /// Spawn a registry actor and return its handle.
    ///
    /// # Arguments
    ///
    /// * `config` - Sampling, adaptation, recovery and messaging settings
    /// * `transports` - Factory for per-connection transports
    /// * `signaling` - Outbound signaling sink shared by all connections
    /// * `events` - UI event producer
    /// * `local_media` - Session media attached to every new transport
    ///
    /// # Errors
    ///
    /// Returns `RtcError::Config` if `config` does not validate.
    pub fn new(
        config: Config,
        transports: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingSink>,
        events: EventSender,
        local_media: Option<MediaHandle>,
    ) -> Result<Self, RtcError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        // Unbounded: each connection reports at most once
        let (exit_sender, exits) = mpsc::unbounded_channel();
        let (counts, session_counts) = watch::channel(BTreeMap::new());
        let cancel_token = CancellationToken::new();

        let actor = ConnectionRegistryActor {
            receiver,
            exits,
            exit_sender,
            counts,
            cancel_token: cancel_token.clone(),
            connections: BTreeMap::new(),
            accepting: true,
            config,
            transports,
            signaling,
            events,
            local_media,
            metrics: ActorMetrics::new(),
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        tokio::spawn(actor.run());

        Ok(Self {
            sender,
            cancel_token,
            session_counts,
        })
    }

    /// Create the connection for (session, participant) in state New.
    pub async fn create(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<ConnectionHandle, RtcError> {
        let key = ConnectionKey::new(session_id, participant_id);
        self.request(|respond_to| RegistryMessage::Create { key, respond_to })
            .await?
    }

    pub async fn get(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<Option<ConnectionHandle>, RtcError> {
        let key = ConnectionKey::new(session_id, participant_id);
        self.request(|respond_to| RegistryMessage::Get { key, respond_to })
            .await
    }

    /// Connections of a session, ordered by participant id.
    pub async fn list(
        &self,
        session_id: impl Into<String>,
    ) -> Result<Vec<ConnectionHandle>, RtcError> {
        let session_id = session_id.into();
        self.request(|respond_to| RegistryMessage::List {
            session_id,
            respond_to,
        })
        .await
    }

    pub async fn count(&self, session_id: impl Into<String>) -> Result<usize, RtcError> {
        Ok(self.list(session_id).await?.len())
    }

    /// Close one connection. Closing an unknown connection is a no-op.
    pub async fn close(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<(), RtcError> {
        let key = ConnectionKey::new(session_id, participant_id);
        self.request(|respond_to| RegistryMessage::Close { key, respond_to })
            .await
    }

    /// Close every connection of a session. Returns how many were closed.
    pub async fn close_all(&self, session_id: impl Into<String>) -> Result<usize, RtcError> {
        let session_id = session_id.into();
        self.request(|respond_to| RegistryMessage::CloseAll {
            session_id,
            respond_to,
        })
        .await
    }

    /// Route a remote offer to its connection and return the answer.
    pub async fn handle_remote_offer(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RtcError> {
        self.require(session_id, participant_id)
            .await?
            .handle_remote_offer(offer)
            .await
    }

    pub async fn handle_remote_answer(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        answer: SessionDescription,
    ) -> Result<(), RtcError> {
        self.require(session_id, participant_id)
            .await?
            .handle_remote_answer(answer)
            .await
    }

    pub async fn handle_remote_candidate(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        candidate: IceCandidate,
    ) -> Result<(), RtcError> {
        self.require(session_id, participant_id)
            .await?
            .handle_remote_candidate(candidate)
            .await
    }

    pub async fn status(&self) -> Result<RegistryStatus, RtcError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Close everything and stop the registry.
    pub async fn shutdown(&self) -> Result<(), RtcError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await
    }

    /// Live connection count per session id. Sessions without connections
    /// are absent.
    #[must_use]
    pub fn session_counts(&self) -> watch::Receiver<BTreeMap<String, usize>> {
        self.session_counts.clone()
    }

    /// Cancel the actor (immediate shutdown, no reply).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn require(
        &self,
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<ConnectionHandle, RtcError> {
        let key = ConnectionKey::new(session_id, participant_id);
        let missing = key.to_string();
        self.request(|respond_to| RegistryMessage::Get { key, respond_to })
            .await?
            .ok_or(RtcError::ConnectionNotFound(missing))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, RtcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RtcError::RegistryClosed)?;
        rx.await.map_err(|_| RtcError::RegistryClosed)
    }
}

/// Internal state for a managed connection.
struct ManagedConnection {
    handle: ConnectionHandle,
    task_handle: JoinHandle<()>,
}

impl ManagedConnection {
    /// False once the actor stopped taking messages, even if its task has
    /// not been reaped yet.
    fn is_alive(&self) -> bool {
        !self.task_handle.is_finished() && !self.handle.is_closed()
    }
}

/// The `ConnectionRegistryActor` implementation.
pub struct ConnectionRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Keys of connection actors that stopped on their own.
    exits: mpsc::UnboundedReceiver<ConnectionKey>,
    exit_sender: mpsc::UnboundedSender<ConnectionKey>,
    counts: watch::Sender<BTreeMap<String, usize>>,
    /// Root token of all connection actors.
    cancel_token: CancellationToken,
    connections: BTreeMap<ConnectionKey, ManagedConnection>,
    accepting: bool,
    config: Config,
    transports: Arc<dyn TransportFactory>,
    signaling: Arc<dyn SignalingSink>,
    events: EventSender,
    local_media: Option<MediaHandle>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionRegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "rtc.actor.registry")]
    async fn run(mut self) {
        info!(target: "rtc.actor.registry", "ConnectionRegistryActor started");

        loop {
            // Reap connection actors that exited on their own
            self.check_connection_health();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rtc.actor.registry",
                        "ConnectionRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                Some(key) = self.exits.recv() => {
                    self.reap_if_stopped(&key);
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
                            info!(
                                target: "rtc.actor.registry",
                                "ConnectionRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rtc.actor.registry",
            connections_remaining = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionRegistryActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: RegistryMessage) -> bool {
        match message {
            RegistryMessage::Create { key, respond_to } => {
                let result = self.create_connection(key).await;
                let _ = respond_to.send(result);
            }
            RegistryMessage::Get { key, respond_to } => {
                let handle = self
                    .connections
                    .get(&key)
                    .filter(|managed| managed.is_alive())
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(handle);
            }
            RegistryMessage::List {
                session_id,
                respond_to,
            } => {
                let handles = self
                    .connections
                    .iter()
                    .filter(|(key, managed)| key.session_id == session_id && managed.is_alive())
                    .map(|(_, managed)| managed.handle.clone())
                    .collect();
                let _ = respond_to.send(handles);
            }
            RegistryMessage::Close { key, respond_to } => {
                self.close_connection(&key, "closed by caller").await;
                let _ = respond_to.send(());
            }
            RegistryMessage::CloseAll {
                session_id,
                respond_to,
            } => {
                let closed = self.close_session(&session_id).await;
                let _ = respond_to.send(closed);
            }
            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            RegistryMessage::Shutdown { respond_to } => {
                self.accepting = false;
                let keys: Vec<ConnectionKey> = self.connections.keys().cloned().collect();
                for key in keys {
                    self.close_connection(&key, "registry shutdown").await;
                }
                info!(target: "rtc.actor.registry", "Registry shut down");
                let _ = respond_to.send(());
                return true;
            }
        }
        false
    }

    async fn create_connection(&mut self, key: ConnectionKey) -> Result<ConnectionHandle, RtcError> {
        if !self.accepting {
            return Err(RtcError::RegistryClosed);
        }
        match self.connections.get(&key).map(ManagedConnection::is_alive) {
            Some(true) => return Err(RtcError::DuplicateConnection(key.to_string())),
            // Stopped on its own, exit not processed yet
            Some(false) => self.reap_if_stopped(&key),
            None => {}
        }

        debug!(
            target: "rtc.actor.registry",
            session_id = %key.session_id,
            participant_id = %key.participant_id,
            "Creating connection"
        );

        let (sender, receiver) = ConnectionActor::channel();
        let transport_events = TransportEventSender::new(key.clone(), sender.clone());
        let transport = self.transports.create(&key, transport_events).await?;

        if let Err(e) = self.prepare_transport(transport.as_ref()).await {
            warn!(
                target: "rtc.actor.registry",
                session_id = %key.session_id,
                participant_id = %key.participant_id,
                error = %e,
                "Transport setup failed, releasing it"
            );
            transport.close().await;
            return Err(e);
        }

        let context = ConnectionContext {
            transport,
            signaling: Arc::clone(&self.signaling),
            events: self.events.clone(),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
            exited: Some(self.exit_sender.clone()),
            local_track_ids: self
                .local_media
                .as_ref()
                .map(MediaHandle::track_ids)
                .unwrap_or_default(),
        };
        let (handle, task_handle) = ConnectionActor::spawn(
            key.clone(),
            sender,
            receiver,
            self.cancel_token.child_token(),
            context,
        );

        self.connections.insert(
            key.clone(),
            ManagedConnection {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.connection_created();
        self.publish_counts();

        info!(
            target: "rtc.actor.registry",
            session_id = %key.session_id,
            participant_id = %key.participant_id,
            total_connections = self.connections.len(),
            "Connection created"
        );

        Ok(handle)
    }

    /// Attach local media and open the data channel.
    async fn prepare_transport(&self, transport: &dyn PeerTransport) -> Result<(), RtcError> {
        if let Some(media) = &self.local_media {
            transport.attach_local_media(media).await?;
        }
        transport
            .open_data_channel(&DataChannelConfig::default())
            .await?;
        Ok(())
    }

    /// Close one connection. Returns false if it was not registered.
    ///
    /// Waits for the connection to release its resources, then joins the
    /// task in the background.
    async fn close_connection(&mut self, key: &ConnectionKey, reason: &str) -> bool {
        let Some(managed) = self.connections.remove(key) else {
            return false;
        };

        // The actor may already have exited; close is best-effort then.
        if let Err(e) = managed.handle.close(reason).await {
            debug!(
                target: "rtc.actor.registry",
                session_id = %key.session_id,
                participant_id = %key.participant_id,
                error = %e,
                "Connection already stopped"
            );
        }

        self.join_in_background(key.clone(), managed.task_handle);
        self.metrics.connection_closed();
        self.publish_counts();

        info!(
            target: "rtc.actor.registry",
            session_id = %key.session_id,
            participant_id = %key.participant_id,
            reason = %reason,
            total_connections = self.connections.len(),
            "Connection closed"
        );
        true
    }

    async fn close_session(&mut self, session_id: &str) -> usize {
        let keys: Vec<ConnectionKey> = self
            .connections
            .keys()
            .filter(|key| key.session_id == session_id)
            .cloned()
            .collect();

        let mut closed = 0;
        for key in keys {
            if self.close_connection(&key, "session closed").await {
                closed += 1;
            }
        }
        closed
    }

    fn status(&self) -> RegistryStatus {
        let sessions: BTreeSet<&str> = self
            .connections
            .keys()
            .map(|key| key.session_id.as_str())
            .collect();
        RegistryStatus {
            connections: self.connections.len(),
            sessions: sessions.len(),
            accepting: self.accepting,
        }
    }

    fn publish_counts(&self) {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for key in self.connections.keys() {
            *counts.entry(key.session_id.clone()).or_default() += 1;
        }
        self.counts.send_replace(counts);
    }

    /// Cancel and await every connection actor.
    async fn graceful_shutdown(&mut self) {
        self.accepting = false;

        for managed in self.connections.values() {
            managed.handle.cancel();
        }

        let connections = std::mem::take(&mut self.connections);
        self.publish_counts();
        for (key, managed) in connections {
            match tokio::time::timeout(CONNECTION_JOIN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rtc.actor.registry",
                        connection = %key,
                        "Connection actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rtc.actor.registry",
                        connection = %key,
                        error = ?e,
                        "Connection actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rtc.actor.registry",
                        connection = %key,
                        "Connection actor shutdown timed out"
                    );
                }
            }
            self.metrics.connection_closed();
        }

        info!(target: "rtc.actor.registry", "Graceful shutdown complete");
    }

    /// Remove connection actors whose task has finished.
    fn check_connection_health(&mut self) {
        let finished: Vec<ConnectionKey> = self
            .connections
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for key in finished {
            self.reap_if_stopped(&key);
        }
    }

    /// Drop the entry for `key` if its actor has stopped taking messages.
    ///
    /// A late exit report for a key that was closed and created again finds
    /// a live actor and leaves it alone.
    fn reap_if_stopped(&mut self, key: &ConnectionKey) {
        let stopped = self
            .connections
            .get(key)
            .is_some_and(|managed| !managed.is_alive());
        if !stopped {
            return;
        }
        let Some(managed) = self.connections.remove(key) else {
            return;
        };

        self.join_in_background(key.clone(), managed.task_handle);
        self.metrics.connection_closed();
        self.publish_counts();

        info!(
            target: "rtc.actor.registry",
            session_id = %key.session_id,
            participant_id = %key.participant_id,
            total_connections = self.connections.len(),
            "Connection actor exited on its own"
        );
    }

    /// Await a removed connection task with a timeout, reporting panics.
    fn join_in_background(&self, key: ConnectionKey, task_handle: JoinHandle<()>) {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match tokio::time::timeout(CONNECTION_JOIN_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rtc.actor.registry",
                        connection = %key,
                        "Connection actor task completed cleanly"
                    );
                }
                Ok(Err(join_error)) => {
                    if join_error.is_panic() {
                        error!(
                            target: "rtc.actor.registry",
                            session_id = %key.session_id,
                            participant_id = %key.participant_id,
                            error = ?join_error,
                            "Connection actor panicked"
                        );
                        metrics.record_panic(ActorType::Connection);
                    }
                }
                Err(_) => {
                    warn!(
                        target: "rtc.actor.registry",
                        connection = %key,
                        "Connection actor task cleanup timed out"
                    );
                }
            }
        });
    }
}

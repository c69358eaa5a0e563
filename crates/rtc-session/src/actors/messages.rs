//! Mailbox message types for the actor hierarchy.

use crate::errors::RtcError;
use crate::messaging::{ChatMessage, Delivered, MessageStream};
use crate::quality::{QualityLevel, QualityReport, QualitySample};
use crate::transport::{IceCandidate, MediaTrack, SessionDescription};
use crate::types::{ConnectionKey, DataChannelState, NegotiationState, TransportState};

use super::connection::ConnectionHandle;

use bytes::Bytes;
use tokio::sync::oneshot;

/// Messages handled by the `ConnectionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    Create {
        key: ConnectionKey,
        respond_to: oneshot::Sender<Result<ConnectionHandle, RtcError>>,
    },
    Get {
        key: ConnectionKey,
        respond_to: oneshot::Sender<Option<ConnectionHandle>>,
    },
    List {
        session_id: String,
        respond_to: oneshot::Sender<Vec<ConnectionHandle>>,
    },
    Close {
        key: ConnectionKey,
        respond_to: oneshot::Sender<()>,
    },
    /// Replies with the number of connections closed.
    CloseAll {
        session_id: String,
        respond_to: oneshot::Sender<usize>,
    },
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Messages handled by a `ConnectionActor`.
///
/// Caller requests carry a `respond_to` channel; transport and monitor
/// notifications do not.
#[derive(Debug)]
pub enum ConnectionMessage {
    // ---- caller requests ----
    StartNegotiation {
        respond_to: oneshot::Sender<Result<SessionDescription, RtcError>>,
    },
    RemoteOffer {
        offer: SessionDescription,
        respond_to: oneshot::Sender<Result<SessionDescription, RtcError>>,
    },
    RemoteAnswer {
        answer: SessionDescription,
        respond_to: oneshot::Sender<Result<(), RtcError>>,
    },
    RemoteCandidate {
        candidate: IceCandidate,
        respond_to: oneshot::Sender<Result<(), RtcError>>,
    },
    SendChat {
        message: ChatMessage,
        respond_to: oneshot::Sender<Result<Delivered, RtcError>>,
    },
    MarkRead {
        message_id: String,
        respond_to: oneshot::Sender<Result<(), RtcError>>,
    },
    SubscribeMessages {
        respond_to: oneshot::Sender<MessageStream>,
    },
    Restart {
        respond_to: oneshot::Sender<Result<(), RtcError>>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<ConnectionSnapshot>,
    },
    Close {
        reason: String,
        respond_to: oneshot::Sender<()>,
    },

    // ---- transport callbacks ----
    TransportStateChanged {
        state: TransportState,
    },
    DataChannelStateChanged {
        state: DataChannelState,
    },
    DataReceived {
        data: Bytes,
    },
    LocalCandidate {
        candidate: IceCandidate,
    },
    RemoteTrackAdded {
        track: MediaTrack,
    },
    RemoteTrackRemoved {
        track_id: String,
    },

    // ---- quality monitor ----
    Quality {
        report: QualityReport,
    },
}

/// Read-only view of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub key: ConnectionKey,
    pub state: NegotiationState,
    pub transport_state: TransportState,
    pub data_channel: DataChannelState,
    pub reconnect_attempts: u32,
    pub retry_pending: bool,
    pub quality_level: Option<QualityLevel>,
    pub last_sample: Option<QualitySample>,
    pub applied_bitrate_bps: Option<u64>,
    pub local_track_ids: Vec<String>,
    pub remote_track_ids: Vec<String>,
}

/// Registry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub connections: usize,
    pub sessions: usize,
    pub accepting: bool,
}

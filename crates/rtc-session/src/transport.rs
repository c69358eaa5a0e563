//! Collaborator boundary: peer transport, signaling, media capture and
//! network probing.
//!
//! The core never talks to an ICE/DTLS stack, a signaling server or a camera
//! directly. It drives the traits below, and the transport pushes its
//! asynchronous events back through a [`TransportEventSender`].

use crate::actors::messages::ConnectionMessage;
use crate::errors::{MediaError, TransportError};
use crate::negotiator::MediaConstraintProfile;
use crate::quality::StatsReport;
use crate::types::{ConnectionKey, DataChannelState, TransportState};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Signaling message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingKind {
    Offer,
    Answer,
    Candidate,
}

/// Signaling payload: a description for offers/answers, a candidate otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalingPayload {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

/// Message handed to the signaling collaborator.
///
/// Serializes as `{"type":"offer","session_id":..,"participant_id":..,"payload":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalingKind,
    pub session_id: String,
    pub participant_id: String,
    pub payload: SignalingPayload,
}

impl SignalingMessage {
    #[must_use]
    pub fn offer(key: &ConnectionKey, offer: SessionDescription) -> Self {
        Self::new(key, SignalingKind::Offer, SignalingPayload::Description(offer))
    }

    #[must_use]
    pub fn answer(key: &ConnectionKey, answer: SessionDescription) -> Self {
        Self::new(key, SignalingKind::Answer, SignalingPayload::Description(answer))
    }

    #[must_use]
    pub fn candidate(key: &ConnectionKey, candidate: IceCandidate) -> Self {
        Self::new(key, SignalingKind::Candidate, SignalingPayload::Candidate(candidate))
    }

    fn new(key: &ConnectionKey, kind: SignalingKind, payload: SignalingPayload) -> Self {
        Self {
            kind,
            session_id: key.session_id.clone(),
            participant_id: key.participant_id.clone(),
            payload,
        }
    }
}

/// Media track kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Reference to a media track (by id only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: MediaKind,
}

/// Descriptor of acquired local media.
///
/// Owned by the session and shared read-only with every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaHandle {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
    pub profile: MediaConstraintProfile,
}

impl MediaHandle {
    /// Ids of all tracks in this handle.
    #[must_use]
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }
}

/// A video input device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInputCapability {
    pub device_id: String,
    pub max_width: u32,
    pub max_height: u32,
}

/// Result of device enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub video_inputs: Vec<VideoInputCapability>,
    pub audio_inputs: usize,
}

/// Minimum capture height for the device to count as HD-capable.
pub const HIGH_QUALITY_MIN_HEIGHT: u32 = 720;

impl DeviceCapabilities {
    /// Whether any video input can capture at 720p or above.
    #[must_use]
    pub fn supports_high_quality(&self) -> bool {
        self.video_inputs
            .iter()
            .any(|v| v.max_height >= HIGH_QUALITY_MIN_HEIGHT)
    }
}

/// Downlink bandwidth estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownlinkEstimate {
    pub mbps: f64,
}

/// Data channel parameters. The chat channel is always ordered and reliable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelConfig {
    pub label: String,
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            label: "chat".to_string(),
            ordered: true,
            max_retransmits: None,
        }
    }
}

/// One peer connection's transport.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create a local offer. `ice_restart` requests fresh ICE credentials.
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError>;

    /// Apply a remote offer and produce the local answer.
    async fn create_answer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    /// Apply the remote answer to a previously created offer.
    async fn apply_answer(&self, answer: &SessionDescription) -> Result<(), TransportError>;

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Attach the session's local tracks to this transport.
    async fn attach_local_media(&self, media: &MediaHandle) -> Result<(), TransportError>;

    async fn open_data_channel(&self, config: &DataChannelConfig) -> Result<(), TransportError>;

    /// Write one frame to the data channel without waiting for the remote.
    fn send_data(&self, data: Bytes) -> Result<(), TransportError>;

    async fn read_stats(&self) -> Result<StatsReport, TransportError>;

    /// Cap the outgoing video encoder bitrate.
    async fn set_video_bitrate(&self, bits_per_second: u64) -> Result<(), TransportError>;

    async fn close_data_channel(&self);

    async fn close(&self);
}

/// Creates transports for new connections.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        key: &ConnectionKey,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

/// Outbound signaling.
#[async_trait]
pub trait SignalingSink: Send + Sync {
    async fn send(&self, message: SignalingMessage) -> Result<(), TransportError>;
}

/// Local media capture.
#[async_trait]
pub trait MediaCaptureProvider: Send + Sync {
    async fn acquire_local_media(
        &self,
        profile: &MediaConstraintProfile,
    ) -> Result<MediaHandle, MediaError>;

    async fn release_local_media(&self, handle: &MediaHandle);

    async fn enumerate_devices(&self) -> Result<DeviceCapabilities, MediaError>;
}

/// Network bandwidth probing.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn estimate_downlink(&self) -> Result<DownlinkEstimate, TransportError>;
}

/// Injected collaborators for a session.
#[derive(Clone)]
pub struct Collaborators {
    pub transports: Arc<dyn TransportFactory>,
    pub signaling: Arc<dyn SignalingSink>,
    pub media: Arc<dyn MediaCaptureProvider>,
    pub network: Arc<dyn NetworkProbe>,
}

/// Channel through which a transport reports events to its connection actor.
///
/// All methods are non-blocking and return `false` if the event could not
/// be delivered (mailbox full or connection gone).
#[derive(Clone, Debug)]
pub struct TransportEventSender {
    key: ConnectionKey,
    sender: mpsc::Sender<ConnectionMessage>,
}

impl TransportEventSender {
    pub(crate) fn new(key: ConnectionKey, sender: mpsc::Sender<ConnectionMessage>) -> Self {
        Self { key, sender }
    }

    /// Key of the connection this sender reports to.
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn connectivity_changed(&self, state: TransportState) -> bool {
        self.deliver(ConnectionMessage::TransportStateChanged { state }, "connectivity")
    }

    pub fn data_channel_changed(&self, state: DataChannelState) -> bool {
        self.deliver(
            ConnectionMessage::DataChannelStateChanged { state },
            "data_channel",
        )
    }

    pub fn data_received(&self, data: Bytes) -> bool {
        self.deliver(ConnectionMessage::DataReceived { data }, "data")
    }

    pub fn local_candidate(&self, candidate: IceCandidate) -> bool {
        self.deliver(ConnectionMessage::LocalCandidate { candidate }, "candidate")
    }

    pub fn remote_track_added(&self, track: MediaTrack) -> bool {
        self.deliver(ConnectionMessage::RemoteTrackAdded { track }, "track_added")
    }

    pub fn remote_track_removed(&self, track_id: String) -> bool {
        self.deliver(
            ConnectionMessage::RemoteTrackRemoved { track_id },
            "track_removed",
        )
    }

    fn deliver(&self, message: ConnectionMessage, event: &'static str) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "rtc.actor.connection",
                    session_id = %self.key.session_id,
                    participant_id = %self.key.participant_id,
                    event = event,
                    "Connection mailbox full, transport event dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "rtc.actor.connection",
                    session_id = %self.key.session_id,
                    participant_id = %self.key.participant_id,
                    event = event,
                    "Connection gone, transport event ignored"
                );
                false
            }
        }
    }
}

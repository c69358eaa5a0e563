//! Session connection manager error types.
//!
//! `RtcError` is returned by every public operation. Collaborator failures
//! (`TransportError`, `MediaError`) convert into it via `From`.

use crate::config::ConfigError;
use crate::types::NegotiationState;
use thiserror::Error;

/// Crate-level error type.
///
/// Error codes (see [`RtcError::error_code`]) are stable strings intended
/// for the UI layer:
/// - Recoverable by the caller: `DUPLICATE_CONNECTION`, `CHANNEL_NOT_READY`,
///   `STATS_UNAVAILABLE`, `SEND_FAILED`
/// - Terminal for one connection: `RECOVERY_EXHAUSTED`
/// - Fatal to session start: `MEDIA_ACQUISITION_FAILED`
#[derive(Debug, Error)]
pub enum RtcError {
    /// A connection already exists for this (session, participant).
    #[error("Connection already exists: {0}")]
    DuplicateConnection(String),

    /// No connection for this (session, participant).
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// The data channel is not open or the transport is not connected.
    #[error("Data channel not ready")]
    ChannelNotReady,

    /// Transport statistics could not be read.
    #[error("Stats unavailable: {0}")]
    StatsUnavailable(String),

    /// Reconnection attempts exhausted.
    #[error("Connection recovery exhausted after {attempts} attempts")]
    ConnectionRecoveryExhausted { attempts: u32 },

    /// Local media could not be acquired.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisitionFailed(MediaError),

    /// The requested negotiation state change is not allowed.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: NegotiationState,
        to: NegotiationState,
    },

    /// Offer/answer exchange failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Underlying transport reported an error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message could not be written to the data channel.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The session is not active (not started or already ended).
    #[error("Session not active")]
    SessionNotActive,

    /// The session has ended.
    #[error("Session ended")]
    SessionEnded,

    /// The registry has shut down.
    #[error("Connection registry closed")]
    RegistryClosed,

    /// The supplied configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Frame encoding/decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (actor channel failures).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by the peer transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The transport or encoder is not ready yet.
    #[error("transport not ready")]
    NotReady,

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,

    /// Any other transport failure.
    #[error("transport failure: {0}")]
    Failed(String),
}

/// Errors returned by the media capture collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform denied device access.
    #[error("permission denied")]
    PermissionDenied,

    /// The requested device is missing or busy.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Any other capture failure.
    #[error("capture failure: {0}")]
    Failed(String),
}

impl RtcError {
    /// Returns a stable error code for the UI layer.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            RtcError::DuplicateConnection(_) => "DUPLICATE_CONNECTION",
            RtcError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            RtcError::ChannelNotReady => "CHANNEL_NOT_READY",
            RtcError::StatsUnavailable(_) => "STATS_UNAVAILABLE",
            RtcError::ConnectionRecoveryExhausted { .. } => "RECOVERY_EXHAUSTED",
            RtcError::MediaAcquisitionFailed(_) => "MEDIA_ACQUISITION_FAILED",
            RtcError::InvalidTransition { .. } => "INVALID_TRANSITION",
            RtcError::Negotiation(_) => "NEGOTIATION_FAILED",
            RtcError::Transport(_) => "TRANSPORT_ERROR",
            RtcError::SendFailed(_) => "SEND_FAILED",
            RtcError::SessionNotActive => "SESSION_NOT_ACTIVE",
            RtcError::SessionEnded => "SESSION_ENDED",
            RtcError::RegistryClosed => "REGISTRY_CLOSED",
            RtcError::Config(_) => "CONFIG_ERROR",
            RtcError::Serialization(_) => "SERIALIZATION_ERROR",
            RtcError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can reasonably retry or take a corrective action.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            RtcError::DuplicateConnection(_)
            | RtcError::ChannelNotReady
            | RtcError::StatsUnavailable(_)
            | RtcError::SendFailed(_)
            | RtcError::Negotiation(_) => true,
            RtcError::Transport(e) => matches!(e, TransportError::NotReady),
            RtcError::ConnectionRecoveryExhausted { .. }
            | RtcError::MediaAcquisitionFailed(_)
            | RtcError::ConnectionNotFound(_)
            | RtcError::InvalidTransition { .. }
            | RtcError::SessionNotActive
            | RtcError::SessionEnded
            | RtcError::RegistryClosed
            | RtcError::Config(_)
            | RtcError::Serialization(_)
            | RtcError::Internal(_) => false,
        }
    }
}

impl From<MediaError> for RtcError {
    fn from(err: MediaError) -> Self {
        RtcError::MediaAcquisitionFailed(err)
    }
}

impl From<serde_json::Error> for RtcError {
    fn from(err: serde_json::Error) -> Self {
        RtcError::Serialization(err.to_string())
    }
}

//! Core identifiers and connection state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry key for a peer connection.
///
/// At most one connection exists per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKey {
    /// Session identifier.
    pub session_id: String,
    /// Remote participant identifier.
    pub participant_id: String,
}

impl ConnectionKey {
    /// Create a key from session and participant identifiers.
    #[must_use]
    pub fn new(session_id: impl Into<String>, participant_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            participant_id: participant_id.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.participant_id)
    }
}

/// Negotiation state of a connection.
///
/// Transitions are monotonic except for the Reconnecting/Connected/Failed
/// recovery cycle. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    New,
    Offering,
    Answering,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

impl NegotiationState {
    /// Returns the state as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::New => "new",
            NegotiationState::Offering => "offering",
            NegotiationState::Answering => "answering",
            NegotiationState::Connected => "connected",
            NegotiationState::Reconnecting => "reconnecting",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        }
    }

    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(self, next: NegotiationState) -> bool {
        use NegotiationState::{Answering, Closed, Connected, Failed, New, Offering, Reconnecting};

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, Offering | Answering | Connected | Reconnecting | Failed)
            | (Offering, Answering | Connected | Reconnecting | Failed)
            | (Answering, Connected | Reconnecting | Failed)
            | (Connected, Reconnecting)
            | (Reconnecting, Connected | Reconnecting | Failed)
            | (Failed, Reconnecting | Connected) => true,
            _ => false,
        }
    }

    /// Whether this is the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native connectivity signal reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Returns the state as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        }
    }
}

/// Substate of the connection's data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl DataChannelState {
    /// Returns the state as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataChannelState::Connecting => "connecting",
            DataChannelState::Open => "open",
            DataChannelState::Closing => "closing",
            DataChannelState::Closed => "closed",
        }
    }
}

//! Real-time session connection manager.
//!
//! This library establishes, monitors, adapts, recovers and tears down the
//! peer-to-peer media/data connections of a multi-party consultation session:
//!
//! - Media constraint selection from device and network probing
//! - One peer connection per remote participant, keyed by (session, participant)
//! - Periodic transport statistics sampling reduced to a quality level
//! - Bitrate adaptation of outgoing video driven by the quality level
//! - Bounded ICE-restart recovery with linear backoff
//! - Ordered, reliable chat messaging over the connection's data channel
//!
//! # Architecture
//!
//! The core uses an actor hierarchy:
//!
//! ```text
//! Session (owns local media + registry)
//! └── ConnectionRegistryActor (one per session)
//!     └── supervises N ConnectionActors
//!         └── ConnectionActor (one per remote participant)
//!             ├── owns negotiation state, data channel, recovery policy
//!             └── owns one QualityMonitor sampling task
//! ```
//!
//! Transport, signaling, media capture and network probing are injected
//! collaborators (see [`transport`]); the UI consumes [`events::SessionEvents`].
//!
//! # Modules
//!
//! - [`actors`] - Registry and per-connection actors
//! - [`negotiator`] - Media constraint selection
//! - [`quality`] - Stats extraction and quality sampling
//! - [`adaptive`] - Outgoing bitrate adaptation
//! - [`recovery`] - Reconnection policy
//! - [`messaging`] - Chat messages over the data channel
//! - [`session`] - Session lifecycle

pub mod actors;
pub mod adaptive;
pub mod config;
pub mod errors;
pub mod events;
pub mod messaging;
pub mod negotiator;
pub mod observability;
pub mod quality;
pub mod recovery;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use actors::{ConnectionHandle, ConnectionRegistryHandle, ConnectionSnapshot};
pub use config::Config;
pub use errors::RtcError;
pub use events::{SessionEvent, SessionEventKind, SessionEvents};
pub use session::{Session, SessionState};
pub use types::{ConnectionKey, DataChannelState, NegotiationState, TransportState};

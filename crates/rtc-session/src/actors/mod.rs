//! Actor hierarchy for peer connection management.
//!
//! ```text
//! ConnectionRegistryActor (one per session)
//! └── ConnectionActor (one per remote participant)
//!     └── QualityMonitor task
//! ```
//!
//! Each actor owns its state and is driven through an `mpsc` mailbox;
//! request/reply goes over `oneshot` channels. Cancellation flows from the
//! registry to its connections through child `CancellationToken`s.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;

pub use connection::{ConnectionActor, ConnectionHandle};
pub use messages::{ConnectionMessage, ConnectionSnapshot, RegistryMessage, RegistryStatus};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{ConnectionRegistryActor, ConnectionRegistryHandle};

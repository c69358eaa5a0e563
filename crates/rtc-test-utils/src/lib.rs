//! # RTC Test Utilities
//!
//! Scriptable collaborators and fixtures for testing the session
//! connection manager without a real peer stack.
//!
//! ## Modules
//!
//! - `mock_transport` - Mock peer transport and factory; drives connectivity,
//!   data channel, inbound data and stats for each connection
//! - `mock_signaling` - Recording signaling sink
//! - `mock_media` - Mock media capture provider and network probe
//! - `fixtures` - Harness bundling the mocks, event waiting helpers, chat messages
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rtc_test_utils::*;
//! use rtc_session::negotiator::QualityTier;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let harness = TestHarness::default();
//!     let (mut session, mut events) = harness.session("S1", &["A", "B"]);
//!     session.start(QualityTier::High).await.unwrap();
//!
//!     harness.transports.transport("S1", "A").connect();
//!     wait_for_state(&mut events, "A", NegotiationState::Connected).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_signaling;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_media::*;
pub use mock_signaling::*;
pub use mock_transport::*;

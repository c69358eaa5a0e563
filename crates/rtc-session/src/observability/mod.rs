//! Observability for the session connection manager.
//!
//! Metrics are emitted through the `metrics` facade; the embedding
//! application installs the recorder/exporter. Labels are bounded:
//! - `state`: 7 negotiation states
//! - `level`: 5 quality levels
//! - `outcome`: applied/unchanged/deferred or success/not_ready/error
//! - `actor_type`: registry, connection
//! - `event`: 5 UI event kinds
//!
//! Session and participant ids are never used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rtc_connections_active` | Gauge | none | Live peer connections |
//! | `rtc_connection_transitions_total` | Counter | `state` | Negotiation state entries |
//! | `rtc_quality_samples_total` | Counter | `level` | Quality samples by level |
//! | `rtc_stats_read_failures_total` | Counter | none | Failed stats reads |
//! | `rtc_bitrate_adjustments_total` | Counter | `outcome` | Adaptive controller decisions |
//! | `rtc_reconnect_attempts_total` | Counter | none | ICE-restart attempts |
//! | `rtc_recovery_exhausted_total` | Counter | none | Connections failed terminally |
//! | `rtc_recovery_duration_seconds` | Histogram | none | Time from first failure to reconnect |
//! | `rtc_messages_sent_total` | Counter | `outcome` | Chat send results |
//! | `rtc_messages_received_total` | Counter | none | Accepted inbound chat messages |
//! | `rtc_messages_deduplicated_total` | Counter | none | Duplicate inbound messages |
//! | `rtc_frames_rejected_total` | Counter | none | Undecodable data channel frames |
//! | `rtc_events_dropped_total` | Counter | `event` | UI events dropped on a full channel |
//! | `rtc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure per actor type |
//! | `rtc_actor_panics_total` | Counter | `actor_type` | Actor task panics |
//! | `rtc_media_profiles_total` | Counter | `tier` | Negotiated constraint profiles |

pub mod metrics;

//! Minimal in-crate collaborator stubs for unit tests.
//!
//! Everything here is named `Stub*`. Integration tests use the scriptable
//! `Mock*` and `RecordingSignaling` doubles in `rtc-test-utils`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::errors::{MediaError, TransportError};
use crate::negotiator::MediaConstraintProfile;
use crate::quality::{StatsEntry, StatsReport};
use crate::transport::{
    DataChannelConfig, DeviceCapabilities, DownlinkEstimate, IceCandidate, MediaCaptureProvider,
    MediaHandle, MediaKind, MediaTrack, NetworkProbe, PeerTransport, SessionDescription,
    SignalingMessage, SignalingSink, TransportEventSender, TransportFactory,
    VideoInputCapability,
};
use crate::types::ConnectionKey;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Transport that returns steadily growing counters (or always fails).
#[derive(Debug, Default)]
pub struct StubTransport {
    bytes_per_read: u64,
    packets_per_read: u64,
    fail_stats: bool,
    reads: AtomicU64,
    encoder_ready: AtomicBool,
    bitrates: Mutex<Vec<u64>>,
    sent: Mutex<Vec<Bytes>>,
}

impl StubTransport {
    pub fn steady(bytes_per_read: u64, packets_per_read: u64) -> Self {
        Self {
            bytes_per_read,
            packets_per_read,
            encoder_ready: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_stats: true,
            encoder_ready: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn stats_reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_encoder_ready(&self, ready: bool) {
        self.encoder_ready.store(ready, Ordering::SeqCst);
    }

    pub fn bitrates(&self) -> Vec<u64> {
        self.bitrates.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerTransport for StubTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer(format!("stub-offer restart={ice_restart}")))
    }

    async fn create_answer(
        &self,
        _offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer("stub-answer"))
    }

    async fn apply_answer(&self, _answer: &SessionDescription) -> Result<(), TransportError> {
        Ok(())
    }

    async fn add_remote_candidate(&self, _candidate: &IceCandidate) -> Result<(), TransportError> {
        Ok(())
    }

    async fn attach_local_media(&self, _media: &MediaHandle) -> Result<(), TransportError> {
        Ok(())
    }

    async fn open_data_channel(&self, _config: &DataChannelConfig) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_data(&self, data: Bytes) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(data);
        Ok(())
    }

    async fn read_stats(&self) -> Result<StatsReport, TransportError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_stats {
            return Err(TransportError::Failed("stats unavailable".to_string()));
        }
        Ok(StatsReport {
            entries: vec![
                StatsEntry::InboundRtp {
                    id: "in-video".to_string(),
                    kind: MediaKind::Video,
                    bytes_received: Some(self.bytes_per_read * n),
                    packets_received: Some(self.packets_per_read * n),
                    packets_lost: Some(0),
                    jitter_secs: Some(0.005),
                },
                StatsEntry::CandidatePair {
                    id: "pair".to_string(),
                    nominated: true,
                    current_round_trip_time_secs: Some(0.05),
                },
            ],
        })
    }

    async fn set_video_bitrate(&self, bits_per_second: u64) -> Result<(), TransportError> {
        if !self.encoder_ready.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }
        self.bitrates.lock().unwrap().push(bits_per_second);
        Ok(())
    }

    async fn close_data_channel(&self) {}

    async fn close(&self) {}
}

/// Signaling sink that records everything it is given.
#[derive(Debug, Default)]
pub struct StubSignaling {
    messages: Mutex<Vec<SignalingMessage>>,
}

impl StubSignaling {
    pub fn messages(&self) -> Vec<SignalingMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingSink for StubSignaling {
    async fn send(&self, message: SignalingMessage) -> Result<(), TransportError> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// Factory handing out steady stub transports and keeping their event senders.
#[derive(Debug, Default)]
pub struct StubFactory {
    senders: Mutex<Vec<TransportEventSender>>,
    fail: bool,
}

impl StubFactory {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Event sender of the n-th created transport.
    pub fn sender(&self, n: usize) -> TransportEventSender {
        self.senders.lock().unwrap().get(n).cloned().unwrap()
    }
}

#[async_trait]
impl TransportFactory for StubFactory {
    async fn create(
        &self,
        _key: &ConnectionKey,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if self.fail {
            return Err(TransportError::Failed("no transport".to_string()));
        }
        self.senders.lock().unwrap().push(events);
        Ok(Arc::new(StubTransport::steady(1_000, 10)))
    }
}

/// Media provider with one 1080p camera; acquisition can be made to fail.
#[derive(Debug, Default)]
pub struct StubMedia {
    fail_acquire: bool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl StubMedia {
    pub fn denied() -> Self {
        Self {
            fail_acquire: true,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaCaptureProvider for StubMedia {
    async fn acquire_local_media(
        &self,
        profile: &MediaConstraintProfile,
    ) -> Result<MediaHandle, MediaError> {
        if self.fail_acquire {
            return Err(MediaError::PermissionDenied);
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MediaHandle {
            id: "local".to_string(),
            tracks: vec![
                MediaTrack {
                    id: "local-audio".to_string(),
                    kind: MediaKind::Audio,
                },
                MediaTrack {
                    id: "local-video".to_string(),
                    kind: MediaKind::Video,
                },
            ],
            profile: *profile,
        })
    }

    async fn release_local_media(&self, _handle: &MediaHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn enumerate_devices(&self) -> Result<DeviceCapabilities, MediaError> {
        Ok(DeviceCapabilities {
            video_inputs: vec![VideoInputCapability {
                device_id: "cam".to_string(),
                max_width: 1920,
                max_height: 1080,
            }],
            audio_inputs: 1,
        })
    }
}

/// Network probe reporting a fixed downlink.
#[derive(Debug)]
pub struct StubNetwork(pub f64);

#[async_trait]
impl NetworkProbe for StubNetwork {
    async fn estimate_downlink(&self) -> Result<DownlinkEstimate, TransportError> {
        Ok(DownlinkEstimate { mbps: self.0 })
    }
}

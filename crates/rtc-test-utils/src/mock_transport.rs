//! Scriptable peer transport for integration tests.
//!
//! `MockTransportFactory` creates one `MockTransport` per connection and
//! keeps it so the test can drive transport events for that connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtc_test_utils::{LinkProfile, MockTransportFactory};
//!
//! let factory = MockTransportFactory::builder()
//!     .link(LinkProfile::excellent())
//!     .build();
//!
//! // ... create connections through a session or registry ...
//!
//! let transport = factory.transport("S1", "A");
//! transport.connect();
//! transport.fail();
//! transport.wait_for_offers(1).await;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use rtc_session::errors::TransportError;
use rtc_session::messaging::{ChatMessage, DataChannelFrame};
use rtc_session::quality::{StatsEntry, StatsReport};
use rtc_session::transport::{
    DataChannelConfig, IceCandidate, MediaHandle, MediaKind, MediaTrack, PeerTransport,
    SessionDescription, TransportEventSender, TransportFactory,
};
use rtc_session::types::{ConnectionKey, DataChannelState, TransportState};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// How long `wait_for_*` helpers wait before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-read growth of the transport counters.
///
/// With the default 2 s sampling interval and 2.5 Mbps maximum bandwidth,
/// `excellent()` yields a full-bandwidth, loss-free, 50 ms RTT sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkProfile {
    pub bytes_per_read: u64,
    pub packets_per_read: u64,
    pub lost_per_read: u64,
    pub rtt_ms: f64,
    pub jitter_ms: f64,
}

impl LinkProfile {
    #[must_use]
    pub fn excellent() -> Self {
        Self {
            bytes_per_read: 625_000,
            packets_per_read: 500,
            lost_per_read: 0,
            rtt_ms: 50.0,
            jitter_ms: 5.0,
        }
    }

    /// Half the packets lost.
    #[must_use]
    pub fn lossy() -> Self {
        Self {
            bytes_per_read: 625_000,
            packets_per_read: 250,
            lost_per_read: 250,
            rtt_ms: 50.0,
            jitter_ms: 30.0,
        }
    }

    /// Idle link: counters do not move.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            bytes_per_read: 0,
            packets_per_read: 0,
            lost_per_read: 0,
            rtt_ms: 0.0,
            jitter_ms: 0.0,
        }
    }
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self::excellent()
    }
}

/// An offer the connection asked the transport to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferRecord {
    pub at: Instant,
    pub ice_restart: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    bytes: u64,
    packets: u64,
    lost: u64,
}

/// Mock peer transport.
#[derive(Debug)]
pub struct MockTransport {
    key: ConnectionKey,
    events: TransportEventSender,
    link: Mutex<LinkProfile>,
    counters: Mutex<Counters>,
    scripted_stats: Mutex<VecDeque<Result<StatsReport, TransportError>>>,
    fail_stats: AtomicBool,
    stats_reads: AtomicU64,
    offers: Mutex<Vec<OfferRecord>>,
    offer_count: watch::Sender<usize>,
    fail_offers: AtomicBool,
    answers_applied: AtomicU64,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    encoder_ready: AtomicBool,
    bitrates: Mutex<Vec<u64>>,
    sent: Mutex<Vec<Bytes>>,
    attached_media: Mutex<Option<MediaHandle>>,
    data_channel: Mutex<Option<DataChannelConfig>>,
    data_channel_closed: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    fn new(key: ConnectionKey, events: TransportEventSender, link: LinkProfile) -> Self {
        let (offer_count, _) = watch::channel(0);
        Self {
            key,
            events,
            link: Mutex::new(link),
            counters: Mutex::new(Counters::default()),
            scripted_stats: Mutex::new(VecDeque::new()),
            fail_stats: AtomicBool::new(false),
            stats_reads: AtomicU64::new(0),
            offers: Mutex::new(Vec::new()),
            offer_count,
            fail_offers: AtomicBool::new(false),
            answers_applied: AtomicU64::new(0),
            remote_candidates: Mutex::new(Vec::new()),
            encoder_ready: AtomicBool::new(true),
            bitrates: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            attached_media: Mutex::new(None),
            data_channel: Mutex::new(None),
            data_channel_closed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    // ---- driving the connection ----

    pub fn emit_transport_state(&self, state: TransportState) -> bool {
        self.events.connectivity_changed(state)
    }

    pub fn emit_data_channel_state(&self, state: DataChannelState) -> bool {
        self.events.data_channel_changed(state)
    }

    /// Transport Connected and data channel Open.
    pub fn connect(&self) {
        self.emit_transport_state(TransportState::Connected);
        self.emit_data_channel_state(DataChannelState::Open);
    }

    pub fn fail(&self) {
        self.emit_transport_state(TransportState::Failed);
    }

    pub fn disconnect(&self) {
        self.emit_transport_state(TransportState::Disconnected);
    }

    pub fn emit_data(&self, data: impl Into<Bytes>) -> bool {
        self.events.data_received(data.into())
    }

    /// Deliver a chat frame as if the remote peer had sent it.
    pub fn deliver_chat(&self, message: &ChatMessage) -> bool {
        let frame = DataChannelFrame::Chat {
            message: message.clone(),
        };
        self.emit_data(frame.encode().expect("chat frame encodes"))
    }

    pub fn emit_local_candidate(&self, candidate: IceCandidate) -> bool {
        self.events.local_candidate(candidate)
    }

    pub fn emit_remote_track(&self, id: impl Into<String>, kind: MediaKind) -> bool {
        self.events.remote_track_added(MediaTrack {
            id: id.into(),
            kind,
        })
    }

    pub fn emit_remote_track_removed(&self, id: impl Into<String>) -> bool {
        self.events.remote_track_removed(id.into())
    }

    // ---- scripting ----

    /// Change how counters grow from the next read on.
    pub fn set_link(&self, link: LinkProfile) {
        *self.link.lock().unwrap() = link;
    }

    /// Queue explicit read results, consumed before the link profile.
    pub fn push_stats(&self, result: Result<StatsReport, TransportError>) {
        self.scripted_stats.lock().unwrap().push_back(result);
    }

    pub fn set_stats_failing(&self, failing: bool) {
        self.fail_stats.store(failing, Ordering::SeqCst);
    }

    pub fn set_offers_failing(&self, failing: bool) {
        self.fail_offers.store(failing, Ordering::SeqCst);
    }

    pub fn set_encoder_ready(&self, ready: bool) {
        self.encoder_ready.store(ready, Ordering::SeqCst);
    }

    // ---- inspection ----

    #[must_use]
    pub fn offers(&self) -> Vec<OfferRecord> {
        self.offers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn restart_offers(&self) -> Vec<OfferRecord> {
        self.offers()
            .into_iter()
            .filter(|offer| offer.ice_restart)
            .collect()
    }

    /// Wait until at least `n` offers were requested.
    pub async fn wait_for_offers(&self, n: usize) {
        let mut rx = self.offer_count.subscribe();
        tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|count| *count >= n))
            .await
            .unwrap_or_else(|_| panic!("{}: timed out waiting for {n} offers", self.key))
            .expect("offer counter alive");
    }

    #[must_use]
    pub fn stats_reads(&self) -> u64 {
        self.stats_reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn answers_applied(&self) -> u64 {
        self.answers_applied.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().unwrap().clone()
    }

    /// Bitrates successfully applied to the encoder, in order.
    #[must_use]
    pub fn bitrates(&self) -> Vec<u64> {
        self.bitrates.lock().unwrap().clone()
    }

    /// Frames written to the data channel.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<DataChannelFrame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|data| DataChannelFrame::decode(data).expect("sent frame decodes"))
            .collect()
    }

    #[must_use]
    pub fn attached_media(&self) -> Option<MediaHandle> {
        self.attached_media.lock().unwrap().clone()
    }

    #[must_use]
    pub fn data_channel_config(&self) -> Option<DataChannelConfig> {
        self.data_channel.lock().unwrap().clone()
    }

    #[must_use]
    pub fn is_data_channel_closed(&self) -> bool {
        self.data_channel_closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_report(&self) -> StatsReport {
        let link = *self.link.lock().unwrap();
        let mut counters = self.counters.lock().unwrap();
        counters.bytes += link.bytes_per_read;
        counters.packets += link.packets_per_read;
        counters.lost += link.lost_per_read;

        StatsReport {
            entries: vec![
                StatsEntry::InboundRtp {
                    id: "inbound-video".to_string(),
                    kind: MediaKind::Video,
                    bytes_received: Some(counters.bytes),
                    packets_received: Some(counters.packets),
                    packets_lost: Some(i64::try_from(counters.lost).unwrap_or(i64::MAX)),
                    jitter_secs: Some(link.jitter_ms / 1000.0),
                },
                StatsEntry::CandidatePair {
                    id: "pair-0".to_string(),
                    nominated: true,
                    current_round_trip_time_secs: Some(link.rtt_ms / 1000.0),
                },
            ],
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        self.offers.lock().unwrap().push(OfferRecord {
            at: Instant::now(),
            ice_restart,
        });
        self.offer_count.send_modify(|count| *count += 1);

        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("offer creation failed".to_string()));
        }
        Ok(SessionDescription::offer(format!(
            "v=0 mock-offer {} restart={ice_restart}",
            self.key
        )))
    }

    async fn create_answer(
        &self,
        _offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer(format!(
            "v=0 mock-answer {}",
            self.key
        )))
    }

    async fn apply_answer(&self, _answer: &SessionDescription) -> Result<(), TransportError> {
        self.answers_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.remote_candidates
            .lock()
            .unwrap()
            .push(candidate.clone());
        Ok(())
    }

    async fn attach_local_media(&self, media: &MediaHandle) -> Result<(), TransportError> {
        *self.attached_media.lock().unwrap() = Some(media.clone());
        Ok(())
    }

    async fn open_data_channel(&self, config: &DataChannelConfig) -> Result<(), TransportError> {
        *self.data_channel.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    fn send_data(&self, data: Bytes) -> Result<(), TransportError> {
        if self.data_channel_closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(data);
        Ok(())
    }

    async fn read_stats(&self) -> Result<StatsReport, TransportError> {
        self.stats_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.scripted_stats.lock().unwrap().pop_front() {
            return scripted;
        }
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("stats unavailable".to_string()));
        }
        Ok(self.next_report())
    }

    async fn set_video_bitrate(&self, bits_per_second: u64) -> Result<(), TransportError> {
        if !self.encoder_ready.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }
        self.bitrates.lock().unwrap().push(bits_per_second);
        Ok(())
    }

    async fn close_data_channel(&self) {
        self.data_channel_closed.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory producing `MockTransport`s.
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    link: LinkProfile,
    failing_participants: HashSet<String>,
    transports: Mutex<HashMap<ConnectionKey, Arc<MockTransport>>>,
}

impl MockTransportFactory {
    #[must_use]
    pub fn builder() -> MockTransportFactoryBuilder {
        MockTransportFactoryBuilder::default()
    }

    /// Transport of a connection. Panics if it was never created.
    #[must_use]
    pub fn transport(&self, session_id: &str, participant_id: &str) -> Arc<MockTransport> {
        self.try_transport(session_id, participant_id)
            .unwrap_or_else(|| panic!("no transport for {session_id}/{participant_id}"))
    }

    #[must_use]
    pub fn try_transport(&self, session_id: &str, participant_id: &str) -> Option<Arc<MockTransport>> {
        self.transports
            .lock()
            .unwrap()
            .get(&ConnectionKey::new(session_id, participant_id))
            .cloned()
    }

    #[must_use]
    pub fn created(&self) -> usize {
        self.transports.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        key: &ConnectionKey,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if self.failing_participants.contains(&key.participant_id) {
            return Err(TransportError::Failed(format!(
                "transport creation refused for {key}"
            )));
        }
        let transport = Arc::new(MockTransport::new(key.clone(), events, self.link));
        self.transports
            .lock()
            .unwrap()
            .insert(key.clone(), Arc::clone(&transport));
        Ok(transport)
    }
}

/// Builder for `MockTransportFactory`.
#[derive(Debug, Default)]
pub struct MockTransportFactoryBuilder {
    link: Option<LinkProfile>,
    failing_participants: HashSet<String>,
}

impl MockTransportFactoryBuilder {
    /// Initial link profile of every transport.
    #[must_use]
    pub fn link(mut self, link: LinkProfile) -> Self {
        self.link = Some(link);
        self
    }

    /// Refuse to create a transport for this participant.
    #[must_use]
    pub fn fail_for(mut self, participant_id: impl Into<String>) -> Self {
        self.failing_participants.insert(participant_id.into());
        self
    }

    #[must_use]
    pub fn build(self) -> MockTransportFactory {
        MockTransportFactory {
            link: self.link.unwrap_or_default(),
            failing_participants: self.failing_participants,
            transports: Mutex::new(HashMap::new()),
        }
    }
}

//! Reconnection behavior under paused time.
//!
//! - Linear backoff (2s/4s/6s) and exhaustion on the 4th failure
//! - Duplicate failure signals while a retry is pending
//! - Reset on reconnection, failed renegotiation, manual restart
//! - Close cancels a pending retry

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use rtc_session::events::{SessionEventKind, SessionEvents};
use rtc_session::negotiator::QualityTier;
use rtc_session::types::NegotiationState;
use rtc_session::{RtcError, Session};
use rtc_test_utils::{
    drain_events, init_test_logging, wait_for_event, wait_for_state, MockTransport, TestHarness,
};
use std::sync::Arc;
use tokio::time::Instant;

/// Timer deadlines are rounded to the millisecond by the runtime.
fn assert_delay(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected delay of {expected:?}, got {actual:?}"
    );
}

async fn connected_session(participants: &[&str]) -> (TestHarness, Session, SessionEvents) {
    init_test_logging();
    let harness = TestHarness::default();
    let (mut session, mut events) = harness.session("S1", participants);
    session.start(QualityTier::Medium).await.unwrap();

    for participant in participants {
        harness.transports.transport("S1", participant).connect();
        wait_for_state(&mut events, participant, NegotiationState::Connected)
            .await
            .unwrap();
    }
    (harness, session, events)
}

/// Signal Failed and wait for the next restart offer; returns the delay.
async fn fail_and_wait_for_attempt(transport: &Arc<MockTransport>, attempt: usize) -> Duration {
    let failed_at = Instant::now();
    transport.fail();
    transport.wait_for_offers(attempt).await;
    let offer = *transport.restart_offers().get(attempt - 1).unwrap();
    offer.at - failed_at
}

// ============================================================================
// Backoff and exhaustion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_four_failures_give_three_attempts_with_linear_backoff() {
    let (harness, session, mut events) = connected_session(&["A"]).await;
    let a = harness.transports.transport("S1", "A");

    assert_delay(fail_and_wait_for_attempt(&a, 1).await, Duration::from_secs(2));
    assert_delay(fail_and_wait_for_attempt(&a, 2).await, Duration::from_secs(4));
    assert_delay(fail_and_wait_for_attempt(&a, 3).await, Duration::from_secs(6));

    // Not exhausted yet
    let so_far = drain_events(&mut events);
    assert!(!so_far
        .iter()
        .any(|e| matches!(e.kind, SessionEventKind::RecoveryExhausted { .. })));

    a.fail();
    let exhausted = wait_for_event(&mut events, |e| {
        matches!(e.kind, SessionEventKind::RecoveryExhausted { .. })
    })
    .await
    .unwrap();
    assert_eq!(exhausted.participant_id, "A");
    assert_eq!(
        exhausted.kind,
        SessionEventKind::RecoveryExhausted { attempts: 3 }
    );

    let snapshot = session.connection("A").await.unwrap().snapshot().await.unwrap();
    assert_eq!(snapshot.state, NegotiationState::Failed);
    assert!(!snapshot.retry_pending);

    // No further attempts, and further failures are ignored
    a.fail();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(a.restart_offers().len(), 3);

    // The registry does not auto-close an exhausted connection
    assert!(!a.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_restart_offers_use_ice_restart_and_reach_signaling() {
    let (harness, _session, _events) = connected_session(&["A"]).await;
    let a = harness.transports.transport("S1", "A");

    fail_and_wait_for_attempt(&a, 1).await;

    let offers = a.offers();
    assert_eq!(offers.len(), 1);
    assert!(offers.first().unwrap().ice_restart);

    harness.signaling.wait_for_messages(1).await;
    let sent = harness
        .signaling
        .messages_for("A", rtc_session::transport::SignalingKind::Offer);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent.first().unwrap().session_id, "S1");
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_then_failed_counts_once() {
    let (harness, session, _events) = connected_session(&["A"]).await;
    let a = harness.transports.transport("S1", "A");

    a.disconnect();
    a.fail();
    a.wait_for_offers(1).await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(a.restart_offers().len(), 1);

    let snapshot = session.connection("A").await.unwrap().snapshot().await.unwrap();
    assert_eq!(snapshot.reconnect_attempts, 1);
    assert_eq!(snapshot.state, NegotiationState::Reconnecting);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resets_attempts() {
    let (harness, session, mut events) = connected_session(&["A"]).await;
    let a = harness.transports.transport("S1", "A");

    fail_and_wait_for_attempt(&a, 1).await;
    fail_and_wait_for_attempt(&a, 2).await;

    a.connect();
    wait_for_state(&mut events, "A", NegotiationState::Connected)
        .await
        .unwrap();
    let snapshot = session.connection("A").await.unwrap().snapshot().await.unwrap();
    assert_eq!(snapshot.reconnect_attempts, 0);

    // Backoff starts over at 2s
    assert_delay(fail_and_wait_for_attempt(&a, 3).await, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_failed_renegotiation_counts_as_attempt() {
    let (harness, _session, mut events) = connected_session(&["A"]).await;
    let a = harness.transports.transport("S1", "A");
    a.set_offers_failing(true);

    let failed_at = Instant::now();
    a.fail();

    let exhausted = wait_for_event(&mut events, |e| {
        matches!(e.kind, SessionEventKind::RecoveryExhausted { .. })
    })
    .await
    .unwrap();
    assert_eq!(
        exhausted.kind,
        SessionEventKind::RecoveryExhausted { attempts: 3 }
    );

    let offers = a.restart_offers();
    assert_eq!(offers.len(), 3);
    let at: Vec<Instant> = offers.iter().map(|offer| offer.at).collect();
    let [first, second, third] = at.as_slice() else {
        unreachable!("three offers checked above");
    };
    assert_delay(*first - failed_at, Duration::from_secs(2));
    assert_delay(*second - *first, Duration::from_secs(4));
    assert_delay(*third - *second, Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_manual_restart_from_failed() {
    let (harness, session, mut events) = connected_session(&["A"]).await;
    let a = harness.transports.transport("S1", "A");

    // Manual restart is only allowed from Failed
    assert!(matches!(
        session.restart("A").await,
        Err(RtcError::InvalidTransition { .. })
    ));

    for attempt in 1..=3 {
        fail_and_wait_for_attempt(&a, attempt).await;
    }
    a.fail();
    wait_for_state(&mut events, "A", NegotiationState::Failed)
        .await
        .unwrap();

    let restarted_at = Instant::now();
    session.restart("A").await.unwrap();
    wait_for_state(&mut events, "A", NegotiationState::Reconnecting)
        .await
        .unwrap();
    a.wait_for_offers(4).await;
    assert_delay(
        a.restart_offers().get(3).unwrap().at - restarted_at,
        Duration::from_secs(2),
    );

    a.connect();
    wait_for_state(&mut events, "A", NegotiationState::Connected)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_retry() {
    let (harness, mut session, _events) = connected_session(&["A", "B"]).await;
    let a = harness.transports.transport("S1", "A");

    a.fail();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let snapshot = session.connection("A").await.unwrap().snapshot().await.unwrap();
    assert!(snapshot.retry_pending);

    session.close_participant("A").await.unwrap();
    assert!(a.is_closed());
    assert!(a.is_data_channel_closed());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(a.restart_offers().is_empty());
}

//! End-to-end tests over the ingest -> dispatch -> session chain

mod common;

use common::*;
use std::time::Duration;
use wavecap::core::types::UserKey;
use wavecap::core::config::ReconnectionConfig;
use wavecap::stream::OutboundMessage;

const T0: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

fn reconnection(grace_secs: u64, buffer_max: usize) -> ReconnectionConfig {
    ReconnectionConfig {
        enabled: true,
        grace_secs,
        buffer_max,
        sweep_interval_secs: 30,
    }
}

/// Scenario: two live sessions, one wildcard ACL and one narrowed to
/// talkgroup 100. A call on talkgroup 200 reaches only the wildcard user.
#[tokio::test]
async fn test_fan_out_respects_acl_and_filter() {
    init_test_logging();
    let mut stack = stack(ReconnectionConfig::default());

    let (_a, mut rx_a) = stack.live_session(&user_a());
    let (_b, mut rx_b) = stack.live_session(&user_b());

    stack.ingest_and_dispatch(200, T0).await;

    match rx_a.outbox.try_recv() {
        Ok(OutboundMessage::Call(payload)) => {
            assert_eq!(payload.system, 1);
            assert_eq!(payload.talkgroup, 200);
        }
        other => panic!("expected call for user A, got {other:?}"),
    }
    assert!(rx_a.outbox.try_recv().is_err(), "exactly one delivery");
    assert!(rx_b.outbox.try_recv().is_err(), "user B's ACL excludes tg 200");
}

/// Scenario: user disconnects, four matching calls arrive inside the grace
/// window with a buffer of three, then the user reconnects. Drop-oldest
/// leaves calls 2, 3, 4, replayed in persist order.
#[tokio::test(start_paused = true)]
async fn test_replay_across_reconnect_drops_oldest() {
    init_test_logging();
    let mut stack = stack(reconnection(300, 3));

    let (session, _rx) = stack.live_session(&user_a());
    stack.registry.unregister(session.id());
    stack.reconnection.on_disconnect(&session);

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(stack.ingest_and_dispatch(100, T0 + i * 1_000).await);
    }

    tokio::time::advance(Duration::from_secs(120)).await;

    let (fresh, mut rx) = stack.live_session(&user_a());
    let buffered = stack
        .reconnection
        .restore(&fresh)
        .expect("record must survive a 2 minute gap");
    assert_eq!(buffered, 3);

    let mut replayed = Vec::new();
    for _ in 0..3 {
        match rx.outbox.recv().await {
            Some(OutboundMessage::Call(payload)) => replayed.push(payload.id),
            other => panic!("expected replayed call, got {other:?}"),
        }
    }
    assert_eq!(replayed, vec![ids[1], ids[2], ids[3]]);
    assert!(rx.outbox.try_recv().is_err(), "oldest call was dropped");
}

/// Scenario: a call buffered 10 s after disconnect is gone once the grace
/// window (30 s) has lapsed; the reconnect gets nothing and the record dies.
#[tokio::test(start_paused = true)]
async fn test_grace_expiry_discards_buffer() {
    init_test_logging();
    let mut stack = stack(reconnection(30, 8));

    let (session, _rx) = stack.live_session(&user_a());
    stack.registry.unregister(session.id());
    stack.reconnection.on_disconnect(&session);

    tokio::time::advance(Duration::from_secs(10)).await;
    stack.ingest_and_dispatch(100, T0).await;
    assert_eq!(stack.reconnection.stats().buffered_calls, 1);

    tokio::time::advance(Duration::from_secs(50)).await;

    let (fresh, mut rx) = stack.live_session(&user_a());
    assert!(stack.reconnection.restore(&fresh).is_none());
    assert!(rx.outbox.try_recv().is_err());
    assert_eq!(stack.reconnection.stats().disconnected_users, 0);
}

/// Scenario: revoking a connected user delivers exactly one error frame,
/// closes the transport and stops all further deliveries.
#[tokio::test]
async fn test_revocation_mid_stream() {
    init_test_logging();
    let mut stack = stack(ReconnectionConfig::default());

    let (session, mut rx) = stack.live_session(&user_a());

    stack.ingest_and_dispatch(100, T0).await;
    assert!(matches!(
        rx.outbox.try_recv(),
        Ok(OutboundMessage::Call(_))
    ));

    let closed = stack
        .management
        .revoke_user(&UserKey::Id(1))
        .await
        .expect("user A exists");
    assert_eq!(closed, 1);

    match rx.outbox.try_recv() {
        Ok(OutboundMessage::Error(payload)) => {
            assert_eq!(payload.message, "access revoked");
        }
        other => panic!("expected revocation error, got {other:?}"),
    }
    assert!(*rx.shutdown.borrow(), "transport told to close");
    assert!(session.is_closed());

    // Ingest matching A's ACL after revocation enqueues nothing
    stack.ingest_and_dispatch(100, T0 + 1_000).await;
    assert!(rx.outbox.try_recv().is_err());
}

/// Reconnecting through the normal login path restores the frozen filter,
/// resumes the live feed and replays the buffer behind the config frame.
#[tokio::test(start_paused = true)]
async fn test_login_resumes_buffered_session() {
    init_test_logging();
    let mut stack = stack(reconnection(300, 8));

    let (session, _rx) = stack.live_session(&user_a());
    stack.registry.unregister(session.id());
    stack.reconnection.on_disconnect(&session);

    let missed = stack.ingest_and_dispatch(100, T0).await;

    let (fresh, mut rx) = stack.registry.open("127.0.0.1".parse().unwrap());
    stack
        .context
        .handle_frame(&fresh, r#"{"command":"login","payload":{"pin":"1111"}}"#)
        .await;

    assert!(matches!(rx.outbox.recv().await, Some(OutboundMessage::Ready)));
    assert!(matches!(
        rx.outbox.recv().await,
        Some(OutboundMessage::Config(_))
    ));
    match rx.outbox.recv().await {
        Some(OutboundMessage::Call(payload)) => assert_eq!(payload.id, missed),
        other => panic!("expected replayed call, got {other:?}"),
    }

    // The frozen filter is live again without a fresh livefeed command
    assert!(fresh.filter_accepts(1, 100));
    stack.ingest_and_dispatch(100, T0 + 1_000).await;
    assert!(matches!(
        rx.outbox.try_recv(),
        Ok(OutboundMessage::Call(_))
    ));
}

/// Per-session ordering follows persist order (monotonic ids witness it).
#[tokio::test]
async fn test_per_session_ordering_matches_persist_order() {
    init_test_logging();
    let mut stack = stack(ReconnectionConfig::default());

    let (_session, mut rx) = stack.live_session(&user_a());

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(stack.ingest_and_dispatch(100, T0 + i).await);
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids are monotonic");

    let mut delivered = Vec::new();
    while let Ok(OutboundMessage::Call(payload)) = rx.outbox.try_recv() {
        delivered.push(payload.id);
    }
    assert_eq!(delivered, ids);
}

/// A session that never drains its outbox loses frames but costs nobody else
/// anything; the drop counter records the overflow.
#[tokio::test]
async fn test_slow_session_only_hurts_itself() {
    init_test_logging();
    let mut stack = stack(ReconnectionConfig::default());

    let (slow, _rx_slow) = stack.live_session(&user_a());
    let (_fast, mut rx_fast) = stack.live_session(&user_a());

    // Registry outbox capacity is 16; push well past it
    for i in 0..30 {
        stack.ingest_and_dispatch(100, T0 + i).await;
    }

    assert!(slow.dropped_count() >= 14, "slow outbox overflowed");

    let mut fast_received = 0;
    while let Ok(OutboundMessage::Call(_)) = rx_fast.outbox.try_recv() {
        fast_received += 1;
    }
    assert_eq!(fast_received, 16, "fast session filled to capacity");
}

/// The full command path: login, livefeed, then a live delivery.
#[tokio::test]
async fn test_session_command_path_to_delivery() {
    init_test_logging();
    let mut stack = stack(ReconnectionConfig::default());

    let (session, mut rx) = stack.registry.open("127.0.0.1".parse().unwrap());

    stack
        .context
        .handle_frame(&session, r#"{"command":"login","payload":{"pin":"1111"}}"#)
        .await;
    assert!(matches!(rx.outbox.try_recv(), Ok(OutboundMessage::Ready)));
    assert!(matches!(
        rx.outbox.try_recv(),
        Ok(OutboundMessage::Config(_))
    ));

    stack
        .context
        .handle_frame(
            &session,
            r#"{"command":"livefeed","payload":{"1":{"100":true}}}"#,
        )
        .await;
    assert!(matches!(
        rx.outbox.try_recv(),
        Ok(OutboundMessage::LivefeedMap(_))
    ));

    stack.ingest_and_dispatch(100, T0).await;
    match rx.outbox.try_recv() {
        Ok(OutboundMessage::Call(payload)) => assert_eq!(payload.talkgroup, 100),
        other => panic!("expected live call, got {other:?}"),
    }

    // Talkgroup 200 is not in this client's matrix
    stack.ingest_and_dispatch(200, T0 + 1).await;
    assert!(rx.outbox.try_recv().is_err());
}

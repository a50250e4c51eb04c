mod common;

use clarifai_stream::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, Frame, InitMessage,
    MessageCodec, Outbound, ReconnectPolicy, SessionError,
};
use common::{next_peer, settle, ConnectBehavior, MockConnector};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

fn config(init: Option<InitMessage>) -> ConnectionConfig {
    ConnectionConfig {
        url: "ws://lectures.test/ws/audio-to-text".to_string(),
        label: "transcription".to_string(),
        policy: ReconnectPolicy::default(),
        codec: MessageCodec::default(),
        init,
    }
}

fn init() -> InitMessage {
    InitMessage {
        user_id: Some("student-1".to_string()),
        lecture_id: "lecture-42".to_string(),
        mode: None,
        token: Some("t0k3n".to_string()),
    }
}

/// Paused time lands on timer ticks, so allow a millisecond of rounding
fn assert_elapsed(since: Instant, expected: Duration) {
    let elapsed = since.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(2),
        "expected {expected:?}, got {elapsed:?}"
    );
}

async fn wait_for_state(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    wanted: ConnectionState,
) -> u32 {
    while let Some(event) = events.recv().await {
        if let ConnectionEvent::State { state, attempt } = event {
            if state == wanted {
                return attempt;
            }
        }
    }
    panic!("event stream ended before {wanted}");
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_capped_backoff_then_reports_fatal_once() {
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Refuse);
    connector.script([ConnectBehavior::Accept]);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector.clone());

    handle.connect();
    let peer = next_peer(&mut peers).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    let closed_at = Instant::now();
    peer.close(1006).await;

    let mut fatal = Vec::new();
    let mut scheduled = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::State {
                state: ConnectionState::Closed,
                attempt,
            } => scheduled.push(attempt),
            ConnectionEvent::Fatal(e) => fatal.push(e),
            ConnectionEvent::State {
                state: ConnectionState::Failed,
                ..
            } => break,
            _ => {}
        }
    }

    assert_eq!(scheduled, vec![1, 2, 3, 4, 5]);
    assert_eq!(fatal, vec![SessionError::Fatal { attempts: 5 }]);
    assert_eq!(handle.state(), ConnectionState::Failed);

    let times = connector.attempt_times();
    assert_eq!(times.len(), 6);
    let mut delays = vec![(times[1] - closed_at).as_secs()];
    delays.extend(times[1..].windows(2).map(|w| (w[1] - w[0]).as_secs()));
    assert_eq!(delays, vec![1, 2, 4, 8, 16]);

    // No sixth reconnect
    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 6);
    assert_eq!(handle.stats().reconnects(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_scheduled_reconnect() {
    let (connector, _peers) = MockConnector::new(ConnectBehavior::Refuse);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector.clone());

    handle.connect();
    let attempt = wait_for_state(&mut events, ConnectionState::Closed).await;
    assert_eq!(attempt, 1);

    handle.disconnect().await;
    assert_eq!(handle.state(), ConnectionState::Idle);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(handle.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_connect_timeout() {
    let (connector, _peers) = MockConnector::new(ConnectBehavior::Hang);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector.clone());

    handle.connect();
    wait_for_state(&mut events, ConnectionState::Connecting).await;
    sleep(Duration::from_secs(1)).await;

    handle.disconnect().await;
    assert_eq!(handle.state(), ConnectionState::Idle);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(handle.state(), ConnectionState::Idle);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                ConnectionEvent::State {
                    state: ConnectionState::Closed,
                    ..
                }
            ),
            "timed-out attempt surfaced after disconnect"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_counts_as_failed_attempt() {
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Accept);
    connector.script([ConnectBehavior::Hang]);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector.clone());

    let started = Instant::now();
    handle.connect();
    let attempt = wait_for_state(&mut events, ConnectionState::Closed).await;
    assert_eq!(attempt, 1);
    assert_elapsed(started, Duration::from_secs(5));

    let _peer = next_peer(&mut peers).await;
    let attempt = wait_for_state(&mut events, ConnectionState::Open).await;
    assert_eq!(attempt, 0);
    assert_elapsed(started, Duration::from_secs(6));
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_init_is_first_frame_on_every_open() {
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Accept);
    let (handle, mut events) = ConnectionManager::spawn(config(Some(init())), connector);

    handle.connect();
    let mut first = next_peer(&mut peers).await;
    let expected = json!({
        "user_id": "student-1",
        "lecture_id": "lecture-42",
        "token": "t0k3n"
    });
    assert_eq!(first.recv_json().await, Some(expected.clone()));

    wait_for_state(&mut events, ConnectionState::Open).await;
    first.close(1006).await;

    let mut second = next_peer(&mut peers).await;
    assert_eq!(second.recv_json().await, Some(expected));
    wait_for_state(&mut events, ConnectionState::Open).await;
    assert!(handle.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_open_connection() {
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Accept);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector);

    let result = handle.send(Outbound::Audio(vec![1, 2, 3, 4])).await;
    assert_eq!(result, Err(SessionError::NotConnected));
    assert_eq!(handle.stats().frames_dropped(), 1);

    handle.connect();
    let mut peer = next_peer(&mut peers).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    handle.send(Outbound::Audio(vec![1, 2, 3, 4])).await.unwrap();
    assert_eq!(peer.recv().await, Some(Frame::Binary(vec![1, 2, 3, 4])));
    assert_eq!(handle.stats().frames_sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_events_keep_arrival_order() {
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Accept);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector);

    handle.connect();
    let peer = next_peer(&mut peers).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    peer.send_json(json!({"status": "connected", "session_id": "s-1", "message": "hi"}))
        .await;
    peer.send_text("not json").await;
    peer.send_json(json!({
        "transcript": "osmosis moves water",
        "is_final": true,
        "concepts": [{"concept_name": "Osmosis", "text_snippet": "moves water", "difficulty_level": 2}],
        "current_concept": {"concept_name": "Osmosis", "difficulty_level": 2}
    }))
    .await;

    let mut kinds = Vec::new();
    while kinds.len() < 5 {
        match events.recv().await {
            Some(ConnectionEvent::Inbound(event)) => kinds.push(event.kind()),
            Some(_) => {}
            None => break,
        }
    }

    assert_eq!(
        kinds,
        vec!["connected", "error", "transcript", "concepts", "current_concept"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_graceful_disconnect_from_open() {
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Accept);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector.clone());

    handle.connect();
    let mut peer = next_peer(&mut peers).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    handle.disconnect().await;
    assert_eq!(handle.state(), ConnectionState::Closing);

    // Our side of the transport is closed; the peer acknowledges
    assert_eq!(peer.recv().await, None);
    peer.close(1000).await;
    wait_for_state(&mut events, ConnectionState::Idle).await;

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_close_is_bounded() {
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Accept);
    let (handle, mut events) = ConnectionManager::spawn(config(None), connector);

    handle.connect();
    let _peer = next_peer(&mut peers).await;
    wait_for_state(&mut events, ConnectionState::Open).await;

    let started = Instant::now();
    handle.disconnect().await;
    wait_for_state(&mut events, ConnectionState::Idle).await;
    assert_elapsed(started, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_failure_restarts_from_zero() {
    let policy = ReconnectPolicy {
        max_attempts: 1,
        ..ReconnectPolicy::default()
    };
    let (connector, mut peers) = MockConnector::new(ConnectBehavior::Refuse);
    let (handle, mut events) = ConnectionManager::spawn(
        ConnectionConfig {
            policy,
            ..config(None)
        },
        connector.clone(),
    );

    handle.connect();
    wait_for_state(&mut events, ConnectionState::Failed).await;
    assert_eq!(connector.attempts(), 2);

    connector.script([ConnectBehavior::Accept]);
    handle.connect();
    let _peer = next_peer(&mut peers).await;
    let attempt = wait_for_state(&mut events, ConnectionState::Open).await;
    assert_eq!(attempt, 0);
    settle().await;
    assert!(matches!(
        events.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));
}

mod common;

use std::time::Duration;

use alertwatch::models::{ConnectionStatus, PushMessage};
use alertwatch::ws_stream::run_push_loop;
use alertwatch::Update;
use common::{alert_json, push_server, Session};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

const HANDSHAKE: Duration = Duration::from_secs(5);

async fn next_update(rx: &mut mpsc::Receiver<Update>) -> Update {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("push loop stopped")
}

fn status(update: &Update) -> Option<ConnectionStatus> {
    match update {
        Update::Status(s) => Some(*s),
        _ => None,
    }
}

#[tokio::test]
async fn forced_closures_trigger_one_reconnect_each() {
    const CLOSURES: usize = 3;
    let delay = Duration::from_millis(150);

    let mut script: Vec<Session> = (0..CLOSURES).map(|_| Session::SendThenClose(vec![])).collect();
    script.push(Session::SendThenHold(vec![]));
    let (url, mut accepted) = push_server(script).await;

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    tokio::spawn(run_push_loop(url, delay, HANDSHAKE, tx, cancel.clone()));

    let mut statuses = Vec::new();
    let mut offline_at = None;
    let mut gaps = Vec::new();
    while statuses.len() < CLOSURES * 2 + 1 {
        let update = next_update(&mut rx).await;
        let Some(s) = status(&update) else { continue };
        match s {
            ConnectionStatus::Offline => offline_at = Some(Instant::now()),
            ConnectionStatus::Live => {
                if let Some(t) = offline_at.take() {
                    gaps.push(t.elapsed());
                }
            }
            _ => {}
        }
        statuses.push(s);
    }

    let mut expected = Vec::new();
    for _ in 0..CLOSURES {
        expected.push(ConnectionStatus::Live);
        expected.push(ConnectionStatus::Offline);
    }
    expected.push(ConnectionStatus::Live);
    assert_eq!(statuses, expected);

    assert_eq!(gaps.len(), CLOSURES);
    for gap in gaps {
        assert!(gap >= delay - Duration::from_millis(20), "reconnected too early: {gap:?}");
    }

    // initial connection plus exactly one attempt per closure
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut count = 0;
    while let Ok(n) = accepted.try_recv() {
        count = n;
    }
    assert_eq!(count, CLOSURES + 1);

    // held connection: no further reconnects
    tokio::time::sleep(delay * 3).await;
    assert!(accepted.try_recv().is_err());
    cancel.cancel();
}

#[tokio::test]
async fn malformed_and_unknown_frames_do_not_break_the_channel() {
    let frames = vec![
        "{not json".to_string(),
        json!({"type": "honeypot_log", "data": {"service": "ssh"}}).to_string(),
        json!({"type": "new_alert", "data": {"severity": "low"}}).to_string(),
        json!({"type": "new_alert", "data": alert_json("XSS", "2024-05-01T10:00:00")}).to_string(),
        json!({"type": "stats_update", "data": {"by_type": {"XSS": 3}}}).to_string(),
    ];
    let (url, _accepted) = push_server(vec![Session::SendThenHold(frames)]).await;

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    tokio::spawn(run_push_loop(url, Duration::from_secs(5), HANDSHAKE, tx, cancel.clone()));

    assert_eq!(status(&next_update(&mut rx).await), Some(ConnectionStatus::Live));

    match next_update(&mut rx).await {
        Update::Push(PushMessage::NewAlert(a)) => assert_eq!(a.attack_type, "XSS"),
        other => panic!("expected new_alert, got {other:?}"),
    }
    match next_update(&mut rx).await {
        Update::Push(PushMessage::StatsUpdate(s)) => {
            assert_eq!(s.by_type.get("XSS"), Some(&3));
            assert_eq!(s.total, 0);
        }
        other => panic!("expected stats_update, got {other:?}"),
    }

    // still connected
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    cancel.cancel();
}

#[tokio::test]
async fn unreachable_server_keeps_retrying_while_offline() {
    // bind then drop to get a port nobody listens on
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let url = format!("ws://127.0.0.1:{port}/ws");

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    tokio::spawn(run_push_loop(url, Duration::from_millis(50), HANDSHAKE, tx, cancel.clone()));

    for _ in 0..3 {
        assert_eq!(status(&next_update(&mut rx).await), Some(ConnectionStatus::Offline));
    }
    cancel.cancel();
}

#[tokio::test]
async fn stalled_handshake_times_out_and_retries() {
    // accepts TCP but never answers the upgrade request
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
            let _ = accepted_tx.send(held.len());
        }
    });

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    tokio::spawn(run_push_loop(
        url,
        Duration::from_millis(50),
        Duration::from_millis(200),
        tx,
        cancel.clone(),
    ));

    for _ in 0..2 {
        assert_eq!(status(&next_update(&mut rx).await), Some(ConnectionStatus::Offline));
    }
    assert!(accepted.recv().await.is_some());
    assert!(accepted.recv().await.is_some());
    cancel.cancel();
}

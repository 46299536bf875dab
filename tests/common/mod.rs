#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use futures_util::SinkExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub fn alert_json(attack_type: &str, timestamp: &str) -> Value {
    json!({
        "timestamp": timestamp,
        "severity": "high",
        "attack_type": attack_type,
        "source_ip": "203.0.113.9",
        "country": "FR",
        "city": "Paris",
        "pattern": "' OR 1=1 --"
    })
}

/// Mock of the SIEM REST API. Flip `failing` to answer 500s.
#[derive(Clone, Default)]
pub struct MockBackend {
    pub failing: Arc<AtomicBool>,
    pub stats_hits: Arc<AtomicUsize>,
    pub stats: Arc<std::sync::Mutex<Value>>,
    pub alerts: Arc<std::sync::Mutex<Vec<Value>>>,
}

impl MockBackend {
    pub fn set_alerts(&self, alerts: Vec<Value>) {
        *self.alerts.lock().unwrap() = alerts;
    }

    pub fn set_stats(&self, stats: Value) {
        *self.stats.lock().unwrap() = stats;
    }

    pub async fn serve(&self) -> SocketAddr {
        let router = Router::new()
            .route("/api/stats", get(stats))
            .route("/api/alerts", get(alerts))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}

async fn stats(State(b): State<MockBackend>) -> impl IntoResponse {
    b.stats_hits.fetch_add(1, Ordering::SeqCst);
    if b.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "db locked"})));
    }
    let body = b.stats.lock().unwrap().clone();
    (StatusCode::OK, Json(body))
}

async fn alerts(State(b): State<MockBackend>) -> impl IntoResponse {
    if b.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "db locked"})));
    }
    let list = b.alerts.lock().unwrap().clone();
    (StatusCode::OK, Json(json!({ "alerts": list, "count": list.len() })))
}

/// What the push server does with each accepted connection.
pub enum Session {
    /// Send these frames, then a close frame.
    SendThenClose(Vec<String>),
    /// Send these frames and keep the connection open.
    SendThenHold(Vec<String>),
    /// Wait, then behave like `SendThenHold`.
    DelayThenHold(std::time::Duration, Vec<String>),
}

/// Push-channel server running one scripted session per accepted
/// connection. Reports each accept on the returned channel.
pub async fn push_server(script: Vec<Session>) -> (String, mpsc::UnboundedReceiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut held = Vec::new();
        for (n, session) in script.into_iter().enumerate() {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let _ = accepted_tx.send(n + 1);
            match session {
                Session::SendThenClose(frames) => {
                    for f in frames {
                        ws.send(Message::Text(f.into())).await.unwrap();
                    }
                    let _ = ws.close(None).await;
                    // drain until the client acknowledges the close
                    use futures_util::StreamExt;
                    while let Some(Ok(_)) = ws.next().await {}
                }
                Session::DelayThenHold(delay, frames) => {
                    tokio::time::sleep(delay).await;
                    for f in frames {
                        ws.send(Message::Text(f.into())).await.unwrap();
                    }
                    held.push(ws);
                }
                Session::SendThenHold(frames) => {
                    for f in frames {
                        ws.send(Message::Text(f.into())).await.unwrap();
                    }
                    held.push(ws);
                }
            }
        }
        // keep held connections open for the rest of the test
        std::future::pending::<()>().await;
        drop(held);
    });

    (url, accepted_rx)
}

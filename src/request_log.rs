//! Per-request access log for the local API.
//!
//! Each finished request becomes one line. When a helper command is
//! configured (typically an encryption tool), every line is piped to a fresh
//! helper process on stdin. Hand-off is fire-and-forget: the request path
//! only enqueues, a worker spawns helpers under a concurrency limit and logs
//! their failures.

use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RequestLogConfig;

/// Same limit the `Json` extractor applies by default.
const MAX_BUFFERED_BODY: usize = 2 * 1024 * 1024;
/// Larger bodies are logged by size only.
const MAX_LOGGED_BODY: usize = 64 * 1024;

/// Cheap handle to the hand-off queue.
#[derive(Clone)]
pub struct LogShipper {
    tx: Option<mpsc::Sender<String>>,
}

impl LogShipper {
    /// Start the hand-off worker, or a log-only shipper when no helper
    /// command is configured.
    pub fn spawn(cfg: &RequestLogConfig, cancel: CancellationToken) -> Self {
        let Some(program) = cfg.command.clone() else {
            return Self { tx: None };
        };

        let (tx, rx) = mpsc::channel(cfg.queue_size.max(1));
        tokio::spawn(ship_worker(
            rx,
            program,
            cfg.args.clone(),
            cfg.max_concurrent.max(1),
            cancel,
        ));
        Self { tx: Some(tx) }
    }

    /// Never waits. A full queue drops the line.
    pub fn ship(&self, line: String) {
        match &self.tx {
            None => info!("{}", line.trim_end()),
            Some(tx) => {
                if let Err(e) = tx.try_send(line) {
                    warn!("Request log line dropped: {e}");
                }
            }
        }
    }
}

async fn ship_worker(
    mut rx: mpsc::Receiver<String>,
    program: String,
    args: Vec<String>,
    max_concurrent: usize,
    cancel: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(max_concurrent));
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(line) => line,
                None => break,
            },
        };

        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let program = program.clone();
        let args = args.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = pipe_to_helper(&program, &args, &line).await {
                error!("Request log hand-off to {program} failed: {e}");
            }
        });
    }
}

async fn pipe_to_helper(program: &str, args: &[String], line: &str) -> std::io::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(line.as_bytes()).await?;
        // dropping stdin closes the pipe
    }

    let status = child.wait().await?;
    if !status.success() {
        warn!("Request log helper {program} exited with {status}");
    }
    Ok(())
}

/// `axum` middleware producing one line per request.
pub async fn log_requests(State(shipper): State<LogShipper>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().to_string();
    let ip = client_ip(req.headers(), req.extensions().get::<ConnectInfo<SocketAddr>>());
    let ua = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown-UA")
        .to_owned();

    let (response, body) = if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
        let (parts, body) = req.into_parts();
        match to_bytes(body, MAX_BUFFERED_BODY).await {
            Ok(bytes) => {
                let logged = describe_body(&bytes);
                let req = Request::from_parts(parts, Body::from(bytes));
                (next.run(req).await, Some(logged))
            }
            Err(e) => {
                warn!("Rejecting {method} {uri} body: {e}");
                (
                    StatusCode::PAYLOAD_TOO_LARGE.into_response(),
                    Some("[body too large]".to_owned()),
                )
            }
        }
    } else {
        (next.run(req).await, None)
    };

    let line = format_line(
        &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        &ip,
        method.as_str(),
        &uri,
        body.as_deref(),
        response.status().as_u16(),
        start.elapsed().as_millis(),
        &ua,
    );
    shipper.ship(line);

    response
}

fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".into())
}

fn describe_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_LOGGED_BODY {
        return format!("[{} bytes]", bytes.len());
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(v) => v.to_string(),
        Err(_) if bytes.is_empty() => "{}".into(),
        Err(_) => "[unreadable]".into(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn format_line(
    timestamp: &str,
    ip: &str,
    method: &str,
    uri: &str,
    body: Option<&str>,
    status: u16,
    millis: u128,
    ua: &str,
) -> String {
    let body = body.map(|b| format!(" body:{b}")).unwrap_or_default();
    format!("{timestamp} - {ip} - {method} {uri}{body} - {status} - {millis}ms ua:{ua}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    #[test]
    fn line_matches_access_log_format() {
        let line = format_line(
            "2024-05-01T10:00:00.000Z",
            "203.0.113.9",
            "POST",
            "/filter",
            Some(r#"{"filter":"XSS"}"#),
            200,
            3,
            "curl/8.0",
        );
        assert_eq!(
            line,
            "2024-05-01T10:00:00.000Z - 203.0.113.9 - POST /filter body:{\"filter\":\"XSS\"} - 200 - 3ms ua:curl/8.0\n"
        );

        let get = format_line("t", "ip", "GET", "/view", None, 404, 0, "ua");
        assert_eq!(get, "t - ip - GET /view - 404 - 0ms ua:ua\n");
    }

    #[test]
    fn forwarded_for_wins_over_peer_address() {
        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000)));
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(&peer)), "127.0.0.1");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4, 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(&peer)), "198.51.100.4");
    }

    #[test]
    fn unreadable_bodies_are_marked() {
        assert_eq!(describe_body(br#"{ "a" : 1 }"#), r#"{"a":1}"#);
        assert_eq!(describe_body(b"\xff\xfe"), "[unreadable]");
    }

    #[test]
    fn oversized_bodies_are_logged_by_size() {
        let big = format!(r#"{{"pad":"{}"}}"#, "x".repeat(MAX_LOGGED_BODY));
        assert_eq!(describe_body(big.as_bytes()), format!("[{} bytes]", big.len()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lines_are_piped_to_helper_stdin() {
        let out = std::env::temp_dir().join(format!("alertwatch-reqlog-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&out);

        let cfg = RequestLogConfig {
            command: Some("sh".into()),
            args: vec!["-c".into(), format!("cat >> {}", out.display())],
            max_concurrent: 1,
            queue_size: 8,
        };
        let cancel = CancellationToken::new();
        let shipper = LogShipper::spawn(&cfg, cancel.clone());
        shipper.ship("first line\n".into());
        shipper.ship("second line\n".into());

        let mut content = String::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            content = std::fs::read_to_string(&out).unwrap_or_default();
            if content.lines().count() == 2 {
                break;
            }
        }
        cancel.cancel();
        let _ = std::fs::remove_file(&out);

        assert_eq!(content, "first line\nsecond line\n");
    }

    #[tokio::test]
    async fn missing_helper_is_logged_not_fatal() {
        let cfg = RequestLogConfig {
            command: Some("/nonexistent/alertwatch-helper".into()),
            ..Default::default()
        };
        let shipper = LogShipper::spawn(&cfg, CancellationToken::new());
        shipper.ship("line\n".into());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shipper.ship("another\n".into());
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the worker is still draining the queue after both failures
        let tx = shipper.tx.as_ref().unwrap();
        assert!(!tx.is_closed());
        assert_eq!(tx.capacity(), cfg.queue_size);
    }
}

// ─────────────────────────────────────────────────────────────────
//  ws_stream.rs: SIEM push channel
//
//  Connects to the backend's /ws endpoint and forwards every
//  `new_alert` / `stats_update` frame to the view synchronizer.
//  Reconnects after a fixed delay, forever, until cancelled.
// ─────────────────────────────────────────────────────────────────

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::models::{ConnectionStatus, PushMessage};
use crate::sync::Update;

/// Run the push-channel loop. Holds at most one connection and at most one
/// pending reconnect at a time. Returns on cancellation or once the
/// synchronizer has gone away.
pub async fn run_push_loop(
    url: String,
    reconnect_delay: Duration,
    handshake_timeout: Duration,
    updates: mpsc::Sender<Update>,
    cancel: CancellationToken,
) {
    info!(
        "📡 Push channel enabled — server: {url}, reconnect every {}ms",
        reconnect_delay.as_millis()
    );

    loop {
        info!("Connecting to push channel...");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            r = connect_and_listen(&url, handshake_timeout, &updates) => r,
        };

        match outcome {
            Ok(()) => {
                warn!(
                    "Push channel closed. Reconnecting in {}ms...",
                    reconnect_delay.as_millis()
                );
            }
            Err(e) => {
                error!(
                    "Push channel error: {e}. Reconnecting in {}ms...",
                    reconnect_delay.as_millis()
                );
            }
        }

        if updates
            .send(Update::Status(ConnectionStatus::Offline))
            .await
            .is_err()
        {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(reconnect_delay) => {}
        }
    }

    info!("Push channel stopped");
}

/// Open one connection and pump it until it closes. A handshake that does
/// not finish within `handshake_timeout` counts as a closure.
async fn connect_and_listen(
    url: &str,
    handshake_timeout: Duration,
    updates: &mpsc::Sender<Update>,
) -> Result<(), SyncError> {
    let (mut ws, _response) = timeout(handshake_timeout, connect_async(url))
        .await
        .map_err(|_| SyncError::HandshakeTimeout(handshake_timeout))??;
    info!("✅ Push channel connected to {url}");

    if updates
        .send(Update::Status(ConnectionStatus::Live))
        .await
        .is_err()
    {
        return Ok(());
    }

    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if dispatch(&text, updates).await.is_err() {
                    return Ok(());
                }
            }
            Ok(Message::Close(frame)) => {
                info!("Push channel closed by server: {frame:?}");
                break;
            }
            // pings are answered by tungstenite; binary frames are not part of the protocol
            Ok(_) => {}
            Err(e) => {
                warn!("Push channel transport error: {e}");
                let _ = updates
                    .send(Update::Status(ConnectionStatus::Degraded))
                    .await;
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Parse one frame and forward it. Malformed frames are logged and skipped
/// so a single bad message never tears down the channel.
async fn dispatch(
    raw: &str,
    updates: &mpsc::Sender<Update>,
) -> Result<(), mpsc::error::SendError<Update>> {
    match PushMessage::parse(raw) {
        Ok(Some(msg)) => updates.send(Update::Push(msg)).await,
        Ok(None) => {
            debug!("Ignoring push frame with unhandled type");
            Ok(())
        }
        Err(e) => {
            warn!("Skipping push frame: {e}");
            Ok(())
        }
    }
}

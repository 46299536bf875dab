use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::error::SyncError;
use crate::poller::Poller;
use crate::sync::{DashboardHandle, ViewSynchronizer};
use crate::views::Renderer;
use crate::ws_stream;

/// One dashboard instance: synchronizer, poller and push channel sharing a
/// single session state. Independent instances share nothing.
pub struct Dashboard {
    handle: DashboardHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Dashboard {
    /// Spawn all three tasks. The poller starts first so the initial bulk
    /// load is requested before the push channel connects.
    pub fn start(cfg: &AppConfig, renderer: Arc<dyn Renderer>) -> Result<Self, SyncError> {
        let poller = Poller::new(&cfg.backend, &cfg.poll)?;
        let cancel = CancellationToken::new();

        let handle = ViewSynchronizer::new(cfg.buffer.capacity, cfg.view.clone(), renderer)
            .spawn(cancel.child_token());

        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(poller.run(handle.updates(), cancel.child_token())));
        tasks.push(tokio::spawn(ws_stream::run_push_loop(
            cfg.backend.ws_url.clone(),
            cfg.stream.reconnect_delay(),
            cfg.stream.handshake_timeout(),
            handle.updates(),
            cancel.child_token(),
        )));

        info!("Dashboard started (buffer capacity {})", cfg.buffer.capacity);
        Ok(Self {
            handle,
            cancel,
            tasks,
        })
    }

    pub fn handle(&self) -> DashboardHandle {
        self.handle.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every task and wait for the producers to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Dashboard stopped");
    }
}

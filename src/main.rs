use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use alertwatch::api::{build_router, AppState};
use alertwatch::request_log::LogShipper;
use alertwatch::{AppConfig, Dashboard, LogRenderer};

const BANNER: &str = r#"
        _           _                    _       _
   __ _| | ___ _ __| |___      ____ _| |_ ___| |__
  / _` | |/ _ \ '__| __\ \ /\ / / _` | __/ __| '_ \
 | (_| | |  __/ |  | |_ \ V  V / (_| | || (__| | | |
  \__,_|_|\___|_|   \__| \_/\_/ \__,_|\__\___|_| |_|
  Live SIEM Alert Dashboard
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alertwatch=info".into()),
        )
        .compact()
        .init();

    println!("{BANNER}");

    // ── Config ──────────────────────────────────────────────────
    let cfg = AppConfig::load(None)?;
    info!(
        "Config loaded — backend {}, poll every {}s, reconnect after {}ms",
        cfg.backend.base_url,
        cfg.poll.interval_secs,
        cfg.stream.reconnect_delay().as_millis()
    );

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".into());

    // ── Dashboard: poller, push channel, view synchronizer ─────
    let dashboard = Dashboard::start(&cfg, Arc::new(LogRenderer))?;

    // ── Spawn: local dashboard API ──────────────────────────────
    if cfg.api.enabled {
        let shipper = LogShipper::spawn(&cfg.request_log, dashboard.cancel_token());
        let state = AppState {
            dashboard: dashboard.handle(),
            hostname,
            start_time: std::time::Instant::now(),
        };
        let router = build_router(state, shipper);

        let addr = format!("0.0.0.0:{}", cfg.api.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("API listening on http://{addr}");

        let cancel = dashboard.cancel_token();
        tokio::spawn(async move {
            let served = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
            if let Err(e) = served {
                error!("API server stopped: {e}");
            }
        });
    } else {
        info!("Local API disabled in config");
    }

    // ── Run until interrupted ───────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    dashboard.shutdown().await;

    Ok(())
}

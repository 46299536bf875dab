use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::config::{BackendConfig, PollConfig};
use crate::error::SyncError;
use crate::models::{Alert, AlertsResponse, StatsSnapshot};
use crate::sync::Update;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Periodic full-state refresh over the REST API, as a fallback for the
/// push channel.
pub struct Poller {
    client: reqwest::Client,
    stats_url: Url,
    alerts_url: Url,
    interval: Duration,
}

impl Poller {
    pub fn new(backend: &BackendConfig, poll: &PollConfig) -> Result<Self, SyncError> {
        let mut base = Url::parse(&backend.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let stats_url = base.join("api/stats")?;
        let mut alerts_url = base.join("api/alerts")?;
        alerts_url
            .query_pairs_mut()
            .append_pair("limit", &poll.alert_limit.to_string());

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            stats_url,
            alerts_url,
            interval: Duration::from_secs(poll.interval_secs),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Fetch the stats snapshot and the recent alerts. Both must succeed;
    /// a non-2xx status is an error.
    pub async fn fetch(&self) -> Result<(StatsSnapshot, Vec<Alert>), SyncError> {
        let stats: StatsSnapshot = self
            .client
            .get(self.stats_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let alerts: AlertsResponse = self
            .client
            .get(self.alerts_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok((stats, alerts.alerts))
    }

    /// Fetch once immediately, then on every interval tick. A failed fetch
    /// is reported and the schedule carries on.
    pub async fn run(self, updates: mpsc::Sender<Update>, cancel: CancellationToken) {
        info!(
            "🔄 Polling {} every {}s",
            self.stats_url,
            self.interval.as_secs_f32()
        );

        // first tick completes immediately
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.fetch() => r,
            };

            let update = match fetched {
                Ok((stats, alerts)) => {
                    info!(
                        "Poll refreshed: {} alert(s), {} total detections",
                        alerts.len(),
                        stats.total
                    );
                    Update::PollSucceeded { stats, alerts }
                }
                Err(e) => {
                    warn!("Poll failed (keeping previous state): {e}");
                    Update::PollFailed(e.to_string())
                }
            };

            if updates.send(update).await.is_err() {
                break;
            }
        }

        info!("Poller stopped");
    }
}

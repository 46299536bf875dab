//! View synchronizer: the single task that applies store writes and redraws
//! every affected widget at one logical revision.
//!
//! The push channel and the poller never touch the stores directly. They
//! send [`Update`]s here, and because one task drains the queue, a reader can
//! never observe a half-applied write.
//!
//! Push and poll are not reconciled. A poll replaces the buffer wholesale,
//! so an alert pushed between two polls disappears if the next poll does not
//! include it yet, and shows up twice if the poll includes it and the push
//! arrives late. Last writer wins and a poll wins ties.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buffer::Filter;
use crate::config::ViewConfig;
use crate::models::{Alert, ConnectionStatus, PushMessage, StatsSnapshot};
use crate::scheduler::TaskSlots;
use crate::state::SessionState;
use crate::views::{self, DashboardView, Marker, Renderer};

const UPDATE_QUEUE: usize = 256;

/// A state change, tagged by who produced it.
#[derive(Debug, Clone)]
pub enum Update {
    /// Inbound push-channel message.
    Push(PushMessage),
    /// Push-channel status transition.
    Status(ConnectionStatus),
    PollSucceeded {
        stats: StatsSnapshot,
        alerts: Vec<Alert>,
    },
    PollFailed(String),
    /// User filter selection.
    SetFilter(Filter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Widget {
    Counter(&'static str),
    Markers,
    RowEmphasis,
}

/// Which sinks a change touches.
#[derive(Debug, Clone, Copy, Default)]
struct Dirty {
    counters: bool,
    charts: bool,
    markers: bool,
    table: bool,
    status: bool,
}

impl Dirty {
    const TABLE: Dirty = Dirty {
        counters: false,
        charts: false,
        markers: false,
        table: true,
        status: false,
    };
    const SNAPSHOT: Dirty = Dirty {
        counters: true,
        charts: true,
        markers: true,
        table: false,
        status: false,
    };
    const ALL: Dirty = Dirty {
        counters: true,
        charts: true,
        markers: true,
        table: true,
        status: true,
    };
    const STATUS: Dirty = Dirty {
        counters: false,
        charts: false,
        markers: false,
        table: false,
        status: true,
    };
}

pub struct ViewSynchronizer {
    state: SessionState,
    view: DashboardView,
    cfg: ViewConfig,
    renderer: Arc<dyn Renderer>,
    animations: TaskSlots<Widget>,
    /// Last applied counter targets.
    targets: HashMap<&'static str, u64>,
    /// Values currently shown by the counter sinks, mid-animation included.
    displayed: Arc<Mutex<HashMap<&'static str, u64>>>,
    markers_drawn: bool,
    published: watch::Sender<Arc<DashboardView>>,
}

impl ViewSynchronizer {
    pub fn new(capacity: usize, cfg: ViewConfig, renderer: Arc<dyn Renderer>) -> Self {
        let view = DashboardView::default();
        let (published, _) = watch::channel(Arc::new(view.clone()));
        Self {
            state: SessionState::new(capacity),
            view,
            cfg,
            renderer,
            animations: TaskSlots::new(),
            targets: HashMap::new(),
            displayed: Arc::new(Mutex::new(HashMap::new())),
            markers_drawn: false,
            published,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn view(&self) -> &DashboardView {
        &self.view
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardView>> {
        self.published.subscribe()
    }

    /// Apply one update and redraw what it affects. Needs a tokio runtime
    /// for the animation tasks.
    pub fn apply(&mut self, update: Update) {
        match update {
            Update::Push(PushMessage::NewAlert(alert)) => {
                let visible = self.state.filter.matches(&alert);
                info!(
                    "🚨 New alert: {} ({}) from {}",
                    alert.attack_type,
                    alert.severity,
                    alert.source_ip.as_deref().unwrap_or("unknown")
                );
                self.state.insert_push(alert);
                self.redraw(Dirty::TABLE);
                if visible {
                    self.emphasize_newest();
                }
            }
            Update::Push(PushMessage::StatsUpdate(stats)) => {
                self.state.replace_snapshot(stats);
                self.redraw(Dirty::SNAPSHOT);
            }
            Update::PollSucceeded { stats, alerts } => {
                self.state.apply_poll(stats, alerts);
                self.clear_emphasis();
                self.redraw(Dirty::ALL);
            }
            Update::PollFailed(reason) => {
                self.state.poll_error = Some(reason);
                self.clear_emphasis();
                self.redraw(Dirty::TABLE);
            }
            Update::SetFilter(filter) => {
                info!("Filter set to {filter}");
                self.state.filter = filter;
                self.clear_emphasis();
                self.redraw(Dirty::TABLE);
            }
            Update::Status(status) => {
                if status == self.state.status {
                    return;
                }
                self.state.status = status;
                self.redraw(Dirty::STATUS);
            }
        }
    }

    /// Drain updates until the queue closes or `cancel` fires.
    pub async fn run(mut self, mut updates: mpsc::Receiver<Update>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = updates.recv() => match next {
                    Some(update) => self.apply(update),
                    None => break,
                },
            }
        }
        self.animations.cancel_all();
        info!("View synchronizer stopped at revision {}", self.view.revision);
    }

    /// Spawn [`Self::run`] and hand back the producer/reader side.
    pub fn spawn(self, cancel: CancellationToken) -> DashboardHandle {
        let (tx, rx) = mpsc::channel(UPDATE_QUEUE);
        let handle = DashboardHandle {
            updates: tx,
            view: self.subscribe(),
        };
        tokio::spawn(self.run(rx, cancel));
        handle
    }

    // ── redraw ──────────────────────────────────────────────────

    fn redraw(&mut self, dirty: Dirty) {
        self.view.revision += 1;
        self.view.status = self.state.status;
        self.view.filter = self.state.filter.clone();
        self.view.filters = self.state.filter_options();
        self.view.buffered = self.state.buffer.len();

        let snapshot = self.state.snapshot.get();
        let counters = dirty.counters.then(|| views::counters(snapshot));
        let charts = dirty.charts.then(|| {
            (
                views::category_chart(snapshot),
                views::timeline_chart(&snapshot.timeline, self.cfg.timeline_sort),
            )
        });
        let markers = dirty.markers.then(|| views::markers(&snapshot.geo_data));
        let table = dirty.table.then(|| {
            views::alert_table(
                &self.state.buffer,
                &self.state.filter,
                self.state.poll_error.as_deref(),
            )
        });

        if let Some(counters) = counters {
            for c in &counters {
                self.animate_counter(c.key, c.value);
            }
            self.view.counters = counters;
        }
        if let Some((category, timeline)) = charts {
            self.renderer.category_chart(&category);
            self.renderer.timeline_chart(&timeline);
            self.view.categories = category;
            self.view.timeline = timeline;
        }
        if let Some(markers) = markers {
            if !self.markers_drawn || markers != self.view.markers {
                self.place_markers(markers.clone());
                self.markers_drawn = true;
            }
            self.view.markers = markers;
        }
        if let Some(table) = table {
            self.renderer.table(&table);
            self.view.table = table;
        }
        if dirty.status {
            self.renderer.status(self.state.status);
        }

        debug!("revision {} applied", self.view.revision);
        self.published.send_replace(Arc::new(self.view.clone()));
    }

    /// The new value counts as applied immediately; only the displayed value
    /// eases towards it.
    fn animate_counter(&mut self, key: &'static str, target: u64) {
        if self.targets.insert(key, target) == Some(target) {
            return;
        }

        let from = self
            .displayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0);
        let duration = Duration::from_millis(self.cfg.counter_tween_ms);

        if duration.is_zero() || from == target {
            self.animations.cancel(&Widget::Counter(key));
            self.displayed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, target);
            self.renderer.counter(key, target);
            return;
        }

        let renderer = Arc::clone(&self.renderer);
        let displayed = Arc::clone(&self.displayed);
        let frame = Duration::from_millis(self.cfg.frame_ms.max(1));

        self.animations.restart(Widget::Counter(key), move |ticket| async move {
            let start = Instant::now();
            loop {
                let t = (start.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0);
                let value = ease_out(from, target, t);
                let shown = ticket.run(|| {
                    displayed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key, value);
                    renderer.counter(key, value);
                });
                if shown.is_none() || t >= 1.0 {
                    return;
                }
                tokio::time::sleep(frame).await;
            }
        });
    }

    /// Clear the map, then place `markers`. A newer call cancels an
    /// unfinished stagger and starts over from a cleared map.
    fn place_markers(&mut self, markers: Vec<Marker>) {
        let renderer = Arc::clone(&self.renderer);
        let stagger = Duration::from_millis(self.cfg.marker_stagger_ms);

        if stagger.is_zero() {
            self.animations.cancel(&Widget::Markers);
            renderer.clear_markers();
            for m in &markers {
                renderer.place_marker(m);
            }
            return;
        }

        self.animations.restart(Widget::Markers, move |ticket| async move {
            if ticket.run(|| renderer.clear_markers()).is_none() {
                return;
            }
            for m in &markers {
                tokio::time::sleep(stagger).await;
                if ticket.run(|| renderer.place_marker(m)).is_none() {
                    return;
                }
            }
            debug!("{} marker(s) placed", markers.len());
        });
    }

    fn emphasize_newest(&mut self) {
        let renderer = Arc::clone(&self.renderer);
        let hold = Duration::from_millis(self.cfg.highlight_ms);
        self.animations.restart(Widget::RowEmphasis, move |ticket| async move {
            if ticket.run(|| renderer.emphasize_row(Some(0))).is_none() {
                return;
            }
            tokio::time::sleep(hold).await;
            ticket.run(|| renderer.emphasize_row(None));
        });
    }

    /// Row 0 is only the pushed alert until something else redraws the
    /// table.
    fn clear_emphasis(&mut self) {
        if self.animations.is_running(&Widget::RowEmphasis) {
            self.animations.cancel(&Widget::RowEmphasis);
            self.renderer.emphasize_row(None);
        }
    }
}

/// Cubic ease-out from `from` to `to` at progress `t` in `[0, 1]`.
fn ease_out(from: u64, to: u64, t: f64) -> u64 {
    if t >= 1.0 {
        return to;
    }
    let eased = 1.0 - (1.0 - t).powi(3);
    let v = from as f64 + (to as f64 - from as f64) * eased;
    v.round().max(0.0) as u64
}

/// Cloneable access to a running dashboard: send updates, read the view.
#[derive(Clone)]
pub struct DashboardHandle {
    updates: mpsc::Sender<Update>,
    view: watch::Receiver<Arc<DashboardView>>,
}

impl DashboardHandle {
    pub fn updates(&self) -> mpsc::Sender<Update> {
        self.updates.clone()
    }

    pub fn current(&self) -> Arc<DashboardView> {
        Arc::clone(&self.view.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardView>> {
        self.view.clone()
    }

    /// Returns `false` once the synchronizer has stopped.
    pub async fn set_filter(&self, filter: Filter) -> bool {
        self.updates.send(Update::SetFilter(filter)).await.is_ok()
    }
}

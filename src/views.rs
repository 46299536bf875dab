//! Per-widget projections of the session state, and the sinks they feed.
//!
//! Every function here is pure: given the same buffer/snapshot/filter it
//! yields the same widget model, which is what makes redraws idempotent.

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info};

use crate::buffer::{AlertBuffer, Filter};
use crate::models::{Alert, ConnectionStatus, GeoPoint, StatsSnapshot, TimelinePoint};

/// Category chart order. Stable so colours never shift between redraws.
pub const CATEGORIES: [&str; 4] = ["SQL Injection", "XSS", "Brute Force", "ML Anomaly"];

pub const TOTAL: &str = "total";

const MAX_MARKER_RADIUS: u64 = 20;

// ── Widget models ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Counter {
    pub key: &'static str,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryChart {
    pub labels: [&'static str; 4],
    pub values: [u64; 4],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
    pub hour: String,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineChart {
    pub buckets: Vec<TimelineBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub city: String,
    pub count: u64,
    pub radius: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub time: String,
    pub severity: String,
    pub attack_type: String,
    pub source_ip: String,
    pub country: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableView {
    pub rows: Vec<TableRow>,
    /// Shown instead of rows when there is nothing to list.
    pub placeholder: Option<String>,
    /// Transient poll failure banner.
    pub error: Option<String>,
}

/// Everything on screen at one logical revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub revision: u64,
    pub status: ConnectionStatus,
    pub filter: Filter,
    pub filters: Vec<Filter>,
    pub buffered: usize,
    pub counters: Vec<Counter>,
    pub categories: CategoryChart,
    pub timeline: TimelineChart,
    pub markers: Vec<Marker>,
    pub table: TableView,
}

impl Default for DashboardView {
    fn default() -> Self {
        let empty = StatsSnapshot::default();
        Self {
            revision: 0,
            status: ConnectionStatus::Connecting,
            filter: Filter::All,
            filters: vec![Filter::All],
            buffered: 0,
            counters: counters(&empty),
            categories: category_chart(&empty),
            timeline: TimelineChart::default(),
            markers: Vec::new(),
            table: alert_table(&AlertBuffer::new(1), &Filter::All, None),
        }
    }
}

// ── Projections ─────────────────────────────────────────────────

/// `total` followed by one counter per canonical category.
pub fn counters(stats: &StatsSnapshot) -> Vec<Counter> {
    std::iter::once(Counter {
        key: TOTAL,
        value: stats.total,
    })
    .chain(CATEGORIES.iter().map(|&key| Counter {
        key,
        value: stats.by_type.get(key).copied().unwrap_or(0),
    }))
    .collect()
}

pub fn category_chart(stats: &StatsSnapshot) -> CategoryChart {
    CategoryChart {
        labels: CATEGORIES,
        values: CATEGORIES.map(|c| stats.by_type.get(c).copied().unwrap_or(0)),
    }
}

/// Sum counts that share a bucket key. Buckets come out in first-seen order
/// unless `chronological` is set.
pub fn timeline_chart(points: &[TimelinePoint], chronological: bool) -> TimelineChart {
    let mut buckets: Vec<TimelineBucket> = Vec::new();
    for p in points {
        match buckets.iter_mut().find(|b| b.hour == p.hour) {
            Some(b) => b.count += p.count,
            None => buckets.push(TimelineBucket {
                hour: p.hour.clone(),
                label: hour_label(&p.hour),
                count: p.count,
            }),
        }
    }

    if chronological {
        // unparseable keys sort first, by raw key
        buckets.sort_by(|a, b| {
            (parse_timestamp(&a.hour), &a.hour).cmp(&(parse_timestamp(&b.hour), &b.hour))
        });
    }

    TimelineChart { buckets }
}

/// Markers for entries carrying both coordinates.
pub fn markers(geo: &[GeoPoint]) -> Vec<Marker> {
    geo.iter()
        .filter_map(|g| {
            let (latitude, longitude) = (g.latitude?, g.longitude?);
            Some(Marker {
                latitude,
                longitude,
                country: g.country.clone().unwrap_or_default(),
                city: g.city.clone().unwrap_or_default(),
                count: g.count,
                radius: g.count.saturating_mul(2).min(MAX_MARKER_RADIUS),
            })
        })
        .collect()
}

pub fn alert_table(buffer: &AlertBuffer, filter: &Filter, error: Option<&str>) -> TableView {
    let rows: Vec<TableRow> = buffer.project(filter).map(table_row).collect();

    let placeholder = if buffer.is_empty() {
        Some("No alerts found".to_owned())
    } else if rows.is_empty() {
        Some(format!("No {filter} alerts among the last {}", buffer.len()))
    } else {
        None
    };

    TableView {
        rows,
        placeholder,
        error: error.map(|e| format!("Unable to refresh alerts: {e}")),
    }
}

fn table_row(alert: &Alert) -> TableRow {
    TableRow {
        time: parse_timestamp(&alert.timestamp)
            .map(|t| t.format("%d/%m %H:%M:%S").to_string())
            .unwrap_or_else(|| alert.timestamp.clone()),
        severity: alert.severity.to_string(),
        attack_type: alert.attack_type.clone(),
        source_ip: alert.source_ip.clone().unwrap_or_else(|| "unknown".into()),
        country: alert.country.clone().unwrap_or_else(|| "-".into()),
        pattern: alert.pattern.clone().unwrap_or_else(|| "-".into()),
    }
}

fn hour_label(key: &str) -> String {
    parse_timestamp(key)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| key.to_owned())
}

/// Backend timestamps arrive as RFC 3339 or as naive SQL datetimes.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.naive_local());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

// ── Sinks ───────────────────────────────────────────────────────

/// Rendering sinks. Implementations are opaque drawing surfaces; every
/// method defaults to a no-op so a renderer only implements what it shows.
pub trait Renderer: Send + Sync {
    /// Displayed (possibly mid-animation) value of one counter.
    fn counter(&self, _key: &'static str, _displayed: u64) {}
    fn category_chart(&self, _chart: &CategoryChart) {}
    fn timeline_chart(&self, _chart: &TimelineChart) {}
    fn clear_markers(&self) {}
    fn place_marker(&self, _marker: &Marker) {}
    fn table(&self, _table: &TableView) {}
    /// Emphasise a table row, or clear the emphasis with `None`.
    fn emphasize_row(&self, _row: Option<usize>) {}
    fn status(&self, _status: ConnectionStatus) {}
}

/// Renders to the log. Used by the headless binary.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn counter(&self, key: &'static str, displayed: u64) {
        debug!("counter {key} = {displayed}");
    }

    fn category_chart(&self, chart: &CategoryChart) {
        let parts: Vec<String> = chart
            .labels
            .iter()
            .zip(chart.values)
            .map(|(l, v)| format!("{l}={v}"))
            .collect();
        info!("📊 By type: {}", parts.join(", "));
    }

    fn timeline_chart(&self, chart: &TimelineChart) {
        debug!("timeline: {} bucket(s)", chart.buckets.len());
    }

    fn clear_markers(&self) {
        debug!("map cleared");
    }

    fn place_marker(&self, marker: &Marker) {
        debug!(
            "🗺️ {} {} ({:.2}, {:.2}) — {} attack(s)",
            marker.country, marker.city, marker.latitude, marker.longitude, marker.count
        );
    }

    fn table(&self, table: &TableView) {
        if let Some(err) = &table.error {
            info!("⚠️ {err}");
        }
        match (&table.placeholder, table.rows.first()) {
            (Some(p), _) => info!("Alerts: {p}"),
            (None, Some(top)) => info!(
                "Alerts: {} row(s), latest {} {} from {}",
                table.rows.len(),
                top.severity,
                top.attack_type,
                top.source_ip
            ),
            (None, None) => {}
        }
    }

    fn status(&self, status: ConnectionStatus) {
        info!("Push channel {status}");
    }
}

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SyncError;

// ── Alert record ────────────────────────────────────────────────

/// One detection as emitted by the SIEM backend. Never mutated after receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// ISO-8601, as sent by the producer. Not guaranteed monotonic.
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub severity: Severity,
    /// "SQL Injection", "XSS", "Brute Force", "ML Anomaly", ...
    pub attack_type: String,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    /// Matched pattern or detector diagnostic.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Anything else the backend attached (ids, raw log lines, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Alert severity. The set is owned by the producer, so unknown labels are
/// kept as-is instead of being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Other(String),
}

/// Alerts sent without a severity.
impl Default for Severity {
    fn default() -> Self {
        Severity::Other("unknown".into())
    }
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Other(raw),
        }
    }
}

impl From<Severity> for String {
    fn from(s: Severity) -> Self {
        s.to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => f.write_str("low"),
            Severity::Medium => f.write_str("medium"),
            Severity::High => f.write_str("high"),
            Severity::Critical => f.write_str("critical"),
            Severity::Other(s) => f.write_str(s),
        }
    }
}

// ── Aggregate statistics ────────────────────────────────────────

/// Full aggregate state. Absent fields mean empty/zero, never "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub by_type: BTreeMap<String, u64>,
    #[serde(deserialize_with = "null_as_default")]
    pub timeline: Vec<TimelinePoint>,
    #[serde(deserialize_with = "null_as_default")]
    pub geo_data: Vec<GeoPoint>,
}

/// One pre-aggregated hour bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub hour: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoPoint {
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub count: u64,
}

/// The backend sends `null` for empty aggregates; treat it like a missing
/// field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Push channel ────────────────────────────────────────────────

/// A dispatchable message from the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    NewAlert(Alert),
    StatsUpdate(StatsSnapshot),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushMessage {
    /// Parse a raw text frame. `Ok(None)` means a well-formed frame with a
    /// tag this client does not handle.
    pub fn parse(raw: &str) -> Result<Option<Self>, SyncError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let msg = match envelope.kind.as_str() {
            "new_alert" => PushMessage::NewAlert(serde_json::from_value(envelope.data)?),
            "stats_update" => {
                // `null` data is a snapshot with every field empty
                let data = match envelope.data {
                    serde_json::Value::Null => serde_json::Value::Object(Default::default()),
                    other => other,
                };
                PushMessage::StatsUpdate(serde_json::from_value(data)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

// ── REST boundary ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsResponse {
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

// ── Connection status ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Live,
    Degraded,
    Offline,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Live => "live",
            ConnectionStatus::Degraded => "degraded",
            ConnectionStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

// ── API responses ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub hostname: String,
    pub uptime_secs: u64,
    pub connection: ConnectionStatus,
    pub revision: u64,
}

#[cfg(test)]
pub(crate) fn alert(attack_type: &str, timestamp: &str) -> Alert {
    Alert {
        timestamp: timestamp.into(),
        severity: Severity::High,
        attack_type: attack_type.into(),
        source_ip: Some("10.0.0.7".into()),
        country: None,
        city: None,
        pattern: None,
        extra: Default::default(),
    }
}

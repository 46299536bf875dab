use std::collections::BTreeSet;

use crate::buffer::{AlertBuffer, Filter};
use crate::models::{Alert, ConnectionStatus, StatsSnapshot};

/// Holds exactly one aggregate snapshot; writes replace it whole.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    current: StatsSnapshot,
}

impl SnapshotStore {
    pub fn replace(&mut self, snapshot: StatsSnapshot) {
        self.current = snapshot;
    }

    pub fn get(&self) -> &StatsSnapshot {
        &self.current
    }
}

/// The shared mutable resource set of one dashboard instance.
///
/// Owned by the view synchronizer; producers reach it only through
/// [`crate::sync::Update`] messages, so every write is applied in full
/// before any view reads it.
#[derive(Debug)]
pub struct SessionState {
    pub buffer: AlertBuffer,
    pub snapshot: SnapshotStore,
    pub filter: Filter,
    pub status: ConnectionStatus,
    /// Last poll failure, shown in the table region until a poll succeeds.
    pub poll_error: Option<String>,
}

impl SessionState {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: AlertBuffer::new(capacity),
            snapshot: SnapshotStore::default(),
            filter: Filter::All,
            status: ConnectionStatus::Connecting,
            poll_error: None,
        }
    }

    pub fn insert_push(&mut self, alert: Alert) {
        self.buffer.insert_push(alert);
    }

    pub fn replace_snapshot(&mut self, snapshot: StatsSnapshot) {
        self.snapshot.replace(snapshot);
    }

    /// Apply a successful poll. Last writer wins: anything pushed since the
    /// previous poll and missing from `alerts` is dropped here.
    pub fn apply_poll(&mut self, snapshot: StatsSnapshot, alerts: Vec<Alert>) {
        self.buffer.replace_all(alerts);
        self.snapshot.replace(snapshot);
        self.poll_error = None;
    }

    /// `all` followed by every attack type seen in the buffer or the
    /// snapshot, sorted.
    pub fn filter_options(&self) -> Vec<Filter> {
        let observed: BTreeSet<&str> = self
            .buffer
            .iter()
            .map(|a| a.attack_type.as_str())
            .chain(self.snapshot.get().by_type.keys().map(String::as_str))
            .collect();

        std::iter::once(Filter::All)
            .chain(observed.into_iter().map(|t| Filter::AttackType(t.to_owned())))
            .collect()
    }
}

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::Alert;

// ── Filter ──────────────────────────────────────────────────────

/// Attack-type selector for the alert table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Filter {
    #[default]
    All,
    AttackType(String),
}

impl Filter {
    pub fn matches(&self, alert: &Alert) -> bool {
        match self {
            Filter::All => true,
            Filter::AttackType(t) => alert.attack_type == *t,
        }
    }
}

impl From<String> for Filter {
    fn from(raw: String) -> Self {
        if raw == "all" {
            Filter::All
        } else {
            Filter::AttackType(raw)
        }
    }
}

impl From<Filter> for String {
    fn from(f: Filter) -> Self {
        f.to_string()
    }
}

impl FromStr for Filter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Filter::from(s.to_owned()))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("all"),
            Filter::AttackType(t) => f.write_str(t),
        }
    }
}

// ── Alert buffer ────────────────────────────────────────────────

/// Newest-first, capacity-bounded alert history.
///
/// Order is arrival order, not timestamp order: two alerts carrying the same
/// timestamp stay in the order they were inserted.
#[derive(Debug, Clone)]
pub struct AlertBuffer {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Prepend a pushed alert, evicting from the tail past capacity.
    pub fn insert_push(&mut self, alert: Alert) {
        self.alerts.push_front(alert);
        self.alerts.truncate(self.capacity);
    }

    /// Replace the whole history, keeping the first `capacity` entries of
    /// `alerts` in the order given.
    pub fn replace_all(&mut self, alerts: Vec<Alert>) {
        self.alerts.clear();
        self.alerts.extend(alerts.into_iter().take(self.capacity));
    }

    /// Lazily filtered view, in buffer order.
    pub fn project<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Alert> + 'a {
        self.alerts.iter().filter(move |a| filter.matches(a))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn newest(&self) -> Option<&Alert> {
        self.alerts.front()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert;

    fn numbered(n: usize) -> Alert {
        let mut a = alert(if n % 2 == 0 { "XSS" } else { "SQL Injection" }, "2024-05-01T10:00:00");
        a.extra.insert("seq".into(), serde_json::json!(n));
        a
    }

    fn seq(a: &Alert) -> u64 {
        a.extra["seq"].as_u64().unwrap()
    }

    #[test]
    fn push_beyond_capacity_keeps_newest_first() {
        let mut buf = AlertBuffer::new(100);
        for n in 0..107 {
            buf.insert_push(numbered(n));
        }
        assert_eq!(buf.len(), 100);
        let order: Vec<u64> = buf.iter().map(seq).collect();
        let expected: Vec<u64> = (7..107).rev().collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn hundred_and_first_push_evicts_previous_oldest() {
        let mut buf = AlertBuffer::new(100);
        for n in 0..100 {
            buf.insert_push(numbered(n));
        }
        assert_eq!(buf.iter().last().map(seq), Some(0));

        buf.insert_push(numbered(100));
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.newest().map(seq), Some(100));
        assert_eq!(buf.iter().last().map(seq), Some(1));
        assert!(buf.iter().all(|a| seq(a) != 0));
    }

    #[test]
    fn replace_all_truncates_to_leading_entries() {
        let mut buf = AlertBuffer::new(100);
        buf.insert_push(numbered(999));
        buf.replace_all((0..130).map(numbered).collect());
        assert_eq!(buf.len(), 100);
        let order: Vec<u64> = buf.iter().map(seq).collect();
        assert_eq!(order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn projection_is_ordered_subset() {
        let mut buf = AlertBuffer::new(10);
        for n in 0..8 {
            buf.insert_push(numbered(n));
        }
        let sqli = Filter::AttackType("SQL Injection".into());
        let got: Vec<u64> = buf.project(&sqli).map(seq).collect();
        assert_eq!(got, vec![7, 5, 3, 1]);

        let all: Vec<u64> = buf.project(&Filter::All).map(seq).collect();
        let raw: Vec<u64> = buf.iter().map(seq).collect();
        assert_eq!(all, raw);

        // projection leaves the buffer untouched
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn identical_timestamps_keep_arrival_order() {
        let mut buf = AlertBuffer::new(5);
        let mut first = alert("XSS", "2024-05-01T10:00:00");
        first.pattern = Some("first".into());
        let mut second = alert("XSS", "2024-05-01T10:00:00");
        second.pattern = Some("second".into());
        buf.insert_push(first);
        buf.insert_push(second);
        let patterns: Vec<_> = buf.iter().filter_map(|a| a.pattern.as_deref()).collect();
        assert_eq!(patterns, vec!["second", "first"]);
    }

    #[test]
    fn filter_parses_all_keyword() {
        assert_eq!("all".parse::<Filter>().unwrap(), Filter::All);
        assert_eq!(
            "Brute Force".parse::<Filter>().unwrap(),
            Filter::AttackType("Brute Force".into())
        );
        assert_eq!(Filter::AttackType("XSS".into()).to_string(), "XSS");
    }
}

//! Live state synchronization for a SIEM alert dashboard.
//!
//! Two producers feed one session: the push channel ([`ws_stream`]) streams
//! single alerts and stats snapshots, and the [`poller`] periodically
//! replaces everything with the backend's current truth. The
//! [`sync::ViewSynchronizer`] applies both to the bounded alert buffer and
//! the snapshot store, then redraws the counters, charts, map markers and
//! alert table through a [`views::Renderer`].

pub mod api;
pub mod buffer;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod models;
pub mod poller;
pub mod request_log;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod views;
pub mod ws_stream;

pub use buffer::{AlertBuffer, Filter};
pub use config::AppConfig;
pub use dashboard::Dashboard;
pub use error::SyncError;
pub use models::{Alert, ConnectionStatus, PushMessage, Severity, StatsSnapshot};
pub use sync::{DashboardHandle, Update, ViewSynchronizer};
pub use views::{DashboardView, LogRenderer, Renderer};

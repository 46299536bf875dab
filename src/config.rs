use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration loaded from `config.toml`.
///
/// Every section is optional; a missing section or field falls back to the
/// dashboard defaults (30s poll, 5s reconnect, 100 buffered alerts).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub poll: PollConfig,
    pub stream: StreamConfig,
    pub buffer: BufferConfig,
    pub view: ViewConfig,
    pub api: ApiConfig,
    pub request_log: RequestLogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Origin of the SIEM REST API, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Push channel endpoint, e.g. `ws://127.0.0.1:8000/ws`.
    pub ws_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            ws_url: "ws://127.0.0.1:8000/ws".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between full-state refreshes.
    pub interval_secs: u64,
    /// `limit` passed to `/api/alerts`.
    pub alert_limit: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            alert_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Fixed delay before each reconnect attempt. Never grows.
    pub reconnect_secs: u64,
    /// Sub-second override, used by tests. Takes precedence when set.
    pub reconnect_ms: Option<u64>,
    /// Upper bound on the connect and upgrade handshake.
    pub handshake_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_secs: 5,
            reconnect_ms: None,
            handshake_timeout_secs: 10,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> std::time::Duration {
        match self.reconnect_ms {
            Some(ms) => std::time::Duration::from_millis(ms),
            None => std::time::Duration::from_secs(self.reconnect_secs),
        }
    }

    pub fn handshake_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Duration of the eased counter interpolation.
    pub counter_tween_ms: u64,
    /// Frame period of the counter interpolation.
    pub frame_ms: u64,
    /// How long a freshly pushed row stays emphasised.
    pub highlight_ms: u64,
    /// Delay between consecutive map marker placements. 0 places all at once.
    pub marker_stagger_ms: u64,
    /// Sort timeline buckets chronologically instead of first-seen order.
    pub timeline_sort: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            counter_tween_ms: 500,
            frame_ms: 16,
            highlight_ms: 1200,
            marker_stagger_ms: 40,
            timeline_sort: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7878,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestLogConfig {
    /// External program that receives each request line on stdin
    /// (e.g. an encryption helper). Lines are only logged when unset.
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Upper bound on concurrently running helper processes.
    pub max_concurrent: usize,
    /// Lines waiting for a helper slot; overflow is dropped.
    pub queue_size: usize,
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            max_concurrent: 4,
            queue_size: 256,
        }
    }
}

impl AppConfig {
    /// Load and parse the config file. Without an explicit path, honours
    /// `ALERTWATCH_CONFIG`, then `config.toml` next to the executable, then
    /// `./config.toml`. A missing default file yields the built-in defaults.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let explicit = path
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("ALERTWATCH_CONFIG").map(PathBuf::from));

        let path = match explicit {
            Some(p) => p,
            None => {
                let candidate = default_location();
                if !candidate.exists() {
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read config at {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(raw)?;
        if config.buffer.capacity == 0 {
            anyhow::bail!("buffer.capacity must be at least 1");
        }
        if config.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs must be at least 1");
        }
        Ok(config)
    }
}

fn default_location() -> PathBuf {
    // Look next to the executable first, then CWD
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));

    match exe_dir {
        Some(dir) if dir.join("config.toml").exists() => dir.join("config.toml"),
        _ => PathBuf::from("config.toml"),
    }
}

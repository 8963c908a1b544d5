use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the storage directory
pub const DATA_DIR_ENV: &str = "INVENTORY_APP_DATA";
/// Environment variable overriding the soft queue size limit
pub const MAX_BYTES_ENV: &str = "QUEUE_MAX_BYTES";
/// Environment variable overriding the number of lines kept by compaction
pub const GC_KEEP_LINES_ENV: &str = "QUEUE_GC_KEEP_LINES";

/// Queue file name inside the data directory
pub const QUEUE_FILE_NAME: &str = "queue.jsonl";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub connectivity: ConnectivitySettings,
    #[serde(default)]
    pub replay: ReplaySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Directory holding the queue file (`~` is expanded)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Soft size limit in bytes; exceeding it triggers compaction
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Hard limit for a single serialized record
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: u64,
    /// Number of most recent lines retained by compaction
    #[serde(default = "default_gc_keep_lines")]
    pub gc_keep_lines: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivitySettings {
    /// Base URL of the remote backend
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path probed under the base URL
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Base probe interval in seconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Backoff ceiling in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    /// Per-probe request timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Jitter factor (0.0 to 1.0) applied to the backoff interval
    #[serde(default)]
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaySettings {
    /// Endpoint receiving replayed records; replay is disabled when unset
    pub endpoint: Option<String>,
    /// Optional bearer token sent with replayed records
    pub api_key: Option<String>,
    /// Per-record request timeout in seconds
    #[serde(default = "default_replay_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_data_dir() -> String {
    "~/.inventory_app".to_string()
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}

fn default_max_record_bytes() -> u64 {
    16 * 1024 * 1024 // 16 MiB
}

fn default_gc_keep_lines() -> usize {
    5000
}

fn default_base_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_health_path() -> String {
    "/rest/v1/".to_string()
}

fn default_probe_interval() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_replay_timeout() -> u64 {
    10
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // OFFLINE_SYNC__CONNECTIVITY__BASE_URL, OFFLINE_SYNC__REPLAY__ENDPOINT, etc.
            .add_source(
                Environment::with_prefix("OFFLINE_SYNC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::apply_named_overrides(builder)?.build()?.try_deserialize()
    }

    /// The three storage knobs keep their historical variable names.
    fn apply_named_overrides(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_override_option("queue.data_dir", env::var(DATA_DIR_ENV).ok())?
            .set_override_option("queue.max_bytes", parse_env::<u64>(MAX_BYTES_ENV)?)?
            .set_override_option("queue.gc_keep_lines", parse_env::<u64>(GC_KEEP_LINES_ENV)?)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Message(format!("{} must be a non-negative integer, got {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}

impl QueueSettings {
    /// Data directory with a leading `~` expanded to the home directory
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Full path of the queue file
    pub fn queue_file(&self) -> PathBuf {
        self.data_dir().join(QUEUE_FILE_NAME)
    }
}

fn expand_home(raw: &str) -> PathBuf {
    let rest = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/")
    };

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(raw).to_path_buf(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            connectivity: ConnectivitySettings::default(),
            replay: ReplaySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_bytes: default_max_bytes(),
            max_record_bytes: default_max_record_bytes(),
            gc_keep_lines: default_gc_keep_lines(),
        }
    }
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            health_path: default_health_path(),
            probe_interval_secs: default_probe_interval(),
            max_backoff_secs: default_max_backoff(),
            probe_timeout_secs: default_probe_timeout(),
            jitter_factor: 0.0,
        }
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_replay_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{bail, Context, Result};

/// Environment variable overriding `store.db_path`
pub const DB_PATH_ENV: &str = "SCAN_DB_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// When set, pushes from any other subscription are refused
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Worker threads, one SQLite connection each
    #[serde(default = "default_writers")]
    pub writers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_ms: u64,
    /// How long shutdown waits for queued work to drain
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/scan-processor/scans.db")
}

fn default_writers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    1024
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_persist_timeout() -> u64 {
    10_000
}

fn default_shutdown_timeout() -> u64 {
    30_000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            subscription: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            writers: default_writers(),
            queue_depth: default_queue_depth(),
            busy_timeout_ms: default_busy_timeout(),
            persist_timeout_ms: default_persist_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Replace the database path when `SCAN_DB_PATH` is set
    pub fn apply_env(&mut self) {
        self.override_db_path(std::env::var_os(DB_PATH_ENV).map(PathBuf::from));
    }

    fn override_db_path(&mut self, db_path: Option<PathBuf>) {
        if let Some(db_path) = db_path.filter(|p| !p.as_os_str().is_empty()) {
            self.store.db_path = db_path;
        }
    }

    /// Reject settings the daemon cannot start with
    pub fn validate(&self) -> Result<()> {
        let store = &self.store;

        if store.writers == 0 {
            bail!("store.writers must be at least 1");
        }
        if store.queue_depth == 0 {
            bail!("store.queue_depth must be at least 1");
        }
        if store.persist_timeout_ms == 0 {
            bail!("store.persist_timeout_ms must be greater than 0");
        }
        if store.shutdown_timeout_ms == 0 {
            bail!("store.shutdown_timeout_ms must be greater than 0");
        }
        // Each in-memory connection is its own database
        if store.db_path == Path::new(":memory:") && store.writers > 1 {
            bail!("store.db_path \":memory:\" requires store.writers = 1");
        }

        Ok(())
    }
}

//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/docmerge.sqlite"
//!
//! [ingest]
//! concurrency = 16
//! timeout_secs = 30
//! dead_letter_path = "./data/dead_letters.jsonl"
//!
//! [publish]
//! path = "./data/processed.jsonl"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! Only `[db]` is required. Omitting `[publish].path` disables the
//! outbound stream.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Upper bound on snapshots reconciled at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-snapshot deadline applied by the pipeline around each reconcile.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Emit a progress line every this many snapshots.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    /// JSON-lines file receiving snapshots that could not be reconciled.
    #[serde(default)]
    pub dead_letter_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            progress_every: default_progress_every(),
            dead_letter_path: None,
        }
    }
}

impl IngestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_concurrency() -> usize {
    16
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_progress_every() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PublishConfig {
    /// JSON-lines file receiving every reconciled record.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl PublishConfig {
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// All-default config pointing at `./data/docmerge.sqlite`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/docmerge.sqlite"),
            },
            ingest: IngestConfig::default(),
            publish: PublishConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.ingest.concurrency == 0 {
        anyhow::bail!("ingest.concurrency must be > 0");
    }
    if config.ingest.timeout_secs == 0 {
        anyhow::bail!("ingest.timeout_secs must be > 0");
    }
    if config.ingest.progress_every == 0 {
        anyhow::bail!("ingest.progress_every must be > 0");
    }
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(config)
}

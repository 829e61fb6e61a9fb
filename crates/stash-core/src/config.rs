//! Router configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stash_routing::{DEFAULT_LOCAL_HOSTS, RECENT_SESSION_LIMIT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the settings database
    pub database_path: PathBuf,
    /// Title of the library folder created when no root is configured
    pub library_title: String,
    /// Bookmark folder that roots the library; overrides the stored choice
    pub library_root_id: Option<String>,
    /// Archive directory handed to the backend; `None` keeps its default
    pub filesystem_root: Option<String>,
    /// Backend executable for the native messaging transport
    pub backend_program: PathBuf,
    /// Hosts the backend serves captures from
    pub local_hosts: Vec<String>,
    /// Domain suffixes that always load live; used until the list is edited
    pub bypass_hosts: Vec<String>,
    pub poll_interval_ms: u64,
    /// How long a navigation waits for the backend to accept
    pub accept_timeout_ms: u64,
    /// How long a navigation waits for a stopping session to go away
    pub drain_timeout_ms: u64,
    /// Consecutive failed polls before a recording is given up
    pub max_poll_failures: u32,
    pub recent_limit: usize,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("stash.db"),
            library_title: "Library".to_string(),
            library_root_id: None,
            filesystem_root: None,
            backend_program: PathBuf::from("stash-backend"),
            local_hosts: DEFAULT_LOCAL_HOSTS.iter().map(|h| h.to_string()).collect(),
            bypass_hosts: vec![
                "youtube.com".to_string(),
                "googlevideo.com".to_string(),
                "ytimg.com".to_string(),
            ],
            poll_interval_ms: 500,
            accept_timeout_ms: 10_000,
            drain_timeout_ms: 5_000,
            max_poll_failures: 5,
            recent_limit: RECENT_SESSION_LIMIT,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Stash"))
            .unwrap_or_else(|| PathBuf::from(".stash"))
    }

    /// Default config overlaid with the TOML file at `path`, if it exists.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

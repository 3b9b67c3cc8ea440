//! Daemon configuration.
//!
//! The configuration is loaded from a JSON file whose path is passed on the
//! command line (`--config <path>`), or from
//! `$XDG_CONFIG_HOME/keygrabd/daemon.json` when no path is given.
//!
//! Every field is optional; a minimal `{}` file is valid and all values
//! fall back to their compiled-in defaults.  Unknown keys are ignored.
//!
//! # Example
//!
//! ```json
//! {
//!   "socket_path": "/var/run/keygrabd/grabber.sock",
//!   "socket_group_id": 0,
//!   "receive_timeout_ms": 1000,
//!   "monitor_interval_ms": 500,
//!   "profile_watch_interval_ms": 1000,
//!   "console_device": "/dev/console",
//!   "profile_path": "/home/me/.config/keygrabd/keygrabd.json"
//! }
//! ```

use log::info;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the grabber socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/keygrabd/grabber.sock";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the receiver binds its datagram socket.
    pub socket_path: PathBuf,
    /// Group the socket file is handed to.
    pub socket_group_id: u32,
    /// Upper bound on one receive wait (ms).  Only affects how quickly a
    /// shutdown request is noticed.
    pub receive_timeout_ms: u64,
    /// How often the console user server's pid is polled (ms).
    pub monitor_interval_ms: u64,
    /// How often the session checks the profile document for edits (ms).
    pub profile_watch_interval_ms: u64,
    /// The owner of this file is taken to be the console user.
    pub console_device: PathBuf,
    /// Profile document used to seed the rule tables at startup.  Clients
    /// push their own rules on connect, so this is usually unset.
    pub profile_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_group_id: 0,
            receive_timeout_ms: 1000,
            monitor_interval_ms: 500,
            profile_watch_interval_ms: 1000,
            console_device: PathBuf::from("/dev/console"),
            profile_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        if config.receive_timeout_ms == 0
            || config.monitor_interval_ms == 0
            || config.profile_watch_interval_ms == 0
        {
            return Err(ConfigError(format!(
                "{}: receive_timeout_ms, monitor_interval_ms and profile_watch_interval_ms must be non-zero",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Load from `path`, or from `$XDG_CONFIG_HOME/keygrabd/daemon.json`
    /// when no path is given, falling back to compiled-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_dir().join("daemon.json"));
        match Self::load(&path) {
            Ok(cfg) => {
                info!("loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                info!("no config file ({}), using defaults", e);
                Self::default()
            }
        }
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn profile_watch_interval(&self) -> Duration {
        Duration::from_millis(self.profile_watch_interval_ms)
    }
}

/// Error from loading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);

/// Resolve the per-user config directory (`$XDG_CONFIG_HOME/keygrabd`).
pub fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("keygrabd")
}

/// Create `dir` and any missing parents, readable by the owner only.
///
/// Directories that already exist keep their mode.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

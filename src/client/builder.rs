use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::process::StorageTarget;
use super::PoloDbClient;
use crate::error::DriverError;
use crate::mux::MuxOptions;
use crate::protocol::MAX_FRAME_SIZE;

const DEFAULT_EXECUTABLE: &str = "../bin/polodb";
const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 5_000;

/// Client settings. A clone is handed out by [`PoloDbClient::config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server executable to launch
    pub executable_path: PathBuf,
    /// Directory the server's socket is created in
    pub socket_dir: PathBuf,
    /// Per-request deadline in milliseconds; unset means wait indefinitely
    pub request_timeout_ms: Option<u64>,
    /// How long to wait for the server socket on first connect
    pub startup_timeout_ms: u64,
    /// Largest payload accepted in either direction
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            executable_path: PathBuf::from(DEFAULT_EXECUTABLE),
            socket_dir: std::env::temp_dir(),
            request_timeout_ms: None,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `POLODB_EXECUTABLE`, `POLODB_SOCKET_DIR`,
    /// `POLODB_REQUEST_TIMEOUT_MS` and `POLODB_STARTUP_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("POLODB_EXECUTABLE") {
            config.executable_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("POLODB_SOCKET_DIR") {
            config.socket_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_millis("POLODB_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = Some(ms);
        }
        if let Some(ms) = env_millis("POLODB_STARTUP_TIMEOUT_MS") {
            config.startup_timeout_ms = ms;
        }

        config
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn mux_options(&self) -> MuxOptions {
        MuxOptions {
            request_timeout: self.request_timeout(),
            max_frame_size: self.max_frame_size,
        }
    }
}

fn env_millis(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(ms) => Some(ms),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}

/// Fluent construction of a [`PoloDbClient`].
pub struct ClientBuilder {
    target: StorageTarget,
    config: ClientConfig,
}

impl ClientBuilder {
    /// `target` is `"memory"` or a database path.
    pub fn new(target: &str) -> Self {
        Self {
            target: StorageTarget::from(target),
            config: ClientConfig::default(),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executable_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.executable_path = path.as_ref().to_path_buf();
        self
    }

    pub fn socket_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.socket_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = Some(ms);
        self
    }

    pub fn startup_timeout_ms(mut self, ms: u64) -> Self {
        self.config.startup_timeout_ms = ms;
        self
    }

    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    pub fn current_config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn build(self) -> Result<PoloDbClient, DriverError> {
        PoloDbClient::open(self.target, self.config).await
    }
}

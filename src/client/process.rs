//! Server process supervision
//!
//! The client launches `polodb serve` itself and talks to it over a Unix
//! socket whose path it picks.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::DriverError;

/// Where the server keeps its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    Memory,
    Path(PathBuf),
}

impl From<&str> for StorageTarget {
    fn from(target: &str) -> Self {
        if target == "memory" {
            StorageTarget::Memory
        } else {
            StorageTarget::Path(PathBuf::from(target))
        }
    }
}

impl From<PathBuf> for StorageTarget {
    fn from(path: PathBuf) -> Self {
        StorageTarget::Path(path)
    }
}

/// Arguments for `polodb`: `serve (--memory | --path <p>) --socket <s>`
pub fn server_args(target: &StorageTarget, socket_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["serve".into()];
    match target {
        StorageTarget::Memory => args.push("--memory".into()),
        StorageTarget::Path(path) => {
            args.push("--path".into());
            args.push(path.as_os_str().to_owned());
        }
    }
    args.push("--socket".into());
    args.push(socket_path.as_os_str().to_owned());
    args
}

/// Fresh socket path under `dir` that does not exist yet
pub fn generate_socket_path(dir: &Path) -> PathBuf {
    loop {
        let candidate = dir.join(format!("polodb-{}.sock", uuid::Uuid::new_v4().simple()));
        if !candidate.exists() {
            return candidate;
        }
        tracing::debug!("Socket path {} already taken", candidate.display());
    }
}

/// A running `polodb serve` child.
pub struct ServerProcess {
    child: Option<Child>,
    socket_path: PathBuf,
}

impl ServerProcess {
    pub fn spawn(
        executable: &Path,
        target: &StorageTarget,
        socket_dir: &Path,
    ) -> Result<Self, DriverError> {
        let socket_path = generate_socket_path(socket_dir);
        let args = server_args(target, &socket_path);

        let child = Command::new(executable)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::Process(format!("Failed to start {}: {}", executable.display(), e))
            })?;

        tracing::info!(
            "Started {} (pid {:?}) on {}",
            executable.display(),
            child.id(),
            socket_path.display()
        );

        Ok(Self {
            child: Some(child),
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// OS process id, if still running
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }

    /// Terminate the server and remove its socket file. Idempotent.
    pub async fn kill(&mut self) -> Result<(), DriverError> {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Server already exited with {}", status);
                }
                _ => {
                    child.kill().await.map_err(|e| {
                        DriverError::Process(format!("Failed to stop server: {}", e))
                    })?;
                    tracing::debug!("Server on {} stopped", self.socket_path.display());
                }
            }
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Could not remove socket {}: {}",
                self.socket_path.display(),
                e
            ),
        }
        Ok(())
    }
}

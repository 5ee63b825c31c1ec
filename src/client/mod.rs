mod builder;
pub mod process;

pub use builder::{ClientBuilder, ClientConfig};
pub use process::{ServerProcess, StorageTarget};

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DriverError;
use crate::mux::{ConnectionState, RequestMultiplexer, UnixSocketConnector};
use crate::protocol::{decode_payload, encode_payload, FindRequest};

/// Client for a `polodb serve` process it launches and owns.
///
/// All requests share one socket connection, opened lazily on first use.
pub struct PoloDbClient {
    config: ClientConfig,
    target: StorageTarget,
    socket_path: PathBuf,
    process: tokio::sync::Mutex<ServerProcess>,
    mux: RequestMultiplexer<UnixSocketConnector>,
}

impl PoloDbClient {
    /// Launch the server for `target` and prepare a connection to it.
    pub async fn open(
        target: impl Into<StorageTarget>,
        config: ClientConfig,
    ) -> Result<Self, DriverError> {
        let target = target.into();
        let process = ServerProcess::spawn(&config.executable_path, &target, &config.socket_dir)?;
        let socket_path = process.socket_path().to_path_buf();

        let connector = UnixSocketConnector::new(&socket_path, config.startup_timeout());
        let mux = RequestMultiplexer::new(connector, config.mux_options());

        Ok(Self {
            config,
            target,
            socket_path,
            process: tokio::sync::Mutex::new(process),
            mux,
        })
    }

    /// Send a raw MessagePack body and return the raw response body.
    pub async fn issue(&self, collection: &str, payload: &[u8]) -> Result<Vec<u8>, DriverError> {
        self.mux.issue(collection, payload).await
    }

    /// Run a `find` against `collection`.
    pub async fn find<Q, R>(&self, collection: &str, query: Option<&Q>) -> Result<R, DriverError>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        let body = encode_payload(&FindRequest::new(collection, query))?;
        let response = self.issue(collection, &body).await?;
        decode_payload(&response)
    }

    /// Close the connection, reject outstanding requests with `Disposed`,
    /// and stop the server.
    pub async fn dispose(&self) -> Result<(), DriverError> {
        self.mux.dispose().await;
        self.process.lock().await.kill().await
    }

    /// Snapshot of the settings this client was opened with
    pub fn config(&self) -> ClientConfig {
        self.config.clone()
    }

    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    /// Listen address handed to the server
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn pending_count(&self) -> usize {
        self.mux.pending_count()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.mux.connection_state().await
    }
}

//! Byte channel to the server and its lifecycle

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use crate::error::DriverError;

/// Delay between connect attempts while the server is starting up
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Opens the byte channel to the server.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Address used in log lines
    fn address(&self) -> String;
}

/// Connects to a Unix domain socket, waiting for it to appear while the
/// server process starts.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixSocketConnector {
    path: PathBuf,
    startup_timeout: Duration,
}

#[cfg(unix)]
impl UnixSocketConnector {
    pub fn new(path: impl AsRef<Path>, startup_timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            startup_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
#[async_trait::async_trait]
impl Connector for UnixSocketConnector {
    type Stream = tokio::net::UnixStream;

    async fn connect(&self) -> io::Result<Self::Stream> {
        let deadline = tokio::time::Instant::now() + self.startup_timeout;
        loop {
            match tokio::net::UnixStream::connect(&self.path).await {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) && tokio::time::Instant::now() < deadline =>
                {
                    tracing::trace!("Socket {} not ready yet: {}", self.path.display(), e);
                    tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn address(&self) -> String {
        self.path.display().to_string()
    }
}

/// Observable lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unestablished,
    Open,
    /// Terminal
    Closed,
}

/// The single channel owned by a multiplexer.
///
/// Writes happen with the owner's lock held, one whole frame per call. The
/// read half is handed out once, on establishment, to the reader task.
pub struct Connection<C: Connector> {
    connector: C,
    state: ConnectionState,
    writer: Option<WriteHalf<C::Stream>>,
    reader: Option<JoinHandle<()>>,
}

impl<C: Connector> Connection<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: ConnectionState::Unestablished,
            writer: None,
            reader: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> String {
        self.connector.address()
    }

    /// Establish the channel if this is the first use.
    ///
    /// Returns the read half only when the channel was opened by this call;
    /// the caller must start a reader on it and register it with
    /// [`Connection::attach_reader`].
    pub async fn ensure_open(&mut self) -> Result<Option<ReadHalf<C::Stream>>, DriverError> {
        match self.state {
            ConnectionState::Open => Ok(None),
            ConnectionState::Closed => Err(DriverError::Transport(
                "Connection is closed".to_string(),
            )),
            ConnectionState::Unestablished => {
                let stream = self.connector.connect().await.map_err(|e| {
                    DriverError::Transport(format!(
                        "Failed to connect to {}: {}",
                        self.connector.address(),
                        e
                    ))
                })?;
                let (read, write) = tokio::io::split(stream);
                self.writer = Some(write);
                self.state = ConnectionState::Open;
                tracing::debug!("Connected to {}", self.connector.address());
                Ok(Some(read))
            }
        }
    }

    pub fn attach_reader(&mut self, reader: JoinHandle<()>) {
        self.reader = Some(reader);
    }

    /// Write one complete frame.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "connection is not open")
        })?;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Move to `Closed`, dropping the writer and stopping the reader task.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::debug!("Closing connection to {}", self.connector.address());
        }
        self.state = ConnectionState::Closed;
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    /// Called from the reader task itself once it has stopped reading.
    pub fn close_from_reader(&mut self) {
        self.reader = None;
        self.close();
    }

    /// Half-close the write side so the server sees EOF, then close.
    pub async fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Shutdown of {} failed: {}", self.connector.address(), e);
            }
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, DuplexStream};

    struct OneShotConnector {
        stream: Mutex<Option<DuplexStream>>,
    }

    #[async_trait::async_trait]
    impl Connector for OneShotConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.stream
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "used"))
        }

        fn address(&self) -> String {
            "duplex".to_string()
        }
    }

    fn pair() -> (Connection<OneShotConnector>, DuplexStream) {
        let (client, server) = tokio::io::duplex(1024);
        let connector = OneShotConnector {
            stream: Mutex::new(Some(client)),
        };
        (Connection::new(connector), server)
    }

    #[tokio::test]
    async fn test_ensure_open_is_idempotent() {
        let (mut conn, _server) = pair();
        assert_eq!(conn.state(), ConnectionState::Unestablished);

        assert!(conn.ensure_open().await.unwrap().is_some());
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.ensure_open().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_writes_bytes() {
        let (mut conn, mut server) = pair();
        let _read = conn.ensure_open().await.unwrap();

        conn.send(&[1, 2, 3]).await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_closed_is_terminal() {
        let (mut conn, _server) = pair();
        let _read = conn.ensure_open().await.unwrap();
        conn.close();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.ensure_open().await, Err(DriverError::Transport(_))));
        assert!(conn.send(&[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_unestablished() {
        let connector = OneShotConnector {
            stream: Mutex::new(None),
        };
        let mut conn = Connection::new(connector);
        assert!(matches!(conn.ensure_open().await, Err(DriverError::Transport(_))));
        assert_eq!(conn.state(), ConnectionState::Unestablished);
    }

    #[tokio::test]
    async fn test_shutdown_signals_eof() {
        let (mut conn, mut server) = pair();
        let _read = conn.ensure_open().await.unwrap();
        conn.shutdown().await;

        let mut buf = Vec::new();
        let n = server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}

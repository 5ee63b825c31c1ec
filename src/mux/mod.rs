//! Request multiplexing over a single connection
//!
//! Many requests can be in flight at once. Each is tagged with a request id;
//! responses may come back in any order and are routed by that id alone.
//!
//! Synchronous state (pending table, id counter, lifecycle phase) sits
//! behind one `parking_lot` mutex that is never held across an await. The
//! connection sits behind an async mutex that serializes establishment and
//! frame writes. Each write runs on its own task, so a caller that stops
//! waiting never leaves half a frame on the wire.

pub mod connection;
pub mod ids;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::oneshot;

use crate::error::{DriverError, DriverResult};
use crate::protocol::{decode_frame, encode_frame_limited, HEADER_LEN, MAX_FRAME_SIZE};

pub use connection::{Connection, ConnectionState, Connector};
#[cfg(unix)]
pub use connection::UnixSocketConnector;
pub use ids::IdAllocator;
pub use table::{Outcome, RequestTable};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Tuning for a multiplexer
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// Per-request deadline; `None` waits for as long as the connection lives
    pub request_timeout: Option<Duration>,
    /// Largest payload accepted in either direction
    pub max_frame_size: usize,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Active,
    /// The connection failed; new requests get this error
    Failed(DriverError),
    Disposed,
}

struct MuxState {
    table: RequestTable,
    ids: IdAllocator,
    phase: Phase,
}

struct Shared<C: Connector> {
    state: Mutex<MuxState>,
    connection: tokio::sync::Mutex<Connection<C>>,
    options: MuxOptions,
}

/// Issues requests over one connection and routes responses back by id.
pub struct RequestMultiplexer<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> RequestMultiplexer<C> {
    pub fn new(connector: C, options: MuxOptions) -> Self {
        Self::with_ids(connector, options, IdAllocator::new())
    }

    /// Start the id counter at `seed` instead of a random value.
    pub fn with_initial_id(connector: C, options: MuxOptions, seed: u32) -> Self {
        Self::with_ids(connector, options, IdAllocator::starting_at(seed))
    }

    fn with_ids(connector: C, options: MuxOptions, ids: IdAllocator) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MuxState {
                    table: RequestTable::new(),
                    ids,
                    phase: Phase::Active,
                }),
                connection: tokio::sync::Mutex::new(Connection::new(connector)),
                options,
            }),
        }
    }

    pub fn options(&self) -> &MuxOptions {
        &self.shared.options
    }

    /// Send `payload` and wait for the matching response payload.
    ///
    /// `destination` only labels log lines. The payload must be a single
    /// MessagePack value.
    pub async fn issue(&self, destination: &str, payload: &[u8]) -> DriverResult<Vec<u8>> {
        if payload.len() > self.shared.options.max_frame_size {
            return Err(DriverError::MessageTooLarge(payload.len()));
        }

        let (id, rx) = self.shared.register()?;
        let mut guard = PendingGuard {
            shared: self.shared.as_ref(),
            id,
            armed: true,
        };

        let frame = encode_frame_limited(id, payload, self.shared.options.max_frame_size)?;
        tracing::debug!(
            "Issuing request {} to {} ({} bytes)",
            id,
            destination,
            payload.len()
        );
        let sender = tokio::spawn(Arc::clone(&self.shared).send_frame(frame));
        if let Err(e) = sender.await {
            return Err(DriverError::Transport(format!(
                "Send task for request {} failed: {}",
                id, e
            )));
        }

        let received = match self.shared.options.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!("Request {} to {} timed out after {:?}", id, destination, limit);
                    return Err(DriverError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        // The table entry is gone once a value or a drop arrives; the id may
        // already belong to someone else.
        guard.armed = false;

        match received {
            Ok(outcome) => outcome,
            Err(_) => Err(DriverError::Disposed),
        }
    }

    /// Number of requests waiting for a response
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().table.len()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.connection.lock().await.state()
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.shared.state.lock().phase, Phase::Disposed)
    }

    /// Close the connection and reject everything still pending with
    /// `Disposed`. Later calls are no-ops.
    pub async fn dispose(&self) {
        let drained = {
            let mut state = self.shared.state.lock();
            if matches!(state.phase, Phase::Disposed) {
                return;
            }
            state.phase = Phase::Disposed;
            state.table.drain_all_with_error(&DriverError::Disposed)
        };
        if drained > 0 {
            tracing::info!("Disposed with {} request(s) still pending", drained);
        }
        self.shared.connection.lock().await.shutdown().await;
    }
}

impl<C: Connector> Drop for RequestMultiplexer<C> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if !matches!(state.phase, Phase::Disposed) {
                state.phase = Phase::Disposed;
                state.table.drain_all_with_error(&DriverError::Disposed);
            }
        }
        // The reader task holds a reference to the shared state; stop it.
        match self.shared.connection.try_lock() {
            Ok(mut conn) => conn.close(),
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    tracing::debug!("Connection busy on drop, closing it once released");
                    let shared = Arc::clone(&self.shared);
                    handle.spawn(async move {
                        shared.connection.lock().await.close();
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        "Dropped outside a runtime while the connection was busy; \
                         it stays open until the server hangs up"
                    );
                }
            },
        }
    }
}

impl<C: Connector> Shared<C> {
    /// Allocate an id and park a completion under it.
    fn register(&self) -> DriverResult<(u32, oneshot::Receiver<Outcome>)> {
        let mut state = self.state.lock();
        match &state.phase {
            Phase::Active => {}
            Phase::Failed(err) => return Err(err.clone()),
            Phase::Disposed => return Err(DriverError::Disposed),
        }

        let MuxState { table, ids, .. } = &mut *state;
        let id = ids.allocate(table).ok_or_else(|| {
            DriverError::Transport("Every request id is in flight".to_string())
        })?;
        let (tx, rx) = oneshot::channel();
        table.insert(id, tx)?;
        Ok((id, rx))
    }

    /// Establish the connection if needed and write one frame.
    ///
    /// Failures are not returned: they go through `fail_connection`, which
    /// also rejects the request that triggered them.
    async fn send_frame(self: Arc<Self>, frame: Vec<u8>) {
        let mut conn = self.connection.lock().await;
        if matches!(self.state.lock().phase, Phase::Disposed) {
            conn.close();
            return;
        }

        match conn.ensure_open().await {
            Ok(Some(read_half)) => {
                let reader = tokio::spawn(read_loop(Arc::clone(&self), read_half));
                conn.attach_reader(reader);
            }
            Ok(None) => {}
            Err(err) => {
                self.fail_connection(&mut conn, err);
                return;
            }
        }

        if let Err(e) = conn.send(&frame).await {
            let err = DriverError::Transport(format!("Write to {} failed: {}", conn.address(), e));
            self.fail_connection(&mut conn, err);
        }
    }

    /// Tear the connection down and reject every pending request with `err`.
    fn fail_connection(&self, conn: &mut Connection<C>, err: DriverError) {
        {
            let mut state = self.state.lock();
            if let Phase::Active = state.phase {
                tracing::error!("Connection to {} failed: {}", conn.address(), err);
                state.phase = Phase::Failed(err.clone());
            }
            let drained = state.table.drain_all_with_error(&err);
            if drained > 0 {
                tracing::warn!("Rejected {} pending request(s): {}", drained, err);
            }
        }
        conn.close();
    }

    /// Pull every complete frame off the front of `buf` and route it.
    fn drain_frames(&self, buf: &mut BytesMut) -> DriverResult<()> {
        while let Some(frame) = decode_frame(&buf[..])? {
            buf.advance(frame.consumed);
            tracing::trace!("Response for request {} ({} bytes)", frame.id, frame.payload.len());
            self.state.lock().table.settle(frame.id, Ok(frame.payload));
        }

        if buf.len() > self.options.max_frame_size + HEADER_LEN + 1 {
            return Err(DriverError::MessageTooLarge(buf.len()));
        }
        Ok(())
    }
}

/// Reader task: accumulate bytes, decode frames, settle requests. Runs until
/// the channel closes, errors, or delivers an undecodable frame.
async fn read_loop<C: Connector>(shared: Arc<Shared<C>>, mut reader: ReadHalf<C::Stream>) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let err = loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                break DriverError::Transport("Connection closed by server".to_string());
            }
            Ok(_) => {}
            Err(e) => break DriverError::Transport(format!("Read failed: {}", e)),
        }

        if let Err(e) = shared.drain_frames(&mut buf) {
            break e;
        }
    };

    let mut conn = shared.connection.lock().await;
    conn.close_from_reader();
    shared.fail_connection(&mut conn, err);
}

/// Removes a request from the table if its caller stops waiting.
struct PendingGuard<'a, C: Connector> {
    shared: &'a Shared<C>,
    id: u32,
    armed: bool,
}

impl<C: Connector> Drop for PendingGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed && self.shared.state.lock().table.remove(self.id) {
            tracing::debug!("Request {} abandoned before a response arrived", self.id);
        }
    }
}

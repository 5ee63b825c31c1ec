//! PoloDB Rust Client
//!
//! Launches a local `polodb serve` process and talks to it over a Unix socket
//! with a framed MessagePack protocol. Any number of requests may be in
//! flight on the one connection; responses are matched to callers by
//! request id.
//!
//! # Example
//!
//! ```no_run
//! use polodb_client::{ClientBuilder, DriverError};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DriverError> {
//!     let client = ClientBuilder::new("memory")
//!         .executable_path("/usr/local/bin/polodb")
//!         .timeout_ms(5_000)
//!         .build()
//!         .await?;
//!
//!     let users: Value = client.find("users", Some(&json!({"name": "Alice"}))).await?;
//!     println!("{}", users);
//!
//!     client.dispose().await?;
//!     Ok(())
//! }
//! ```

#[cfg(unix)]
pub mod client;
pub mod error;
pub mod mux;
pub mod protocol;

#[cfg(unix)]
pub use client::{ClientBuilder, ClientConfig, PoloDbClient, ServerProcess, StorageTarget};
pub use error::{DriverError, DriverResult};
pub use mux::{ConnectionState, Connector, MuxOptions, RequestMultiplexer};
pub use protocol::{decode_frame, encode_frame, Frame};

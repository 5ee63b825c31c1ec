use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the driver.
///
/// Connection-fatal variants (`Transport`, `CorruptFrame`, inbound
/// `MessageTooLarge`) are cloned into every pending request when the
/// connection is torn down, so the type must stay `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("Request id {0} is already pending")]
    DuplicateId(u32),

    #[error("Response for unknown request id {0}")]
    UnknownId(u32),

    #[error("Client has been disposed")]
    Disposed,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Server process error: {0}")]
    Process(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Transport(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DriverError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        DriverError::Codec(format!("Serialization failed: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for DriverError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        DriverError::Codec(format!("Deserialization failed: {}", err))
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        match DriverError::from(io) {
            DriverError::Transport(msg) => assert!(msg.contains("pipe gone")),
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(DriverError::Disposed.to_string(), "Client has been disposed");
        assert_eq!(
            DriverError::DuplicateId(42).to_string(),
            "Request id 42 is already pending"
        );
    }
}

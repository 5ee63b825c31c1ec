//! Wire protocol for the PoloDB local socket
//!
//! Every message travels in one frame:
//! - **Marker**: `FF 00 AA BB`
//! - **Request id**: 4 bytes, big-endian
//! - **Payload**: one MessagePack value
//! - **Terminator**: `00`
//!
//! Requests and responses share the layout; the id correlates them.

pub mod codec;
pub mod msgpack;
pub mod payload;

pub use codec::{
    decode_frame, encode_frame, encode_frame_limited, Frame, FRAME_MARKER, FRAME_TERMINATOR,
    HEADER_LEN, MAX_FRAME_SIZE,
};
pub use payload::{decode_payload, encode_payload, FindRequest};

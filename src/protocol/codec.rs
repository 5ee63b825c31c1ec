use super::msgpack::value_len;
use crate::error::DriverError;

/// Marker opening every frame, in both directions
pub const FRAME_MARKER: [u8; 4] = [0xFF, 0x00, 0xAA, 0xBB];

/// Byte closing every frame
pub const FRAME_TERMINATOR: u8 = 0x00;

/// Marker plus request id
pub const HEADER_LEN: usize = FRAME_MARKER.len() + 4;

/// Maximum payload size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One frame extracted from an inbound buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u32,
    pub payload: Vec<u8>,
    /// Bytes to drop from the front of the buffer
    pub consumed: usize,
}

/// Encode a frame: `[marker][id: 4 bytes BE][msgpack payload][0x00]`.
///
/// The payload must be exactly one MessagePack value, otherwise the peer
/// could not find where it ends.
pub fn encode_frame(id: u32, payload: &[u8]) -> Result<Vec<u8>, DriverError> {
    encode_frame_limited(id, payload, MAX_FRAME_SIZE)
}

/// [`encode_frame`] with a caller-chosen payload limit.
pub fn encode_frame_limited(
    id: u32,
    payload: &[u8],
    max_payload: usize,
) -> Result<Vec<u8>, DriverError> {
    if payload.len() > max_payload {
        return Err(DriverError::MessageTooLarge(payload.len()));
    }

    match value_len(payload) {
        Ok(Some(len)) if len == payload.len() => {}
        _ => {
            return Err(DriverError::Codec(
                "Payload is not a single MessagePack value".to_string(),
            ))
        }
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    buf.extend_from_slice(&FRAME_MARKER);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(payload);
    buf.push(FRAME_TERMINATOR);
    Ok(buf)
}

/// Try to extract one frame from the front of `buf`.
///
/// Returns `Ok(None)` while the frame is still incomplete; the caller keeps
/// the buffer and retries once more bytes arrive. Any error means the
/// stream can no longer be resynchronized.
pub fn decode_frame(buf: &[u8]) -> Result<Option<Frame>, DriverError> {
    let marker_len = buf.len().min(FRAME_MARKER.len());
    if buf[..marker_len] != FRAME_MARKER[..marker_len] {
        return Err(DriverError::CorruptFrame(format!(
            "Expected frame marker {:02X?}, found {:02X?}",
            FRAME_MARKER,
            &buf[..marker_len]
        )));
    }

    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    let payload_len = match value_len(&buf[HEADER_LEN..])? {
        Some(len) => len,
        None => return Ok(None),
    };

    let terminator_at = HEADER_LEN + payload_len;
    match buf.get(terminator_at) {
        None => Ok(None),
        Some(&FRAME_TERMINATOR) => Ok(Some(Frame {
            id,
            payload: buf[HEADER_LEN..terminator_at].to_vec(),
            consumed: terminator_at + 1,
        })),
        Some(other) => Err(DriverError::CorruptFrame(format!(
            "Expected terminator after payload of request {}, found 0x{:02X}",
            id, other
        ))),
    }
}

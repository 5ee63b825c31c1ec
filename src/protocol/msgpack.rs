//! MessagePack value boundary scanning
//!
//! Frames carry no length field, and payload bytes may legally contain the
//! terminator byte, so the end of a payload is found by walking the
//! MessagePack structure without decoding it.

use rmp::Marker;

use crate::error::DriverError;

/// Return the byte length of the single MessagePack value at the front of
/// `buf`.
///
/// `Ok(None)` means the value is not complete yet. Nothing is allocated and
/// nested containers are walked iteratively, so hostile nesting cannot blow
/// the stack.
pub fn value_len(buf: &[u8]) -> Result<Option<usize>, DriverError> {
    let mut pos = 0usize;
    // Values still to be skipped, including container children.
    let mut remaining: u64 = 1;

    while remaining > 0 {
        // Every value takes at least one byte.
        if remaining > (buf.len() - pos) as u64 {
            return Ok(None);
        }
        remaining -= 1;

        let marker = Marker::from_u8(buf[pos]);
        pos += 1;

        let skip = match marker {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => 0,
            Marker::U8 | Marker::I8 => 1,
            Marker::U16 | Marker::I16 => 2,
            Marker::U32 | Marker::I32 | Marker::F32 => 4,
            Marker::U64 | Marker::I64 | Marker::F64 => 8,
            Marker::FixStr(len) => len as usize,
            Marker::Str8 | Marker::Bin8 => match read_len(buf, &mut pos, 1) {
                Some(len) => len,
                None => return Ok(None),
            },
            Marker::Str16 | Marker::Bin16 => match read_len(buf, &mut pos, 2) {
                Some(len) => len,
                None => return Ok(None),
            },
            Marker::Str32 | Marker::Bin32 => match read_len(buf, &mut pos, 4) {
                Some(len) => len,
                None => return Ok(None),
            },
            Marker::FixArray(len) => {
                remaining += len as u64;
                0
            }
            Marker::Array16 => match read_len(buf, &mut pos, 2) {
                Some(len) => {
                    remaining += len as u64;
                    0
                }
                None => return Ok(None),
            },
            Marker::Array32 => match read_len(buf, &mut pos, 4) {
                Some(len) => {
                    remaining += len as u64;
                    0
                }
                None => return Ok(None),
            },
            Marker::FixMap(len) => {
                remaining += 2 * len as u64;
                0
            }
            Marker::Map16 => match read_len(buf, &mut pos, 2) {
                Some(len) => {
                    remaining += 2 * len as u64;
                    0
                }
                None => return Ok(None),
            },
            Marker::Map32 => match read_len(buf, &mut pos, 4) {
                Some(len) => {
                    remaining += 2 * len as u64;
                    0
                }
                None => return Ok(None),
            },
            // Extension payloads are preceded by a one-byte type tag.
            Marker::FixExt1 => 1 + 1,
            Marker::FixExt2 => 1 + 2,
            Marker::FixExt4 => 1 + 4,
            Marker::FixExt8 => 1 + 8,
            Marker::FixExt16 => 1 + 16,
            Marker::Ext8 => match read_len(buf, &mut pos, 1) {
                Some(len) => 1 + len,
                None => return Ok(None),
            },
            Marker::Ext16 => match read_len(buf, &mut pos, 2) {
                Some(len) => 1 + len,
                None => return Ok(None),
            },
            Marker::Ext32 => match read_len(buf, &mut pos, 4) {
                Some(len) => 1 + len,
                None => return Ok(None),
            },
            Marker::Reserved => {
                return Err(DriverError::CorruptFrame(format!(
                    "reserved MessagePack marker at payload offset {}",
                    pos - 1
                )));
            }
        };

        pos = match pos.checked_add(skip) {
            Some(next) if next <= buf.len() => next,
            _ => return Ok(None),
        };
    }

    Ok(Some(pos))
}

/// Read a big-endian length of `width` bytes at `pos`, advancing it.
fn read_len(buf: &[u8], pos: &mut usize, width: usize) -> Option<usize> {
    let bytes = buf.get(*pos..*pos + width)?;
    *pos += width;
    Some(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

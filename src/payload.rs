//! Helpers for the two packet kinds whose payload carries structured
//! data instead of a raw block slice: BEGIN (a little-endian `u32` size)
//! and NACK (a list of missing sequence numbers).

use crate::config::PAYLOAD_LEN;

/// Build a BEGIN payload: `total_size` as LE `u32` in the first four
/// bytes, the remainder zero-padded.
pub fn encode_begin(total_size: u32) -> [u8; PAYLOAD_LEN] {
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[0..4].copy_from_slice(&total_size.to_le_bytes());
    payload
}

/// Read the `total_size` field out of a BEGIN payload.
pub fn decode_begin(payload: &[u8; PAYLOAD_LEN]) -> u32 {
    u32::from_le_bytes(payload[0..4].try_into().expect("4-byte slice"))
}

/// Build a NACK payload: the missing sequence numbers as LE `u16`s,
/// terminated by `0xFFFF`. Entries that would not fit (including the
/// terminator) are silently dropped — a future END will re-report
/// whatever is still missing.
pub fn encode_nack(missing: &[u16]) -> [u8; PAYLOAD_LEN] {
    let mut payload = [0xFFu8; PAYLOAD_LEN];
    let mut offset = 0;
    for &seq in missing {
        if offset + 2 > PAYLOAD_LEN - 2 {
            break;
        }
        payload[offset..offset + 2].copy_from_slice(&seq.to_le_bytes());
        offset += 2;
    }
    payload[offset..offset + 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
    payload
}

/// Parse a NACK payload back into the list of missing sequence numbers,
/// stopping at the first `0xFFFF` terminator or the end of the payload.
pub fn decode_nack(payload: &[u8; PAYLOAD_LEN]) -> Vec<u16> {
    let mut missing = Vec::new();
    for chunk in payload.chunks_exact(2) {
        let value = u16::from_le_bytes([chunk[0], chunk[1]]);
        if value == 0xFFFF {
            break;
        }
        missing.push(value);
    }
    missing
}

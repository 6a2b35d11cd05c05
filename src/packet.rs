//! The fixed-size wire packet: `{channel, seq, service_code, payload, crc}`.
//!
//! A fixed frame keeps the hot path allocator-free — encode/decode work
//! entirely on stack-resident arrays, the same way the packed register
//! layouts this crate grew out of did.

use crate::config::PAYLOAD_LEN;
use crate::crc;

/// Bytes on the wire for one packet: 1 (channel) + 2 (seq) + 1 (service_code)
/// + [`PAYLOAD_LEN`] (payload) + 4 (crc).
pub const PACKET_SIZE: usize = 1 + 2 + 1 + PAYLOAD_LEN + 4;

const CRC_COVERED: usize = PACKET_SIZE - 4;

/// The per-packet control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceCode {
    Begin = 1,
    Data = 2,
    End = 3,
    Ask = 4,
    Nack = 5,
}

impl ServiceCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ServiceCode::Begin),
            2 => Some(ServiceCode::Data),
            3 => Some(ServiceCode::End),
            4 => Some(ServiceCode::Ask),
            5 => Some(ServiceCode::Nack),
            _ => None,
        }
    }
}

/// One wire-format RDT packet, decoded into owned fields.
#[derive(Debug, Clone)]
pub struct Packet {
    pub channel: u8,
    pub seq: u16,
    pub service_code: ServiceCode,
    pub payload: [u8; PAYLOAD_LEN],
}

impl Packet {
    pub fn new(channel: u8, seq: u16, service_code: ServiceCode, payload: [u8; PAYLOAD_LEN]) -> Self {
        Packet { channel, seq, service_code, payload }
    }

    /// Serialize to the fixed-size wire representation, computing the CRC
    /// over every byte but the CRC field itself.
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.channel;
        buf[1..3].copy_from_slice(&self.seq.to_le_bytes());
        buf[3] = self.service_code as u8;
        buf[4..4 + PAYLOAD_LEN].copy_from_slice(&self.payload);
        let checksum = crc::checksum(&buf[..CRC_COVERED]);
        buf[CRC_COVERED..].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Parse a received frame. Rejects any frame that is not exactly
    /// [`PACKET_SIZE`] bytes, has an unknown service code, or whose CRC
    /// does not match — the caller treats all three as a silent drop.
    pub fn decode(frame: &[u8]) -> Option<Packet> {
        if frame.len() != PACKET_SIZE {
            return None;
        }

        let expected_crc = u32::from_le_bytes(frame[CRC_COVERED..].try_into().ok()?);
        let actual_crc = crc::checksum(&frame[..CRC_COVERED]);
        if expected_crc != actual_crc {
            return None;
        }

        let channel = frame[0];
        let seq = u16::from_le_bytes(frame[1..3].try_into().ok()?);
        let service_code = ServiceCode::from_u8(frame[3])?;
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&frame[4..4 + PAYLOAD_LEN]);

        Some(Packet { channel, seq, service_code, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[0..4].copy_from_slice(&42u32.to_le_bytes());
        let packet = Packet::new(2, 0, ServiceCode::Begin, payload);

        let frame = packet.encode();
        assert_eq!(frame.len(), PACKET_SIZE);

        let decoded = Packet::decode(&frame).expect("valid frame");
        assert_eq!(decoded.channel, 2);
        assert_eq!(decoded.seq, 0);
        assert_eq!(decoded.service_code, ServiceCode::Begin);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn rejects_wrong_length() {
        let packet = Packet::new(0, 0, ServiceCode::Ask, [0u8; PAYLOAD_LEN]);
        let mut frame = packet.encode().to_vec();
        frame.pop();
        assert!(Packet::decode(&frame).is_none());
    }

    #[test]
    fn rejects_corrupted_crc() {
        let packet = Packet::new(0, 0, ServiceCode::Ask, [0u8; PAYLOAD_LEN]);
        let mut frame = packet.encode();
        frame[10] ^= 0xFF;
        assert!(Packet::decode(&frame).is_none());
    }

    #[test]
    fn rejects_unknown_service_code() {
        let packet = Packet::new(0, 0, ServiceCode::Ask, [0u8; PAYLOAD_LEN]);
        let mut frame = packet.encode();
        frame[3] = 0x7F;
        // Recompute the CRC so only the service code is invalid.
        let checksum = crc::checksum(&frame[..CRC_COVERED]);
        frame[CRC_COVERED..].copy_from_slice(&checksum.to_le_bytes());
        assert!(Packet::decode(&frame).is_none());
    }
}

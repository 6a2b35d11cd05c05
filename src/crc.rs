//! CRC-32 exactly as the wire format demands: reflected IEEE 802.3,
//! init `0xFFFFFFFF`, inverted on output. This is the same algorithm
//! Ethernet/zlib/gzip use, exposed by the `crc` crate as
//! `CRC_32_ISO_HDLC`.

use crc::{Crc, CRC_32_ISO_HDLC};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum of `bytes`, matching the reference peer bit-for-bit.
pub fn checksum(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

//! The fixed 6-byte inner FPDU header (§3, §4.1).
//!
//! The outer 2-byte length prefix is stripped by the transport layer's
//! length-delimited framing before bytes ever reach this crate (see
//! `pesit-transport`); what's left for `binrw` to describe is the fixed
//! inner shape: `internal_len(2B) | phase(1B) | type(1B) | id_dst(1B) | id_src(1B)`.

use binrw::prelude::*;

/// Inner FPDU header, immediately followed by the parameter area or raw
/// DTF data.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(big)]
pub struct FrameHeader {
    /// Length, in bytes, of this header plus whatever follows it
    /// (parameter area or DTF data).
    pub internal_len: u16,
    pub phase: u8,
    pub type_code: u8,
    pub id_dst: u8,
    pub id_src: u8,
}

impl FrameHeader {
    pub const SIZE: usize = 6;

    pub fn new(phase: u8, type_code: u8, id_dst: u8, id_src: u8, body_len: usize) -> Self {
        FrameHeader {
            internal_len: (Self::SIZE + body_len) as u16,
            phase,
            type_code,
            id_dst,
            id_src,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_bytes() {
        let header = FrameHeader::new(1, 1, 0, 1, 0);
        let mut buf = Vec::new();
        header.write(&mut Cursor::new(&mut buf)).unwrap();
        assert_eq!(buf, [0x00, 0x06, 0x01, 0x01, 0x00, 0x01]);

        let back = FrameHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, header);
    }
}

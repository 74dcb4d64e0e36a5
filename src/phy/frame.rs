// Frame format on the channel:
// [Preamble] [Size|Last:1] [Index:1] [Payload:Size] [CRC8:1] [Silence]
// Header bytes use the header carrier size, the rest the payload carrier size.

use crate::error::DecodeError;
use crate::utils::consts::{MAX_PHY_PAYLOAD, PHY_HEADER_BYTES};

const LAST_FLAG: u8 = 0x80;
const SIZE_MASK: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyHeader {
    /// Payload bytes in this frame, 1..=127
    pub payload_size: u8,
    /// Set on the final frame of a packet
    pub is_last: bool,
    /// Position of the frame within its packet
    pub frame_index: u8,
}

impl PhyHeader {
    pub fn new(payload_size: usize, is_last: bool, frame_index: u8) -> Self {
        debug_assert!((1..=MAX_PHY_PAYLOAD).contains(&payload_size));
        Self {
            payload_size: payload_size as u8 & SIZE_MASK,
            is_last,
            frame_index,
        }
    }

    pub fn to_bytes(&self) -> [u8; PHY_HEADER_BYTES] {
        let last = if self.is_last { LAST_FLAG } else { 0 };
        [last | (self.payload_size & SIZE_MASK), self.frame_index]
    }

    pub fn from_bytes(bytes: [u8; PHY_HEADER_BYTES]) -> Result<Self, DecodeError> {
        let payload_size = bytes[0] & SIZE_MASK;
        if payload_size == 0 {
            return Err(DecodeError::EmptyFrame);
        }
        Ok(Self {
            payload_size,
            is_last: bytes[0] & LAST_FLAG != 0,
            frame_index: bytes[1],
        })
    }
}

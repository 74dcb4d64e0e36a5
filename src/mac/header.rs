// MAC frame: [Src:3|Dst:3|Type:1|Last:1] [Index:1] [Payload]

use crate::error::MacError;
use crate::utils::consts::{MAC_HEADER_BYTES, MAX_MAC_ADDRESS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data = 0,
    Ack = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub source: u8,
    pub destination: u8,
    pub frame_type: FrameType,
    pub is_last: bool,
    pub index: u8,
}

impl MacHeader {
    pub fn data(source: u8, destination: u8, index: u8, is_last: bool) -> Self {
        Self {
            source,
            destination,
            frame_type: FrameType::Data,
            is_last,
            index,
        }
    }

    /// Acknowledges `data` on behalf of its destination.
    pub fn ack_for(data: &MacHeader) -> Self {
        Self {
            source: data.destination,
            destination: data.source,
            frame_type: FrameType::Ack,
            is_last: data.is_last,
            index: data.index,
        }
    }

    pub fn to_bytes(&self) -> [u8; MAC_HEADER_BYTES] {
        let byte0 = (self.source & MAX_MAC_ADDRESS) << 5
            | (self.destination & MAX_MAC_ADDRESS) << 2
            | (self.frame_type as u8) << 1
            | self.is_last as u8;
        [byte0, self.index]
    }

    /// Splits a received packet into its header and payload.
    pub fn parse(packet: &[u8]) -> Result<(Self, &[u8]), MacError> {
        if packet.len() < MAC_HEADER_BYTES {
            return Err(MacError::MalformedHeader(packet.len()));
        }
        let byte0 = packet[0];
        let frame_type = if byte0 & 0b10 != 0 {
            FrameType::Ack
        } else {
            FrameType::Data
        };
        let header = Self {
            source: byte0 >> 5,
            destination: (byte0 >> 2) & MAX_MAC_ADDRESS,
            frame_type,
            is_last: byte0 & 1 != 0,
            index: packet[1],
        };
        Ok((header, &packet[MAC_HEADER_BYTES..]))
    }

    /// Header followed by `payload`.
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MAC_HEADER_BYTES + payload.len());
        frame.extend_from_slice(&self.to_bytes());
        frame.extend_from_slice(payload);
        frame
    }
}

use std::sync::Arc;

use tracing::{debug, info};

use super::crc::Crc8;
use super::frame::PhyHeader;
use super::line_coding::{CODEWORD_BITS, codeword_bits};
use crate::config::PhyConfig;
use crate::error::PhyError;
use crate::utils::consts::{MAX_FRAMES_PER_PACKET, PHY_HEADER_BYTES};

/// Turns packets into sample sequences. Holds no mutable state, so one
/// instance can be shared by every sender.
#[derive(Debug, Clone)]
pub struct Modulator {
    preamble: Arc<[i32]>,
    amplitude: i32,
    carrier_size: usize,
    header_carrier_size: usize,
    byte_per_frame: usize,
    frame_interval: usize,
    crc: Crc8,
}

impl Modulator {
    pub fn new(config: &PhyConfig, preamble: Arc<[i32]>) -> Self {
        info!("Modulator initialized:");
        info!("  - preamble length: {} samples", preamble.len());
        info!(
            "  - samples per bit: {} (header {})",
            config.carrier.size, config.carrier.header_size
        );
        info!("  - bytes per frame: {}", config.byte_per_frame);

        Self {
            preamble,
            amplitude: config.carrier_amplitude(),
            carrier_size: config.carrier.size,
            header_carrier_size: config.carrier.header_size,
            byte_per_frame: config.byte_per_frame,
            frame_interval: config.frame_interval,
            crc: Crc8::new(config.crc_polynomial),
        }
    }

    pub fn frame_count(&self, len: usize) -> usize {
        len.div_ceil(self.byte_per_frame)
    }

    /// Samples produced for one frame carrying `payload_len` bytes.
    pub fn frame_samples(&self, payload_len: usize) -> usize {
        self.preamble.len()
            + PHY_HEADER_BYTES * CODEWORD_BITS * self.header_carrier_size
            + (payload_len + 1) * CODEWORD_BITS * self.carrier_size
            + self.frame_interval
    }

    /// Encode a packet into audio samples
    /// Returns: ([Preamble] [Header] [Payload] [CRC] [Silence])*
    pub fn modulate(&self, bytes: &[u8]) -> Result<Vec<i32>, PhyError> {
        let frames = self.frame_count(bytes.len());
        if frames > MAX_FRAMES_PER_PACKET {
            return Err(PhyError::PayloadTooLarge {
                len: bytes.len(),
                max_frames: MAX_FRAMES_PER_PACKET,
            });
        }

        let total = bytes
            .chunks(self.byte_per_frame)
            .map(|chunk| self.frame_samples(chunk.len()))
            .sum();
        let mut output = Vec::with_capacity(total);

        for (index, chunk) in bytes
            .chunks(self.byte_per_frame)
            .enumerate()
        {
            let header = PhyHeader::new(chunk.len(), index + 1 == frames, index as u8);
            self.modulate_frame(&mut output, &header, chunk);
        }

        debug!(
            "Modulated {} bytes into {} frames, total samples: {}",
            bytes.len(),
            frames,
            output.len()
        );
        Ok(output)
    }

    fn modulate_frame(&self, output: &mut Vec<i32>, header: &PhyHeader, payload: &[u8]) {
        output.extend_from_slice(&self.preamble);

        for byte in header.to_bytes() {
            self.modulate_byte(output, byte, self.header_carrier_size);
        }

        let mut crc = self.crc.clone();
        crc.reset();
        for &byte in payload {
            crc.update(byte);
            self.modulate_byte(output, byte, self.carrier_size);
        }
        self.modulate_byte(output, crc.get(), self.carrier_size);

        output.extend(std::iter::repeat_n(0, self.frame_interval));
    }

    fn modulate_byte(&self, output: &mut Vec<i32>, byte: u8, samples_per_bit: usize) {
        for bit in codeword_bits(byte) {
            let level = if bit { -self.amplitude } else { self.amplitude };
            output.extend(std::iter::repeat_n(level, samples_per_bit));
        }
    }
}

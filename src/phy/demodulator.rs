//! Streaming demodulator.
//!
//! Samples are consumed one at a time. In `PreambleDetection` a window of the
//! most recent samples is correlated with the preamble; the strongest
//! candidate above the threshold is accepted once a full preamble length has
//! passed without a stronger one. The samples buffered while waiting are then
//! replayed through the same per-sample step, so extraction sees one continuous
//! stream. Clock drift is compensated per frame: the correlation just before
//! and after the peak give a sub-sample offset, and a linear resampler shifts
//! every data sample by it.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use super::crc::Crc8;
use super::frame::PhyHeader;
use super::line_coding::{self, CODEWORD_BITS};
use crate::config::PhyConfig;
use crate::error::DecodeError;
use crate::utils::consts::PHY_HEADER_BYTES;
use crate::utils::fixed::{FRAC_BITS, Fixed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemodEvent {
    Packet(Vec<u8>),
    Error(DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodulateState {
    PreambleDetection,
    DataExtraction(ExtractionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    ReceiveHeader,
    ReceiveData,
    ReceiveCrc,
}

/// Correlation around the strongest preamble match seen so far.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    left: Fixed,
    peak: Fixed,
    right: Option<Fixed>,
}

/// Linear interpolation between consecutive samples at a fixed phase.
#[derive(Debug, Default)]
struct Resampler {
    last: Fixed,
    phase: Fixed,
}

impl Resampler {
    fn arm(&mut self, last: Fixed, phase: Fixed) {
        self.last = last;
        self.phase = phase;
    }

    fn update(&mut self, current: Fixed) -> Fixed {
        let output = Fixed::lerp(self.last, current, self.phase);
        self.last = current;
        output
    }
}

/// `Σ (a·b) >> 31` over the window, in full-scale units.
fn dot_product(window: &VecDeque<i32>, preamble: &[i32]) -> Fixed {
    let sum: i64 = window
        .iter()
        .zip(preamble)
        .map(|(&a, &b)| (a as i64 * b as i64) >> 31)
        .sum();
    Fixed::from_raw((sum >> (31 - FRAC_BITS)) as i32)
}

/// Sub-sample offset of the true correlation peak, in `[-1, 1]`.
/// Positive when the peak lies before the sampled maximum.
pub fn estimate_adjustment(left: Fixed, peak: Fixed, right: Fixed) -> Fixed {
    let adjustment = if left > right {
        let denominator = peak + left;
        if denominator <= Fixed::ZERO {
            return Fixed::ZERO;
        }
        Fixed::ONE - (peak + right) / denominator
    } else {
        let denominator = peak + right;
        if denominator <= Fixed::ZERO {
            return Fixed::ZERO;
        }
        (peak + left) / denominator - Fixed::ONE
    };
    adjustment.clamp(-Fixed::ONE, Fixed::ONE)
}

pub struct Demodulator {
    preamble: Arc<[i32]>,
    carrier_size: usize,
    header_carrier_size: usize,
    power_threshold: Fixed,
    state: DemodulateState,

    // Preamble detection
    window: VecDeque<i32>,
    previous_power: Fixed,
    local_max_power: Fixed,
    candidate: Option<Candidate>,
    distance_from_candidate: usize,
    frame_to_decode: VecDeque<i32>,
    resampler: Resampler,

    // Data extraction
    crc: Crc8,
    sum: Fixed,
    carrier_tick: usize,
    codeword: u16,
    bit_count: usize,
    header_bytes: Vec<u8>,
    header: Option<PhyHeader>,
    last_frame_index: Option<u8>,
    chunk: Vec<u8>,
    packet: Vec<u8>,

    events: Vec<DemodEvent>,
}

impl Demodulator {
    pub fn new(config: &PhyConfig, preamble: Arc<[i32]>) -> Self {
        let len = preamble.len();
        debug!(
            "Demodulator initialized: preamble {} samples, threshold {}",
            len, config.preamble.threshold
        );
        Self {
            preamble,
            carrier_size: config.carrier.size,
            header_carrier_size: config.carrier.header_size,
            power_threshold: Fixed::from_f64(config.preamble.threshold),
            state: DemodulateState::PreambleDetection,
            window: VecDeque::with_capacity(len + 1),
            previous_power: Fixed::ZERO,
            local_max_power: Fixed::ZERO,
            candidate: None,
            distance_from_candidate: 0,
            frame_to_decode: VecDeque::with_capacity(len + 1),
            resampler: Resampler::default(),
            crc: Crc8::new(config.crc_polynomial),
            sum: Fixed::ZERO,
            carrier_tick: 0,
            codeword: 0,
            bit_count: 0,
            header_bytes: Vec::with_capacity(PHY_HEADER_BYTES),
            header: None,
            last_frame_index: None,
            chunk: Vec::new(),
            packet: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> DemodulateState {
        self.state
    }

    /// Feeds a block and returns the packets and errors it completed.
    pub fn process_samples(&mut self, samples: &[i32]) -> Vec<DemodEvent> {
        for &sample in samples {
            self.update(sample);
        }
        std::mem::take(&mut self.events)
    }

    /// Events land in `self.events` until `process_samples` returns them.
    fn update(&mut self, sample: i32) {
        let result = match self.state {
            DemodulateState::PreambleDetection => {
                self.detect_preamble(sample);
                Ok(())
            }
            DemodulateState::DataExtraction(stage) => self.extract_data(stage, sample),
        };

        if let Err(err) = result {
            debug!("Decode error: {}, resynchronizing", err);
            self.abort_packet();
            self.events.push(DemodEvent::Error(err));
        }
    }

    /// Drops all state, including a partially received packet.
    pub fn reset(&mut self) {
        self.abort_packet();
        self.events.clear();
    }

    fn detect_preamble(&mut self, sample: i32) {
        let len = self.preamble.len();
        self.window.push_back(sample);
        if self.window.len() > len {
            self.window.pop_front();
        }
        if self.window.len() < len {
            return;
        }

        let power = dot_product(&self.window, &self.preamble);

        if power > self.local_max_power && power > self.power_threshold {
            trace!("Preamble candidate: power {}", power);
            self.local_max_power = power;
            self.candidate = Some(Candidate {
                left: self.previous_power,
                peak: power,
                right: None,
            });
            self.frame_to_decode.clear();
            self.frame_to_decode.push_back(sample);
            self.distance_from_candidate = 0;
        } else if let Some(candidate) = self.candidate.as_mut() {
            candidate.right.get_or_insert(power);
            self.frame_to_decode.push_back(sample);
            self.distance_from_candidate += 1;
        }
        self.previous_power = power;

        if self.candidate.is_some() && self.distance_from_candidate >= len {
            self.start_extraction();
        }
    }

    fn start_extraction(&mut self) {
        let Some(candidate) = self.candidate.take() else {
            return;
        };
        let right = candidate.right.unwrap_or(candidate.left);
        let adjustment = estimate_adjustment(candidate.left, candidate.peak, right);

        let replay: Vec<i32> = self.frame_to_decode.drain(..).collect();
        let sample_at = |i: usize| Fixed::from_sample(replay.get(i).copied().unwrap_or(0));
        // The peak sample is the last preamble sample; data starts right after
        // it, shifted by the estimated offset.
        let skip = if adjustment >= Fixed::ZERO {
            self.resampler.arm(sample_at(0), Fixed::ONE - adjustment);
            1
        } else {
            self.resampler.arm(sample_at(1), -adjustment);
            2
        };

        debug!(
            "Preamble locked: power {} (left {}, right {}), adjustment {}",
            candidate.peak, candidate.left, right, adjustment
        );

        self.window.clear();
        self.previous_power = Fixed::ZERO;
        self.local_max_power = Fixed::ZERO;
        self.distance_from_candidate = 0;
        self.begin_frame();

        for &sample in replay.iter().skip(skip) {
            self.update(sample);
        }
    }

    fn begin_frame(&mut self) {
        self.state = DemodulateState::DataExtraction(ExtractionState::ReceiveHeader);
        self.sum = Fixed::ZERO;
        self.carrier_tick = 0;
        self.codeword = 0;
        self.bit_count = 0;
        self.header_bytes.clear();
        self.header = None;
        self.chunk.clear();
    }

    fn end_frame(&mut self) {
        self.state = DemodulateState::PreambleDetection;
        self.header = None;
        self.chunk.clear();
        self.header_bytes.clear();
    }

    fn abort_packet(&mut self) {
        self.end_frame();
        self.packet.clear();
        self.last_frame_index = None;
        self.window.clear();
        self.candidate = None;
        self.frame_to_decode.clear();
        self.previous_power = Fixed::ZERO;
        self.local_max_power = Fixed::ZERO;
        self.distance_from_candidate = 0;
    }

    fn extract_data(&mut self, stage: ExtractionState, sample: i32) -> Result<(), DecodeError> {
        let current = self.resampler.update(Fixed::from_sample(sample));
        self.sum += current;
        self.carrier_tick += 1;

        let samples_per_bit = match stage {
            ExtractionState::ReceiveHeader => self.header_carrier_size,
            _ => self.carrier_size,
        };
        if self.carrier_tick < samples_per_bit {
            return Ok(());
        }

        if self.sum < Fixed::ZERO {
            self.codeword |= 1 << self.bit_count;
        }
        self.bit_count += 1;
        self.sum = Fixed::ZERO;
        self.carrier_tick = 0;
        if self.bit_count < CODEWORD_BITS {
            return Ok(());
        }

        let codeword = std::mem::take(&mut self.codeword);
        self.bit_count = 0;
        let byte = line_coding::decode(codeword).ok_or(DecodeError::InvalidSymbol(codeword))?;
        trace!("Decoded byte {:#04x} in {:?}", byte, stage);

        match stage {
            ExtractionState::ReceiveHeader => self.receive_header(byte),
            ExtractionState::ReceiveData => self.receive_data(byte),
            ExtractionState::ReceiveCrc => self.receive_crc(byte),
        }
    }

    fn receive_header(&mut self, byte: u8) -> Result<(), DecodeError> {
        self.header_bytes.push(byte);
        if self.header_bytes.len() < PHY_HEADER_BYTES {
            return Ok(());
        }
        let header = PhyHeader::from_bytes([self.header_bytes[0], self.header_bytes[1]])?;
        self.header_bytes.clear();

        match (header.frame_index, self.last_frame_index) {
            (0, _) => {
                if !self.packet.is_empty() {
                    debug!(
                        "New packet started, dropping {} stale bytes",
                        self.packet.len()
                    );
                }
                self.packet.clear();
            }
            (index, Some(last)) if index == last.wrapping_add(1) => {}
            (index, last) => {
                return Err(DecodeError::UnexpectedIndex {
                    expected: last.map_or(0, |l| l.wrapping_add(1)),
                    got: index,
                });
            }
        }

        trace!(
            "Header: size {}, index {}, last {}",
            header.payload_size, header.frame_index, header.is_last
        );
        self.header = Some(header);
        self.crc.reset();
        self.chunk.clear();
        self.state = DemodulateState::DataExtraction(ExtractionState::ReceiveData);
        Ok(())
    }

    fn receive_data(&mut self, byte: u8) -> Result<(), DecodeError> {
        self.chunk.push(byte);
        self.crc.update(byte);
        let expected = self
            .header
            .map_or(0, |h| h.payload_size as usize);
        if self.chunk.len() >= expected {
            self.state = DemodulateState::DataExtraction(ExtractionState::ReceiveCrc);
        }
        Ok(())
    }

    fn receive_crc(&mut self, byte: u8) -> Result<(), DecodeError> {
        let computed = self.crc.get();
        if computed != byte {
            return Err(DecodeError::CrcMismatch {
                computed,
                received: byte,
            });
        }

        let Some(header) = self.header else {
            return Err(DecodeError::EmptyFrame);
        };
        self.packet.extend_from_slice(&self.chunk);
        self.last_frame_index = Some(header.frame_index);
        debug!(
            "Frame {} received ({} bytes)",
            header.frame_index,
            self.chunk.len()
        );

        if header.is_last {
            let packet = std::mem::take(&mut self.packet);
            self.last_frame_index = None;
            debug!("Packet complete: {} bytes", packet.len());
            self.events.push(DemodEvent::Packet(packet));
        }
        self.end_frame();
        Ok(())
    }
}

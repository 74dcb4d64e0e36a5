use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{debug, info};

use super::decoder::{Decoder, DecoderSinks, InputQueue};
use super::demodulator::Demodulator;
use super::encoder::{Encoder, SendHandle, output_channel};
use super::modulator::Modulator;
use super::power::{CarrierSense, PowerMonitor};
use super::preamble::generate_preamble;
use crate::config::PhyConfig;
use crate::device::Device;
use crate::error::{DecodeError, PhyError};
use crate::utils::signal::Signal;

/// Packet transport over a [`Device`]: modulates outgoing packets into the
/// output stream and demodulates the input stream on a worker thread.
pub struct PhysicalLayer {
    encoder: Encoder,
    packets: Receiver<Vec<u8>>,
    errors: Signal<DecodeError>,
    carrier: CarrierSense,
    dropped_blocks: Arc<AtomicU64>,
    byte_per_frame: usize,
    closed: AtomicBool,
    device: Mutex<Box<dyn Device>>,
    decoder: Mutex<Decoder>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PhysicalLayer {
    pub fn open(config: &PhyConfig, mut device: Box<dyn Device>) -> Result<Self, PhyError> {
        config.validate()?;

        let preamble: Arc<[i32]> =
            generate_preamble(config.preamble.n, config.preamble_amplitude()).into();
        let modulator = Modulator::new(config, preamble.clone());
        let demodulator = Demodulator::new(config, preamble);
        let (encoder, mut output) = output_channel(modulator, config.output_buffer_size);

        let (block_tx, block_rx) = bounded(config.input_buffer_size);
        let (packets_tx, packets_rx) = bounded(config.packet_buffer_size);
        let errors = Signal::new();
        let input = InputQueue::new(block_tx, block_rx.clone());
        let dropped_blocks = input.dropped_counter();

        let decoder = Decoder::spawn(
            demodulator,
            block_rx,
            DecoderSinks {
                packets_tx,
                packets_rx: packets_rx.clone(),
                errors: errors.clone(),
            },
        )?;

        let mut power_monitor = PowerMonitor::new(&config.power_monitor);
        let carrier = power_monitor.carrier();

        device.start(Box::new(move |input_block: &[i32], output_block: &mut [i32]| {
            power_monitor.update(input_block);
            input.push(input_block);
            output.write(output_block);
        }))?;

        info!(
            "Physical layer open: {} bytes per frame, {} samples per bit",
            config.byte_per_frame, config.carrier.size
        );

        Ok(Self {
            encoder,
            packets: packets_rx,
            errors,
            carrier,
            dropped_blocks,
            byte_per_frame: config.byte_per_frame,
            closed: AtomicBool::new(false),
            device: Mutex::new(device),
            decoder: Mutex::new(decoder),
        })
    }

    /// Blocks until `bytes` has been handed to the device.
    pub fn send(&self, bytes: &[u8]) -> Result<(), PhyError> {
        self.send_async(bytes)?.wait()
    }

    pub fn send_async(&self, bytes: &[u8]) -> Result<SendHandle, PhyError> {
        self.encoder.send_async(bytes)
    }

    /// Blocks until a packet arrives. Fails once the layer is closed and the
    /// queue is drained.
    pub fn receive(&self) -> Result<Vec<u8>, PhyError> {
        self.packets
            .recv()
            .map_err(|_| PhyError::Closed)
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, PhyError> {
        match self.packets.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PhyError::Closed),
        }
    }

    pub fn receive_async(&self) -> Receiver<Vec<u8>> {
        self.packets.clone()
    }

    /// Fires whenever a frame fails to decode, e.g. after a collision.
    pub fn errors(&self) -> &Signal<DecodeError> {
        &self.errors
    }

    pub fn carrier(&self) -> &CarrierSense {
        &self.carrier
    }

    pub fn byte_per_frame(&self) -> usize {
        self.byte_per_frame
    }

    pub fn modulator(&self) -> &Modulator {
        self.encoder.modulator()
    }

    /// Input blocks discarded because the decoder fell behind.
    pub fn dropped_input_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the device and waits for the decoder to drain. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.device).stop();
        lock(&self.decoder).join();
        debug!("Physical layer closed");
    }
}

impl Drop for PhysicalLayer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Loopback;

    #[test]
    fn test_loopback_round_trip() {
        let device = Loopback::new().with_sample_rate(192_000);
        let phy = PhysicalLayer::open(&PhyConfig::default(), Box::new(device)).unwrap();
        phy.send(b"hello over the air").unwrap();
        let packet = phy.receive_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(packet.as_deref(), Some(&b"hello over the air"[..]));
        phy.close();
        assert!(phy.is_closed());
        assert!(matches!(phy.receive(), Err(PhyError::Closed)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PhyConfig::default();
        config.carrier.size = 0;
        assert!(matches!(
            PhysicalLayer::open(&config, Box::new(Loopback::new())),
            Err(PhyError::Config(_))
        ));
    }
}

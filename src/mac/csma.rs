use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select};
use tracing::{debug, info, trace, warn};

use super::backoff::{self, Backoff};
use super::header::{FrameType, MacHeader};
use crate::config::MacConfig;
use crate::error::{ConfigError, MacError, PhyError};
use crate::phy::PhysicalLayer;
use crate::utils::consts::{CARRIER_SENSE_POLL_MS, MAC_HEADER_BYTES, MAX_MAC_ADDRESS};
use crate::utils::signal::{Signal, push_drop_oldest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsmaState {
    Sensing,
    Transmitting,
    WaitingForAck(Instant),
    Backoff,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What the receiver does with an incoming data frame.
#[derive(Debug, PartialEq, Eq)]
enum Reassembly {
    /// Accepted; carries the packet when the frame completed it.
    Accepted(Option<Vec<u8>>),
    /// Already accepted once, the sender missed our ACK.
    Duplicate,
    Dropped,
}

#[derive(Debug, Default)]
struct SourceState {
    expected_index: u8,
    packet: Vec<u8>,
    last_acked: Option<u8>,
}

/// Per-source reassembly of data frames into packets.
#[derive(Debug, Default)]
struct Reassembler {
    sources: [SourceState; MAX_MAC_ADDRESS as usize + 1],
}

impl Reassembler {
    fn accept(&mut self, header: &MacHeader, payload: &[u8]) -> Reassembly {
        let state = &mut self.sources[(header.source & MAX_MAC_ADDRESS) as usize];

        if header.index == 0 && !state.packet.is_empty() {
            // Either a new packet after the sender gave up, or a repeat of
            // frame 0; both rebuild the packet from this frame.
            if state.last_acked != Some(0) {
                warn!(
                    "Sender {} restarted, discarding {} buffered bytes",
                    header.source,
                    state.packet.len()
                );
            }
            state.packet.clear();
        } else if header.index != state.expected_index {
            if Some(header.index) == state.last_acked {
                return Reassembly::Duplicate;
            }
            debug!(
                "Dropping frame {} from {}, expected {}",
                header.index, header.source, state.expected_index
            );
            return Reassembly::Dropped;
        }

        state.packet.extend_from_slice(payload);
        state.last_acked = Some(header.index);
        if header.is_last {
            state.expected_index = 0;
            Reassembly::Accepted(Some(std::mem::take(&mut state.packet)))
        } else {
            state.expected_index = header.index.wrapping_add(1);
            Reassembly::Accepted(None)
        }
    }
}

struct Inner {
    phy: PhysicalLayer,
    address: u8,
    byte_per_frame: usize,
    ack_timeout: Duration,
    max_retries: u32,
    backoff: Mutex<Box<dyn Backoff>>,
    /// `(source, index)` of the ACK the current sender waits for
    awaiting: Mutex<Option<(u8, u8)>>,
    acks: Signal<u8>,
    send_lock: Mutex<()>,
}

impl Inner {
    fn send(&self, destination: u8, payload: &[u8]) -> Result<(), MacError> {
        if destination > MAX_MAC_ADDRESS {
            return Err(MacError::InvalidAddress(destination));
        }
        if payload.is_empty() {
            return Ok(());
        }
        let _guard = lock(&self.send_lock);

        let frames = payload.len().div_ceil(self.byte_per_frame);
        info!(
            "Sending {} bytes to {} in {} frames",
            payload.len(),
            destination,
            frames
        );
        for (i, chunk) in payload.chunks(self.byte_per_frame).enumerate() {
            let header = MacHeader::data(self.address, destination, i as u8, i + 1 == frames);
            let result = self.transmit(&header, &header.frame(chunk));
            *lock(&self.awaiting) = None;
            result?;
        }
        debug!("All {} frames to {} acknowledged", frames, destination);
        Ok(())
    }

    /// Runs one frame through the CSMA state machine until it is acknowledged
    /// or the retry budget is spent.
    fn transmit(&self, header: &MacHeader, frame: &[u8]) -> Result<(), MacError> {
        let index = header.index;
        let mut retries = 0u32;
        let mut timeouts = 0u32;
        let mut state = CsmaState::Sensing;

        *lock(&self.awaiting) = Some((header.destination, index));
        self.acks.clear();

        loop {
            if self.phy.is_closed() {
                return Err(MacError::Closed);
            }
            if retries > self.max_retries {
                warn!("Frame {} to {} gave up after {} attempts", index, header.destination, retries);
                return Err(MacError::RetriesExhausted {
                    index,
                    attempts: retries,
                });
            }

            match state {
                CsmaState::Sensing => {
                    let poll = Duration::from_millis(CARRIER_SENSE_POLL_MS);
                    if self.phy.carrier().wait_until_free(poll) {
                        state = CsmaState::Transmitting;
                    } else {
                        trace!("Channel busy, deferring frame {}", index);
                    }
                }
                CsmaState::Transmitting => {
                    self.phy.errors().clear();
                    let handle = self.phy.send_async(frame)?;
                    trace!("Transmitting frame {} (attempt {})", index, retries + 1);
                    select! {
                        recv(handle.done()) -> done => {
                            if done.is_err() {
                                return Err(PhyError::Closed.into());
                            }
                            state = CsmaState::WaitingForAck(Instant::now() + self.ack_timeout);
                        }
                        recv(self.phy.errors().receiver()) -> err => {
                            handle.cancel();
                            debug!("Collision while sending frame {}: {:?}", index, err);
                            retries += 1;
                            state = CsmaState::Backoff;
                        }
                    }
                }
                CsmaState::WaitingForAck(deadline) => {
                    select! {
                        recv(self.acks.receiver()) -> ack => {
                            if ack == Ok(index) {
                                trace!("Frame {} acknowledged", index);
                                return Ok(());
                            }
                        }
                        recv(self.phy.errors().receiver()) -> err => {
                            debug!("Decode error while awaiting ACK {}: {:?}", index, err);
                            retries += 1;
                            state = CsmaState::Backoff;
                        }
                        recv(crossbeam_channel::at(deadline)) -> _ => {
                            timeouts += 1;
                            if timeouts == 1 {
                                warn!("ACK timeout for frame {} to {}", index, header.destination);
                            } else {
                                debug!("ACK timeout for frame {} ({} so far)", index, timeouts);
                            }
                            retries += 1;
                            state = CsmaState::Sensing;
                        }
                    }
                }
                CsmaState::Backoff => {
                    let delay = lock(&self.backoff).delay(retries);
                    debug!("Backing off {:?} before retry {}", delay, retries);
                    thread::sleep(delay);
                    state = CsmaState::Sensing;
                }
            }
        }
    }

    fn send_ack(&self, data: &MacHeader) {
        let ack = MacHeader::ack_for(data);
        match self.phy.send_async(&ack.to_bytes()) {
            Ok(_) => trace!("ACK {} queued for {}", ack.index, ack.destination),
            Err(e) => warn!("Failed to queue ACK {}: {}", ack.index, e),
        }
    }

    fn handle_packet(
        &self,
        packet: &[u8],
        reassembler: &mut Reassembler,
        output: &(Sender<Vec<u8>>, Receiver<Vec<u8>>),
    ) {
        let (header, payload) = match MacHeader::parse(packet) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Discarding packet: {}", e);
                return;
            }
        };
        if header.destination != self.address {
            trace!("Ignoring frame for {}", header.destination);
            return;
        }

        match header.frame_type {
            FrameType::Ack => {
                if *lock(&self.awaiting) == Some((header.source, header.index)) {
                    self.acks.notify(header.index);
                } else {
                    debug!("Stale ACK {} from {}", header.index, header.source);
                }
            }
            FrameType::Data => match reassembler.accept(&header, payload) {
                Reassembly::Accepted(packet) => {
                    trace!("Frame {} from {} accepted", header.index, header.source);
                    self.send_ack(&header);
                    if let Some(packet) = packet {
                        info!("Received {} bytes from {}", packet.len(), header.source);
                        if push_drop_oldest(&output.0, &output.1, packet) {
                            warn!("MAC output queue full, dropped the oldest packet");
                        }
                    }
                }
                Reassembly::Duplicate => {
                    debug!("Duplicate frame {} from {}, re-sending ACK", header.index, header.source);
                    self.send_ack(&header);
                }
                Reassembly::Dropped => {}
            },
        }
    }
}

/// Acknowledged, addressed delivery of byte payloads over a [`PhysicalLayer`].
///
/// Sends on one instance are serialized: a second caller blocks until the
/// first payload is acknowledged or abandoned.
pub struct MacLayer {
    inner: Arc<Inner>,
    packets: Receiver<Vec<u8>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl MacLayer {
    pub fn open(config: &MacConfig, phy: PhysicalLayer) -> Result<Self, MacError> {
        config.validate()?;
        if config.byte_per_frame + MAC_HEADER_BYTES > phy.byte_per_frame() {
            return Err(ConfigError::invalid(
                "mac.byte_per_frame",
                format!(
                    "{} plus header exceeds the {} byte physical frame",
                    config.byte_per_frame,
                    phy.byte_per_frame()
                ),
            )
            .into());
        }

        let inner = Arc::new(Inner {
            phy,
            address: config.address,
            byte_per_frame: config.byte_per_frame,
            ack_timeout: config.ack_timeout(),
            max_retries: config.max_retries,
            backoff: Mutex::new(backoff::from_config(&config.backoff)),
            awaiting: Mutex::new(None),
            acks: Signal::new(),
            send_lock: Mutex::new(()),
        });

        let (tx, rx) = bounded(config.output_buffer_size);
        let output = (tx, rx.clone());
        let worker_inner = inner.clone();
        let receiver = thread::Builder::new()
            .name("mac-receiver".into())
            .spawn(move || {
                let mut reassembler = Reassembler::default();
                while let Ok(packet) = worker_inner.phy.receive() {
                    worker_inner.handle_packet(&packet, &mut reassembler, &output);
                }
                debug!("MAC receiver stopped");
            })
            .map_err(PhyError::Spawn)?;

        info!("MAC layer open at address {}", config.address);
        Ok(Self {
            inner,
            packets: rx,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    pub fn address(&self) -> u8 {
        self.inner.address
    }

    /// Blocks until every frame of `payload` is acknowledged by `destination`.
    /// Frames already acknowledged stay delivered when a later one fails.
    pub fn send(&self, destination: u8, payload: &[u8]) -> Result<(), MacError> {
        self.inner.send(destination, payload)
    }

    /// Sends on a background thread; the result arrives on the returned channel.
    pub fn send_async(&self, destination: u8, payload: Vec<u8>) -> Receiver<Result<(), MacError>> {
        let (tx, rx) = bounded(1);
        let fallback = tx.clone();
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("mac-sender".into())
            .spawn(move || {
                let _ = tx.send(inner.send(destination, &payload));
            });
        if let Err(e) = spawned {
            let _ = fallback.send(Err(PhyError::Spawn(e).into()));
        }
        rx
    }

    pub fn receive(&self) -> Result<Vec<u8>, MacError> {
        self.packets.recv().map_err(|_| MacError::Closed)
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, MacError> {
        match self.packets.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(MacError::Closed),
        }
    }

    pub fn receive_async(&self) -> Receiver<Vec<u8>> {
        self.packets.clone()
    }

    pub fn phy(&self) -> &PhysicalLayer {
        &self.inner.phy
    }

    /// Closes the physical layer and waits for the receive thread. Idempotent.
    pub fn close(&self) {
        self.inner.phy.close();
        if let Some(receiver) = lock(&self.receiver).take() {
            if receiver.join().is_err() {
                warn!("MAC receiver panicked");
            }
        }
    }
}

impl Drop for MacLayer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffConfig, PhyConfig};
    use crate::device::Loopback;

    fn data(index: u8, is_last: bool) -> MacHeader {
        MacHeader::data(1, 0, index, is_last)
    }

    #[test]
    fn test_reassembly_in_order() {
        let mut reassembler = Reassembler::default();
        assert_eq!(reassembler.accept(&data(0, false), b"ab"), Reassembly::Accepted(None));
        assert_eq!(reassembler.accept(&data(1, false), b"cd"), Reassembly::Accepted(None));
        assert_eq!(
            reassembler.accept(&data(2, true), b"e"),
            Reassembly::Accepted(Some(b"abcde".to_vec()))
        );
        // The next packet starts over at zero
        assert_eq!(
            reassembler.accept(&data(0, true), b"x"),
            Reassembly::Accepted(Some(b"x".to_vec()))
        );
    }

    #[test]
    fn test_duplicates_are_not_appended() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(&data(0, false), b"ab");
        // A repeated frame 0 rebuilds the same prefix
        assert_eq!(reassembler.accept(&data(0, false), b"ab"), Reassembly::Accepted(None));
        reassembler.accept(&data(1, false), b"cd");
        assert_eq!(reassembler.accept(&data(1, false), b"cd"), Reassembly::Duplicate);
        reassembler.accept(&data(2, true), b"ef");
        // Last frame repeated after delivery
        assert_eq!(reassembler.accept(&data(2, true), b"ef"), Reassembly::Duplicate);
        assert_eq!(
            reassembler.accept(&data(0, true), b"z"),
            Reassembly::Accepted(Some(b"z".to_vec()))
        );
    }

    #[test]
    fn test_out_of_order_dropped() {
        let mut reassembler = Reassembler::default();
        assert_eq!(reassembler.accept(&data(3, false), b"??"), Reassembly::Dropped);
        reassembler.accept(&data(0, false), b"ab");
        assert_eq!(reassembler.accept(&data(2, false), b"??"), Reassembly::Dropped);
        assert_eq!(
            reassembler.accept(&data(1, true), b"cd"),
            Reassembly::Accepted(Some(b"abcd".to_vec()))
        );
    }

    #[test]
    fn test_sender_restart_discards_partial_packet() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(&data(0, false), b"ab");
        reassembler.accept(&data(1, false), b"cd");
        assert_eq!(reassembler.accept(&data(0, false), b"new"), Reassembly::Accepted(None));
        assert_eq!(
            reassembler.accept(&data(1, true), b"er"),
            Reassembly::Accepted(Some(b"newer".to_vec()))
        );
    }

    #[test]
    fn test_new_packet_after_abandoned_first_frame() {
        let mut reassembler = Reassembler::default();
        // Sender gave up on frame 1 of the first packet
        assert_eq!(reassembler.accept(&data(0, false), b"AAAA"), Reassembly::Accepted(None));
        assert_eq!(reassembler.accept(&data(0, false), b"BBBB"), Reassembly::Accepted(None));
        assert_eq!(
            reassembler.accept(&data(1, true), b"bb"),
            Reassembly::Accepted(Some(b"BBBBbb".to_vec()))
        );
    }

    #[test]
    fn test_sources_are_independent() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(&MacHeader::data(1, 0, 0, false), b"one");
        assert_eq!(
            reassembler.accept(&MacHeader::data(2, 0, 0, true), b"two"),
            Reassembly::Accepted(Some(b"two".to_vec()))
        );
        assert_eq!(
            reassembler.accept(&MacHeader::data(1, 0, 1, true), b"!"),
            Reassembly::Accepted(Some(b"one!".to_vec()))
        );
    }

    fn open_loopback(config: &MacConfig) -> MacLayer {
        let device = Loopback::new().with_sample_rate(192_000);
        let phy = PhysicalLayer::open(&PhyConfig::default(), Box::new(device)).unwrap();
        MacLayer::open(config, phy).unwrap()
    }

    #[test]
    fn test_send_to_self() {
        let config = MacConfig {
            address: 2,
            byte_per_frame: 16,
            backoff: BackoffConfig::Fixed { delay_ms: 0 },
            ..MacConfig::default()
        };
        let mac = open_loopback(&config);
        let payload: Vec<u8> = (0..40).collect();
        mac.send(2, &payload).unwrap();
        let received = mac.receive_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received, Some(payload));
        mac.close();
        assert!(matches!(mac.receive(), Err(MacError::Closed)));
    }

    #[test]
    fn test_invalid_arguments() {
        let mac = open_loopback(&MacConfig::default());
        assert!(matches!(mac.send(8, b"x"), Err(MacError::InvalidAddress(8))));
        mac.send(1, b"").unwrap();
    }

    #[test]
    fn test_oversized_frames_rejected() {
        let device = Loopback::new();
        let phy = PhysicalLayer::open(&PhyConfig::default(), Box::new(device)).unwrap();
        let config = MacConfig {
            byte_per_frame: 126,
            ..MacConfig::default()
        };
        assert!(matches!(
            MacLayer::open(&config, phy),
            Err(MacError::Config(ConfigError::Invalid { field: "mac.byte_per_frame", .. }))
        ));
    }
}

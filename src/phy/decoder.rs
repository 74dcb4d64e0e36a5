// Input side of the physical layer: the audio callback copies every block
// into a bounded queue, a worker thread demodulates it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use super::demodulator::{DemodEvent, Demodulator};
use crate::error::{DecodeError, PhyError};
use crate::utils::signal::{Signal, push_drop_oldest};

/// Callback-side handle of the input queue. Never blocks: when the decoder
/// falls behind, the oldest block is discarded and counted.
pub struct InputQueue {
    tx: Sender<Vec<i32>>,
    rx: Receiver<Vec<i32>>,
    dropped: Arc<AtomicU64>,
}

impl InputQueue {
    pub fn new(tx: Sender<Vec<i32>>, rx: Receiver<Vec<i32>>) -> Self {
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    pub fn push(&self, block: &[i32]) {
        if push_drop_oldest(&self.tx, &self.rx, block.to_vec()) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            // Logging every loss would flood the callback thread
            if total.is_power_of_two() {
                warn!("Input queue full, {} blocks dropped so far", total);
            }
        }
    }
}

/// Outputs of the decode worker.
#[derive(Clone)]
pub struct DecoderSinks {
    pub packets_tx: Sender<Vec<u8>>,
    pub packets_rx: Receiver<Vec<u8>>,
    pub errors: Signal<DecodeError>,
}

pub struct Decoder {
    worker: Option<JoinHandle<()>>,
}

impl Decoder {
    pub fn spawn(
        mut demodulator: Demodulator,
        blocks: Receiver<Vec<i32>>,
        sinks: DecoderSinks,
    ) -> Result<Self, PhyError> {
        let worker = thread::Builder::new()
            .name("phy-decoder".into())
            .spawn(move || {
                info!("Decoder worker started");
                // Ends once the audio callback, the only sender, is dropped
                for block in blocks.iter() {
                    for event in demodulator.process_samples(&block) {
                        match event {
                            DemodEvent::Packet(packet) => {
                                debug!("Delivering packet of {} bytes", packet.len());
                                if push_drop_oldest(&sinks.packets_tx, &sinks.packets_rx, packet) {
                                    warn!("Packet queue full, dropped the oldest packet");
                                }
                            }
                            DemodEvent::Error(err) => sinks.errors.notify(err),
                        }
                    }
                }
                info!("Decoder worker stopped");
            })?;
        Ok(Self {
            worker: Some(worker),
        })
    }

    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Decoder worker panicked");
            }
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_full_queue_drops_oldest_and_counts() {
        let (tx, rx) = bounded(2);
        let queue = InputQueue::new(tx, rx.clone());
        let dropped = queue.dropped_counter();
        queue.push(&[1]);
        queue.push(&[2]);
        queue.push(&[3]);
        queue.push(&[4]);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![vec![3], vec![4]]);
    }
}

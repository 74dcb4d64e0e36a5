// Output side of the physical layer: modulated packets wait in a bounded
// queue and the audio callback copies them into the device buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, trace};

use super::modulator::Modulator;
use crate::error::PhyError;

struct EncoderFrame {
    samples: Vec<i32>,
    position: usize,
    done: Sender<()>,
    cancelled: Arc<AtomicBool>,
}

impl EncoderFrame {
    fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

/// Completion handle of a queued transmission.
#[derive(Debug)]
pub struct SendHandle {
    done: Receiver<()>,
    cancelled: Arc<AtomicBool>,
}

impl SendHandle {
    /// Blocks until every sample has been handed to the device.
    pub fn wait(&self) -> Result<(), PhyError> {
        match self.done.recv() {
            Ok(()) => Ok(()),
            Err(_) if self.is_cancelled() => Err(PhyError::SendCancelled),
            Err(_) => Err(PhyError::Closed),
        }
    }

    /// Fires once when the transmission completes. Disconnects instead if the
    /// transmission is cancelled or the layer closes.
    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }

    /// Discards the remaining samples at the next callback.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Producer half, shared by every sender.
#[derive(Clone)]
pub struct Encoder {
    modulator: Modulator,
    queue: Sender<EncoderFrame>,
}

/// Consumer half, owned by the audio callback.
pub struct OutputWriter {
    queue: Receiver<EncoderFrame>,
    current: Option<EncoderFrame>,
}

pub fn output_channel(modulator: Modulator, capacity: usize) -> (Encoder, OutputWriter) {
    let (tx, rx) = bounded(capacity);
    (
        Encoder {
            modulator,
            queue: tx,
        },
        OutputWriter {
            queue: rx,
            current: None,
        },
    )
}

impl Encoder {
    /// Modulates `bytes` and queues the signal. Blocks only while the output
    /// queue is full.
    pub fn send_async(&self, bytes: &[u8]) -> Result<SendHandle, PhyError> {
        let samples = self.modulator.modulate(bytes)?;
        let (done_tx, done_rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        debug!(
            "Queueing {} bytes as {} samples",
            bytes.len(),
            samples.len()
        );
        self.queue
            .send(EncoderFrame {
                samples,
                position: 0,
                done: done_tx,
                cancelled: cancelled.clone(),
            })
            .map_err(|_| PhyError::Closed)?;
        Ok(SendHandle {
            done: done_rx,
            cancelled,
        })
    }

    pub fn modulator(&self) -> &Modulator {
        &self.modulator
    }
}

impl OutputWriter {
    /// Fills `output` from the queue, padding with silence.
    pub fn write(&mut self, output: &mut [i32]) {
        let mut written = 0;
        while written < output.len() {
            if self.current.is_none() {
                self.current = self.queue.try_recv().ok();
            }
            let Some(frame) = self.current.as_mut() else {
                break;
            };
            if frame.cancelled.load(Ordering::Acquire) {
                trace!("Dropping cancelled frame with {} samples left", frame.remaining());
                self.current = None;
                continue;
            }

            let n = (output.len() - written).min(frame.remaining());
            output[written..written + n]
                .copy_from_slice(&frame.samples[frame.position..frame.position + n]);
            frame.position += n;
            written += n;

            if frame.remaining() == 0 {
                let _ = frame.done.try_send(());
                self.current = None;
            }
        }
        output[written..].fill(0);
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhyConfig;
    use crate::phy::preamble::generate_preamble;

    fn channel() -> (Encoder, OutputWriter) {
        let config = PhyConfig::default();
        let preamble: Arc<[i32]> =
            generate_preamble(config.preamble.n, config.preamble_amplitude()).into();
        output_channel(Modulator::new(&config, preamble), 4)
    }

    #[test]
    fn test_frames_drain_in_order() {
        let (encoder, mut writer) = channel();
        let first = encoder.send_async(b"one").unwrap();
        let second = encoder.send_async(b"two").unwrap();
        let len = encoder.modulator().frame_samples(3);

        let mut played = Vec::new();
        let mut buffer = vec![0; 256];
        while played.len() < 3 * len {
            writer.write(&mut buffer);
            played.extend_from_slice(&buffer);
        }
        first.wait().unwrap();
        second.wait().unwrap();
        assert!(writer.is_idle());

        let expected_first = encoder.modulator().modulate(b"one").unwrap();
        let expected_second = encoder.modulator().modulate(b"two").unwrap();
        assert_eq!(&played[..len], &expected_first[..]);
        assert_eq!(&played[len..2 * len], &expected_second[..]);
        assert!(played[2 * len..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_cancel_discards_samples() {
        let (encoder, mut writer) = channel();
        let handle = encoder.send_async(b"cancel me").unwrap();
        let mut buffer = vec![0; 16];
        writer.write(&mut buffer);
        assert!(buffer.iter().any(|&s| s != 0));

        handle.cancel();
        writer.write(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0));
        assert!(matches!(handle.wait(), Err(PhyError::SendCancelled)));
    }

    #[test]
    fn test_idle_output_is_silence() {
        let (_encoder, mut writer) = channel();
        let mut buffer = vec![7; 32];
        writer.write(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0));
    }
}

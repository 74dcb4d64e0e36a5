use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{AudioCallback, Device};
use crate::error::DeviceError;
use crate::utils::consts::{DEVICE_BUFFER_SIZE, SAMPLE_RATE};

/// Feeds every output block back as the next input block.
pub struct Loopback {
    buffer_size: usize,
    sample_rate: Option<u32>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Loopback {
    /// Paced like a sound card at the default sample rate.
    pub fn new() -> Self {
        Self {
            buffer_size: DEVICE_BUFFER_SIZE,
            sample_rate: Some(SAMPLE_RATE),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Paces callbacks as a device running at `sample_rate` would.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Runs callbacks back to back.
    pub fn unpaced(mut self) -> Self {
        self.sample_rate = None;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Loopback {
    fn start(&mut self, mut callback: AudioCallback) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let buffer_size = self.buffer_size;
        let period = self
            .sample_rate
            .map(|rate| Duration::from_secs_f64(buffer_size as f64 / rate as f64));

        let worker = thread::Builder::new()
            .name("loopback".into())
            .spawn(move || {
                let mut input = vec![0i32; buffer_size];
                let mut output = vec![0i32; buffer_size];
                let mut next_tick = Instant::now();
                while running.load(Ordering::Acquire) {
                    callback(&input, &mut output);
                    std::mem::swap(&mut input, &mut output);
                    match period {
                        Some(period) => {
                            next_tick += period;
                            let now = Instant::now();
                            if next_tick > now {
                                thread::sleep(next_tick - now);
                            } else {
                                next_tick = now;
                            }
                        }
                        None => thread::yield_now(),
                    }
                }
                debug!("Loopback stopped");
            })?;
        self.worker = Some(worker);
        debug!("Loopback started ({} samples per block)", buffer_size);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Loopback thread panicked");
            }
        }
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.stop();
    }
}

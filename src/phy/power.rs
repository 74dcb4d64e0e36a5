use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::trace;

use crate::config::PowerMonitorConfig;
use crate::utils::fixed::Fixed;
use crate::utils::signal::Signal;

/// Cross-thread view of the channel state maintained by a [`PowerMonitor`].
#[derive(Debug, Clone)]
pub struct CarrierSense {
    busy: Arc<AtomicBool>,
    became_free: Signal<()>,
}

impl CarrierSense {
    fn new() -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            became_free: Signal::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn set_busy(&self, busy: bool) {
        let was_busy = self.busy.swap(busy, Ordering::AcqRel);
        if was_busy && !busy {
            self.became_free.notify(());
        }
    }

    /// Fires on every busy to free transition.
    pub fn not_busy(&self) -> &Receiver<()> {
        self.became_free.receiver()
    }

    /// Waits at most `timeout` for the channel to become idle and reports
    /// whether it is. The flag is re-read afterwards so a missed notification
    /// only costs one interval.
    pub fn wait_until_free(&self, timeout: Duration) -> bool {
        if self.is_busy() {
            let _ = self.became_free.wait_timeout(timeout);
        }
        !self.is_busy()
    }
}

/// Moving average of the input magnitude over a fixed window.
pub struct PowerMonitor {
    window: VecDeque<Fixed>,
    window_size: usize,
    sum: Fixed,
    power: Fixed,
    threshold: Fixed,
    carrier: CarrierSense,
}

impl PowerMonitor {
    pub fn new(config: &PowerMonitorConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window + 1),
            window_size: config.window,
            sum: Fixed::ZERO,
            power: Fixed::ZERO,
            threshold: Fixed::from_f64(config.threshold),
            carrier: CarrierSense::new(),
        }
    }

    pub fn carrier(&self) -> CarrierSense {
        self.carrier.clone()
    }

    /// Slides the window over `samples`. `power` becomes the highest window
    /// average seen during this block.
    pub fn update(&mut self, samples: &[i32]) {
        let mut peak = Fixed::ZERO;
        for &sample in samples {
            let magnitude = Fixed::from_sample(sample).abs();
            self.window.push_back(magnitude);
            self.sum += magnitude;
            if self.window.len() > self.window_size {
                if let Some(oldest) = self.window.pop_front() {
                    self.sum -= oldest;
                }
            }
            if self.sum > peak {
                peak = self.sum;
            }
        }
        if samples.is_empty() {
            return;
        }

        self.power = peak / Fixed::from_int(self.window_size as i32);
        let busy = self.power > self.threshold;
        if busy != self.carrier.is_busy() {
            trace!("Channel {} (power {})", if busy { "busy" } else { "free" }, self.power);
        }
        self.carrier.set_busy(busy);
    }

    pub fn power(&self) -> Fixed {
        self.power
    }

    pub fn is_busy(&self) -> bool {
        self.power > self.threshold
    }
}

//! Simulated shared medium.
//!
//! Every node listens on one bus and talks on one bus. Each tick the driver
//! thread calls every running node with the mix of the previous tick, then
//! sums the new outputs (saturating) into the buses for the next tick. Nodes
//! that share a bus hear each other and themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{AudioCallback, Device};
use crate::error::DeviceError;
use crate::utils::consts::DEVICE_BUFFER_SIZE;

/// Rewrites a node's output before it reaches the bus: `(node, block)`.
pub type Tap = Box<dyn FnMut(usize, &mut [i32]) + Send + 'static>;

#[derive(Debug, Clone, Copy)]
struct Link {
    input_bus: usize,
    output_bus: usize,
}

struct HubState {
    callbacks: Vec<Option<AudioCallback>>,
    tap: Option<Tap>,
    driver: Option<JoinHandle<()>>,
}

struct Hub {
    links: Vec<Link>,
    bus_count: usize,
    buffer_size: usize,
    period: Option<Duration>,
    state: Mutex<HubState>,
    running: AtomicBool,
}

impl Hub {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn drive(self: Arc<Self>) {
        let mut buses = vec![vec![0i32; self.buffer_size]; self.bus_count];
        let mut outputs = vec![vec![0i32; self.buffer_size]; self.links.len()];
        let mut next_tick = Instant::now();

        while self.running.load(Ordering::Acquire) {
            {
                let mut state = self.lock();
                let HubState { callbacks, tap, .. } = &mut *state;
                for (node, link) in self.links.iter().enumerate() {
                    match callbacks[node].as_mut() {
                        Some(callback) => callback(&buses[link.input_bus], &mut outputs[node]),
                        None => outputs[node].fill(0),
                    }
                    if let Some(tap) = tap.as_mut() {
                        tap(node, &mut outputs[node]);
                    }
                }
            }

            for bus in buses.iter_mut() {
                bus.fill(0);
            }
            for (node, link) in self.links.iter().enumerate() {
                let bus = &mut buses[link.output_bus];
                for (mixed, &sample) in bus.iter_mut().zip(&outputs[node]) {
                    *mixed = mixed.saturating_add(sample);
                }
            }

            match self.period {
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
        debug!("Network driver stopped");
    }
}

/// Builder for a simulated medium.
pub struct Network {
    links: Vec<Link>,
    buffer_size: usize,
    sample_rate: Option<u32>,
    tap: Option<Tap>,
}

impl Network {
    /// One `(input_bus, output_bus)` pair per node.
    pub fn new(links: &[(usize, usize)]) -> Self {
        Self {
            links: links
                .iter()
                .map(|&(input_bus, output_bus)| Link {
                    input_bus,
                    output_bus,
                })
                .collect(),
            buffer_size: DEVICE_BUFFER_SIZE,
            sample_rate: None,
            tap: None,
        }
    }

    /// Every node on a single shared bus.
    pub fn shared_bus(nodes: usize) -> Self {
        Self::new(&vec![(0, 0); nodes])
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_tap(mut self, tap: Tap) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn build(self) -> Vec<NetworkNode> {
        let bus_count = self
            .links
            .iter()
            .map(|l| l.input_bus.max(l.output_bus) + 1)
            .max()
            .unwrap_or(0);
        let period = self
            .sample_rate
            .map(|rate| Duration::from_secs_f64(self.buffer_size as f64 / rate as f64));
        let nodes = self.links.len();
        let hub = Arc::new(Hub {
            links: self.links,
            bus_count,
            buffer_size: self.buffer_size,
            period,
            state: Mutex::new(HubState {
                callbacks: (0..nodes).map(|_| None).collect(),
                tap: self.tap,
                driver: None,
            }),
            running: AtomicBool::new(false),
        });
        (0..nodes)
            .map(|index| NetworkNode {
                index,
                hub: hub.clone(),
            })
            .collect()
    }
}

/// One attachment point of a [`Network`].
pub struct NetworkNode {
    index: usize,
    hub: Arc<Hub>,
}

impl NetworkNode {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Device for NetworkNode {
    fn start(&mut self, callback: AudioCallback) -> Result<(), DeviceError> {
        let mut state = self.hub.lock();
        if state.callbacks[self.index].is_some() {
            return Err(DeviceError::AlreadyStarted);
        }
        state.callbacks[self.index] = Some(callback);

        if state.driver.is_none() {
            self.hub.running.store(true, Ordering::Release);
            let hub = self.hub.clone();
            let driver = thread::Builder::new()
                .name("network".into())
                .spawn(move || hub.drive())?;
            state.driver = Some(driver);
        }
        debug!("Network node {} started", self.index);
        Ok(())
    }

    fn stop(&mut self) {
        let (callback, driver) = {
            let mut state = self.hub.lock();
            let callback = state.callbacks[self.index].take();
            let idle = state.callbacks.iter().all(Option::is_none);
            let driver = if idle {
                self.hub.running.store(false, Ordering::Release);
                state.driver.take()
            } else {
                None
            };
            (callback, driver)
        };
        // Dropped outside the lock: the callback may own channel endpoints
        // whose disconnection wakes other threads.
        drop(callback);
        if let Some(driver) = driver {
            if driver.join().is_err() {
                warn!("Network driver panicked");
            }
        }
    }
}

impl Drop for NetworkNode {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_nodes_hear_the_mix() {
        let mut nodes = Network::shared_bus(2).with_buffer_size(4).build();
        let (tx, rx) = unbounded();
        nodes[0]
            .start(Box::new(|_: &[i32], output: &mut [i32]| output.fill(i32::MAX)))
            .unwrap();
        nodes[1]
            .start(Box::new(move |input: &[i32], output: &mut [i32]| {
                output.fill(5);
                let _ = tx.send(input.to_vec());
            }))
            .unwrap();

        // Node 0 alone in the first tick, then both saturate the bus
        let heard = rx
            .iter()
            .find(|block| block.iter().all(|&s| s == i32::MAX));
        assert!(heard.is_some());
        for node in nodes.iter_mut() {
            node.stop();
        }
    }

    #[test]
    fn test_separate_buses() {
        // Node 0 talks on bus 1, node 1 listens on bus 1 and talks on bus 2
        let mut nodes = Network::new(&[(0, 1), (1, 2)]).with_buffer_size(2).build();
        let (tx, rx) = unbounded();
        let (tx0, rx0) = unbounded();
        nodes[0]
            .start(Box::new(move |input: &[i32], output: &mut [i32]| {
                output.fill(3);
                let _ = tx0.send(input.to_vec());
            }))
            .unwrap();
        nodes[1]
            .start(Box::new(move |input: &[i32], output: &mut [i32]| {
                output.fill(9);
                let _ = tx.send(input.to_vec());
            }))
            .unwrap();

        assert!(rx.iter().any(|block| block == vec![3, 3]));
        // Node 0 listens on bus 0, where nobody talks
        assert!(rx0.iter().take(20).all(|block| block == vec![0, 0]));
        drop(nodes);
    }

    #[test]
    fn test_tap_rewrites_output() {
        let mut nodes = Network::shared_bus(1)
            .with_buffer_size(2)
            .with_tap(Box::new(|_: usize, block: &mut [i32]| block.fill(-1)))
            .build();
        let (tx, rx) = unbounded();
        nodes[0]
            .start(Box::new(move |input: &[i32], output: &mut [i32]| {
                output.fill(100);
                let _ = tx.send(input.to_vec());
            }))
            .unwrap();
        assert!(rx.iter().any(|block| block == vec![-1, -1]));
        nodes[0].stop();
    }
}

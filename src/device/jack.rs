use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use jack;
use tracing::{debug, error, info, warn};

use super::{AudioCallback, Device, pcm_from_f32, pcm_to_f32};
use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::utils::consts::{INPUT_PORT_NAME, OUTPUT_PORT_NAME};

pub fn print_jack_info(client: &jack::Client) -> (usize, usize) {
    let sample_rate = client.sample_rate();
    let buffer_size = client.buffer_size();
    info!("JACK Server Info:");
    info!("  Sample Rate: {} Hz", sample_rate);
    info!("  Buffer Size: {} samples", buffer_size);
    info!(
        "  Buffer Duration: {:.2} ms",
        (buffer_size as f64 / sample_rate as f64) * 1000.0
    );
    (sample_rate as usize, buffer_size as usize)
}

pub fn connect_system_ports(client: &jack::Client, in_port_name: &str, out_port_name: &str) {
    let system_input_ports = client.ports(
        None,
        None,
        jack::PortFlags::IS_INPUT | jack::PortFlags::IS_PHYSICAL,
    );

    let system_output_ports = client.ports(
        None,
        None,
        jack::PortFlags::IS_OUTPUT | jack::PortFlags::IS_PHYSICAL,
    );

    debug!("{} physical inputs found.", system_input_ports.len());
    debug!("{} physical outputs found.", system_output_ports.len());

    if let Some(system_out) = system_output_ports.first() {
        match client.connect_ports_by_name(system_out, in_port_name) {
            Ok(_) => info!("Connected Input: {} -> {}", system_out, in_port_name),
            Err(e) => error!("Failed connecting Input {} -> {}: {}", system_out, in_port_name, e),
        }
    }

    if let Some(system_in) = system_input_ports.first() {
        match client.connect_ports_by_name(out_port_name, system_in) {
            Ok(_) => info!("Connected Output: {} -> {}", out_port_name, system_in),
            Err(e) => error!("Failed connecting Output {} -> {}: {}", out_port_name, system_in, e),
        }
    }

    if system_output_ports.is_empty() || system_input_ports.is_empty() {
        warn!("Missing input / output");
    }
}

/// Sound card through a JACK server. The client lives on its own thread for
/// as long as the device runs.
pub struct JackDevice {
    client_name: String,
    sample_rate: u32,
    connect_ports: bool,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl JackDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            sample_rate: config.sample_rate,
            connect_ports: config.connect_system_ports,
            stop: None,
            worker: None,
        }
    }
}

fn backend(err: jack::Error) -> DeviceError {
    DeviceError::Backend(err.to_string())
}

impl Device for JackDevice {
    fn start(&mut self, mut callback: AudioCallback) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let client_name = self.client_name.clone();
        let expected_rate = self.sample_rate;
        let connect_ports = self.connect_ports;

        let worker = thread::Builder::new()
            .name("jack-device".into())
            .spawn(move || {
                let (client, status) =
                    match jack::Client::new(&client_name, jack::ClientOptions::NO_START_SERVER) {
                        Ok(pair) => pair,
                        Err(e) => {
                            let _ = ready_tx.send(Err(backend(e)));
                            return;
                        }
                    };
                debug!("JACK client status: {:?}", status);
                let (sample_rate, _) = print_jack_info(&client);
                if sample_rate != expected_rate as usize {
                    warn!(
                        "JACK runs at {} Hz, configuration expects {} Hz",
                        sample_rate, expected_rate
                    );
                }

                let ports = client
                    .register_port(INPUT_PORT_NAME, jack::AudioIn::default())
                    .and_then(|input| {
                        client
                            .register_port(OUTPUT_PORT_NAME, jack::AudioOut::default())
                            .map(|output| (input, output))
                    });
                let (in_port, mut out_port) = match ports {
                    Ok(ports) => ports,
                    Err(e) => {
                        let _ = ready_tx.send(Err(backend(e)));
                        return;
                    }
                };
                let in_port_name = in_port.name().unwrap_or_default();
                let out_port_name = out_port.name().unwrap_or_default();

                let buffer_size = client.buffer_size() as usize;
                let mut input = vec![0i32; buffer_size];
                let mut output = vec![0i32; buffer_size];

                let process_cb =
                    move |_: &jack::Client, ps: &jack::ProcessScope| -> jack::Control {
                        let in_buffer = in_port.as_slice(ps);
                        let out_buffer = out_port.as_mut_slice(ps);
                        if input.len() != in_buffer.len() {
                            input.resize(in_buffer.len(), 0);
                            output.resize(out_buffer.len(), 0);
                        }

                        for (dst, &src) in input.iter_mut().zip(in_buffer) {
                            *dst = pcm_from_f32(src);
                        }
                        callback(&input, &mut output);
                        for (dst, &src) in out_buffer.iter_mut().zip(&output) {
                            *dst = pcm_to_f32(src);
                        }
                        jack::Control::Continue
                    };
                let process = jack::contrib::ClosureProcessHandler::new(process_cb);

                let active_client = match client.activate_async((), process) {
                    Ok(active) => active,
                    Err(e) => {
                        let _ = ready_tx.send(Err(backend(e)));
                        return;
                    }
                };
                if connect_ports {
                    connect_system_ports(active_client.as_client(), &in_port_name, &out_port_name);
                }
                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                if let Err(e) = active_client.deactivate() {
                    error!("Failed to deactivate JACK client: {}", e);
                }
                info!("JACK client closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop = Some(stop_tx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(DeviceError::Backend("JACK thread exited during setup".into()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("JACK device thread panicked");
            }
        }
    }
}

impl Drop for JackDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

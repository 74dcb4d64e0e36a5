use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use aether_link::config::Config;
use aether_link::device::{Device, JackDevice, Loopback};
use aether_link::mac::MacLayer;
use aether_link::phy::preamble::generate_preamble;
use aether_link::phy::{DemodEvent, Demodulator, Modulator, PhysicalLayer};
use aether_link::ui::progress::{ProgressManager, templates};
use aether_link::ui::{describe, print_banner};
use aether_link::utils::consts::PROGRESS_UPDATE_INTERVAL_MS;
use aether_link::utils::logging::init_logging;
use aether_link::utils::wav::{peak_level, read_wav, write_wav};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration, defaults apply to missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `mac.address`
    #[arg(short, long, global = true)]
    address: Option<u8>,

    /// Use an in-process loopback instead of the sound card
    #[arg(long, global = true)]
    loopback: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file or a text message to another node
    Send {
        #[arg(short, long)]
        to: u8,
        #[arg(short, long, conflicts_with = "text")]
        input: Option<PathBuf>,
        #[arg(long)]
        text: Option<String>,
        /// Bytes per MAC send, each acknowledged frame by frame
        #[arg(long, default_value_t = 1000)]
        chunk: usize,
    },
    /// Print or store incoming packets until Ctrl+C or the timeout
    Receive {
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        timeout_secs: u64,
        /// Stop after this many packets
        #[arg(long)]
        count: Option<usize>,
    },
    /// Render a payload to a WAV file without touching the sound card
    Modulate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decode packets from a WAV recording
    Demodulate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(address) = cli.address {
        config.mac.address = address;
    }
    config.validate()?;
    Ok(config)
}

fn open_mac(cli: &Cli, config: &Config) -> Result<MacLayer> {
    let device: Box<dyn Device> = if cli.loopback {
        Box::new(Loopback::new().with_sample_rate(config.device.sample_rate))
    } else {
        Box::new(JackDevice::new(&config.device))
    };
    let phy = PhysicalLayer::open(&config.phy, device).context("opening physical layer")?;
    Ok(MacLayer::open(&config.mac, phy)?)
}

fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;
    Ok(running)
}

fn run_send(mac: &MacLayer, to: u8, payload: &[u8], chunk: usize) -> Result<()> {
    if payload.is_empty() {
        warn!("Nothing to send");
        return Ok(());
    }
    let progress = ProgressManager::new();
    progress
        .create_bar("send", payload.len() as u64, templates::SENDER, &format!("to {}", to))
        .map_err(anyhow::Error::msg)?;

    let start = Instant::now();
    for part in payload.chunks(chunk.max(1)) {
        if let Err(e) = mac.send(to, part) {
            let _ = progress.set_message("send", "failed");
            progress.finish_all();
            return Err(e).context(format!("sending to {}", to));
        }
        let _ = progress.inc("send", part.len() as u64);
    }
    let elapsed = start.elapsed().as_secs_f64();
    let _ = progress.finish(
        "send",
        &format!("{:.0} bit/s", payload.len() as f64 * 8.0 / elapsed.max(1e-3)),
    );
    info!("Sent {} bytes to {} in {:.2} s", payload.len(), to, elapsed);
    Ok(())
}

fn run_receive(
    mac: &MacLayer,
    output: Option<PathBuf>,
    timeout: Option<Duration>,
    count: Option<usize>,
) -> Result<()> {
    let running = interrupt_flag()?;
    let progress = ProgressManager::new();
    progress
        .create_bar("receive", 0, templates::RECEIVER, "listening")
        .map_err(anyhow::Error::msg)?;

    let start = Instant::now();
    let mut received = Vec::new();
    let mut packets = 0;
    while running.load(Ordering::SeqCst) {
        if timeout.is_some_and(|t| start.elapsed() > t) {
            info!("Receive timeout reached");
            break;
        }
        let Some(packet) = mac.receive_timeout(Duration::from_millis(PROGRESS_UPDATE_INTERVAL_MS))? else {
            continue;
        };
        packets += 1;
        let _ = progress.increase_length("receive", packet.len() as u64);
        let _ = progress.inc("receive", packet.len() as u64);
        let _ = progress.set_message("receive", &format!("{} packets", packets));
        if output.is_none() {
            println!("{}", String::from_utf8_lossy(&packet));
        }
        received.extend_from_slice(&packet);
        if count.is_some_and(|n| packets >= n) {
            break;
        }
    }
    progress.finish_all();

    if let Some(path) = output {
        fs::write(&path, &received).with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {} bytes to {}", received.len(), path.display());
    }
    let dropped = mac.phy().dropped_input_blocks();
    if dropped > 0 {
        warn!("{} input blocks were dropped while receiving", dropped);
    }
    Ok(())
}

fn run_modulate(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let payload = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let preamble = generate_preamble(config.phy.preamble.n, config.phy.preamble_amplitude());
    let modulator = Modulator::new(&config.phy, preamble.into());
    let samples = modulator.modulate(&payload)?;
    write_wav(output, &samples, config.device.sample_rate)?;
    info!(
        "{} bytes in {} frames",
        payload.len(),
        modulator.frame_count(payload.len())
    );
    Ok(())
}

fn run_demodulate(config: &Config, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let (samples, sample_rate) = read_wav(input)?;
    if sample_rate != config.device.sample_rate {
        warn!(
            "Recording is {} Hz, configuration expects {} Hz",
            sample_rate, config.device.sample_rate
        );
    }
    info!(
        "Read {} samples, peak level {:.3}",
        samples.len(),
        peak_level(&samples)
    );

    let preamble = generate_preamble(config.phy.preamble.n, config.phy.preamble_amplitude());
    let mut demodulator = Demodulator::new(&config.phy, preamble.into());
    let mut decoded = Vec::new();
    let mut errors = 0;
    for event in demodulator.process_samples(&samples) {
        match event {
            DemodEvent::Packet(packet) => {
                info!("Packet of {} bytes", packet.len());
                decoded.extend_from_slice(&packet);
            }
            DemodEvent::Error(e) => {
                errors += 1;
                warn!("Decode error: {}", e);
            }
        }
    }
    info!("Decoded {} bytes, {} errors", decoded.len(), errors);

    match output {
        Some(path) => fs::write(&path, &decoded)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{}", String::from_utf8_lossy(&decoded)),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    match &cli.command {
        Commands::Send {
            to,
            input,
            text,
            chunk,
        } => {
            let payload = match (input, text) {
                (Some(path), _) => {
                    fs::read(path).with_context(|| format!("reading {}", path.display()))?
                }
                (None, Some(text)) => text.clone().into_bytes(),
                (None, None) => bail!("either --input or --text is required"),
            };
            info!("{}", describe(&config));
            let mac = open_mac(&cli, &config)?;
            let result = run_send(&mac, *to, &payload, *chunk);
            mac.close();
            result
        }
        Commands::Receive {
            output,
            timeout_secs,
            count,
        } => {
            info!("{}", describe(&config));
            let mac = open_mac(&cli, &config)?;
            let timeout = (*timeout_secs > 0).then(|| Duration::from_secs(*timeout_secs));
            let result = run_receive(&mac, output.clone(), timeout, *count);
            mac.close();
            result
        }
        Commands::Modulate { input, output } => run_modulate(&config, input, output),
        Commands::Demodulate { input, output } => run_demodulate(&config, input, output.clone()),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn main() {
    init_logging();
    print_banner();
    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

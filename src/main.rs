use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};

use sonolink::acoustic::io::{read_wav, write_wav};
use sonolink::audio::{AudioPort, LoopbackMedium};
use sonolink::device::jack as jack_device;
use sonolink::mac::{Mac, MacEvent};
use sonolink::phy::{FrameEncoder, ReceiveEvent, Receiver};
use sonolink::utils::logging::init_logging;
use sonolink::utils::split_payloads;
use sonolink::{LinkConfig, LinkContext, Result};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON link configuration; defaults are used for missing keys
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the configured log level (RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message or file to another node over JACK
    Send {
        #[arg(short, long, default_value_t = 1)]
        address: u8,
        #[arg(short, long, default_value_t = 2)]
        dest: u8,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Receive and print payloads addressed to this node until Ctrl-C
    Listen {
        #[arg(short, long, default_value_t = 2)]
        address: u8,
    },
    /// Render frames to a WAV file instead of playing them
    Dump {
        #[arg(short, long)]
        message: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Silence before the first frame, in milliseconds
        #[arg(long, default_value_t = 100)]
        lead_ms: u32,
    },
    /// Decode every frame in a WAV recording
    Decode {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Run two nodes over an in-memory medium and exchange payloads
    Loopback {
        #[arg(short, long, default_value_t = 4)]
        count: usize,
        /// Noise amplitude added by the medium
        #[arg(long, default_value_t = 0.0)]
        noise: f32,
    },
}

fn print_banner() {
    println!("sonolink {}", env!("CARGO_PKG_VERSION"));
}

fn load_config(path: Option<&PathBuf>) -> Result<LinkConfig> {
    match path {
        Some(path) => LinkConfig::from_json_file(path),
        None => Ok(LinkConfig::default()),
    }
}

fn install_ctrlc() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }
    running
}

fn message_bytes(message: Option<String>, input: Option<PathBuf>) -> Result<Vec<u8>> {
    match (message, input) {
        (_, Some(path)) => Ok(std::fs::read(path)?),
        (Some(message), None) => Ok(message.into_bytes()),
        (None, None) => Ok(b"Hello from sonolink".to_vec()),
    }
}

fn send(
    context: Arc<LinkContext>,
    address: u8,
    dest: u8,
    data: Vec<u8>,
) -> Result<()> {
    let device = jack_device::open(context.config())?;
    let payloads = split_payloads(&data, context.config().payload_bytes);
    info!(
        "Sending {} bytes to {} in {} frames",
        data.len(),
        dest,
        payloads.len()
    );

    let mut mac = Mac::new(context, address, device.port());
    let events = mac.events();
    let start = Instant::now();
    let mut result = Ok(());
    for (i, payload) in payloads.iter().enumerate() {
        if let Err(e) = mac.add_data(dest, payload) {
            error!("Frame {} failed: {}", i, e);
            result = Err(e);
            break;
        }
        info!("Frame {}/{} acknowledged", i + 1, payloads.len());
        for event in events.try_iter() {
            debug!("{:?}", event);
        }
    }
    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Done in {:.2} s ({:.1} bit/s)",
        elapsed,
        data.len() as f64 * 8.0 / elapsed.max(f64::EPSILON)
    );

    mac.shutdown();
    device.close()?;
    result
}

fn listen(context: Arc<LinkContext>, address: u8) -> Result<()> {
    let device = jack_device::open(context.config())?;
    let running = install_ctrlc();
    let mut mac = Mac::new(context, address, device.port());
    let events = mac.events();
    info!("Node {} listening, Ctrl-C to stop", mac.address());

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(MacEvent::DataAvailable { src, payload }) => {
                println!("[{}] {}", src, String::from_utf8_lossy(&payload));
            }
            Ok(MacEvent::AckReceived { src }) => info!("Ack from {}", src),
            Ok(MacEvent::DispatchFailed(e)) => warn!("Dispatch failed: {}", e),
            Err(_) => {}
        }
    }

    mac.shutdown();
    device.close()
}

fn dump(context: Arc<LinkContext>, message: String, output: PathBuf, lead_ms: u32) -> Result<()> {
    let config = context.config();
    let mut encoder = FrameEncoder::new(&context);
    let mut track = vec![0.0; config.sample_rate as usize * lead_ms as usize / 1000];
    for payload in split_payloads(message.as_bytes(), config.payload_bytes) {
        track.extend(encoder.encode(&payload)?);
    }
    write_wav(&track, config.sample_rate, &output)?;
    info!("Wrote {} samples to {}", track.len(), output.display());
    Ok(())
}

fn decode(context: Arc<LinkContext>, input: PathBuf) -> Result<()> {
    let (samples, sample_rate) = read_wav(&input)?;
    if sample_rate != context.config().sample_rate {
        warn!(
            "{} is sampled at {} Hz, the link expects {} Hz",
            input.display(),
            sample_rate,
            context.config().sample_rate
        );
    }

    let (port, _, _) = AudioPort::detached();
    let receiver = Receiver::new(&context, port.source);
    let events = receiver.events();
    receiver.start_receive();
    receiver.push_samples(&samples);
    // flush the detector and the last symbols
    receiver.push_samples(&vec![0.0; context.config().sample_rate as usize / 10]);
    receiver.stop_receive();

    let mut frames = 0;
    for event in events.try_iter() {
        match event {
            ReceiveEvent::PacketDetected { position } => info!("Preamble ends at sample {}", position),
            ReceiveEvent::DataAvailable { payload, crc_ok } => {
                frames += 1;
                let mark = if crc_ok { "ok" } else { "CRC FAIL" };
                println!("[{}] {}", mark, String::from_utf8_lossy(&payload));
            }
        }
    }
    info!("{} frames decoded", frames);
    Ok(())
}

fn loopback(context: Arc<LinkContext>, count: usize, noise: f32) -> Result<()> {
    let medium = LoopbackMedium::new(2, 512, Duration::from_millis(2)).with_noise(noise, 1);
    let mut alice = Mac::new(context.clone(), 1, medium.port(0));
    let mut bob = Mac::new(context.clone(), 2, medium.port(1));
    let outbox = alice.events();
    let inbox = bob.events();
    medium.start();

    let payload_bytes = context.config().payload_bytes;
    let start = Instant::now();
    let mut result = Ok(());
    let mut delivered = 0;
    let mut count_delivered = || {
        delivered += inbox
            .try_iter()
            .filter(|event| matches!(event, MacEvent::DataAvailable { .. }))
            .count();
        outbox.try_iter().for_each(drop);
    };
    for i in 0..count {
        let payload: Vec<u8> = (0..payload_bytes).map(|j| (i + j) as u8).collect();
        if let Err(e) = alice.add_data(2, &payload) {
            error!("Payload {} failed: {}", i, e);
            result = Err(e);
            break;
        }
        count_delivered();
    }
    info!(
        "{} of {} payloads delivered in {:.2} s",
        delivered,
        count,
        start.elapsed().as_secs_f64()
    );

    alice.shutdown();
    bob.shutdown();
    medium.stop();
    result
}

fn main() {
    let cli = Cli::parse();
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
    print_banner();

    let context = match LinkContext::new(config) {
        Ok(context) => context,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Send {
            address,
            dest,
            message,
            input,
        } => message_bytes(message, input).and_then(|data| send(context, address, dest, data)),
        Commands::Listen { address } => listen(context, address),
        Commands::Dump {
            message,
            output,
            lead_ms,
        } => dump(context, message, output, lead_ms),
        Commands::Decode { input } => decode(context, input),
        Commands::Loopback { count, noise } => loopback(context, count, noise),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

//! aaudio-share CLI

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use clap::Parser;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aaudio_share::binding::Parcel;
use aaudio_share::client::ClientEndpoint;
use aaudio_share::config::{Args, Command};
use aaudio_share::device::{ExclusiveStream, SimulatedStream};
use aaudio_share::error::to_result_code;
use aaudio_share::service::{
    parse_direction, parse_format, ClientSection, EndpointManager, ServiceConfig, SharedStream,
};
use aaudio_share::stream::{AudioClient, Direction, SharingMode, StreamParameters, StreamRequest};

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.as_ref().unwrap_or(&Command::default()) {
        Command::Run {
            config,
            seconds,
            clients,
        } => {
            let config = load_config(config.as_ref())?;
            init_logging(&args, Some(&config))?;
            cmd_run(&config, *seconds, *clients)
        }
        Command::SampleConfig => {
            print!("{}", ServiceConfig::sample_config());
            Ok(())
        }
        Command::Validate {
            channels,
            rate,
            format,
            direction,
            sharing,
            device,
            capacity,
        } => {
            init_logging(&args, None)?;
            cmd_validate(*channels, *rate, format, direction, sharing, *device, *capacity)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ServiceConfig> {
    let config = match path {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::load_default()?,
    };
    Ok(config)
}

fn init_logging(args: &Args, config: Option<&ServiceConfig>) -> Result<()> {
    // Command line flags win over the config file.
    let level = match config {
        Some(config) if args.verbose == 0 && !args.quiet => config.log_level.clone(),
        _ => args.log_level().to_string(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args.log.clone().or_else(|| {
        config
            .map(|c| c.log_file.clone())
            .filter(|path| !path.is_empty())
    });

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)
            .with_context(|| format!("creating log file {}", log_file))?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Summary a client thread hands back when it finishes
struct ClientReport {
    frames: u64,
    /// Loudest captured sample; stays 0 for output clients
    peak: f32,
    endpoint: ClientEndpoint,
}

/// Run demo clients against a simulated device
fn cmd_run(config: &ServiceConfig, seconds: u64, default_clients: usize) -> Result<()> {
    println!("aaudio-share - shared audio endpoint\n");

    let device_config = config.to_device_config()?;
    let devices: Arc<Mutex<Vec<Arc<SimulatedStream>>>> = Arc::new(Mutex::new(Vec::new()));
    let factory_devices = devices.clone();
    let manager = EndpointManager::new(
        config.to_endpoint_config(),
        Box::new(move |_request: &StreamRequest| {
            let device = Arc::new(SimulatedStream::new(device_config.clone()));
            factory_devices.lock().push(device.clone());
            let device: Arc<dyn ExclusiveStream> = device;
            Ok(device)
        }),
    );

    let client_sections = if config.clients.is_empty() {
        (0..default_clients)
            .map(|i| ClientSection {
                tone_hz: 440.0 * (i + 1) as f32,
                ..ClientSection::default()
            })
            .collect()
    } else {
        config.clients.clone()
    };
    if client_sections.is_empty() {
        bail!("no clients to run");
    }

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }

    let mut streams: Vec<Arc<SharedStream>> = Vec::new();
    let mut workers: Vec<JoinHandle<ClientReport>> = Vec::new();

    for (index, section) in client_sections.iter().enumerate() {
        let direction = section.direction()?;
        let mut parameters = StreamParameters::new();
        parameters
            .set_device_id(config.device.device_id)
            .set_direction(direction)
            .set_samples_per_frame(section.channels)
            .set_sharing_mode(SharingMode::SHARED)
            .set_buffer_capacity(section.buffer_capacity_frames);
        let request = StreamRequest::new(
            parameters,
            AudioClient::new(std::process::id() as i32, index as i32, format!("client-{}", index)),
        );

        let stream = manager
            .open_stream(&request)
            .with_context(|| format!("opening client {}", index))?;

        // Hand the descriptor across the transport as a peer process would.
        let mut parcel = Parcel::new();
        stream.endpoint_parcelable()?.write_to_parcel(&mut parcel);
        let endpoint = ClientEndpoint::connect(&mut parcel, direction)?;

        stream.start()?;
        println!(
            "Client {}: {} capacity {} frames",
            index,
            stream.parameters(),
            endpoint.buffer_capacity()
        );

        let channels = stream.parameters().samples_per_frame() as usize;
        let sample_rate = stream.parameters().sample_rate() as f32;
        let tone_hz = section.tone_hz;
        let worker_running = running.clone();
        workers.push(thread::spawn(move || {
            client_thread(endpoint, channels, sample_rate, tone_hz, worker_running)
        }));
        streams.push(stream);
    }

    println!("\nRunning for {}s. Press Ctrl+C to stop.\n", seconds);
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }
    running.store(false, Ordering::SeqCst);

    for (index, (worker, stream)) in workers.into_iter().zip(streams.iter()).enumerate() {
        match worker.join() {
            Ok(mut report) => {
                println!(
                    "Client {}: {} frames, peak {:.2}, underruns {}, overruns {}, last position {:?}",
                    index,
                    report.frames,
                    report.peak,
                    stream.underrun_frames(),
                    stream.overrun_frames(),
                    report.endpoint.last_timestamp().map(|t| t.position)
                );
                if let Err(e) = report.endpoint.close() {
                    warn!("Client {} close failed: {}", index, e);
                }
            }
            Err(_) => error!("Client {} thread panicked", index),
        }
    }

    for stream in &streams {
        if let Ok(position) = stream.endpoint().free_running_position() {
            info!(
                "Endpoint {} position {} at {}ns",
                stream.endpoint().device_id(),
                position.position,
                position.nanos
            );
        }
        manager.close_stream(stream)?;
    }

    for device in devices.lock().iter() {
        println!(
            "Device {}: {} frames, started {}x, stopped {}x",
            device.config().device_id,
            device.frames_transferred(),
            device.start_count(),
            device.stop_count()
        );
    }

    println!("Stopped.");
    Ok(())
}

fn client_thread(
    mut endpoint: ClientEndpoint,
    channels: usize,
    sample_rate: f32,
    tone_hz: f32,
    running: Arc<AtomicBool>,
) -> ClientReport {
    let burst = endpoint.frames_per_burst().max(1) as usize;
    let mut buffer = vec![0u8; burst * channels * 4];
    let mut frames: u64 = 0;
    let mut peak = 0.0f32;

    while running.load(Ordering::Relaxed) {
        if let Err(e) = endpoint.process_messages() {
            warn!("Bad service message: {}", e);
        }
        if endpoint.is_disconnected() {
            break;
        }

        if endpoint.direction() == Direction::OUTPUT {
            while endpoint.empty_frames_available() as usize >= burst {
                for (i, frame) in buffer.chunks_exact_mut(channels * 4).enumerate() {
                    let t = (frames + i as u64) as f32 / sample_rate;
                    let value = 0.2 * (t * tone_hz * std::f32::consts::TAU).sin();
                    for sample in frame.chunks_exact_mut(4) {
                        LittleEndian::write_f32(sample, value);
                    }
                }
                match endpoint.write(&buffer) {
                    Ok(written) => frames += written as u64,
                    Err(_) => break,
                }
            }
        } else {
            while let Ok(read) = endpoint.read(&mut buffer) {
                if read == 0 {
                    break;
                }
                frames += read as u64;
                peak = buffer[..read as usize * channels * 4]
                    .chunks_exact(4)
                    .map(|s| LittleEndian::read_f32(s).abs())
                    .fold(peak, f32::max);
            }
        }

        thread::sleep(Duration::from_millis(2));
    }

    ClientReport {
        frames,
        peak,
        endpoint,
    }
}

/// Validate stream parameters and print the result code
fn cmd_validate(
    channels: i32,
    rate: i32,
    format: &str,
    direction: &str,
    sharing: &str,
    device: i32,
    capacity: i32,
) -> Result<()> {
    let sharing_mode = match sharing.to_ascii_lowercase().as_str() {
        "shared" => SharingMode::SHARED,
        "exclusive" => SharingMode::EXCLUSIVE,
        other => bail!("unknown sharing mode '{}'", other),
    };

    let mut parameters = StreamParameters::new();
    parameters
        .set_samples_per_frame(channels)
        .set_sample_rate(rate)
        .set_format(parse_format(format)?)
        .set_direction(parse_direction(direction)?)
        .set_sharing_mode(sharing_mode)
        .set_device_id(device)
        .set_buffer_capacity(capacity);

    let result = parameters.validate();
    match &result {
        Ok(()) => println!("{}: OK", parameters),
        Err(e) => println!("{}: {}", parameters, e),
    }
    println!("result code {}", to_result_code(&result));
    Ok(())
}

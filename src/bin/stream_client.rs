use clap::Parser;
use eyre::{Result, WrapErr};
use ivring::{IvshmemDevice, IvshmemSignal, Producer, SpinBudget, DEFAULT_VECTOR};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Producer side of the ivshmem stream channel. Attaches to a channel the
/// server created, handshakes peer identities through the control block and
/// pumps pattern-filled blocks until the deadline.
#[derive(Parser, Debug)]
#[command(name = "stream_client")]
#[command(about = "ivshmem stream producer")]
struct Args {
    #[arg(help = "uio device path, e.g. /dev/uio0")]
    device: String,

    #[arg(
        short,
        long,
        default_value = "10s",
        value_parser = humantime::parse_duration,
        help = "how long to transmit"
    )]
    duration: Duration,

    #[arg(short, long, default_value_t = 65536, help = "bytes per write attempt")]
    block_size: usize,

    #[arg(
        short,
        long,
        default_value = "aa",
        value_parser = parse_fill_byte,
        help = "fill pattern byte (hex)"
    )]
    fill: u8,

    #[arg(
        long,
        default_value = "100us",
        value_parser = humantime::parse_duration,
        help = "busy-spin window before parking on the interrupt line"
    )]
    spin: Duration,
}

fn parse_fill_byte(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| format!("invalid fill byte {s:?}: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("received ctrl+c, stopping after the current block");
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let device = Arc::new(
        IvshmemDevice::open(&args.device)
            .wrap_err_with(|| format!("failed to open device {}", args.device))?,
    );
    let local_id = device.iv_position();
    info!(device = %args.device, local_id, "device opened");

    let capacity = device
        .probe_capacity()
        .wrap_err("failed to read the published channel capacity")?;
    let region = device
        .map_region(capacity)
        .wrap_err("failed to map the data region")?;
    info!(capacity, "attached to channel");

    // Identity handshake: publish ours, read the server's, then kick once so
    // the server's initial blocking read returns.
    let control = region.control();
    control.publish_producer_id(local_id);
    control.publish_check_byte(args.fill);
    let peer_id = control.consumer_id();
    device.ring_doorbell(peer_id, DEFAULT_VECTOR);
    info!(peer_id, "handshake complete");

    let signal = IvshmemSignal::new(device, peer_id, DEFAULT_VECTOR);
    let mut producer = Producer::new(region, signal, SpinBudget::new(args.spin))?;

    let block = vec![args.fill; args.block_size];
    let started = Instant::now();
    let deadline = started + args.duration;

    while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
        let n = producer.write(&block)?;
        if n == 0 {
            info!("peer requested shutdown");
            break;
        }
    }

    producer
        .request_stop()
        .wrap_err("failed to signal shutdown to the peer")?;

    let elapsed = started.elapsed();
    let total = producer.bytes_written();
    info!(
        total_bytes = total,
        elapsed = ?elapsed,
        throughput_mib_s = format!("{:.2}", mib_per_sec(total, elapsed)),
        "transmit finished"
    );
    Ok(())
}

fn mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    bytes as f64 / (1024.0 * 1024.0) / secs
}

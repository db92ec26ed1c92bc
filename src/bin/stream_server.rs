use clap::Parser;
use eyre::{Result, WrapErr};
use ivring::{Consumer, IvshmemDevice, IvshmemSignal, SpinBudget, DEFAULT_VECTOR};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Consumer side of the ivshmem stream channel. Creates the control block in
/// region B, publishes its identity and capacity, then drains the ring until
/// the producer requests a stop.
#[derive(Parser, Debug)]
#[command(name = "stream_server")]
#[command(about = "ivshmem stream consumer")]
struct Args {
    #[arg(help = "uio device path, e.g. /dev/uio0")]
    device: String,

    #[arg(
        short,
        long,
        default_value_t = 131072,
        help = "ring capacity in bytes (rounded up to a page)"
    )]
    capacity: u32,

    #[arg(short, long, default_value_t = 65536, help = "bytes per read attempt")]
    block_size: usize,

    #[arg(
        long,
        help = "verify every received byte against the producer's fill pattern"
    )]
    debug: bool,

    #[arg(
        long,
        default_value = "100us",
        value_parser = humantime::parse_duration,
        help = "busy-spin window before parking on the interrupt line"
    )]
    spin: Duration,
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

    let region = device
        .map_region(args.capacity)
        .wrap_err("failed to map the data region")?;
    region
        .init_control(args.capacity)
        .wrap_err("failed to initialize the control block")?;
    region.control().publish_consumer_id(local_id);
    info!(capacity = args.capacity, "channel published, waiting for a producer");

    // The producer's one-shot handshake kick unblocks this read.
    device
        .wait_interrupt()
        .wrap_err("failed waiting for the producer handshake")?;
    let control = region.control();
    let peer_id = control.producer_id();
    let check_byte = control.check_byte();
    info!(peer_id, "producer attached");

    let signal = IvshmemSignal::new(device, peer_id, DEFAULT_VECTOR);
    let mut consumer = Consumer::new(region, signal, SpinBudget::new(args.spin))?;
    if args.debug {
        info!(check_byte, "debug verification enabled");
        consumer = consumer.with_verify(check_byte);
    }

    let mut buf = vec![0u8; args.block_size];
    let started = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let n = consumer.read(&mut buf)?;
        if n == 0 {
            info!("producer requested shutdown, ring drained");
            break;
        }
    }

    consumer.close().wrap_err("failed to close the channel")?;

    let elapsed = started.elapsed();
    let total = consumer.bytes_read();
    info!(
        total_bytes = total,
        elapsed = ?elapsed,
        throughput_mib_s = format!("{:.2}", mib_per_sec(total, elapsed)),
        "receive finished"
    );
    Ok(())
}

fn mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    bytes as f64 / (1024.0 * 1024.0) / secs
}

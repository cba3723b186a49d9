//! Overrun recovery: a capture consumer that periodically stalls for longer
//! than the ring can absorb.
//!
//! Each stall lets the software DMA clock lap the consumer. The next read
//! fails fast with `Overrun`; the demo then rewinds the stream with
//! `restart()`, clears the counter with `reset_xruns()` and carries on.
//!
//! ```text
//! cargo run --bin overrun_recovery -- --stall-every 16 --stall-ms 40
//! ```

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pcm_stream::sim::{HeapMemory, RegisterFile, SoftDma};
use pcm_stream::{Device, Direction, PcmInterface};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Provoke and recover from capture overruns")]
struct Args {
    /// Stereo frames per period.
    #[arg(long, default_value_t = 48)]
    period_frames: u32,

    /// Periods per ring.
    #[arg(long, default_value_t = 4)]
    period_count: u32,

    /// Periods to read before stopping.
    #[arg(long, default_value_t = 128)]
    periods: usize,

    /// Stall after every this many periods.
    #[arg(long, default_value_t = 16)]
    stall_every: usize,

    /// Length of each stall in milliseconds.
    #[arg(long, default_value_t = 40)]
    stall_ms: u64,

    /// Simulated period length in milliseconds.
    #[arg(long, default_value_t = 2)]
    period_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.stall_every == 0 {
        bail!("--stall-every must be at least 1");
    }

    let dma = SoftDma::new();
    let pcm = PcmInterface::new(RegisterFile::new());
    let device = Device::new(HeapMemory::new(), dma.clone(), pcm).context("creating device")?;
    let session = device.open().context("opening device")?;
    session
        .start(args.period_frames, args.period_count)
        .context("starting stream")?;

    let geometry = session.geometry().context("stream is not running")?;
    let ring_ms = args.period_ms * u64::from(geometry.period_count());
    if args.stall_ms <= ring_ms {
        warn!(
            stall_ms = args.stall_ms,
            ring_ms, "stalls shorter than the ring may not overrun"
        );
    }

    let _clock = dma.spawn_clock(Duration::from_millis(args.period_ms));
    let mut period = vec![0u8; geometry.period_size()];
    let mut read = 0;
    let mut recoveries = 0;

    while read < args.periods {
        match session.read(&mut period) {
            Ok(_) => {
                read += 1;
                if read % args.stall_every == 0 {
                    thread::sleep(Duration::from_millis(args.stall_ms));
                }
            }
            Err(err) if err.is_overrun() => {
                let xruns = session.xruns(Direction::Capture)?;
                let available = session.available(Direction::Capture)?;
                info!(read, xruns, available, "overrun, restarting");
                session.restart().context("restarting stream")?;
                session.reset_xruns()?;
                recoveries += 1;
            }
            Err(err) => return Err(err).context("reading capture"),
        }
    }

    session.stop().context("stopping stream")?;
    info!(read, recoveries, "done");
    Ok(())
}

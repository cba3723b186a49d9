//! Loopback: every captured period is queued straight back for playback.
//!
//! Runs on the software platform: [`SoftDma`] completes one period per
//! `--period-ms` on both channels, so capture and playback advance in
//! lockstep the way a real PCM interface clocks them.
//!
//! ```text
//!  SoftClock ─► rx ─► capture ring ─► reader ──mpsc──► writer ─► playback ring ◄─ tx ◄─ SoftClock
//! ```
//!
//! Overruns are handled in place with `restart()` + `reset_xruns()`.
//!
//! ```text
//! RUST_LOG=pcm_stream=debug cargo run --bin loopback -- --periods 512
//! ```

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pcm_stream::constants::{DEFAULT_PERIOD_COUNT, DEFAULT_PERIOD_FRAMES};
use pcm_stream::sim::{HeapMemory, RegisterFile, SoftDma};
use pcm_stream::{Device, Direction, PcmInterface, PeriodGeometry, Session, StreamConfig};
use tracing::{info, warn};

type SimSession<'a> = Session<'a, HeapMemory, SoftDma, PcmInterface<RegisterFile>>;

#[derive(Parser, Debug)]
#[command(about = "Capture periods and play them back")]
struct Args {
    /// Stereo frames per period.
    #[arg(long, default_value_t = DEFAULT_PERIOD_FRAMES)]
    period_frames: u32,

    /// Periods per ring.
    #[arg(long, default_value_t = DEFAULT_PERIOD_COUNT)]
    period_count: u32,

    /// Periods to loop back before stopping.
    #[arg(long, default_value_t = 256)]
    periods: usize,

    /// Simulated period length in milliseconds.
    #[arg(long, default_value_t = 3)]
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
    let config = StreamConfig {
        period_frames: args.period_frames,
        period_count: args.period_count,
    };
    let geometry = PeriodGeometry::try_from(config).context("invalid period layout")?;

    let dma = SoftDma::new();
    let pcm = PcmInterface::new(RegisterFile::new());
    let device = Device::new(HeapMemory::new(), dma.clone(), pcm).context("creating device")?;
    let session = device.open().context("opening device")?;

    session
        .start(config.period_frames, config.period_count)
        .context("starting stream")?;
    info!(
        period_size = geometry.period_size(),
        total_size = geometry.total_size(),
        "loopback running"
    );

    let clock = dma.spawn_clock(Duration::from_millis(args.period_ms));
    let started = Instant::now();
    let (to_playback, from_capture) = mpsc::sync_channel::<Vec<u8>>(args.period_count as usize);

    let (recoveries, played) = thread::scope(|s| -> Result<(u32, usize)> {
        let session = &session;

        let reader = s.spawn(move || -> Result<u32> {
            let mut recoveries = 0;
            let mut captured = 0;
            while captured < args.periods {
                let mut period = vec![0u8; geometry.period_size()];
                match session.read(&mut period) {
                    Ok(_) => {
                        captured += 1;
                        if to_playback.send(period).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.is_overrun() => {
                        recover(session, Direction::Capture)?;
                        recoveries += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(recoveries)
        });

        let writer = s.spawn(move || -> Result<(u32, usize)> {
            let mut recoveries = 0;
            let mut played = 0;
            for period in from_capture {
                loop {
                    match session.write(&period) {
                        Ok(_) => {
                            played += 1;
                            break;
                        }
                        Err(err) if err.is_overrun() => {
                            recover(session, Direction::Playback)?;
                            recoveries += 1;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            Ok((recoveries, played))
        });

        let captured = reader
            .join()
            .map_err(|_| anyhow!("capture thread panicked"))??;
        let (written, played) = writer
            .join()
            .map_err(|_| anyhow!("playback thread panicked"))??;
        Ok((captured + written, played))
    })?;

    drop(clock);
    session.stop().context("stopping stream")?;
    session.close();

    info!(
        played,
        recoveries,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loopback finished"
    );
    Ok(())
}

/// Rewind both rings and clear the overrun counters.
fn recover(session: &SimSession<'_>, direction: Direction) -> pcm_stream::Result<()> {
    let xruns = session.xruns(direction)?;
    warn!(?direction, xruns, "recovering from overrun");
    session.restart()?;
    session.reset_xruns()
}

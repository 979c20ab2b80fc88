//! Simulation daemon for the DAQnet board model.
//!
//! Usage: `daqnet-simd [CONFIG.json] [--trace OUT.json] [--frames N]`
//!
//! Builds the board described by the config (the Switch defaults when none is
//! given), puts `N` frames on the wire towards the MAC and runs for
//! `DAQNET_SIM_CYCLES` reference cycles or until SIGINT/SIGTERM.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use daqnet_gateware::board::Board;
use daqnet_gateware::config::BoardConfig;
use daqnet_gateware::frame::{Frame, MAX_FRAME_LEN};
use daqnet_gateware::tracing::{self, prelude::*};

/// Reference cycles run between checks for cancellation.
const CHUNK_CYCLES: u64 = 10_000;

/// Get the simulation length from environment or use default.
fn get_sim_cycles() -> u64 {
    std::env::var("DAQNET_SIM_CYCLES")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(1_000_000)
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    trace: Option<PathBuf>,
    frames: usize,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args {
            frames: 4,
            ..Default::default()
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--trace" => {
                    let path = args.next().context("--trace needs a path")?;
                    parsed.trace = Some(path.into());
                }
                "--frames" => {
                    let n = args.next().context("--frames needs a count")?;
                    parsed.frames = n.parse().with_context(|| format!("bad frame count {n}"))?;
                }
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                path => {
                    if parsed.config.replace(path.into()).is_some() {
                        bail!("more than one config file given");
                    }
                }
            }
        }
        Ok(parsed)
    }
}

/// Test frame `n`: lengths spread between a minimum Ethernet frame and the
/// MTU.
fn stimulus(n: usize) -> Result<Frame> {
    let len = 60 + (n * 397) % (MAX_FRAME_LEN - 60);
    Ok(Frame::pattern(len as u16, n as u8)?)
}

async fn simulate(
    mut board: Board,
    cycles: u64,
    running: CancellationToken,
) -> daqnet_gateware::error::Result<Board> {
    let mut done = 0;
    while done < cycles && !running.is_cancelled() {
        let chunk = CHUNK_CYCLES.min(cycles - done);
        board.run(chunk)?;
        done += chunk;
        tokio::task::yield_now().await;
    }
    debug!(cycles = done, "Simulation stopped");
    Ok(board)
}

fn report(board: &Board) {
    let stats = board.mac_stats();
    info!(
        reference_cycles = board.reference_cycles(),
        sync_cycles = board.sync_cycles(),
        locked = board.is_locked(),
        rx_frames = stats.rx_frames,
        tx_frames = stats.tx_frames,
        dropped = stats.rx_dropped_oversize,
        overflow = stats.rx_dropped_overflow,
        received = board.received().len(),
        wire_out = board.wire_out().len(),
        idle = board.is_idle(),
        "Simulation summary"
    );
    if let Some(link) = board.link() {
        info!(
            link_up_at = ?link.link_up_at(),
            changes = link.changes().len(),
            drops = link.link_drops(),
            "Link summary"
        );
    }
    if board.rx_stall_cycles() > 0 {
        warn!(cycles = board.rx_stall_cycles(), "RX frame still waiting for ack");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout("daqnet-simd");

    let args = Args::parse(std::env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => BoardConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BoardConfig::default(),
    };
    let mut board = Board::build(&config)?;
    if config.variant.has_network() {
        for n in 0..args.frames {
            board.inject(stimulus(n)?.into_bytes())?;
        }
    }

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    let sim = tracker.spawn(simulate(board, get_sim_cycles(), running.clone()));
    tracker.close();
    info!(variant = %config.variant, "Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => running.cancel(),
        _ = sigterm.recv() => running.cancel(),
        _ = tracker.wait() => {},
    }

    trace!("Shutting down.");
    tracker.wait().await;
    let board = sim.await??;
    report(&board);

    if let Some(path) = &args.trace {
        board
            .trace()
            .write_json(path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), samples = board.trace().samples.len(), "Trace written");
    }

    info!("Exiting.");
    Ok(())
}

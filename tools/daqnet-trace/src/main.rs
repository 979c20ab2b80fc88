//! Offline inspection of traces written by `daqnet-simd --trace`.
//!
//! Prints the handshake and link events in a trace, then replays the
//! protocol monitors over it and reports the first violation, if any.

mod events;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use daqnet_gateware::trace::Trace;

fn main() -> Result<()> {
    let mut path = None;
    let mut quiet = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-q" | "--quiet" => quiet = true,
            flag if flag.starts_with('-') => bail!("unknown option {flag}"),
            _ => path = Some(PathBuf::from(arg)),
        }
    }
    let Some(path) = path else {
        bail!("usage: daqnet-trace [--quiet] TRACE.json");
    };

    let trace =
        Trace::load_json(&path).with_context(|| format!("reading {}", path.display()))?;
    println!(
        "{} {} ({} samples, {} dropped)",
        "Trace".bold(),
        trace.variant,
        trace.samples.len(),
        trace.dropped
    );
    if trace.dropped > 0 {
        println!("{}", "Trace was truncated; later cycles are missing".yellow());
    }

    if !quiet {
        for event in events::events(&trace) {
            println!("{event}");
        }
    }

    match trace.first_activity() {
        Some(sample) => println!(
            "First activity at reference cycle {} (locked: {})",
            sample.reference_cycle, sample.locked
        ),
        None => println!("No activity"),
    }

    match trace.replay() {
        Ok(summary) => {
            println!(
                "{} {} sync cycles, {} RX frames, {} TX frames",
                "OK".green().bold(),
                summary.cycles,
                summary.rx_frames,
                summary.tx_frames
            );
            Ok(())
        }
        Err(violation) => {
            println!("{} {}", "VIOLATION".red().bold(), violation);
            bail!("trace breaks the handshake protocol")
        }
    }
}

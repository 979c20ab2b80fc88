//! Handshake event extraction.
//!
//! Turns per-cycle samples into the edges a reader cares about: lock,
//! frames offered and taken, transmissions started and finished, link and
//! indicator changes.

use colored::Colorize;
use daqnet_gateware::board::Leds;
use daqnet_gateware::trace::{Sample, Trace};
use std::fmt;

/// Decoded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Locked,
    RxOffered { len: u16 },
    RxAcked { len: u16 },
    TxReady,
    TxStarted { len: u16 },
    PhyResetReleased,
    LinkUp,
    LinkDown,
    Indicators(Leds),
}

/// Event with the cycle it was seen on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    pub reference_cycle: u64,
    pub sync_cycle: Option<u64>,
    pub kind: EventKind,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Locked => write!(f, "{}", "PLL locked".bold()),
            EventKind::RxOffered { len } => write!(f, "{} len={}", "RX valid".cyan(), len),
            EventKind::RxAcked { len } => write!(f, "{} len={}", "RX ack".green(), len),
            EventKind::TxReady => write!(f, "{}", "TX ready".cyan()),
            EventKind::TxStarted { len } => write!(f, "{} len={}", "TX start".green(), len),
            EventKind::PhyResetReleased => write!(f, "{}", "PHY reset released".yellow()),
            EventKind::LinkUp => write!(f, "{}", "Link up".green().bold()),
            EventKind::LinkDown => write!(f, "{}", "Link down".red().bold()),
            EventKind::Indicators(leds) => write!(f, "{} {:?}", "LEDs".magenta(), leds),
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sync_cycle {
            Some(cycle) => write!(f, "[{:>10} / {:>10}] {}", self.reference_cycle, cycle, self.kind),
            None => write!(f, "[{:>10} / {:>10}] {}", self.reference_cycle, "-", self.kind),
        }
    }
}

/// Events between two consecutive samples.
fn diff(prev: &Sample, cur: &Sample, out: &mut Vec<EventKind>) {
    if cur.locked && !prev.locked {
        out.push(EventKind::Locked);
    }
    if let (Some(p), Some(c)) = (prev.status, cur.status) {
        if p.phy_reset && !c.phy_reset {
            out.push(EventKind::PhyResetReleased);
        }
        match (p.link_up, c.link_up) {
            (false, true) => out.push(EventKind::LinkUp),
            (true, false) => out.push(EventKind::LinkDown),
            _ => {}
        }
    }
    if cur.rx.valid && (!prev.rx.valid || prev.rx.ack) {
        out.push(EventKind::RxOffered { len: cur.rx.len });
    }
    if cur.rx.ack {
        out.push(EventKind::RxAcked { len: cur.rx.len });
    }
    if cur.tx.ready && !prev.tx.ready {
        out.push(EventKind::TxReady);
    }
    if cur.tx.start {
        out.push(EventKind::TxStarted { len: cur.tx.len });
    }
    if cur.indicators != prev.indicators {
        out.push(EventKind::Indicators(Leds::from_bits_truncate(cur.indicators)));
    }
}

/// Extract every event from a trace, in cycle order.
pub fn events(trace: &Trace) -> Vec<TraceEvent> {
    let mut result = Vec::new();
    let mut kinds = Vec::new();
    for pair in trace.samples.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        diff(prev, cur, &mut kinds);
        result.extend(kinds.drain(..).map(|kind| TraceEvent {
            reference_cycle: cur.reference_cycle,
            sync_cycle: cur.sync_cycle,
            kind,
        }));
    }
    result
}

//! RX/TX handshake signals, channel states and protocol monitors.
//!
//! RX (MAC to stack): the producer holds `rx_valid` high with a stable
//! `rx_len` until the consumer pulses `rx_ack` for one cycle. TX (stack to
//! MAC): the consumer pulses `tx_start` with `tx_len` while `tx_ready` is
//! high, and the producer keeps `tx_ready` low until the frame has drained.
//! Each channel carries at most one frame at a time and has no timeout.
//!
//! The monitors here sample the lines once per sync cycle and turn any
//! breach of those rules into a [`ProtocolViolation`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lines driven by the packet producer (MAC side).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerOutputs {
    pub rx_valid: bool,
    pub rx_len: u16,
    pub tx_ready: bool,
}

/// Lines driven by the packet consumer (stack side).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerOutputs {
    pub rx_ack: bool,
    pub tx_start: bool,
    pub tx_len: u16,
}

/// What a producer samples: the consumer's lines after binding.
pub type ProducerInputs = ConsumerOutputs;

/// What a consumer samples: the producer's lines after binding.
pub type ConsumerInputs = ProducerOutputs;

/// One cycle of the RX channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxLines {
    pub valid: bool,
    pub len: u16,
    pub ack: bool,
}

/// One cycle of the TX channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLines {
    pub ready: bool,
    pub start: bool,
    pub len: u16,
}

/// Consumer-side state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No frame in flight.
    Idle,
    /// RX: `rx_valid` seen, acknowledgment pending.
    WaitAck,
    /// TX: `tx_ready` seen with a frame loaded, start pending.
    WaitReady,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("rx_ack asserted without rx_valid at cycle {cycle}")]
    SpuriousAck { cycle: u64 },
    #[error("rx_ack held for more than one cycle at cycle {cycle}")]
    AckNotPulse { cycle: u64 },
    #[error("rx_valid withdrawn before rx_ack at cycle {cycle}, frame of {len} bytes lost")]
    ValidWithdrawn { cycle: u64, len: u16 },
    #[error("rx_len changed from {was} to {now} while waiting for rx_ack at cycle {cycle}")]
    LengthUnstable { cycle: u64, was: u16, now: u16 },
    #[error("rx_valid still high the cycle after rx_ack at cycle {cycle}")]
    ValidHeldAfterAck { cycle: u64 },
    #[error("rx_len {len} overruns the {available} bytes in the RX port at cycle {cycle}")]
    RxLenOverrun { cycle: u64, len: u16, available: u16 },
    #[error("tx_start asserted without tx_ready at cycle {cycle}")]
    StartWithoutReady { cycle: u64 },
    #[error("tx_start held for more than one cycle at cycle {cycle}")]
    StartNotPulse { cycle: u64 },
    #[error("tx_ready still high the cycle after tx_start at cycle {cycle}")]
    ReadyHeldAfterStart { cycle: u64 },
    #[error("tx_start while the previous frame is still draining at cycle {cycle}")]
    StartWhileDraining { cycle: u64 },
    #[error("tx_len {len} overruns the {available} bytes in the TX port at cycle {cycle}")]
    TxLenOverrun { cycle: u64, len: u16, available: u16 },
}

/// Checks the RX channel rules, one sample per cycle.
#[derive(Debug, Default)]
pub struct RxMonitor {
    prev: RxLines,
    // Length of the frame currently waiting for its ack.
    pending: Option<u16>,
    waiting: u64,
    frames: u64,
}

impl RxMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, cycle: u64, lines: RxLines) -> Result<(), ProtocolViolation> {
        if lines.ack && !lines.valid {
            return Err(ProtocolViolation::SpuriousAck { cycle });
        }
        if lines.ack && self.prev.ack {
            return Err(ProtocolViolation::AckNotPulse { cycle });
        }
        // One ack per assertion: valid must drop before the next frame.
        if self.prev.ack && lines.valid {
            return Err(ProtocolViolation::ValidHeldAfterAck { cycle });
        }
        match self.pending {
            Some(len) if !lines.valid => {
                return Err(ProtocolViolation::ValidWithdrawn { cycle, len });
            }
            Some(was) if lines.len != was => {
                return Err(ProtocolViolation::LengthUnstable {
                    cycle,
                    was,
                    now: lines.len,
                });
            }
            Some(_) => self.waiting += 1,
            None if lines.valid => {
                self.pending = Some(lines.len);
                self.waiting = 0;
            }
            None => {}
        }
        if lines.ack {
            self.pending = None;
            self.waiting = 0;
            self.frames += 1;
        }
        self.prev = lines;
        Ok(())
    }

    /// Nothing offered and nothing waiting for an ack.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Cycles the current frame has been waiting for its ack.
    pub fn stall_cycles(&self) -> u64 {
        self.waiting
    }

    pub fn frames_acked(&self) -> u64 {
        self.frames
    }
}

/// Checks the TX channel rules, one sample per cycle.
#[derive(Debug, Default)]
pub struct TxMonitor {
    prev: TxLines,
    frames: u64,
}

impl TxMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, cycle: u64, lines: TxLines) -> Result<(), ProtocolViolation> {
        if lines.start && !lines.ready {
            return Err(ProtocolViolation::StartWithoutReady { cycle });
        }
        if lines.start && self.prev.start {
            return Err(ProtocolViolation::StartNotPulse { cycle });
        }
        if self.prev.start && lines.ready {
            return Err(ProtocolViolation::ReadyHeldAfterStart { cycle });
        }
        if lines.start {
            self.frames += 1;
        }
        self.prev = lines;
        Ok(())
    }

    pub fn frames_started(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rx(valid: bool, len: u16, ack: bool) -> RxLines {
        RxLines { valid, len, ack }
    }

    fn tx(ready: bool, start: bool, len: u16) -> TxLines {
        TxLines { ready, start, len }
    }

    fn run_rx(lines: &[RxLines]) -> Result<RxMonitor, ProtocolViolation> {
        let mut monitor = RxMonitor::new();
        for (cycle, l) in lines.iter().enumerate() {
            monitor.check(cycle as u64, *l)?;
        }
        Ok(monitor)
    }

    fn run_tx(lines: &[TxLines]) -> Result<TxMonitor, ProtocolViolation> {
        let mut monitor = TxMonitor::new();
        for (cycle, l) in lines.iter().enumerate() {
            monitor.check(cycle as u64, *l)?;
        }
        Ok(monitor)
    }

    #[test]
    fn test_rx_well_formed() {
        let monitor = run_rx(&[
            rx(false, 0, false),
            rx(true, 64, false),
            rx(true, 64, false),
            rx(true, 64, true),
            rx(false, 0, false),
            rx(true, 100, true),
            rx(false, 0, false),
        ])
        .unwrap();
        assert_eq!(monitor.frames_acked(), 2);
        assert!(monitor.is_idle());
    }

    #[test]
    fn test_rx_spurious_ack() {
        let err = run_rx(&[rx(false, 0, false), rx(false, 0, true)]).unwrap_err();
        assert_eq!(err, ProtocolViolation::SpuriousAck { cycle: 1 });
    }

    #[test]
    fn test_rx_ack_must_be_pulse() {
        let err = run_rx(&[rx(true, 8, true), rx(true, 8, true)]).unwrap_err();
        assert_eq!(err, ProtocolViolation::AckNotPulse { cycle: 1 });
    }

    #[test]
    fn test_rx_valid_withdrawn() {
        let err = run_rx(&[rx(true, 8, false), rx(false, 0, false)]).unwrap_err();
        assert_eq!(err, ProtocolViolation::ValidWithdrawn { cycle: 1, len: 8 });
    }

    #[test]
    fn test_rx_length_unstable() {
        let err = run_rx(&[rx(true, 8, false), rx(true, 9, false)]).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::LengthUnstable {
                cycle: 1,
                was: 8,
                now: 9
            }
        );
    }

    #[test]
    fn test_rx_second_ack_needs_new_assertion() {
        let mut lines = vec![rx(true, 64, false); 6];
        lines[2].ack = true;
        lines[5].ack = true;
        let err = run_rx(&lines).unwrap_err();
        assert_eq!(err, ProtocolViolation::ValidHeldAfterAck { cycle: 3 });
    }

    #[test]
    fn test_rx_stall_counts() {
        let mut lines = vec![rx(true, 8, false); 50];
        lines.insert(0, rx(false, 0, false));
        let monitor = run_rx(&lines).unwrap();
        assert!(!monitor.is_idle());
        assert_eq!(monitor.stall_cycles(), 49);
        assert_eq!(monitor.frames_acked(), 0);
    }

    #[test]
    fn test_tx_well_formed() {
        let monitor = run_tx(&[
            tx(true, false, 0),
            tx(true, true, 60),
            tx(false, false, 0),
            tx(false, false, 0),
            tx(true, false, 0),
            tx(true, true, 1500),
            tx(false, false, 0),
        ])
        .unwrap();
        assert_eq!(monitor.frames_started(), 2);
    }

    #[test]
    fn test_tx_start_without_ready() {
        let err = run_tx(&[tx(false, true, 60)]).unwrap_err();
        assert_eq!(err, ProtocolViolation::StartWithoutReady { cycle: 0 });
    }

    #[test]
    fn test_tx_start_must_be_pulse() {
        let err = run_tx(&[tx(true, true, 60), tx(true, true, 60)]).unwrap_err();
        assert_eq!(err, ProtocolViolation::StartNotPulse { cycle: 1 });
    }

    #[test]
    fn test_tx_ready_must_drop_after_start() {
        let err = run_tx(&[tx(true, true, 60), tx(true, false, 0)]).unwrap_err();
        assert_eq!(err, ProtocolViolation::ReadyHeldAfterStart { cycle: 1 });
    }
}

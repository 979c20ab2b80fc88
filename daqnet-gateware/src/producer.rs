//! MAC-side packet producer.
//!
//! The framing, CRC and RMII logic of the real MAC are outside this model;
//! what remains is the part the rest of the board can see: a PHY reset and
//! link sequence, a one-frame receive buffer offered on the RX handshake,
//! and a transmit path that accepts one frame at a time on the TX handshake
//! and drains it onto the wire.

use std::collections::VecDeque;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::handshake::{ProducerInputs, ProducerOutputs, ProtocolViolation};
use crate::tracing::prelude::*;
use crate::types::MacAddress;

/// How long `eth_led` stays lit after a frame moves, in sync cycles.
const ACTIVITY_LED_CYCLES: u32 = 1 << 16;

/// Frames the wire side holds ahead of the RX buffer. Arrivals beyond this
/// are dropped, as a PHY FIFO would.
pub const WIRE_QUEUE_FRAMES: usize = 64;

/// MAC parameters fixed at composition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacConfig {
    /// Sync clock frequency, used only to turn durations into cycle counts.
    pub clk_freq_hz: f64,
    pub phy_addr: u8,
    pub mac_addr: MacAddress,
    pub phy_reset_us: f64,
    pub link_negotiation_us: f64,
    /// Sync cycles per byte on the wire.
    pub cycles_per_byte: u32,
}

impl MacConfig {
    /// Cycles at `clk_freq_hz` covering `us` microseconds, at least one.
    pub fn cycles_for_us(&self, us: f64) -> u64 {
        ((self.clk_freq_hz * us / 1e6).ceil() as u64).max(1)
    }

    /// RMII moves two bits per 50 MHz reference cycle: one byte per 80 ns.
    pub fn rmii_cycles_per_byte(clk_freq_hz: f64) -> u32 {
        ((clk_freq_hz * 80e-9).round() as u32).max(1)
    }
}

/// Status lines the MAC exposes for observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyStatus {
    pub link_up: bool,
    pub phy_reset: bool,
    pub eth_led: bool,
}

#[derive(Debug)]
enum PhyState {
    Reset { remaining: u64 },
    Negotiating { remaining: u64 },
    Up,
}

#[derive(Debug)]
enum TxState {
    Ready,
    Draining { frame: Frame, remaining: u64 },
}

/// Counters kept by the MAC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacStats {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub rx_dropped_oversize: u64,
    /// Frames that arrived while the wire queue was full.
    #[serde(default)]
    pub rx_dropped_overflow: u64,
}

pub struct Mac {
    config: MacConfig,
    loopback: bool,
    cycle: u64,
    phy: PhyState,
    // Raw frames arriving from the link partner, oldest first.
    wire_in: VecDeque<Bytes>,
    wire_out: Vec<Frame>,
    rx_frame: Option<Frame>,
    tx: TxState,
    led_hold: u32,
    stats: MacStats,
}

impl Mac {
    /// Create a MAC. With `loopback` set, drained TX frames are fed back into
    /// the receive side instead of the wire output.
    pub fn new(config: MacConfig, loopback: bool) -> Self {
        let phy = PhyState::Reset {
            remaining: config.cycles_for_us(config.phy_reset_us),
        };
        Self {
            config,
            loopback,
            cycle: 0,
            phy,
            wire_in: VecDeque::new(),
            wire_out: Vec::new(),
            rx_frame: None,
            tx: TxState::Ready,
            led_hold: 0,
            stats: MacStats::default(),
        }
    }

    /// Synchronous reset. Frames already on the wire stay there.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.phy = PhyState::Reset {
            remaining: self.config.cycles_for_us(self.config.phy_reset_us),
        };
        self.rx_frame = None;
        self.tx = TxState::Ready;
        self.led_hold = 0;
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    /// Queue a frame from the link partner. It is offered to the consumer
    /// once the link is up and the RX buffer is free; anything above the MTU
    /// is dropped at that point. Returns false if the queue was full and the
    /// frame was dropped.
    pub fn receive_from_wire(&mut self, data: impl Into<Bytes>) -> bool {
        if self.wire_in.len() >= WIRE_QUEUE_FRAMES {
            warn!(
                cycle = self.cycle,
                backlog = self.wire_in.len(),
                "Wire queue full, dropping frame"
            );
            self.stats.rx_dropped_overflow += 1;
            return false;
        }
        self.wire_in.push_back(data.into());
        true
    }

    /// Frames transmitted onto the wire so far.
    pub fn wire_out(&self) -> &[Frame] {
        &self.wire_out
    }

    /// Frames still waiting on the wire side of the receive buffer.
    pub fn wire_backlog(&self) -> usize {
        self.wire_in.len()
    }

    pub fn stats(&self) -> MacStats {
        self.stats
    }

    pub fn outputs(&self) -> ProducerOutputs {
        ProducerOutputs {
            rx_valid: self.rx_frame.is_some(),
            rx_len: self.rx_frame.as_ref().map_or(0, Frame::len),
            tx_ready: matches!(self.tx, TxState::Ready) && self.link_up(),
        }
    }

    pub fn status(&self) -> PhyStatus {
        PhyStatus {
            link_up: self.link_up(),
            phy_reset: matches!(self.phy, PhyState::Reset { .. }),
            eth_led: self.led_hold > 0,
        }
    }

    /// The RX read port: the frame currently offered, if any.
    pub fn rx_port(&self) -> Option<&Frame> {
        self.rx_frame.as_ref()
    }

    /// True while a transmitted frame is still going out.
    pub fn is_draining(&self) -> bool {
        matches!(self.tx, TxState::Draining { .. })
    }

    fn link_up(&self) -> bool {
        matches!(self.phy, PhyState::Up)
    }

    /// Clock edge. `tx_port` is the consumer's TX write port as it stands
    /// during this cycle.
    pub fn clock(
        &mut self,
        inputs: &ProducerInputs,
        tx_port: Option<Frame>,
    ) -> Result<(), ProtocolViolation> {
        let cycle = self.cycle;
        let ready = self.outputs().tx_ready;
        self.cycle += 1;
        self.led_hold = self.led_hold.saturating_sub(1);

        self.clock_phy(cycle);
        self.clock_rx(cycle, inputs);
        self.clock_tx(cycle, inputs, ready, tx_port)
    }

    fn clock_phy(&mut self, cycle: u64) {
        self.phy = match self.phy {
            PhyState::Reset { remaining: 0 | 1 } => {
                debug!(cycle, "PHY reset released");
                PhyState::Negotiating {
                    remaining: self.config.cycles_for_us(self.config.link_negotiation_us),
                }
            }
            PhyState::Reset { remaining } => PhyState::Reset {
                remaining: remaining - 1,
            },
            PhyState::Negotiating { remaining: 0 | 1 } => {
                info!(cycle, phy_addr = self.config.phy_addr, "Ethernet link up");
                PhyState::Up
            }
            PhyState::Negotiating { remaining } => PhyState::Negotiating {
                remaining: remaining - 1,
            },
            PhyState::Up => PhyState::Up,
        };
    }

    fn clock_rx(&mut self, cycle: u64, inputs: &ProducerInputs) {
        if let Some(frame) = &self.rx_frame {
            if inputs.rx_ack {
                debug!(cycle, len = frame.len(), "RX frame handed off");
                self.rx_frame = None;
                self.stats.rx_frames += 1;
                self.led_hold = ACTIVITY_LED_CYCLES;
            }
            return;
        }

        // Buffer was free for the whole cycle: load the next frame, if the
        // link is up to deliver one.
        if !self.link_up() {
            return;
        }
        while let Some(data) = self.wire_in.pop_front() {
            match Frame::new(data) {
                Ok(frame) => {
                    trace!(cycle, len = frame.len(), "RX frame buffered");
                    self.rx_frame = Some(frame);
                    break;
                }
                Err(e) => {
                    warn!(cycle, error = %e, "Dropping frame from wire");
                    self.stats.rx_dropped_oversize += 1;
                }
            }
        }
    }

    fn clock_tx(
        &mut self,
        cycle: u64,
        inputs: &ProducerInputs,
        ready: bool,
        tx_port: Option<Frame>,
    ) -> Result<(), ProtocolViolation> {
        match &mut self.tx {
            TxState::Draining { remaining, .. } => {
                if inputs.tx_start {
                    error!(cycle, "tx_start while draining");
                    return Err(ProtocolViolation::StartWhileDraining { cycle });
                }
                *remaining -= 1;
                if *remaining == 0 {
                    self.finish_tx(cycle);
                }
            }
            TxState::Ready if inputs.tx_start => {
                if !ready {
                    return Err(ProtocolViolation::StartWithoutReady { cycle });
                }
                let available = tx_port.as_ref().map_or(0, Frame::len);
                let frame = tx_port
                    .and_then(|f| f.prefix(inputs.tx_len))
                    .ok_or(ProtocolViolation::TxLenOverrun {
                        cycle,
                        len: inputs.tx_len,
                        available,
                    })?;
                debug!(cycle, len = frame.len(), "TX frame accepted");
                let remaining = (frame.len() as u64 * self.config.cycles_per_byte as u64).max(1);
                self.tx = TxState::Draining { frame, remaining };
                self.led_hold = ACTIVITY_LED_CYCLES;
            }
            TxState::Ready => {}
        }
        Ok(())
    }

    fn finish_tx(&mut self, cycle: u64) {
        let TxState::Draining { frame, .. } = std::mem::replace(&mut self.tx, TxState::Ready) else {
            return;
        };
        trace!(cycle, len = frame.len(), loopback = self.loopback, "TX frame drained");
        self.stats.tx_frames += 1;
        if self.loopback {
            self.receive_from_wire(frame);
        } else {
            self.wire_out.push(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MacConfig {
        MacConfig {
            clk_freq_hz: 5e6,
            phy_addr: 0,
            mac_addr: "02:44:4E:30:76:9E".parse().unwrap(),
            phy_reset_us: 1.0,
            link_negotiation_us: 1.0,
            cycles_per_byte: 1,
        }
    }

    fn idle() -> ProducerInputs {
        ProducerInputs::default()
    }

    fn bring_up(mac: &mut Mac) {
        while !mac.status().link_up {
            mac.clock(&idle(), None).unwrap();
        }
    }

    #[test]
    fn test_phy_sequence() {
        let mut mac = Mac::new(config(), false);
        assert!(mac.status().phy_reset);
        assert!(!mac.status().link_up);
        for _ in 0..5 {
            mac.clock(&idle(), None).unwrap();
        }
        assert!(!mac.status().phy_reset);
        assert!(!mac.status().link_up);
        for _ in 0..5 {
            mac.clock(&idle(), None).unwrap();
        }
        assert!(mac.status().link_up);
    }

    #[test]
    fn test_cycle_conversions() {
        let cfg = MacConfig {
            clk_freq_hz: 100e6,
            ..config()
        };
        assert_eq!(cfg.cycles_for_us(1.0), 100);
        assert_eq!(cfg.cycles_for_us(0.0), 1);
        assert_eq!(MacConfig::rmii_cycles_per_byte(100e6), 8);
    }

    #[test]
    fn test_rx_holds_until_ack() {
        let mut mac = Mac::new(config(), false);
        mac.receive_from_wire(vec![0u8; 64]);
        mac.receive_from_wire(vec![0u8; 80]);
        assert!(!mac.outputs().rx_valid);

        bring_up(&mut mac);
        mac.clock(&idle(), None).unwrap();
        for _ in 0..100 {
            let out = mac.outputs();
            assert!(out.rx_valid);
            assert_eq!(out.rx_len, 64);
            mac.clock(&idle(), None).unwrap();
        }
        assert_eq!(mac.wire_backlog(), 1);

        let ack = ProducerInputs {
            rx_ack: true,
            ..Default::default()
        };
        mac.clock(&ack, None).unwrap();
        assert!(!mac.outputs().rx_valid);
        mac.clock(&idle(), None).unwrap();
        assert_eq!(mac.outputs().rx_len, 80);
        assert_eq!(mac.stats().rx_frames, 1);
    }

    #[test]
    fn test_tx_drains_then_ready() {
        let mut mac = Mac::new(config(), false);
        bring_up(&mut mac);
        assert!(mac.outputs().tx_ready);

        let frame = Frame::pattern(10, 7).unwrap();
        let start = ProducerInputs {
            tx_start: true,
            tx_len: 10,
            ..Default::default()
        };
        mac.clock(&start, Some(frame.clone())).unwrap();
        for _ in 0..10 {
            assert!(!mac.outputs().tx_ready);
            assert!(mac.is_draining());
            mac.clock(&idle(), None).unwrap();
        }
        assert!(mac.outputs().tx_ready);
        assert_eq!(mac.wire_out(), &[frame]);
    }

    #[test]
    fn test_tx_start_while_draining() {
        let mut mac = Mac::new(config(), false);
        bring_up(&mut mac);
        let start = ProducerInputs {
            tx_start: true,
            tx_len: 4,
            ..Default::default()
        };
        let frame = Frame::pattern(4, 0).unwrap();
        mac.clock(&start, Some(frame.clone())).unwrap();
        let err = mac.clock(&start, Some(frame)).unwrap_err();
        assert!(matches!(err, ProtocolViolation::StartWhileDraining { .. }));
    }

    #[test]
    fn test_tx_len_overrun() {
        let mut mac = Mac::new(config(), false);
        bring_up(&mut mac);
        let start = ProducerInputs {
            tx_start: true,
            tx_len: 20,
            ..Default::default()
        };
        let err = mac
            .clock(&start, Some(Frame::pattern(4, 0).unwrap()))
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolViolation::TxLenOverrun {
                len: 20,
                available: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_loopback_feeds_receive_side() {
        let mut mac = Mac::new(config(), true);
        bring_up(&mut mac);
        let start = ProducerInputs {
            tx_start: true,
            tx_len: 3,
            ..Default::default()
        };
        mac.clock(&start, Some(Frame::pattern(3, 1).unwrap())).unwrap();
        while mac.is_draining() {
            mac.clock(&idle(), None).unwrap();
        }
        assert!(mac.wire_out().is_empty());
        mac.clock(&idle(), None).unwrap();
        assert_eq!(mac.outputs().rx_len, 3);
        assert_eq!(mac.rx_port().unwrap().as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_oversize_wire_frame_dropped() {
        let mut mac = Mac::new(config(), false);
        mac.receive_from_wire(vec![0u8; crate::frame::MAX_FRAME_LEN + 1]);
        mac.receive_from_wire(vec![0u8; 12]);
        bring_up(&mut mac);
        mac.clock(&idle(), None).unwrap();
        assert_eq!(mac.outputs().rx_len, 12);
        assert_eq!(mac.stats().rx_dropped_oversize, 1);
    }

    #[test]
    fn test_wire_queue_bounded() {
        let mut mac = Mac::new(config(), false);
        for n in 0..WIRE_QUEUE_FRAMES {
            assert!(mac.receive_from_wire(vec![n as u8; 20]));
        }
        assert!(!mac.receive_from_wire(vec![0xee; 20]));
        assert_eq!(mac.wire_backlog(), WIRE_QUEUE_FRAMES);
        assert_eq!(mac.stats().rx_dropped_overflow, 1);

        // Oldest frames survive; room frees up as the buffer loads.
        bring_up(&mut mac);
        mac.clock(&idle(), None).unwrap();
        assert_eq!(mac.rx_port().unwrap().as_bytes()[0], 0);
        assert!(mac.receive_from_wire(vec![0xee; 20]));
        assert_eq!(mac.stats().rx_dropped_overflow, 1);
    }

    #[test]
    fn test_activity_led() {
        let mut mac = Mac::new(config(), false);
        bring_up(&mut mac);
        assert!(!mac.status().eth_led);
        let start = ProducerInputs {
            tx_start: true,
            tx_len: 1,
            ..Default::default()
        };
        mac.clock(&start, Some(Frame::pattern(1, 0).unwrap())).unwrap();
        assert!(mac.status().eth_led);
    }
}

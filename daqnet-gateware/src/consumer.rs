//! Stack-side packet consumer.
//!
//! Stands in for the IP stack. The ARP/IPv4/UDP handling itself is opaque
//! and sits behind [`StackBehavior`]; this module owns the consumer half of
//! both handshakes and the frame ownership hand-offs.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::frame::Frame;
use crate::handshake::{ChannelState, ConsumerInputs, ConsumerOutputs, ProtocolViolation};
use crate::tracing::prelude::*;
use crate::types::MacAddress;

/// Frame handling of the stack.
pub trait StackBehavior: Send {
    /// Called once per received frame, after the ack completes. A returned
    /// frame is queued for transmission.
    fn on_frame(&mut self, frame: &Frame) -> Option<Frame>;
}

/// Accept and keep every frame.
#[derive(Debug, Default)]
pub struct Discard;

impl StackBehavior for Discard {
    fn on_frame(&mut self, _frame: &Frame) -> Option<Frame> {
        None
    }
}

/// Send every frame back out unchanged.
#[derive(Debug, Default)]
pub struct Echo;

impl StackBehavior for Echo {
    fn on_frame(&mut self, frame: &Frame) -> Option<Frame> {
        Some(frame.clone())
    }
}

/// Selects a [`StackBehavior`] from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BehaviorKind {
    #[default]
    Discard,
    Echo,
}

impl BehaviorKind {
    pub fn build(self) -> Box<dyn StackBehavior> {
        match self {
            BehaviorKind::Discard => Box::new(Discard),
            BehaviorKind::Echo => Box::new(Echo),
        }
    }
}

/// Stack parameters fixed at composition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub mac_addr: MacAddress,
    pub ip4_addr: Ipv4Addr,
    /// Cycles spent reading a frame between seeing `rx_valid` and acking.
    pub consume_cycles: u32,
    pub behavior: BehaviorKind,
}

#[derive(Debug)]
enum RxState {
    Idle,
    WaitAck { remaining: u32 },
}

#[derive(Debug)]
enum TxState {
    Idle,
    WaitReady { frame: Frame },
}

pub struct IpStack {
    config: StackConfig,
    behavior: Box<dyn StackBehavior>,
    cycle: u64,
    rx: RxState,
    tx: TxState,
    outgoing: VecDeque<Frame>,
    received: Vec<Frame>,
}

impl IpStack {
    pub fn new(config: StackConfig) -> Self {
        let behavior = config.behavior.build();
        Self::with_behavior(config, behavior)
    }

    /// Create a stack with a custom frame handler.
    pub fn with_behavior(config: StackConfig, behavior: Box<dyn StackBehavior>) -> Self {
        debug!(
            mac = %config.mac_addr,
            ip = %config.ip4_addr,
            behavior = %config.behavior,
            "IP stack configured"
        );
        Self {
            config,
            behavior,
            cycle: 0,
            rx: RxState::Idle,
            tx: TxState::Idle,
            outgoing: VecDeque::new(),
            received: Vec::new(),
        }
    }

    /// Synchronous reset. Queued outgoing frames are kept.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.rx = RxState::Idle;
        if let TxState::WaitReady { frame } = std::mem::replace(&mut self.tx, TxState::Idle) {
            self.outgoing.push_front(frame);
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Queue a frame for transmission.
    pub fn submit(&mut self, frame: Frame) {
        self.outgoing.push_back(frame);
    }

    /// Frames received so far, in order.
    pub fn received(&self) -> &[Frame] {
        &self.received
    }

    /// Frames queued but not yet started.
    pub fn pending_tx(&self) -> usize {
        self.outgoing.len() + matches!(self.tx, TxState::WaitReady { .. }) as usize
    }

    pub fn rx_state(&self) -> ChannelState {
        match self.rx {
            RxState::Idle => ChannelState::Idle,
            RxState::WaitAck { .. } => ChannelState::WaitAck,
        }
    }

    pub fn tx_state(&self) -> ChannelState {
        match self.tx {
            TxState::Idle => ChannelState::Idle,
            TxState::WaitReady { .. } => ChannelState::WaitReady,
        }
    }

    /// Outputs for this cycle given what the producer is driving.
    ///
    /// `rx_ack` and `tx_start` are both qualified by the producer's lines,
    /// so neither can pulse without its partner condition.
    pub fn outputs(&self, inputs: &ConsumerInputs) -> ConsumerOutputs {
        let rx_ack = matches!(self.rx, RxState::WaitAck { remaining: 0 }) && inputs.rx_valid;
        let (tx_start, tx_len) = match &self.tx {
            TxState::WaitReady { frame } => (inputs.tx_ready, frame.len()),
            TxState::Idle => (false, 0),
        };
        ConsumerOutputs {
            rx_ack,
            tx_start,
            tx_len,
        }
    }

    /// The TX write port: the frame loaded for the next `tx_start`.
    pub fn tx_port(&self) -> Option<&Frame> {
        match &self.tx {
            TxState::WaitReady { frame } => Some(frame),
            TxState::Idle => None,
        }
    }

    /// Clock edge. `rx_port` is the producer's RX read port as it stands
    /// during this cycle.
    pub fn clock(
        &mut self,
        inputs: &ConsumerInputs,
        rx_port: Option<Frame>,
    ) -> Result<(), ProtocolViolation> {
        let cycle = self.cycle;
        let outputs = self.outputs(inputs);
        self.cycle += 1;

        self.clock_rx(cycle, inputs, &outputs, rx_port)?;
        self.clock_tx(cycle, inputs, &outputs);
        Ok(())
    }

    fn clock_rx(
        &mut self,
        cycle: u64,
        inputs: &ConsumerInputs,
        outputs: &ConsumerOutputs,
        rx_port: Option<Frame>,
    ) -> Result<(), ProtocolViolation> {
        self.rx = match self.rx {
            RxState::Idle if inputs.rx_valid => {
                trace!(cycle, len = inputs.rx_len, "rx_valid seen");
                RxState::WaitAck {
                    remaining: self.config.consume_cycles,
                }
            }
            RxState::Idle => RxState::Idle,
            RxState::WaitAck { .. } if outputs.rx_ack => {
                // Ownership passes here: the producer drops its copy on the
                // same edge.
                let available = rx_port.as_ref().map_or(0, Frame::len);
                let frame = rx_port
                    .and_then(|f| f.prefix(inputs.rx_len))
                    .ok_or(ProtocolViolation::RxLenOverrun {
                        cycle,
                        len: inputs.rx_len,
                        available,
                    })?;
                self.deliver(cycle, frame);
                RxState::Idle
            }
            RxState::WaitAck { remaining } => RxState::WaitAck {
                remaining: remaining.saturating_sub(1),
            },
        };
        Ok(())
    }

    fn deliver(&mut self, cycle: u64, frame: Frame) {
        debug!(cycle, len = frame.len(), "RX frame consumed");
        if let Some(reply) = self.behavior.on_frame(&frame) {
            self.outgoing.push_back(reply);
        }
        self.received.push(frame);
    }

    fn clock_tx(&mut self, cycle: u64, inputs: &ConsumerInputs, outputs: &ConsumerOutputs) {
        match &self.tx {
            TxState::Idle if inputs.tx_ready => {
                if let Some(frame) = self.outgoing.pop_front() {
                    trace!(cycle, len = frame.len(), "tx_ready seen, frame loaded");
                    self.tx = TxState::WaitReady { frame };
                }
            }
            TxState::WaitReady { frame } if outputs.tx_start => {
                debug!(cycle, len = frame.len(), "TX frame started");
                self.tx = TxState::Idle;
            }
            _ => {}
        }
    }
}

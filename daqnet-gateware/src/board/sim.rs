//! Cycle stepping of a composed board.

use bytes::Bytes;
use strum::EnumCount;

use super::{compose, ComposedBoard, Driver, IndicatorSource, Leds, Port};
use crate::blinker::LedBlinker;
use crate::clock::ClockBringup;
use crate::config::BoardConfig;
use crate::consumer::IpStack;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::handshake::{
    ChannelState, ConsumerInputs, ConsumerOutputs, ProducerInputs, ProducerOutputs, RxLines,
    RxMonitor, TxLines, TxMonitor,
};
use crate::link::LinkStatusSink;
use crate::platform::Platform;
use crate::producer::{Mac, MacStats};
use crate::trace::{Sample, Trace};
use crate::tracing::prelude::*;

/// Current value of every handshake port.
#[derive(Debug, Default)]
struct SignalBus([u16; Port::COUNT]);

impl SignalBus {
    fn get(&self, port: Port) -> u16 {
        self.0[port as usize]
    }

    fn set(&mut self, port: Port, value: u16) {
        self.0[port as usize] = value;
    }

    fn drive_producer(&mut self, out: ProducerOutputs) {
        self.set(Port::MacRxValid, out.rx_valid as u16);
        self.set(Port::MacRxLen, out.rx_len);
        self.set(Port::MacTxReady, out.tx_ready as u16);
    }

    fn drive_consumer(&mut self, out: ConsumerOutputs) {
        self.set(Port::StackRxAck, out.rx_ack as u16);
        self.set(Port::StackTxStart, out.tx_start as u16);
        self.set(Port::StackTxLen, out.tx_len);
    }

    fn settle(&mut self, bindings: &[super::Binding]) {
        for binding in bindings {
            let value = match binding.driver {
                Driver::Port(port) => self.get(port),
                Driver::Const(value) => value,
            };
            self.set(binding.sink, value);
        }
    }

    fn producer_inputs(&self) -> ProducerInputs {
        ProducerInputs {
            rx_ack: self.get(Port::MacRxAck) != 0,
            tx_start: self.get(Port::MacTxStart) != 0,
            tx_len: self.get(Port::MacTxLen),
        }
    }

    fn consumer_inputs(&self) -> ConsumerInputs {
        ConsumerInputs {
            rx_valid: self.get(Port::StackRxValid) != 0,
            rx_len: self.get(Port::StackRxLen),
            tx_ready: self.get(Port::StackTxReady) != 0,
        }
    }
}

/// Settled lines for one cycle.
#[derive(Debug, Clone, Copy)]
struct Lines {
    producer_out: ProducerOutputs,
    producer_in: ProducerInputs,
    consumer_in: ConsumerInputs,
}

impl Lines {
    fn rx(&self) -> RxLines {
        RxLines {
            valid: self.producer_out.rx_valid,
            len: self.producer_out.rx_len,
            ack: self.producer_in.rx_ack,
        }
    }

    fn tx(&self) -> TxLines {
        TxLines {
            ready: self.producer_out.tx_ready,
            start: self.producer_in.tx_start,
            len: self.producer_in.tx_len,
        }
    }
}

/// A running board: one reference cycle per [`Board::step`].
pub struct Board {
    composed: ComposedBoard,
    clock: ClockBringup,
    mac: Option<Mac>,
    stack: Option<IpStack>,
    blinker: Option<LedBlinker>,
    link: Option<LinkStatusSink>,
    rx_monitor: RxMonitor,
    tx_monitor: TxMonitor,
    bus: SignalBus,
    sync_cycles: u64,
    // Domain still held in reset; released on its first edge.
    in_reset: bool,
    trace: Trace,
}

impl Board {
    pub fn new(composed: ComposedBoard) -> Result<Self> {
        let config = composed.config();
        let clock = ClockBringup::new(
            composed.pll(),
            config.oscillator_hz,
            config.lock_delay_cycles,
            composed.domain().clone(),
        )?;
        let mac = composed
            .mac()
            .map(|block| Mac::new(block.config.clone(), config.loopback));
        let stack = composed.stack().cloned().map(IpStack::new);
        let blinker = composed.blinker_bits().map(LedBlinker::new).transpose()?;
        let link = mac.as_ref().map(|_| LinkStatusSink::new());
        let trace = Trace::new(composed.variant(), config.trace_limit);
        let in_reset = !composed.domain().is_reset_less();

        info!(
            variant = %composed.variant(),
            platform = composed.platform(),
            derived_mhz = clock.derived_hz() / 1e6,
            stack = stack.is_some(),
            "Board ready"
        );
        Ok(Self {
            composed,
            clock,
            mac,
            stack,
            blinker,
            link,
            rx_monitor: RxMonitor::new(),
            tx_monitor: TxMonitor::new(),
            bus: SignalBus::default(),
            sync_cycles: 0,
            in_reset,
            trace,
        })
    }

    /// Compose `config` on its variant's platform and build the board.
    pub fn build(config: &BoardConfig) -> Result<Self> {
        Self::new(compose(config, Platform::for_variant(config.variant))?)
    }

    pub fn composed(&self) -> &ComposedBoard {
        &self.composed
    }

    /// Put a frame on the wire towards the MAC.
    pub fn inject(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let mac = self
            .mac
            .as_mut()
            .ok_or_else(|| Error::Config("board has no MAC to receive frames".into()))?;
        mac.receive_from_wire(data);
        Ok(())
    }

    /// Queue a frame for the IP stack to transmit. Unlike [`Board::inject`],
    /// a payload above the MTU is refused here rather than dropped later.
    pub fn submit(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let stack = self
            .stack
            .as_mut()
            .ok_or_else(|| Error::Config("board has no IP stack to transmit from".into()))?;
        stack.submit(Frame::new(data)?);
        Ok(())
    }

    /// Advance one reference cycle.
    pub fn step(&mut self) -> Result<()> {
        let reference_cycle = self.clock.reference_cycles();
        let edges = self.clock.tick();
        if edges == 0 {
            let lines = self.evaluate();
            let sample = self.sample(reference_cycle, None, &lines);
            self.trace.push(sample);
            return Ok(());
        }
        for _ in 0..edges {
            self.edge(reference_cycle)?;
        }
        Ok(())
    }

    pub fn run(&mut self, cycles: u64) -> Result<()> {
        for _ in 0..cycles {
            self.step()?;
        }
        Ok(())
    }

    /// Step until every frame has been delivered and sent. Returns the
    /// reference cycles taken, or `None` if still busy after `max_cycles`.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<Option<u64>> {
        for taken in 0..=max_cycles {
            if self.is_idle() {
                return Ok(Some(taken));
            }
            if taken < max_cycles {
                self.step()?;
            }
        }
        Ok(None)
    }

    /// Locked, with no frame anywhere between the wire and the stack.
    pub fn is_idle(&self) -> bool {
        let mac_idle = self.mac.as_ref().map_or(true, |mac| {
            mac.wire_backlog() == 0 && mac.rx_port().is_none() && !mac.is_draining()
        });
        let stack_idle = self.stack.as_ref().map_or(true, |stack| {
            stack.rx_state() == ChannelState::Idle
                && stack.tx_state() == ChannelState::Idle
                && stack.pending_tx() == 0
        });
        self.clock.is_locked() && self.rx_monitor.is_idle() && mac_idle && stack_idle
    }

    pub fn is_locked(&self) -> bool {
        self.clock.is_locked()
    }

    pub fn reference_cycles(&self) -> u64 {
        self.clock.reference_cycles()
    }

    /// Edges seen by the sync domain.
    pub fn sync_cycles(&self) -> u64 {
        self.sync_cycles
    }

    pub fn mac(&self) -> Option<&Mac> {
        self.mac.as_ref()
    }

    pub fn stack(&self) -> Option<&IpStack> {
        self.stack.as_ref()
    }

    pub fn link(&self) -> Option<&LinkStatusSink> {
        self.link.as_ref()
    }

    pub fn mac_stats(&self) -> MacStats {
        self.mac.as_ref().map(Mac::stats).unwrap_or_default()
    }

    /// Frames the IP stack has taken from the MAC.
    pub fn received(&self) -> &[Frame] {
        self.stack.as_ref().map(IpStack::received).unwrap_or_default()
    }

    /// Frames the MAC has put on the wire.
    pub fn wire_out(&self) -> &[Frame] {
        self.mac.as_ref().map(Mac::wire_out).unwrap_or_default()
    }

    /// Cycles the frame now offered on RX has waited for its ack.
    pub fn rx_stall_cycles(&self) -> u64 {
        self.rx_monitor.stall_cycles()
    }

    /// Current state of the indicator pins.
    pub fn indicators(&self) -> Leds {
        let status = self.mac.as_ref().map(Mac::status).unwrap_or_default();
        self.composed
            .indicators()
            .iter()
            .filter(|indicator| match indicator.source {
                IndicatorSource::Blinker => self.blinker.as_ref().is_some_and(LedBlinker::led),
                IndicatorSource::LinkUp => status.link_up,
                IndicatorSource::EthLed => status.eth_led,
            })
            .fold(Leds::empty(), |leds, indicator| leds | indicator.led)
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }

    /// Settle the bindings for the current state.
    fn evaluate(&mut self) -> Lines {
        let bindings = self.composed.bindings();
        let producer_out = self.mac.as_ref().map(Mac::outputs).unwrap_or_default();
        if self.mac.is_some() {
            self.bus.drive_producer(producer_out);
        }
        self.bus.settle(bindings);

        let consumer_in = self.bus.consumer_inputs();
        if let Some(stack) = &self.stack {
            self.bus.drive_consumer(stack.outputs(&consumer_in));
        }
        self.bus.settle(bindings);

        Lines {
            producer_out,
            producer_in: self.bus.producer_inputs(),
            consumer_in,
        }
    }

    fn sample(&self, reference_cycle: u64, sync_cycle: Option<u64>, lines: &Lines) -> Sample {
        Sample {
            reference_cycle,
            sync_cycle,
            locked: self.clock.is_locked(),
            rx: lines.rx(),
            tx: lines.tx(),
            consumer_view: self.stack.as_ref().map(|_| lines.consumer_in),
            status: self.mac.as_ref().map(Mac::status),
            indicators: self.indicators().bits(),
        }
    }

    fn edge(&mut self, reference_cycle: u64) -> Result<()> {
        let cycle = self.sync_cycles;
        self.sync_cycles += 1;

        if self.in_reset {
            self.in_reset = false;
            self.reset_components();
            debug!(cycle, domain = self.composed.domain().name(), "Reset released");
        }

        let lines = self.evaluate();
        self.check(cycle, &lines)?;
        if let (Some(link), Some(mac)) = (self.link.as_mut(), self.mac.as_ref()) {
            link.observe(cycle, mac.status());
        }
        let sample = self.sample(reference_cycle, Some(cycle), &lines);
        self.trace.push(sample);

        // Ports as they stand this cycle; each side drops its copy on the
        // edge where the other takes it.
        let rx_port = self.mac.as_ref().and_then(|mac| mac.rx_port().cloned());
        let tx_port = self.stack.as_ref().and_then(|stack| stack.tx_port().cloned());
        if let Some(mac) = self.mac.as_mut() {
            mac.clock(&lines.producer_in, tx_port).map_err(|e| {
                error!(cycle, error = %e, "MAC rejected its inputs");
                Error::from(e)
            })?;
        }
        if let Some(stack) = self.stack.as_mut() {
            stack.clock(&lines.consumer_in, rx_port).map_err(|e| {
                error!(cycle, error = %e, "IP stack rejected its inputs");
                Error::from(e)
            })?;
        }
        if let Some(blinker) = self.blinker.as_mut() {
            blinker.clock();
        }
        Ok(())
    }

    fn check(&mut self, cycle: u64, lines: &Lines) -> Result<()> {
        self.rx_monitor
            .check(cycle, lines.rx())
            .and_then(|_| self.tx_monitor.check(cycle, lines.tx()))
            .map_err(|e| {
                error!(cycle, error = %e, "Handshake violation");
                Error::from(e)
            })
    }

    fn reset_components(&mut self) {
        if let Some(mac) = self.mac.as_mut() {
            mac.reset();
        }
        if let Some(stack) = self.stack.as_mut() {
            stack.reset();
        }
        if let Some(blinker) = self.blinker.as_mut() {
            blinker.reset();
        }
    }
}

//! Board variants and their composition.
//!
//! Each [`BoardVariant`] is a recipe: which blocks exist, which clock domain
//! they share, how the MAC's handshake lines bind to the IP stack's, and
//! which signal drives each indicator pin. [`compose`] follows the recipe
//! once and returns an immutable [`ComposedBoard`]; [`Board`] then runs it.

mod sim;

pub use sim::Board;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

use crate::clock::{ClockDomain, PllConfig};
use crate::config::BoardConfig;
use crate::consumer::StackConfig;
use crate::error::{Error, Result};
use crate::platform::{Platform, Resource};
use crate::producer::MacConfig;
use crate::tracing::prelude::*;

/// Width of the Sensor board's LED divider.
pub const SENSOR_BLINKER_BITS: u8 = 23;

/// Board variant. Chosen once at configuration time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BoardVariant {
    /// PLL and a blinking LED; no network.
    Sensor,
    /// PLL, MAC and, unless disabled, the IP stack.
    Switch,
    /// The first switch prototype: MAC and IP stack in a reset domain, with
    /// the Ethernet LED and link state mirrored on the user LEDs.
    ProtoSwitch,
}

impl BoardVariant {
    /// Whether the variant carries an Ethernet MAC.
    pub fn has_network(self) -> bool {
        !matches!(self, BoardVariant::Sensor)
    }
}

bitflags! {
    /// Indicator pins, one bit each.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Leds: u8 {
        const ETH_LED = 1 << 0;
        const USER_LED_0 = 1 << 1;
        const USER_LED_1 = 1 << 2;
        const USER_LED_2 = 1 << 3;
        const USER_LED_3 = 1 << 4;
    }
}

impl Leds {
    /// The bit for an indicator pin resource.
    pub fn for_resource(resource: &Resource) -> Option<Self> {
        match (resource.name.as_str(), resource.number) {
            ("eth_led", 0) => Some(Leds::ETH_LED),
            ("user_led", n @ 0..=3) => Leds::from_bits(Leds::USER_LED_0.bits() << n),
            _ => None,
        }
    }
}

/// What drives an indicator pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorSource {
    /// MSB of the free-running divider.
    Blinker,
    LinkUp,
    EthLed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub pin: Resource,
    pub led: Leds,
    pub source: IndicatorSource,
}

/// Which block a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Mac,
    Stack,
}

/// Handshake ports of the MAC and the IP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumCount, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Port {
    MacRxValid,
    MacRxLen,
    MacTxReady,
    MacRxAck,
    MacTxStart,
    MacTxLen,
    StackRxValid,
    StackRxLen,
    StackTxReady,
    StackRxAck,
    StackTxStart,
    StackTxLen,
}

impl Port {
    pub fn block(self) -> Block {
        match self {
            Port::MacRxValid
            | Port::MacRxLen
            | Port::MacTxReady
            | Port::MacRxAck
            | Port::MacTxStart
            | Port::MacTxLen => Block::Mac,
            _ => Block::Stack,
        }
    }

    /// Driven by its block, as opposed to sampled by it.
    pub fn is_output(self) -> bool {
        matches!(
            self,
            Port::MacRxValid
                | Port::MacRxLen
                | Port::MacTxReady
                | Port::StackRxAck
                | Port::StackTxStart
                | Port::StackTxLen
        )
    }
}

/// Source of a bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Port(Port),
    Const(u16),
}

/// `sink` takes its value from `driver` every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub sink: Port,
    pub driver: Driver,
}

/// MAC instance parameters and the pads it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct MacBlock {
    pub config: MacConfig,
    pub rmii: Resource,
    pub phy_rst: Resource,
}

/// A fully wired board. Built by [`compose`]; never changed afterwards.
#[derive(Debug, Clone)]
pub struct ComposedBoard {
    config: BoardConfig,
    platform: String,
    clk_pin: Resource,
    domain: ClockDomain,
    mac: Option<MacBlock>,
    stack: Option<StackConfig>,
    blinker_bits: Option<u8>,
    bindings: Vec<Binding>,
    indicators: Vec<Indicator>,
    resources: Vec<Resource>,
}

impl ComposedBoard {
    pub fn variant(&self) -> BoardVariant {
        self.config.variant
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn clk_pin(&self) -> &Resource {
        &self.clk_pin
    }

    pub fn pll(&self) -> PllConfig {
        self.config.pll
    }

    pub fn domain(&self) -> &ClockDomain {
        &self.domain
    }

    pub fn mac(&self) -> Option<&MacBlock> {
        self.mac.as_ref()
    }

    pub fn stack(&self) -> Option<&StackConfig> {
        self.stack.as_ref()
    }

    pub fn blinker_bits(&self) -> Option<u8> {
        self.blinker_bits
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    /// Every platform resource the design uses.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// The binding feeding `sink`, if any.
    pub fn driver_of(&self, sink: Port) -> Option<Driver> {
        self.bindings
            .iter()
            .find(|b| b.sink == sink)
            .map(|b| b.driver)
    }

    /// True when the MAC exists but its handshake inputs are tied off.
    pub fn consumer_disabled(&self) -> bool {
        self.mac.is_some() && self.stack.is_none()
    }
}

/// Build the design for `config.variant` from the resources of `platform`.
pub fn compose(config: &BoardConfig, mut platform: Platform) -> Result<ComposedBoard> {
    config.validate()?;
    let variant = config.variant;
    let clk_pin = platform.request("clk25")?;

    let mut indicators = Vec::new();
    let mut mac = None;
    let mut stack = None;
    let mut blinker_bits = None;

    let domain = match variant {
        BoardVariant::Sensor => {
            blinker_bits = Some(SENSOR_BLINKER_BITS);
            let led = platform.request_number("user_led", 3)?;
            indicators.push(indicator(led, IndicatorSource::Blinker)?);
            ClockDomain::new("sync", true)
        }
        BoardVariant::Switch => {
            let block = mac_block(config, &mut platform)?;
            let eth_led = platform.request("eth_led")?;
            indicators.push(indicator(eth_led, IndicatorSource::EthLed)?);
            mac = Some(block);
            ClockDomain::new("sync", true)
        }
        BoardVariant::ProtoSwitch => {
            let block = mac_block(config, &mut platform)?;
            let eth_led = platform.request("eth_led")?;
            let led1 = platform.request("user_led")?;
            let led2 = platform.request("user_led")?;
            indicators.push(indicator(eth_led, IndicatorSource::EthLed)?);
            indicators.push(indicator(led1, IndicatorSource::EthLed)?);
            indicators.push(indicator(led2, IndicatorSource::LinkUp)?);
            mac = Some(block);
            ClockDomain::new("sys", false)
        }
    };

    if mac.is_some() && config.consumer_enabled {
        stack = Some(StackConfig {
            mac_addr: config.mac_addr,
            ip4_addr: config.ip4_addr,
            consume_cycles: config.stack.consume_cycles,
            behavior: config.stack.behavior,
        });
    }

    let bindings = match (&mac, &stack) {
        (Some(_), Some(_)) => handshake_bindings(),
        (Some(_), None) => {
            info!(%variant, "IP stack disabled, tying off MAC handshake inputs");
            tie_off_bindings()
        }
        _ => Vec::new(),
    };
    check_bindings(&bindings, mac.is_some(), stack.is_some())?;

    let composed = ComposedBoard {
        config: config.clone(),
        platform: platform.name().to_string(),
        clk_pin,
        domain,
        mac,
        stack,
        blinker_bits,
        bindings,
        indicators,
        resources: platform.claimed(),
    };
    debug!(
        %variant,
        domain = composed.domain.name(),
        reset_less = composed.domain.is_reset_less(),
        bindings = composed.bindings.len(),
        indicators = composed.indicators.len(),
        "Board composed"
    );
    Ok(composed)
}

fn indicator(pin: Resource, source: IndicatorSource) -> Result<Indicator> {
    let led = Leds::for_resource(&pin)
        .ok_or_else(|| Error::Config(format!("{} cannot drive an indicator", pin.id())))?;
    Ok(Indicator { pin, led, source })
}

fn mac_block(config: &BoardConfig, platform: &mut Platform) -> Result<MacBlock> {
    let rmii = platform.request("rmii")?;
    let phy_rst = platform.request("phy_rst")?;
    let clk_freq_hz = config.pll.output_hz(config.oscillator_hz);
    Ok(MacBlock {
        config: MacConfig {
            clk_freq_hz,
            phy_addr: config.phy.phy_addr,
            mac_addr: config.mac_addr,
            phy_reset_us: config.phy.reset_us,
            link_negotiation_us: config.phy.link_negotiation_us,
            cycles_per_byte: MacConfig::rmii_cycles_per_byte(clk_freq_hz),
        },
        rmii,
        phy_rst,
    })
}

/// MAC and stack wired to each other one-to-one.
fn handshake_bindings() -> Vec<Binding> {
    [
        (Port::StackRxValid, Port::MacRxValid),
        (Port::StackRxLen, Port::MacRxLen),
        (Port::StackTxReady, Port::MacTxReady),
        (Port::MacRxAck, Port::StackRxAck),
        (Port::MacTxStart, Port::StackTxStart),
        (Port::MacTxLen, Port::StackTxLen),
    ]
    .into_iter()
    .map(|(sink, source)| Binding {
        sink,
        driver: Driver::Port(source),
    })
    .collect()
}

/// No stack: the MAC never sees an ack or a start, so frames it receives
/// stay in its buffer and nothing is transmitted.
fn tie_off_bindings() -> Vec<Binding> {
    [Port::MacRxAck, Port::MacTxStart, Port::MacTxLen]
        .into_iter()
        .map(|sink| Binding {
            sink,
            driver: Driver::Const(0),
        })
        .collect()
}

/// Every input of an instantiated block is bound exactly once, from an
/// output of an instantiated block.
fn check_bindings(bindings: &[Binding], has_mac: bool, has_stack: bool) -> Result<()> {
    let present = |block: Block| match block {
        Block::Mac => has_mac,
        Block::Stack => has_stack,
    };
    for b in bindings {
        if b.sink.is_output() || !present(b.sink.block()) {
            return Err(Error::Config(format!("{} cannot be bound as an input", b.sink)));
        }
        if let Driver::Port(p) = b.driver {
            if !p.is_output() || !present(p.block()) {
                return Err(Error::Config(format!("{} cannot drive {}", p, b.sink)));
            }
        }
    }
    for port in Port::iter().filter(|p| !p.is_output() && present(p.block())) {
        match bindings.iter().filter(|b| b.sink == port).count() {
            1 => {}
            0 => return Err(Error::Config(format!("{} is left unbound", port))),
            n => return Err(Error::Config(format!("{} is bound {} times", port, n))),
        }
    }
    Ok(())
}

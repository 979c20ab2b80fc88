//! Board configuration.
//!
//! A [`BoardConfig`] holds everything the composer needs besides the
//! platform resources: the variant, the address literals, the oscillator
//! frequency and the model parameters. It loads from JSON; missing fields
//! take the defaults of the named variant.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::board::BoardVariant;
use crate::clock::PllConfig;
use crate::consumer::BehaviorKind;
use crate::error::{Error, Result};
use crate::platform::CLK25_HZ;
use crate::types::MacAddress;

/// Address the boards ship with.
pub const DEFAULT_MAC_ADDR: MacAddress = MacAddress::new([0x02, 0x44, 0x4e, 0x30, 0x76, 0x9e]);

/// IPv4 address the boards ship with.
pub const DEFAULT_IP4_ADDR: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 5);

/// Main configuration structure for a board.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BoardConfig {
    pub variant: BoardVariant,

    /// 48-bit hardware address
    pub mac_addr: MacAddress,

    /// 32-bit network address
    pub ip4_addr: Ipv4Addr,

    /// Reference oscillator frequency; only feeds timing derivation
    pub oscillator_hz: f64,

    pub pll: PllConfig,

    /// Reference cycles before the PLL locks; `null` for never
    pub lock_delay_cycles: Option<u64>,

    /// Wire the IP stack to the MAC (Switch only)
    pub consumer_enabled: bool,

    /// Feed transmitted frames back into the MAC's receive side
    pub loopback: bool,

    pub phy: PhyConfig,

    pub stack: StackSettings,

    /// Maximum samples kept in the trace
    pub trace_limit: usize,
}

/// PHY timing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PhyConfig {
    pub phy_addr: u8,
    pub reset_us: f64,
    pub link_negotiation_us: f64,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            phy_addr: 0,
            reset_us: 10.0,
            link_negotiation_us: 20.0,
        }
    }
}

/// IP stack model settings.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StackSettings {
    pub consume_cycles: u32,
    pub behavior: BehaviorKind,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::for_variant(BoardVariant::Switch)
    }
}

impl BoardConfig {
    /// Defaults for a variant, matching the shipped boards.
    pub fn for_variant(variant: BoardVariant) -> Self {
        Self {
            variant,
            mac_addr: DEFAULT_MAC_ADDR,
            ip4_addr: DEFAULT_IP4_ADDR,
            oscillator_hz: CLK25_HZ,
            pll: PllConfig::default(),
            lock_delay_cycles: Some(100),
            consumer_enabled: variant != BoardVariant::Sensor,
            loopback: false,
            phy: PhyConfig::default(),
            stack: StackSettings::default(),
            trace_limit: 1 << 20,
        }
    }

    /// Load configuration from a JSON file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse a JSON config. Fields left out take the defaults of the
    /// variant named in the file, or of the Switch if none is named.
    pub fn from_json(text: &str) -> Result<Self> {
        let serde_json::Value::Object(overrides) = serde_json::from_str::<serde_json::Value>(text)? else {
            return Err(Error::Config("config must be a JSON object".into()));
        };
        let variant = match overrides.get("variant") {
            Some(v) => BoardVariant::deserialize(v)?,
            None => BoardVariant::Switch,
        };
        let mut merged = serde_json::to_value(Self::for_variant(variant))?;
        merge(&mut merged, serde_json::Value::Object(overrides));
        let config: Self = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not depend on the platform.
    pub fn validate(&self) -> Result<()> {
        if !(self.oscillator_hz.is_finite() && self.oscillator_hz > 0.0) {
            return Err(Error::Config(format!(
                "oscillator frequency {} is not positive",
                self.oscillator_hz
            )));
        }
        if self.phy.reset_us < 0.0 || self.phy.link_negotiation_us < 0.0 {
            return Err(Error::Config("PHY durations must not be negative".into()));
        }
        if self.variant == BoardVariant::Sensor && self.consumer_enabled {
            return Err(Error::Config(
                "the sensor variant has no network stack to enable".into(),
            ));
        }
        if self.variant == BoardVariant::Sensor && self.loopback {
            return Err(Error::Config("the sensor variant has no MAC to loop back".into()));
        }
        self.pll.validate(self.oscillator_hz)
    }
}

/// Overlay `overrides` onto `base`. Objects merge key by key at every
/// depth; any other value replaces what was there, `null` included.
fn merge(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

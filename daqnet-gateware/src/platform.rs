//! Physical resources a board offers to the composer.
//!
//! Pads are modelled only by name and direction. A resource can be requested
//! once; asking for `user_led` hands out the next unclaimed user LED.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::board::BoardVariant;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
    Bidirectional,
}

/// A named pad or group of pads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub number: u8,
    pub dir: Direction,
    /// Pad names, more than one for a group such as `rmii`.
    pub pins: Vec<String>,
}

impl Resource {
    fn pin(name: &str, number: u8, dir: Direction) -> Self {
        Self {
            name: name.to_string(),
            number,
            dir,
            pins: vec![format!("{}_{}", name, number)],
        }
    }

    fn group(name: &str, dir: Direction, pins: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            number: 0,
            dir,
            pins: pins.iter().map(|p| format!("{}_{}", name, p)).collect(),
        }
    }

    /// `name_number`, as used for indicator pins.
    pub fn id(&self) -> String {
        format!("{}_{}", self.name, self.number)
    }
}

/// Reference oscillator feeding the PLL input pad.
pub const CLK25_HZ: f64 = 25e6;

/// The resources of one board, with a record of what has been claimed.
#[derive(Debug, Clone)]
pub struct Platform {
    name: String,
    resources: Vec<Resource>,
    claimed: Vec<bool>,
}

impl Platform {
    pub fn new(name: &str, resources: Vec<Resource>) -> Self {
        let claimed = vec![false; resources.len()];
        Self {
            name: name.to_string(),
            resources,
            claimed,
        }
    }

    /// The sensor board: oscillator and four user LEDs.
    pub fn sensor() -> Self {
        let mut resources = vec![Resource::pin("clk25", 0, Direction::Input)];
        resources.extend((0..4).map(|n| Resource::pin("user_led", n, Direction::Output)));
        Self::new("daqnet-sensor", resources)
    }

    /// The switch board: oscillator, RMII PHY, PHY reset, Ethernet LED and
    /// two user LEDs.
    pub fn switch() -> Self {
        let mut resources = vec![
            Resource::pin("clk25", 0, Direction::Input),
            Resource::group(
                "rmii",
                Direction::Bidirectional,
                &["ref_clk", "crs_dv", "rxd0", "rxd1", "txen", "txd0", "txd1", "mdc", "mdio"],
            ),
            Resource::pin("phy_rst", 0, Direction::Output),
            Resource::pin("eth_led", 0, Direction::Output),
        ];
        resources.extend((0..2).map(|n| Resource::pin("user_led", n, Direction::Output)));
        Self::new("daqnet-switch", resources)
    }

    /// The platform each variant is built for.
    pub fn for_variant(variant: BoardVariant) -> Self {
        match variant {
            BoardVariant::Sensor => Self::sensor(),
            BoardVariant::Switch | BoardVariant::ProtoSwitch => Self::switch(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim the first unclaimed resource called `name`.
    pub fn request(&mut self, name: &str) -> Result<Resource> {
        self.claim(|r| r.name == name)
            .ok_or_else(|| self.missing(name))
    }

    /// Claim a specific numbered resource, e.g. `user_led` 3.
    pub fn request_number(&mut self, name: &str, number: u8) -> Result<Resource> {
        self.claim(|r| r.name == name && r.number == number)
            .ok_or_else(|| self.missing(&format!("{}_{}", name, number)))
    }

    fn claim(&mut self, pred: impl Fn(&Resource) -> bool) -> Option<Resource> {
        let idx = self
            .resources
            .iter()
            .zip(&self.claimed)
            .position(|(r, claimed)| !claimed && pred(r))?;
        self.claimed[idx] = true;
        Some(self.resources[idx].clone())
    }

    fn missing(&self, what: &str) -> Error {
        Error::Config(format!(
            "platform {} has no unclaimed resource {}",
            self.name, what
        ))
    }

    /// Every claimed resource, in platform order.
    pub fn claimed(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .zip(&self.claimed)
            .filter(|(_, claimed)| **claimed)
            .map(|(r, _)| r.clone())
            .collect()
    }
}

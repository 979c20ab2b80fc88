//! PLL bring-up and the synchronous clock domain it drives.
//!
//! The boards run from a 25 MHz oscillator. An iCE40 `SB_PLL40_PAD` style
//! PLL multiplies it up to the system clock, and nothing in the derived
//! domain sees an edge until the PLL reports lock. Lock is sticky: there is
//! no model of losing it again.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

// Hardware limits of the iCE40 PLL in simple feedback mode.
const DIVR_MAX: u8 = 15;
const DIVF_MAX: u8 = 127;
const DIVQ_RANGE: std::ops::RangeInclusive<u8> = 1..=6;
const FILTER_RANGE_MAX: u8 = 7;
const PFD_HZ: std::ops::RangeInclusive<f64> = 10e6..=133e6;
const VCO_HZ: std::ops::RangeInclusive<f64> = 533e6..=1066e6;

/// PLL divider settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PllConfig {
    pub divr: u8,
    pub divf: u8,
    pub divq: u8,
    pub filter_range: u8,
}

impl Default for PllConfig {
    /// 25 MHz in, 100 MHz out.
    fn default() -> Self {
        Self {
            divr: 0,
            divf: 31,
            divq: 3,
            filter_range: 2,
        }
    }
}

impl PllConfig {
    /// Check the dividers against the hardware ranges for a given reference.
    pub fn validate(&self, reference_hz: f64) -> Result<()> {
        if self.divr > DIVR_MAX {
            return Err(Error::Config(format!("PLL divr {} > {}", self.divr, DIVR_MAX)));
        }
        if self.divf > DIVF_MAX {
            return Err(Error::Config(format!("PLL divf {} > {}", self.divf, DIVF_MAX)));
        }
        if !DIVQ_RANGE.contains(&self.divq) {
            return Err(Error::Config(format!(
                "PLL divq {} outside {:?}",
                self.divq, DIVQ_RANGE
            )));
        }
        if self.filter_range > FILTER_RANGE_MAX {
            return Err(Error::Config(format!(
                "PLL filter_range {} > {}",
                self.filter_range, FILTER_RANGE_MAX
            )));
        }
        let pfd = reference_hz / (self.divr as f64 + 1.0);
        if !PFD_HZ.contains(&pfd) {
            return Err(Error::Config(format!(
                "PLL phase detector at {:.3} MHz is outside 10-133 MHz",
                pfd / 1e6
            )));
        }
        let vco = self.vco_hz(reference_hz);
        if !VCO_HZ.contains(&vco) {
            return Err(Error::Config(format!(
                "PLL VCO at {:.3} MHz is outside 533-1066 MHz",
                vco / 1e6
            )));
        }
        Ok(())
    }

    fn vco_hz(&self, reference_hz: f64) -> f64 {
        reference_hz * (self.divf as f64 + 1.0) / (self.divr as f64 + 1.0)
    }

    /// Output frequency for a given reference.
    pub fn output_hz(&self, reference_hz: f64) -> f64 {
        self.vco_hz(reference_hz) / (1u32 << self.divq) as f64
    }

    /// Derived edges per reference cycle, as an exact fraction.
    fn ratio(&self) -> (u64, u64) {
        let num = self.divf as u64 + 1;
        let den = (self.divr as u64 + 1) << self.divq;
        (num, den)
    }
}

/// A named synchronous domain.
///
/// Only [`ClockBringup`] can set `locked`; everything else sees the domain
/// through a shared reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomain {
    name: String,
    reset_less: bool,
    #[serde(skip)]
    locked: bool,
}

impl ClockDomain {
    pub fn new(name: &str, reset_less: bool) -> Self {
        Self {
            name: name.to_string(),
            reset_less,
            locked: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reset-less domains start from their initial values with no reset
    /// pulse when the clock comes up.
    pub fn is_reset_less(&self) -> bool {
        self.reset_less
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Reference clock, PLL and lock detector.
#[derive(Debug)]
pub struct ClockBringup {
    pll: PllConfig,
    reference_hz: f64,
    lock_delay: Option<u64>,
    reference_cycles: u64,
    // Fractional derived-edge accumulator, in units of 1/ratio.1.
    phase: u64,
    domain: ClockDomain,
}

impl ClockBringup {
    /// Set up the PLL. `lock_delay` is the number of reference cycles before
    /// lock asserts; `None` models a PLL that never locks.
    pub fn new(
        pll: PllConfig,
        reference_hz: f64,
        lock_delay: Option<u64>,
        domain: ClockDomain,
    ) -> Result<Self> {
        pll.validate(reference_hz)?;
        debug!(
            domain = domain.name(),
            reference_mhz = reference_hz / 1e6,
            derived_mhz = pll.output_hz(reference_hz) / 1e6,
            "PLL configured"
        );
        Ok(Self {
            pll,
            reference_hz,
            lock_delay,
            reference_cycles: 0,
            phase: 0,
            domain,
        })
    }

    pub fn domain(&self) -> &ClockDomain {
        &self.domain
    }

    pub fn is_locked(&self) -> bool {
        self.domain.locked
    }

    pub fn derived_hz(&self) -> f64 {
        self.pll.output_hz(self.reference_hz)
    }

    /// Reference cycles elapsed so far.
    pub fn reference_cycles(&self) -> u64 {
        self.reference_cycles
    }

    /// Advance one reference cycle and return how many derived edges the
    /// domain sees during it. Always zero until lock.
    pub fn tick(&mut self) -> u32 {
        let cycle = self.reference_cycles;
        self.reference_cycles += 1;

        if !self.domain.locked {
            match self.lock_delay {
                Some(delay) if cycle >= delay => {
                    self.domain.locked = true;
                    info!(domain = self.domain.name(), cycle, "PLL locked");
                }
                _ => return 0,
            }
        }

        let (num, den) = self.pll.ratio();
        self.phase += num;
        let edges = self.phase / den;
        self.phase %= den;
        edges as u32
    }
}

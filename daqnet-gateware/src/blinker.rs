//! Free-running LED divider.

use bitvec::prelude::*;

use crate::error::{Error, Result};

/// An `nbits` wide counter clocked by the sync domain; the LED follows the
/// top bit, so it toggles every `2^(nbits-1)` cycles.
#[derive(Debug, Clone)]
pub struct LedBlinker {
    nbits: u8,
    divider: u32,
}

impl LedBlinker {
    pub fn new(nbits: u8) -> Result<Self> {
        if !(1..=32).contains(&nbits) {
            return Err(Error::Config(format!(
                "blinker width {} outside 1-32 bits",
                nbits
            )));
        }
        Ok(Self { nbits, divider: 0 })
    }

    pub fn reset(&mut self) {
        self.divider = 0;
    }

    pub fn clock(&mut self) {
        let next = self.divider.wrapping_add(1);
        self.divider = if self.nbits == 32 {
            next
        } else {
            next & ((1u32 << self.nbits) - 1)
        };
    }

    pub fn led(&self) -> bool {
        self.divider.view_bits::<Lsb0>()[self.nbits as usize - 1]
    }
}

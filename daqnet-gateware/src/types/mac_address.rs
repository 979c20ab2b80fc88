//! 48-bit hardware address literal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ethernet hardware address, written `02:44:4E:30:76:9E`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacAddressError {
    #[error("expected six colon-separated octets, got {0:?}")]
    Format(String),
    #[error("invalid hex in {0:?}")]
    Hex(String),
}

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = MacAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
            return Err(MacAddressError::Format(s.to_string()));
        }
        let mut octets = [0u8; 6];
        hex::decode_to_slice(parts.concat(), &mut octets)
            .map_err(|_| MacAddressError::Hex(s.to_string()))?;
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacAddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(addr: MacAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode_upper(self.0);
        let octets: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
        write!(f, "{}", octets.join(":"))
    }
}

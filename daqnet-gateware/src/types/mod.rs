//! Small value types shared across the model.

mod mac_address;

pub use mac_address::{MacAddress, MacAddressError};

//! Mijia thermometer protocol - GATT identifiers, channel configuration and
//! payload decoding.
//!
//! This crate holds everything that is fixed by the sensor firmware: which
//! service the devices advertise, which characteristics carry data, and how
//! the raw bytes map to readings. The radio handling lives in `mijia-sensor`.

mod ble;
mod reading;

pub use ble::{
    default_specs, ChannelAccess, ChannelSpec, ADVERTISED_SERVICE, BATTERY_UUID, KIND_BATTERY,
    KIND_VALUES, VALUES_UUID,
};
pub use reading::{decode, DecodeError, Reading};

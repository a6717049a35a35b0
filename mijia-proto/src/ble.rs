//! BLE GATT identifiers for Mijia thermometers
//!
//! Service and characteristic UUIDs broadcast by the sensors, plus the
//! channel configuration that tells an acquisition run which characteristics
//! to collect and how.

use uuid::Uuid;

/// Service UUID advertised by Mijia sensors (16-bit 0xfe95, Xiaomi Inc.),
/// used to filter discovery.
pub const ADVERTISED_SERVICE: Uuid = Uuid::from_u128(0x0000fe95_0000_1000_8000_00805f9b34fb);

/// Battery Level characteristic (read), standard 16-bit 0x2a19.
pub const BATTERY_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Combined temperature/humidity characteristic (notify).
pub const VALUES_UUID: Uuid = Uuid::from_u128(0xebe0ccc1_7a0a_4b0c_8a1a_6ff2997da3a6);

/// Channel label for the battery level reading.
pub const KIND_BATTERY: &str = "battery";

/// Channel label for the temperature/humidity reading.
pub const KIND_VALUES: &str = "values";

/// How a channel's value is fetched from a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAccess {
    /// One-shot characteristic read.
    Read,
    /// Subscribe, keep the first notification, unsubscribe.
    Notify,
}

/// One configured data channel: a characteristic and the semantic label its
/// decoded reading is recorded under.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub uuid: Uuid,
    pub kind: String,
    pub access: ChannelAccess,
}

impl ChannelSpec {
    pub fn new(uuid: Uuid, kind: &str, access: ChannelAccess) -> Self {
        Self {
            uuid,
            kind: kind.to_string(),
            access,
        }
    }
}

/// Default channel set for Mijia thermometers: battery level plus the
/// combined temperature/humidity feed.
///
/// Some firmware variants mark the battery characteristic notify-only;
/// callers with such devices can supply the same spec with
/// [`ChannelAccess::Notify`] instead.
pub fn default_specs() -> Vec<ChannelSpec> {
    vec![
        ChannelSpec::new(BATTERY_UUID, KIND_BATTERY, ChannelAccess::Read),
        ChannelSpec::new(VALUES_UUID, KIND_VALUES, ChannelAccess::Notify),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_specs_cover_two_distinct_kinds() {
        let specs = default_specs();
        assert_eq!(specs.len(), 2);
        assert_ne!(specs[0].kind, specs[1].kind);
        assert_eq!(specs[0].access, ChannelAccess::Read);
        assert_eq!(specs[1].access, ChannelAccess::Notify);
    }
}

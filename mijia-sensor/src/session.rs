//! Discovery session state
//!
//! The device registry, the advertised-service filter and the single
//! terminal guard. Every adapter event handler goes through this state
//! first, and the guard makes "ignore everything after the session is done"
//! one enforced rule instead of a check scattered across callbacks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mijia_proto::ChannelSpec;
use tracing::debug;
use uuid::Uuid;

use crate::acquire::{acquire, AcquireError, AcquisitionResult};
use crate::link::DeviceLink;

/// Default discovery window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Devices registered by one discovery session, keyed by hardware address
/// (session id where the platform hides addresses).
pub type Registry<D> = HashMap<String, SensorDevice<D>>;

/// Identity snapshot taken from a discovery event.
#[derive(serde::Serialize, Debug, Clone)]
pub struct DeviceInfo {
    /// Stable hardware address, colon-delimited, when the platform exposes
    /// one.
    pub address: Option<String>,
    /// Platform session-local identifier, the registry fallback key.
    pub id: String,
    /// Advertised service UUID that qualified the device.
    pub uuid: Option<Uuid>,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

impl DeviceInfo {
    /// Registry key: the hardware address when known, else the session id.
    pub fn key(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.id)
    }
}

/// A discovered sensor: identity plus the capability to run an acquisition
/// against it with the channel specs captured when discovery started.
#[derive(Debug, Clone)]
pub struct SensorDevice<D> {
    pub info: DeviceInfo,
    link: D,
    specs: Arc<Vec<ChannelSpec>>,
}

impl<D: DeviceLink> SensorDevice<D> {
    /// Collect one reading set from this device. See [`acquire`].
    pub async fn acquire(
        &self,
        timeout: Option<Duration>,
    ) -> Result<AcquisitionResult, AcquireError> {
        acquire(&self.link, &self.specs, timeout).await
    }
}

/// Raw discovery event data, as delivered by the adapter.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    pub address: Option<String>,
    pub id: String,
    pub service_uuids: Vec<Uuid>,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// Mutable state of one discovery session.
pub struct Session<D> {
    filter: Option<Uuid>,
    specs: Arc<Vec<ChannelSpec>>,
    devices: Registry<D>,
    done: bool,
}

impl<D: DeviceLink> Session<D> {
    pub fn new(filter: Option<Uuid>, specs: Vec<ChannelSpec>) -> Self {
        Self {
            filter,
            specs: Arc::new(specs),
            devices: HashMap::new(),
            done: false,
        }
    }

    /// Register a qualifying advertisement and return the device to hand to
    /// the discovery callback. `None` means the event was filtered out or
    /// the session is already over.
    pub fn handle_advertisement(&mut self, link: D, adv: Advertisement) -> Option<SensorDevice<D>> {
        if self.done {
            return None;
        }
        let uuid = match self.filter {
            Some(filter) => {
                if !adv.service_uuids.contains(&filter) {
                    return None;
                }
                Some(filter)
            }
            None => adv.service_uuids.first().copied(),
        };
        let info = DeviceInfo {
            address: adv.address,
            id: adv.id,
            uuid,
            local_name: adv.local_name,
            rssi: adv.rssi,
        };
        debug!(key = info.key(), name = ?info.local_name, rssi = ?info.rssi, "sensor discovered");
        let device = SensorDevice {
            info,
            link,
            specs: self.specs.clone(),
        };
        // Re-discovery overwrites: rssi and the local name legitimately move
        // between advertisements.
        self.devices
            .insert(device.info.key().to_string(), device.clone());
        Some(device)
    }

    /// Mark the session done. Only the first caller gets `true`, and with it
    /// the right to run the stop sequence and the completion callback.
    pub fn finish(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        true
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Snapshot of the registry.
    pub fn registry(&self) -> Registry<D> {
        self.devices.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockChannel, MockDevice};
    use mijia_proto::{
        default_specs, Reading, ADVERTISED_SERVICE, BATTERY_UUID, KIND_BATTERY, KIND_VALUES,
        VALUES_UUID,
    };

    fn adv(address: &str, id: &str, uuid: Option<Uuid>) -> Advertisement {
        Advertisement {
            address: Some(address.to_string()),
            id: id.to_string(),
            service_uuids: uuid.into_iter().collect(),
            local_name: Some("LYWSD03MMC".to_string()),
            rssi: Some(-60),
        }
    }

    fn thermometer() -> MockDevice {
        MockDevice::new(vec![
            MockChannel::with_payload(BATTERY_UUID, &[0x64]),
            MockChannel::with_payload(VALUES_UUID, &[0x35, 0x08, 0x37]),
        ])
    }

    #[test]
    fn filter_discards_mismatched_service() {
        let mut session = Session::new(Some(ADVERTISED_SERVICE), default_specs());
        let other = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
        assert!(session
            .handle_advertisement(thermometer(), adv("aa:bb:cc:dd:ee:01", "p1", Some(other)))
            .is_none());
        assert!(session
            .handle_advertisement(thermometer(), adv("aa:bb:cc:dd:ee:02", "p2", None))
            .is_none());
        assert!(session.registry().is_empty());
    }

    #[test]
    fn rediscovery_overwrites_without_suppressing() {
        let mut session = Session::new(Some(ADVERTISED_SERVICE), default_specs());
        let first = adv("aa:bb:cc:dd:ee:01", "p1", Some(ADVERTISED_SERVICE));
        let mut second = first.clone();
        second.rssi = Some(-48);

        assert!(session
            .handle_advertisement(thermometer(), first)
            .is_some());
        let device = session
            .handle_advertisement(thermometer(), second)
            .expect("second event still reaches the callback");
        assert_eq!(device.info.rssi, Some(-48));

        let registry = session.registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry["aa:bb:cc:dd:ee:01"].info.rssi, Some(-48));
    }

    #[test]
    fn address_falls_back_to_session_id() {
        let mut session = Session::new(None, default_specs());
        let mut event = adv("unused", "peripheral-7", None);
        event.address = None;
        let device = session
            .handle_advertisement(thermometer(), event)
            .expect("registered");
        assert_eq!(device.info.key(), "peripheral-7");
        assert!(session.registry().contains_key("peripheral-7"));
    }

    #[test]
    fn events_after_finish_are_ignored() {
        let mut session = Session::new(Some(ADVERTISED_SERVICE), default_specs());
        assert!(session.finish());
        assert!(!session.finish());
        assert!(session
            .handle_advertisement(
                thermometer(),
                adv("aa:bb:cc:dd:ee:01", "p1", Some(ADVERTISED_SERVICE))
            )
            .is_none());
        assert!(session.registry().is_empty());
    }

    #[tokio::test]
    async fn discovery_to_acquisition_end_to_end() {
        let mut session = Session::new(Some(ADVERTISED_SERVICE), default_specs());
        let addresses = ["a4:c1:38:9b:80:d6", "a4:c1:38:48:69:4c", "a4:c1:38:e3:71:3d"];

        // Quota logic as a caller would run it: stop once all three are in.
        let mut completions = 0;
        for (i, address) in addresses.iter().enumerate() {
            let registered = session.handle_advertisement(
                thermometer(),
                adv(address, &format!("p{i}"), Some(ADVERTISED_SERVICE)),
            );
            assert!(registered.is_some());
            if session.registry().len() >= addresses.len() && session.finish() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert!(!session.finish());

        let registry = session.registry();
        assert_eq!(registry.len(), 3);
        for device in registry.values() {
            let result = device
                .acquire(Some(Duration::from_secs(5)))
                .await
                .expect("acquisition succeeds");
            assert!(!result.timed_out);
            assert_eq!(
                result.readings.get(KIND_BATTERY),
                Some(&Reading::Battery(100))
            );
            assert_eq!(
                result.readings.get(KIND_VALUES),
                Some(&Reading::Values {
                    temperature: 21.01,
                    humidity: 55
                })
            );
        }
    }
}

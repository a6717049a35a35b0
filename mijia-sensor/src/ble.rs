//! btleplug backend for the device link traits

use btleplug::api::{CharPropFlags, Characteristic, Manager as _, Peripheral as _};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use uuid::Uuid;

use crate::discover::DiscoverError;
use crate::link::{ChannelLink, DeviceLink, LinkError};

pub use btleplug::platform::Adapter;

impl From<btleplug::Error> for LinkError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::DeviceNotFound => LinkError::InvalidDevice,
            other => LinkError::Link(other.to_string()),
        }
    }
}

/// First Bluetooth adapter the platform reports.
pub async fn default_adapter() -> Result<Adapter, DiscoverError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(DiscoverError::NoAdapter)
}

/// A sensor handle backed by a platform peripheral.
#[derive(Debug, Clone)]
pub struct BleDevice {
    peripheral: Peripheral,
}

impl BleDevice {
    pub fn new(peripheral: Peripheral) -> Self {
        Self { peripheral }
    }
}

impl DeviceLink for BleDevice {
    type Channel = BleChannel;

    async fn connect(&self) -> Result<(), LinkError> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn channels(&self, wanted: &[Uuid]) -> Result<Vec<BleChannel>, LinkError> {
        self.peripheral.discover_services().await?;
        let channels = self
            .peripheral
            .characteristics()
            .into_iter()
            .filter(|c| wanted.contains(&c.uuid))
            .map(|characteristic| BleChannel {
                peripheral: self.peripheral.clone(),
                characteristic,
            })
            .collect();
        Ok(channels)
    }
}

/// A GATT characteristic on a connected peripheral.
#[derive(Debug, Clone)]
pub struct BleChannel {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

impl ChannelLink for BleChannel {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    fn readable(&self) -> bool {
        self.characteristic.properties.contains(CharPropFlags::READ)
    }

    fn notifiable(&self) -> bool {
        self.characteristic.properties.contains(CharPropFlags::NOTIFY)
            || self.characteristic.properties.contains(CharPropFlags::INDICATE)
    }

    async fn read(&self) -> Result<Vec<u8>, LinkError> {
        Ok(self.peripheral.read(&self.characteristic).await?)
    }

    async fn listen_once(&self) -> Result<Vec<u8>, LinkError> {
        // Open the stream before subscribing so the first notification
        // cannot slip past.
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&self.characteristic).await?;
        let value = loop {
            match notifications.next().await {
                Some(n) if n.uuid == self.characteristic.uuid => break n.value,
                Some(_) => continue,
                None => return Err(LinkError::Link("notification stream ended".to_string())),
            }
        };
        let _ = self.peripheral.unsubscribe(&self.characteristic).await;
        Ok(value)
    }
}

//! Mijia thermometer client
//!
//! Discovers Mijia BLE sensors by their advertised service and runs a
//! bounded acquisition against each one: connect, enumerate the configured
//! channels, collect one reading per channel, disconnect. Hard timeouts on
//! both phases keep a single unresponsive device from stalling a batch.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//!
//! use mijia_sensor::{ble, discover, DiscoverConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = ble::default_adapter().await?;
//!
//!     // Scan until two sensors are registered, or the default 120 s window
//!     // runs out.
//!     let handle = discover(
//!         adapter,
//!         DiscoverConfig::default(),
//!         |device, registry| {
//!             println!("found {}", device.info.key());
//!             registry.len() < 2
//!         },
//!         |registry| println!("timeout with {} sensors", registry.len()),
//!     )
//!     .await?;
//!
//!     // Read battery, temperature and humidity from each, one at a time.
//!     for device in handle.wait().await.values() {
//!         let result = device.acquire(Some(Duration::from_secs(60))).await?;
//!         println!("{:?}", result.readings);
//!     }
//!     Ok(())
//! }
//! ```

pub mod acquire;
pub mod ble;
pub mod discover;
pub mod link;
pub mod mock;
pub mod session;

pub use acquire::{acquire, AcquireError, AcquisitionResult, DEFAULT_ACQUIRE_TIMEOUT};
pub use discover::{discover, DiscoverConfig, DiscoverError, DiscoveryHandle};
pub use link::{ChannelLink, DeviceLink, LinkError};
pub use session::{
    Advertisement, DeviceInfo, Registry, SensorDevice, Session, DEFAULT_DISCOVERY_TIMEOUT,
};

// Re-export the protocol surface callers need for configuration.
pub use mijia_proto::{default_specs, ChannelAccess, ChannelSpec, Reading};

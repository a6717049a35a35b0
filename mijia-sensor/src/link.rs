//! Capability traits at the radio boundary
//!
//! The acquisition protocol talks to a sensor through these two traits
//! rather than the platform BLE types, so the same protocol core runs
//! against the btleplug backend in [`crate::ble`] and the in-memory backend
//! in [`crate::mock`].

use std::future::Future;

use uuid::Uuid;

/// Transport-level failure at the device link boundary.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LinkError {
    /// The platform no longer knows this device handle at all.
    #[error("device handle is not usable")]
    InvalidDevice,
    /// Any other link failure: connect refused, read failed, stream ended.
    #[error("link failure: {0}")]
    Link(String),
}

/// A connectable sensor: connect/disconnect plus GATT channel enumeration.
pub trait DeviceLink: Clone + Send + Sync + 'static {
    type Channel: ChannelLink + Send + Sync;

    fn connect(&self) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    /// Enumerate the GATT channels matching `wanted`, in no particular
    /// order. Channels the device does not expose are simply absent.
    fn channels(
        &self,
        wanted: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Self::Channel>, LinkError>> + Send;
}

/// A single data channel (GATT characteristic) on a connected device.
pub trait ChannelLink {
    fn uuid(&self) -> Uuid;

    /// Whether the channel supports one-shot reads.
    fn readable(&self) -> bool;

    /// Whether the channel supports change notifications.
    fn notifiable(&self) -> bool;

    fn read(&self) -> impl Future<Output = Result<Vec<u8>, LinkError>> + Send;

    /// Subscribe, wait for the first notification on this channel, then
    /// unsubscribe. A single bounded listen, never a stream; the caller
    /// limits it with a timeout.
    fn listen_once(&self) -> impl Future<Output = Result<Vec<u8>, LinkError>> + Send;
}

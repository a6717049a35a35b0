//! In-memory device backend
//!
//! Scriptable [`DeviceLink`]/[`ChannelLink`] implementations for exercising
//! the acquisition protocol and the discovery session without a radio.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::link::{ChannelLink, DeviceLink, LinkError};

/// What a [`MockDevice`] does with a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    /// Accept and report connected.
    #[default]
    Accept,
    /// Fail like a handle the platform no longer knows.
    Invalid,
    /// Fail with a transport error.
    Refuse,
    /// Never complete; only the caller's timeout ends the run.
    Hang,
}

/// One fake channel: a payload, or `None` for a channel that stays silent.
#[derive(Debug, Clone)]
pub struct MockChannel {
    pub uuid: Uuid,
    pub payload: Option<Vec<u8>>,
    pub readable: bool,
    pub notifiable: bool,
}

impl MockChannel {
    /// A readable and notifiable channel that yields `payload`.
    pub fn with_payload(uuid: Uuid, payload: &[u8]) -> Self {
        Self {
            uuid,
            payload: Some(payload.to_vec()),
            readable: true,
            notifiable: true,
        }
    }

    /// A channel that accepts reads and subscriptions but never produces
    /// data.
    pub fn silent(uuid: Uuid) -> Self {
        Self {
            uuid,
            payload: None,
            readable: true,
            notifiable: true,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

/// Scriptable sensor for tests.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub behavior: ConnectBehavior,
    pub enumeration_fails: bool,
    pub channels: Vec<MockChannel>,
    state: Arc<MockState>,
}

impl MockDevice {
    pub fn new(channels: Vec<MockChannel>) -> Self {
        Self {
            channels,
            ..Default::default()
        }
    }

    pub fn with_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn failing_enumeration(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    /// How many disconnects the device has seen.
    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

impl DeviceLink for MockDevice {
    type Channel = MockChannel;

    async fn connect(&self) -> Result<(), LinkError> {
        match self.behavior {
            ConnectBehavior::Accept => {
                self.state.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::Invalid => Err(LinkError::InvalidDevice),
            ConnectBehavior::Refuse => Err(LinkError::Link("connection refused".to_string())),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn channels(&self, wanted: &[Uuid]) -> Result<Vec<MockChannel>, LinkError> {
        if self.enumeration_fails {
            return Err(LinkError::Link("service discovery failed".to_string()));
        }
        Ok(self
            .channels
            .iter()
            .filter(|c| wanted.contains(&c.uuid))
            .cloned()
            .collect())
    }
}

impl ChannelLink for MockChannel {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn readable(&self) -> bool {
        self.readable
    }

    fn notifiable(&self) -> bool {
        self.notifiable
    }

    async fn read(&self) -> Result<Vec<u8>, LinkError> {
        match &self.payload {
            Some(payload) => Ok(payload.clone()),
            None => std::future::pending().await,
        }
    }

    /// Same single-shot semantics as subscribe, first value, unsubscribe
    /// against real hardware.
    async fn listen_once(&self) -> Result<Vec<u8>, LinkError> {
        self.read().await
    }
}

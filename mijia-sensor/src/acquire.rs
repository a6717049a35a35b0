//! Bounded per-device acquisition
//!
//! One run per device: connect, enumerate the configured channels, collect
//! one reading per channel, disconnect. The whole run races a single
//! timeout; whichever side wins, the device ends disconnected and the caller
//! gets exactly one result.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mijia_proto::{decode, ChannelAccess, ChannelSpec, Reading};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::link::{ChannelLink, DeviceLink, LinkError};

/// Default per-device acquisition timeout.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one acquisition run.
#[derive(serde::Serialize, Debug, Clone)]
pub struct AcquisitionResult {
    /// Decoded readings keyed by channel kind. One entry per configured
    /// channel on success, possibly fewer when the run timed out.
    pub readings: HashMap<String, Reading>,
    /// Elapsed wall-clock milliseconds for the whole run.
    pub duration_ms: u64,
    /// Set when the run was ended by its timeout instead of by collecting
    /// every configured channel.
    pub timed_out: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The device handle is missing or not connectable at all.
    #[error("invalid device")]
    InvalidDevice,
    /// Channel enumeration failed or matched nothing.
    #[error("invalid channel specs")]
    InvalidSpecs,
}

/// Run the acquisition protocol against one device.
///
/// The run ends when every configured channel has produced a reading or when
/// `timeout` elapses, whichever comes first; a timeout is reported in the
/// result, not as an error. `None` disables the timeout, in which case an
/// unresponsive device blocks forever.
///
/// A failed connection attempt is not retried and there is no reconnect on
/// an unexpected drop; both simply leave the run waiting for its timeout.
pub async fn acquire<D: DeviceLink>(
    device: &D,
    specs: &[ChannelSpec],
    timeout: Option<Duration>,
) -> Result<AcquisitionResult, AcquireError> {
    let started = Instant::now();
    let readings = Mutex::new(HashMap::new());

    let protocol = run_protocol(device, specs, &readings);
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, protocol).await,
        None => Ok(protocol.await),
    };
    let timed_out = outcome.is_err();

    if let Ok(Err(err)) = outcome {
        // Enumeration-stage failure aborts the run; drop the connection on
        // the way out so the device is not left dangling.
        if device.is_connected().await {
            let _ = device.disconnect().await;
        }
        return Err(err);
    }

    // Completion sequence, shared by success and timeout: wait for the
    // disconnect acknowledgment before finalizing.
    if device.is_connected().await {
        if let Err(err) = device.disconnect().await {
            debug!(error = %err, "disconnect after acquisition failed");
        }
    }

    Ok(AcquisitionResult {
        readings: readings.into_inner().unwrap(),
        duration_ms: started.elapsed().as_millis() as u64,
        timed_out,
    })
}

async fn run_protocol<D: DeviceLink>(
    device: &D,
    specs: &[ChannelSpec],
    readings: &Mutex<HashMap<String, Reading>>,
) -> Result<(), AcquireError> {
    match device.connect().await {
        Ok(()) => debug!("connected"),
        Err(LinkError::InvalidDevice) => return Err(AcquireError::InvalidDevice),
        Err(err) => {
            // Not retried; the outer timeout reports a zero-reading result.
            warn!(error = %err, "connect failed");
            std::future::pending::<()>().await;
        }
    }

    let wanted: Vec<Uuid> = specs.iter().map(|s| s.uuid).collect();
    let channels = device
        .channels(&wanted)
        .await
        .map_err(|_| AcquireError::InvalidSpecs)?;
    if channels.is_empty() {
        return Err(AcquireError::InvalidSpecs);
    }

    let collectors = channels.iter().filter_map(|channel| {
        let spec = specs.iter().find(|s| s.uuid == channel.uuid())?;
        Some(collect_channel(channel, spec, readings))
    });
    futures::future::join_all(collectors).await;

    // Channels that errored or lacked the configured capability leave the
    // set incomplete; park until the timeout ends the run with what we have.
    if readings.lock().unwrap().len() < specs.len() {
        std::future::pending::<()>().await;
    }
    Ok(())
}

async fn collect_channel<C: ChannelLink>(
    channel: &C,
    spec: &ChannelSpec,
    readings: &Mutex<HashMap<String, Reading>>,
) {
    let payload = match spec.access {
        ChannelAccess::Read if channel.readable() => channel.read().await,
        ChannelAccess::Notify if channel.notifiable() => channel.listen_once().await,
        _ => {
            warn!(kind = %spec.kind, uuid = %channel.uuid(), "channel lacks the configured access mode");
            return;
        }
    };
    let payload = match payload {
        Ok(payload) => payload,
        Err(err) => {
            debug!(kind = %spec.kind, error = %err, "channel produced no data");
            return;
        }
    };
    debug!(
        kind = %spec.kind,
        payload = %data_encoding::HEXLOWER.encode(&payload),
        "data received"
    );
    match decode(&payload, &spec.kind) {
        Ok(reading) => {
            readings.lock().unwrap().insert(spec.kind.clone(), reading);
        }
        Err(err) => debug!(kind = %spec.kind, error = %err, "payload did not decode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ConnectBehavior, MockChannel, MockDevice};
    use mijia_proto::{default_specs, BATTERY_UUID, KIND_BATTERY, KIND_VALUES, VALUES_UUID};

    fn thermometer() -> MockDevice {
        MockDevice::new(vec![
            MockChannel::with_payload(BATTERY_UUID, &[0x64]),
            MockChannel::with_payload(VALUES_UUID, &[0x35, 0x08, 0x37]),
        ])
    }

    #[tokio::test]
    async fn collects_every_configured_channel() {
        let device = thermometer();
        let result = acquire(&device, &default_specs(), Some(Duration::from_secs(5)))
            .await
            .expect("run succeeds");

        assert!(!result.timed_out);
        assert_eq!(result.readings.len(), 2);
        assert_eq!(result.readings[KIND_BATTERY], Reading::Battery(100));
        assert_eq!(
            result.readings[KIND_VALUES],
            Reading::Values {
                temperature: 21.01,
                humidity: 55
            }
        );
        assert!(!device.is_connected().await);
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_device_times_out_empty() {
        let device = MockDevice::new(vec![]).with_connect(ConnectBehavior::Hang);
        let result = acquire(&device, &default_specs(), Some(DEFAULT_ACQUIRE_TIMEOUT))
            .await
            .expect("timeout is not an error");

        assert!(result.timed_out);
        assert!(result.readings.is_empty());
        assert_eq!(device.disconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_waits_for_the_timeout() {
        let device = thermometer().with_connect(ConnectBehavior::Refuse);
        let result = acquire(&device, &default_specs(), Some(DEFAULT_ACQUIRE_TIMEOUT))
            .await
            .expect("timeout is not an error");

        assert!(result.timed_out);
        assert!(result.readings.is_empty());
    }

    #[tokio::test]
    async fn unknown_handle_fails_immediately() {
        let device = thermometer().with_connect(ConnectBehavior::Invalid);
        let err = acquire(&device, &default_specs(), Some(DEFAULT_ACQUIRE_TIMEOUT))
            .await
            .expect_err("invalid device is surfaced");
        assert_eq!(err, AcquireError::InvalidDevice);
    }

    #[tokio::test]
    async fn enumeration_failure_is_invalid_specs() {
        let device = thermometer().failing_enumeration();
        let err = acquire(&device, &default_specs(), Some(DEFAULT_ACQUIRE_TIMEOUT))
            .await
            .expect_err("enumeration failure is surfaced");
        assert_eq!(err, AcquireError::InvalidSpecs);
        // The connection is not left dangling on the error path.
        assert!(!device.is_connected().await);
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn empty_enumeration_is_invalid_specs() {
        let device = MockDevice::new(vec![]);
        let err = acquire(&device, &default_specs(), Some(DEFAULT_ACQUIRE_TIMEOUT))
            .await
            .expect_err("no matching channels is surfaced");
        assert_eq!(err, AcquireError::InvalidSpecs);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_channel_times_out_with_partial_readings() {
        let device = MockDevice::new(vec![
            MockChannel::with_payload(BATTERY_UUID, &[0x64]),
            MockChannel::silent(VALUES_UUID),
        ]);
        let result = acquire(&device, &default_specs(), Some(DEFAULT_ACQUIRE_TIMEOUT))
            .await
            .expect("timeout is not an error");

        assert!(result.timed_out);
        assert_eq!(result.readings.len(), 1);
        assert_eq!(result.readings[KIND_BATTERY], Reading::Battery(100));
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn battery_can_be_collected_over_notifications() {
        // Firmware variant whose battery characteristic is notify-only.
        let device = MockDevice::new(vec![MockChannel {
            uuid: BATTERY_UUID,
            payload: Some(vec![0x5f]),
            readable: false,
            notifiable: true,
        }]);
        let specs = vec![ChannelSpec::new(
            BATTERY_UUID,
            KIND_BATTERY,
            ChannelAccess::Notify,
        )];
        let result = acquire(&device, &specs, Some(Duration::from_secs(5)))
            .await
            .expect("run succeeds");

        assert!(!result.timed_out);
        assert_eq!(result.readings[KIND_BATTERY], Reading::Battery(95));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_capability_yields_no_reading() {
        let device = MockDevice::new(vec![MockChannel {
            uuid: BATTERY_UUID,
            payload: Some(vec![0x64]),
            readable: false,
            notifiable: false,
        }]);
        let specs = vec![ChannelSpec::new(
            BATTERY_UUID,
            KIND_BATTERY,
            ChannelAccess::Read,
        )];
        let result = acquire(&device, &specs, Some(DEFAULT_ACQUIRE_TIMEOUT))
            .await
            .expect("timeout is not an error");

        assert!(result.timed_out);
        assert!(result.readings.is_empty());
    }
}

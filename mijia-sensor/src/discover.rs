//! Discovery driver
//!
//! Owns the adapter event loop for one discovery session: power-state
//! handling, scan start/stop, the discovery timeout, and the handle callers
//! use to stop the session and collect the registry.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::{BDAddr, Central as _, CentralEvent, CentralState, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures::{Stream, StreamExt};
use mijia_proto::{default_specs, ChannelSpec, ADVERTISED_SERVICE};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::BleDevice;
use crate::session::{Advertisement, Registry, SensorDevice, Session, DEFAULT_DISCOVERY_TIMEOUT};

#[derive(thiserror::Error, Debug)]
pub enum DiscoverError {
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}

/// Discovery session parameters. The defaults match a stock Mijia setup:
/// scan for the advertised sensor service, give up after two minutes.
#[derive(Debug, Clone)]
pub struct DiscoverConfig {
    /// Discovery window; `None` scans until explicitly stopped.
    pub timeout: Option<Duration>,
    /// Advertised service the sensors must carry; `None` registers
    /// everything the adapter sees.
    pub service_filter: Option<Uuid>,
    /// Channel specs every discovered device is bound to.
    pub specs: Vec<ChannelSpec>,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_DISCOVERY_TIMEOUT),
            service_filter: Some(ADVERTISED_SERVICE),
            specs: default_specs(),
        }
    }
}

type Events = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Start a discovery session.
///
/// `on_discover` runs once per qualifying advertisement with the device and
/// a registry snapshot; returning `false` ends the session, the way a caller
/// stops scanning once a quota is reached. `on_timeout` runs at most once,
/// if the window elapses before the session is stopped. Exactly one of the
/// timeout path and the stop path wins.
pub async fn discover<F, T>(
    adapter: Adapter,
    config: DiscoverConfig,
    on_discover: F,
    on_timeout: T,
) -> Result<DiscoveryHandle, DiscoverError>
where
    F: FnMut(&SensorDevice<BleDevice>, &Registry<BleDevice>) -> bool + Send + 'static,
    T: FnOnce(&Registry<BleDevice>) + Send + 'static,
{
    let events = adapter.events().await?;
    let session = Arc::new(Mutex::new(Session::new(
        config.service_filter,
        config.specs,
    )));
    let (done_tx, done_rx) = watch::channel(false);
    let done_tx = Arc::new(done_tx);

    let scan_filter = match config.service_filter {
        Some(uuid) => ScanFilter {
            services: vec![uuid],
        },
        None => ScanFilter::default(),
    };

    // Scan right away when the adapter is already powered on; otherwise the
    // state-update event starts it.
    match adapter.adapter_state().await {
        Ok(CentralState::PoweredOn) => {
            info!("adapter already powered on, scanning");
            if let Err(err) = adapter.start_scan(scan_filter.clone()).await {
                warn!(error = %err, "scan start failed");
            }
        }
        Ok(state) => debug!(?state, "waiting for adapter power-on"),
        Err(err) => warn!(error = %err, "adapter state unavailable"),
    }

    let task = tokio::spawn(run_session(
        adapter.clone(),
        events,
        session.clone(),
        done_tx.clone(),
        scan_filter,
        config.timeout,
        on_discover,
        on_timeout,
    ));

    Ok(DiscoveryHandle {
        session,
        adapter,
        task,
        done_tx,
        done_rx,
    })
}

/// Handle to a running discovery session.
pub struct DiscoveryHandle {
    session: Arc<Mutex<Session<BleDevice>>>,
    adapter: Adapter,
    task: JoinHandle<()>,
    done_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
}

impl DiscoveryHandle {
    /// Stop the session: cancel the pending timeout, mark the session done,
    /// stop scanning and return the registry. Safe to call more than once;
    /// later calls return the same registry without side effects.
    pub async fn stop(&self) -> Registry<BleDevice> {
        let first = self.session.lock().unwrap().finish();
        if first {
            self.task.abort();
            let _ = self.adapter.stop_scan().await;
            let registry = self.session.lock().unwrap().registry();
            info!(count = registry.len(), "discovery stopped");
            let _ = self.done_tx.send(true);
            return registry;
        }
        self.session.lock().unwrap().registry()
    }

    /// Wait until the session ends by any path (caller stop, callback stop,
    /// timeout) and return the registry.
    pub async fn wait(&self) -> Registry<BleDevice> {
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|done| *done).await;
        self.session.lock().unwrap().registry()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session<F, T>(
    adapter: Adapter,
    mut events: Events,
    session: Arc<Mutex<Session<BleDevice>>>,
    done_tx: Arc<watch::Sender<bool>>,
    scan_filter: ScanFilter,
    timeout: Option<Duration>,
    mut on_discover: F,
    on_timeout: T,
) where
    F: FnMut(&SensorDevice<BleDevice>, &Registry<BleDevice>) -> bool + Send + 'static,
    T: FnOnce(&Registry<BleDevice>) + Send + 'static,
{
    let timer = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timer);
    let mut on_timeout = Some(on_timeout);

    loop {
        tokio::select! {
            _ = &mut timer => {
                if session.lock().unwrap().finish() {
                    let _ = adapter.stop_scan().await;
                    let registry = session.lock().unwrap().registry();
                    info!(count = registry.len(), "discovery timeout elapsed");
                    if let Some(on_timeout) = on_timeout.take() {
                        on_timeout(&registry);
                    }
                }
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    CentralEvent::StateUpdate(state) => {
                        if session.lock().unwrap().is_done() {
                            break;
                        }
                        if state == CentralState::PoweredOn {
                            info!("adapter powered on, scanning");
                            if let Err(err) = adapter.start_scan(scan_filter.clone()).await {
                                warn!(error = %err, "scan start failed");
                            }
                        } else {
                            info!(?state, "adapter powered off, scanning paused");
                            let _ = adapter.stop_scan().await;
                        }
                    }
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let Some(device) = register(&adapter, &session, id).await else {
                            continue;
                        };
                        let registry = session.lock().unwrap().registry();
                        if !on_discover(&device, &registry) {
                            if session.lock().unwrap().finish() {
                                let _ = adapter.stop_scan().await;
                                info!(count = registry.len(), "discovery stopped by caller");
                            }
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = done_tx.send(true);
}

/// Resolve a platform event into an advertisement and push it through the
/// session. `None` when the peripheral vanished, the event was filtered out
/// or the session is already done.
async fn register(
    adapter: &Adapter,
    session: &Arc<Mutex<Session<BleDevice>>>,
    id: PeripheralId,
) -> Option<SensorDevice<BleDevice>> {
    let peripheral = adapter.peripheral(&id).await.ok()?;
    let mut adv = Advertisement {
        id: format!("{id:?}"),
        ..Advertisement::default()
    };
    if let Ok(Some(props)) = peripheral.properties().await {
        adv.address = normalize_address(props.address);
        adv.local_name = props.local_name;
        adv.rssi = props.rssi;
        adv.service_uuids = props.service_data.keys().copied().collect();
    }
    session
        .lock()
        .unwrap()
        .handle_advertisement(BleDevice::new(peripheral), adv)
}

/// Colon-delimited lowercase form, `None` for the all-zero address some
/// platforms report instead of a real one.
fn normalize_address(address: BDAddr) -> Option<String> {
    if address == BDAddr::default() {
        return None;
    }
    Some(address.to_string().replace('-', ":").to_lowercase())
}

//! BlueZ transport
//!
//! [`BlueRTransport`] implements [`WatchTransport`] on top of `bluer`, and
//! [`find_watch`] scans for the watch by its advertised name.

use crate::config::SyncConfig;
use crate::constants::{CCC_DESCRIPTOR_UUID, FEATURES_SERVICE_UUID};
use crate::transport::{NotificationCallback, WatchTransport};
use crate::types::{hex_dump, Result, SyncError};
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device, Session};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

/// Attempts (one per second) to wait for GATT service resolution
const SERVICE_RESOLVE_ATTEMPTS: u32 = 30;

/// How long a notification stream may take to start
const LISTENER_READY_TIMEOUT: Duration = Duration::from_secs(5);

impl From<bluer::Error> for SyncError {
    fn from(e: bluer::Error) -> Self {
        SyncError::BluetoothError(e.to_string())
    }
}

/// Open the default adapter and make sure it is powered
///
/// The returned session must outlive every object obtained from the adapter.
pub async fn open_adapter() -> Result<(Session, Adapter)> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    debug!("Using adapter {}", adapter.name());

    match adapter.is_powered().await {
        Ok(true) => {}
        Ok(false) => {
            info!("Bluetooth adapter is off, powering it on");
            adapter.set_powered(true).await?;
            sleep(Duration::from_secs(2)).await;
        }
        Err(e) => warn!("Could not check adapter power state: {}", e),
    }

    Ok((session, adapter))
}

/// Scan until a device whose name starts with the configured prefix shows up
///
/// Resolves to [`SyncError::Cancelled`] once `cancel` fires. Dropping the
/// sender without sending does not cancel the scan.
pub async fn find_watch(
    adapter: &Adapter,
    config: &SyncConfig,
    cancel: oneshot::Receiver<()>,
) -> Result<Device> {
    info!(
        "Scanning for a device named \"{}*\"",
        config.device_name_prefix
    );
    let events = adapter.discover_devices().await?;
    let mut events = Box::pin(events);

    let scan = async {
        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            let device = adapter.device(address)?;
            let name = device.name().await.ok().flatten();
            debug!("Discovered {} ({:?})", address, name);

            if name.is_some_and(|n| n.starts_with(&config.device_name_prefix)) {
                info!("Found watch at {}", address);
                return Ok(device);
            }
        }
        Err::<Device, SyncError>(SyncError::DeviceNotFound)
    };

    tokio::select! {
        result = timeout(config.scan_timeout, scan) => {
            result.map_err(|_| SyncError::Timeout {
                waiting_for: "watch advertisement".to_string(),
                timeout: config.scan_timeout,
            })?
        }
        Ok(()) = cancel => {
            info!("Device scanning cancelled");
            Err(SyncError::Cancelled)
        }
    }
}

/// Look up a device by MAC address
pub fn device_by_address(adapter: &Adapter, mac_address: &str) -> Result<Device> {
    let address: Address = mac_address.parse().map_err(|_| {
        SyncError::BluetoothError(format!("Invalid MAC address: {}", mac_address))
    })?;
    Ok(adapter.device(address)?)
}

/// Connected watch exposing the features service characteristics
pub struct BlueRTransport {
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
    listeners: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl BlueRTransport {
    /// Connect if needed, wait for services and collect the characteristics
    pub async fn connect(device: Device) -> Result<Self> {
        if !device.is_connected().await? {
            info!("Connecting to {}", device.address());
            device.connect().await?;
        }

        wait_for_services(&device).await?;

        let mut characteristics = HashMap::new();
        for service in device.services().await? {
            if service.uuid().await? != FEATURES_SERVICE_UUID {
                continue;
            }
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                debug!("Features characteristic {}", uuid);
                characteristics.insert(uuid, characteristic);
            }
        }

        if characteristics.is_empty() {
            return Err(SyncError::CharacteristicNotFound(FEATURES_SERVICE_UUID));
        }
        info!("Found {} features characteristics", characteristics.len());

        Ok(Self {
            device,
            characteristics,
            listeners: Mutex::new(HashMap::new()),
        })
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&uuid)
            .ok_or(SyncError::CharacteristicNotFound(uuid))
    }

    /// Stop all listeners and disconnect
    pub async fn disconnect(&self) -> Result<()> {
        self.stop_listeners();
        if self.device.is_connected().await? {
            self.device.disconnect().await?;
        }
        Ok(())
    }

    fn stop_listeners(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for (_, handle) in listeners.drain() {
                handle.abort();
            }
        }
    }
}

impl Drop for BlueRTransport {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}

async fn wait_for_services(device: &Device) -> Result<()> {
    for _ in 0..SERVICE_RESOLVE_ATTEMPTS {
        match device.is_services_resolved().await {
            Ok(true) => return Ok(()),
            Ok(false) => sleep(Duration::from_secs(1)).await,
            Err(e) => {
                warn!("Could not check services resolved status: {}", e);
                sleep(Duration::from_secs(2)).await;
                return Ok(());
            }
        }
    }
    Err(SyncError::Timeout {
        waiting_for: "GATT services".to_string(),
        timeout: Duration::from_secs(SERVICE_RESOLVE_ATTEMPTS as u64),
    })
}

#[async_trait::async_trait]
impl WatchTransport for BlueRTransport {
    async fn write_characteristic(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        debug!("Write {}: {}", characteristic, hex_dump(data, 32));
        self.characteristic(characteristic)?.write(data).await?;
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        data: &[u8],
    ) -> Result<()> {
        // BlueZ owns the CCC descriptor; notifications are enabled by subscribe()
        if descriptor == CCC_DESCRIPTOR_UUID {
            debug!("CCC write on {} handled by the notification session", characteristic);
            return Ok(());
        }

        for candidate in self.characteristic(characteristic)?.descriptors().await? {
            if candidate.uuid().await? == descriptor {
                candidate.write(data).await?;
                return Ok(());
            }
        }
        Err(SyncError::CharacteristicNotFound(descriptor))
    }

    async fn subscribe(&self, characteristic: Uuid, callback: NotificationCallback) -> Result<()> {
        let target = self.characteristic(characteristic)?.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let handle = tokio::spawn(async move {
            let stream = match target.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start notifications on {}: {}", characteristic, e);
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                callback(characteristic, value);
            }
            debug!("Notification stream on {} ended", characteristic);
        });

        if let Ok(mut listeners) = self.listeners.lock() {
            if let Some(previous) = listeners.insert(characteristic, handle) {
                previous.abort();
            }
        }

        match timeout(LISTENER_READY_TIMEOUT, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::BluetoothError(format!(
                "notification listener for {} stopped",
                characteristic
            ))),
            Err(_) => Err(SyncError::Timeout {
                waiting_for: format!("notifications on {}", characteristic),
                timeout: LISTENER_READY_TIMEOUT,
            }),
        }
    }
}

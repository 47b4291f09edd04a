//! BlueZ D-Bus backend for Mijia scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, AdvertisementResult,
    MIJIA_SERVICE_SIGNATURE, SERVICE_DATA_AD_TYPE, ScanError, ScanFuture, Scanner,
};
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session, Uuid};
use futures::StreamExt;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Full 128-bit form of the Xiaomi 16-bit service UUID 0xFE95.
pub const MIJIA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fe95_0000_1000_8000_00805f9b34fb);

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Scanner backed by a BlueZ advertisement monitor.
#[derive(Debug, Default)]
pub struct BluerScanner {
    task: Option<JoinHandle<()>>,
}

impl Scanner for BluerScanner {
    fn start(&mut self, passive: bool) -> ScanFuture<'_, mpsc::Receiver<AdvertisementResult>> {
        Box::pin(async move {
            if !passive {
                info!("bluer backend only supports passive monitoring, scanning passively");
            }
            let (task, rx) = start_monitor().await?;
            self.task = Some(task);
            Ok(rx)
        })
    }

    fn stop(&mut self) -> ScanFuture<'_, ()> {
        Box::pin(async move {
            // Dropping the monitor handle inside the task unregisters it.
            if let Some(task) = self.task.take() {
                task.abort();
            }
            Ok(())
        })
    }
}

/// Register a monitor for Mijia service data and forward every matching
/// device report through the returned channel.
async fn start_monitor() -> Result<(JoinHandle<()>, mpsc::Receiver<AdvertisementResult>), ScanError>
{
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: SERVICE_DATA_AD_TYPE,
        start_position: 0,
        content: MIJIA_SERVICE_SIGNATURE.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop
    let task = tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            let MonitorEvent::DeviceFound(device_id) = event else {
                continue;
            };
            match read_advertisement(&adapter, device_id.device).await {
                Ok(Some(adv)) => {
                    if tx.send(Ok(adv)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("Failed to read service data of {}: {e}", device_id.device),
            }
        }
    });

    Ok((task, rx))
}

/// Rebuild the raw service data field of a device from its BlueZ properties.
///
/// BlueZ strips the UUID from service data, so the signature is put back in
/// front to match what the radio received.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<Advertisement>, ScanError> {
    let device = adapter.device(address)?;

    let Some(service_data) = device.service_data().await? else {
        return Ok(None);
    };
    let Some(payload) = service_data.get(&MIJIA_SERVICE_UUID) else {
        return Ok(None);
    };

    let mut field = MIJIA_SERVICE_SIGNATURE.to_vec();
    field.extend_from_slice(payload);

    let mac: MacAddress = address.into();
    Ok(Some(
        Advertisement::new(mac).with_field(SERVICE_DATA_AD_TYPE, field),
    ))
}

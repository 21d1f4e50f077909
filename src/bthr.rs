use std::time::Duration;

use futures::{future, StreamExt};
use log::{debug, info};
use uuid::Uuid;

use btleplug::api::{Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};
use tokio::sync::OnceCell;

use crate::error::{ConnectionError, SubscribeError};
use crate::transport::{DeviceFilter, NotificationStream, RemoteDevice, Transport};


const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(15);
const SCAN_POLL: Duration = Duration::from_millis(500);

fn transport_err(err: btleplug::Error) -> ConnectionError {
    ConnectionError::Transport(err.to_string())
}

/// Bluetooth heart rate transport over btleplug.
#[derive(Default)]
pub struct BthrTransport {
    adapter: OnceCell<Adapter>,
}

impl BthrTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> Result<Adapter, ConnectionError> {
        let adapter = self
            .adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await.map_err(transport_err)?;
                let adapter_list = manager.adapters().await.map_err(transport_err)?;
                for adapter in adapter_list.iter() {
                    debug!("{}", adapter.adapter_info().await.unwrap_or("No name adapter".to_string()));
                }

                // TODO: let the user pick when there's more than one adapter
                adapter_list.into_iter().next().ok_or(ConnectionError::NoAdapter)
            })
            .await?;
        Ok(adapter.clone())
    }

    /// Scan until the filter's timeout, returning every match seen so far
    /// each poll. Stops early once `first_only` finds one.
    async fn discover(
        &self,
        filter: &DeviceFilter,
        first_only: bool,
    ) -> Result<Vec<(String, PlatformPeripheral)>, ConnectionError> {
        let adapter = self.adapter().await?;
        adapter
            .start_scan(ScanFilter { services: filter.services.clone() })
            .await
            .map_err(transport_err)?;

        let deadline = tokio::time::Instant::now() + filter.scan_timeout;
        let mut found = vec![];
        loop {
            // peripherals() may hold stale entries, connecting can still fail
            found.clear();
            for peripheral in adapter.peripherals().await.map_err(transport_err)? {
                let Some(name) = get_peripheral_name(&peripheral).await else { continue; };
                if filter.matches_name(&name) {
                    found.push((name, peripheral));
                }
            }

            if (first_only && !found.is_empty()) || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SCAN_POLL).await;
        }

        adapter.stop_scan().await.ok();
        Ok(found)
    }
}

impl Transport for BthrTransport {
    type Device = BthrDevice;

    async fn scan(&self, filter: &DeviceFilter) -> Result<Vec<String>, ConnectionError> {
        let found = self.discover(filter, false).await?;
        Ok(found.into_iter().map(|(name, _)| name).collect())
    }

    async fn request_device(&self, filter: &DeviceFilter) -> Result<BthrDevice, ConnectionError> {
        let (name, peripheral) = self
            .discover(filter, true)
            .await?
            .into_iter()
            .next()
            .ok_or(ConnectionError::NoMatchingDevice)?;

        info!("Found matching peripheral {name:?}");
        Ok(BthrDevice { name, peripheral })
    }
}

#[derive(Clone)]
pub struct BthrDevice {
    name: String,
    peripheral: PlatformPeripheral,
}

impl BthrDevice {
    fn find_characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<Characteristic> {
        self.peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)?
            .characteristics
            .into_iter()
            .find(|c| c.uuid == characteristic)
    }
}

impl RemoteDevice for BthrDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        if !self.peripheral.is_connected().await.map_err(transport_err)? {
            tokio::time::timeout(CONNECT_TIMEOUT, self.peripheral.connect())
                .await
                .map_err(|_| ConnectionError::Timeout("connect"))?
                .map_err(transport_err)?;
        }

        info!("Discover peripheral {} services...", self.name);
        tokio::time::timeout(DISCOVER_TIMEOUT, self.peripheral.discover_services())
            .await
            .map_err(|_| ConnectionError::Timeout("service discovery"))?
            .map_err(transport_err)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        if self.peripheral.is_connected().await.map_err(transport_err)? {
            self.peripheral.disconnect().await.map_err(transport_err)?;
        }
        Ok(())
    }

    async fn start_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SubscribeError> {
        let found = self
            .find_characteristic(service, characteristic)
            .ok_or(SubscribeError::ServiceUnavailable { service, characteristic })?;
        if !found.properties.contains(CharPropFlags::NOTIFY) {
            return Err(SubscribeError::Subscription(format!("{characteristic} does not notify")));
        }

        let subscription_err = |err: btleplug::Error| SubscribeError::Subscription(err.to_string());
        self.peripheral.subscribe(&found).await.map_err(subscription_err)?;
        let notifications = self.peripheral.notifications().await.map_err(subscription_err)?;

        // notifications() carries every subscribed characteristic
        let values = notifications.filter_map(move |data| {
            future::ready((data.uuid == characteristic).then_some(data.value))
        });
        Ok(Box::pin(values))
    }

    async fn stop_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<(), SubscribeError> {
        let Some(found) = self.find_characteristic(service, characteristic) else { return Ok(()); };
        self.peripheral
            .unsubscribe(&found)
            .await
            .map_err(|err| SubscribeError::Subscription(err.to_string()))
    }
}

async fn get_peripheral_name(peripheral: &PlatformPeripheral) -> Option<String> {
    let Ok(Some(properties)) = peripheral.properties().await else { return None; };

    properties.local_name
}

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConnectionError, SubscribeError};


pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d00001000800000805f9b34fb);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a3700001000800000805f9b34fb);
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180f00001000800000805f9b34fb);
pub const DEVICE_INFORMATION_UUID: Uuid = Uuid::from_u128(0x0000180a00001000800000805f9b34fb);

/// Raw notification payloads for one characteristic, in arrival order.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// What `DeviceLink::connect` looks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub name_prefix: Option<String>,
    pub services: Vec<Uuid>,
    /// Services the subscriber may use after connecting in addition to `services`.
    pub optional_services: Vec<Uuid>,
    #[serde(with = "secs")]
    pub scan_timeout: Duration,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            name_prefix: None,
            services: vec![HEART_RATE_SERVICE_UUID],
            optional_services: vec![BATTERY_SERVICE_UUID, DEVICE_INFORMATION_UUID],
            scan_timeout: Duration::from_secs(10),
        }
    }
}

impl DeviceFilter {
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name_prefix: Some(name.to_string()),
            ..self.clone()
        }
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name_prefix
            .as_deref()
            .map_or(true, |prefix| name.starts_with(prefix))
    }

    pub fn allowed_services(&self) -> Vec<Uuid> {
        let mut allowed = self.services.clone();
        allowed.extend(self.optional_services.iter().copied());
        allowed
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// The discovery side of a short-range wireless stack. Shared with in-flight
/// link tasks, so everything takes `&self`.
pub trait Transport: 'static {
    type Device: RemoteDevice;

    /// Names of nearby devices matching `filter`.
    async fn scan(&self, filter: &DeviceFilter) -> Result<Vec<String>, ConnectionError>;

    /// Find the first device matching `filter`. Does not connect.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Self::Device, ConnectionError>;
}

/// A cheap handle to one peripheral; clones talk to the same device.
pub trait RemoteDevice: Clone + 'static {
    fn name(&self) -> String;

    async fn connect(&self) -> Result<(), ConnectionError>;

    async fn disconnect(&self) -> Result<(), ConnectionError>;

    async fn start_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SubscribeError>;

    async fn stop_notifications(&self, service: Uuid, characteristic: Uuid) -> Result<(), SubscribeError>;
}

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream;
use rand::Rng;
use uuid::Uuid;

use crate::error::{ConnectionError, SubscribeError};
use crate::transport::{
    DeviceFilter, NotificationStream, RemoteDevice, Transport, HEART_RATE_MEASUREMENT_UUID,
    HEART_RATE_SERVICE_UUID,
};


const SIMULATED_DEVICE_NAME: &str = "NeuroFit Simulator";

/// In-memory stand-in for the Bluetooth stack. Drives the dashboard when no
/// real sensor is around and backs the tests.
pub struct FakeTransport {
    devices: Vec<FakeDevice>,
    scan_error: Option<ConnectionError>,
    discovery_delay: Duration,
}

impl FakeTransport {
    pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
        FakeTransport {
            devices,
            scan_error: None,
            discovery_delay: Duration::ZERO,
        }
    }

    /// One device streaming random heart rates.
    pub fn simulated() -> Self {
        let device = FakeDevice::new(SIMULATED_DEVICE_NAME);
        device.state.borrow_mut().simulate = true;
        Self::with_devices(vec![device])
    }

    #[cfg(test)]
    pub fn fail_discovery(&mut self, err: ConnectionError) {
        self.scan_error = Some(err);
    }

    /// Make scan and request_device take this long, like a real radio sweep.
    #[cfg(test)]
    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    async fn sweep(&self) -> Result<(), ConnectionError> {
        if !self.discovery_delay.is_zero() {
            tokio::time::sleep(self.discovery_delay).await;
        }
        match self.scan_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Transport for FakeTransport {
    type Device = FakeDevice;

    async fn scan(&self, filter: &DeviceFilter) -> Result<Vec<String>, ConnectionError> {
        self.sweep().await?;
        Ok(self
            .devices
            .iter()
            .filter(|device| filter.matches_name(&device.name))
            .map(|device| device.name.clone())
            .collect())
    }

    async fn request_device(&self, filter: &DeviceFilter) -> Result<FakeDevice, ConnectionError> {
        self.sweep().await?;
        self.devices
            .iter()
            .find(|device| filter.matches_name(&device.name))
            .cloned()
            .ok_or(ConnectionError::NoMatchingDevice)
    }
}

struct FakeState {
    connected: bool,
    connect_error: Option<ConnectionError>,
    characteristics: Vec<(Uuid, Uuid)>,
    reject_subscriptions: bool,
    simulate: bool,
    listeners: Vec<UnboundedSender<Vec<u8>>>,
    subscribe_calls: usize,
}

#[derive(Clone)]
pub struct FakeDevice {
    name: String,
    state: Rc<RefCell<FakeState>>,
}

impl FakeDevice {
    /// A device exposing the heart rate measurement characteristic.
    pub fn new(name: &str) -> Self {
        FakeDevice {
            name: name.to_string(),
            state: Rc::new(RefCell::new(FakeState {
                connected: false,
                connect_error: None,
                characteristics: vec![(HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)],
                reject_subscriptions: false,
                simulate: false,
                listeners: vec![],
                subscribe_calls: 0,
            })),
        }
    }

    /// Device walked out of range: every notification stream ends.
    pub fn drop_link(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.listeners.clear();
    }
}

#[cfg(test)]
impl FakeDevice {
    pub fn fail_connect(&self, err: ConnectionError) {
        self.state.borrow_mut().connect_error = Some(err);
    }

    pub fn without_characteristics(&self) {
        self.state.borrow_mut().characteristics.clear();
    }

    pub fn reject_subscriptions(&self) {
        self.state.borrow_mut().reject_subscriptions = true;
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.borrow().subscribe_calls
    }

    /// Deliver a notification to every live subscription.
    pub fn notify(&self, payload: &[u8]) {
        self.state
            .borrow_mut()
            .listeners
            .retain(|tx| tx.unbounded_send(payload.to_vec()).is_ok());
    }
}

impl RemoteDevice for FakeDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.drop_link();
        Ok(())
    }

    async fn start_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SubscribeError> {
        let mut state = self.state.borrow_mut();
        if !state.characteristics.contains(&(service, characteristic)) {
            return Err(SubscribeError::ServiceUnavailable { service, characteristic });
        }
        if !state.connected || state.reject_subscriptions {
            return Err(SubscribeError::Subscription("rejected by device".to_string()));
        }
        state.subscribe_calls += 1;

        if state.simulate {
            return Ok(Box::pin(simulated_heart_rate()));
        }

        let (tx, rx) = mpsc::unbounded();
        state.listeners.push(tx);
        Ok(Box::pin(rx))
    }

    async fn stop_notifications(&self, _service: Uuid, _characteristic: Uuid) -> Result<(), SubscribeError> {
        self.state.borrow_mut().listeners.clear();
        Ok(())
    }
}

fn simulated_heart_rate() -> impl futures::Stream<Item = Vec<u8>> + Send {
    stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(800)).await;
        let random = rand::thread_rng().gen_range(50..70);
        Some((vec![0x00, random], ()))
    })
}

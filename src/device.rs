use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use log::{info, warn};
use uuid::Uuid;

use crate::error::ConnectionError;
use crate::sink::DashboardSink;
use crate::transport::{DeviceFilter, RemoteDevice, Transport};


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkStatus::Disconnected => "Disconnected",
            LinkStatus::Connecting => "Connecting",
            LinkStatus::Connected => "Connected",
        };
        f.write_str(text)
    }
}

/// One paired device. Only exists while Connecting or Connected.
pub struct DeviceHandle<D> {
    pub device: D,
    pub name: String,
    pub status: LinkStatus,
    allowed_services: Vec<Uuid>,
}

impl<D> DeviceHandle<D> {
    pub fn allows(&self, service: Uuid) -> bool {
        self.allowed_services.contains(&service)
    }
}

/// One discovery or pairing step. The core loop polls it next to its timers
/// and feeds the result back through `DeviceLink::advance`.
pub type LinkTask<D> = Pin<Box<dyn Future<Output = LinkEvent<D>>>>;

pub enum LinkEvent<D> {
    Scanned(Result<Vec<String>, ConnectionError>),
    Found {
        allowed_services: Vec<Uuid>,
        result: Result<D, ConnectionError>,
    },
    Paired(Result<(), ConnectionError>),
}

pub enum LinkProgress<D> {
    /// Run this next.
    Next(LinkTask<D>),
    Scanned(Result<Vec<String>, ConnectionError>),
    Connected(Result<(), ConnectionError>),
}

/// Owns the connection lifecycle of a single device.
pub struct DeviceLink<T: Transport> {
    transport: Rc<T>,
    handle: Option<DeviceHandle<T::Device>>,
    sink: Box<dyn DashboardSink>,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(transport: T, sink: Box<dyn DashboardSink>) -> Self {
        DeviceLink {
            transport: Rc::new(transport),
            handle: None,
            sink,
        }
    }

    /// Borrow the connected device.
    pub fn connected(&self) -> Option<&DeviceHandle<T::Device>> {
        self.handle
            .as_ref()
            .filter(|handle| handle.status == LinkStatus::Connected)
    }

    pub fn begin_scan(&self, filter: &DeviceFilter) -> LinkTask<T::Device> {
        info!("Scanning for devices...");
        let transport = Rc::clone(&self.transport);
        let filter = filter.clone();
        Box::pin(async move { LinkEvent::Scanned(transport.scan(&filter).await) })
    }

    /// Discovery only. Disconnect whatever is linked before running it.
    pub fn begin_connect(&self, filter: &DeviceFilter) -> LinkTask<T::Device> {
        let transport = Rc::clone(&self.transport);
        let filter = filter.clone();
        Box::pin(async move {
            let result = transport.request_device(&filter).await;
            LinkEvent::Found {
                allowed_services: filter.allowed_services(),
                result,
            }
        })
    }

    pub fn advance(&mut self, event: LinkEvent<T::Device>) -> LinkProgress<T::Device> {
        match event {
            LinkEvent::Scanned(result) => {
                if let Ok(names) = &result {
                    info!("Found {} device(s)", names.len());
                    self.sink.show_devices(names.clone());
                }
                LinkProgress::Scanned(result)
            }
            LinkEvent::Found { allowed_services, result } => match result {
                Ok(device) => LinkProgress::Next(self.pair(device, allowed_services)),
                Err(err) => {
                    warn!("Device discovery failed: {err}");
                    LinkProgress::Connected(Err(err))
                }
            },
            LinkEvent::Paired(result) => LinkProgress::Connected(self.finish_pairing(result)),
        }
    }

    fn pair(&mut self, device: T::Device, allowed_services: Vec<Uuid>) -> LinkTask<T::Device> {
        let pairing = device.clone();
        self.handle = Some(DeviceHandle {
            name: device.name(),
            device,
            status: LinkStatus::Connecting,
            allowed_services,
        });
        self.set_status(LinkStatus::Connecting);
        Box::pin(async move { LinkEvent::Paired(pairing.connect().await) })
    }

    fn finish_pairing(&mut self, result: Result<(), ConnectionError>) -> Result<(), ConnectionError> {
        // Disconnected while pairing
        let Some(name) = self.handle.as_ref().map(|handle| handle.name.clone()) else {
            return Err(ConnectionError::NoMatchingDevice);
        };

        match result {
            Ok(()) => {
                info!("Connected to device: {name}");
                self.set_status(LinkStatus::Connected);
                Ok(())
            }
            Err(err) => {
                warn!("Connecting to {name} failed: {err}");
                self.handle = None;
                self.set_status(LinkStatus::Disconnected);
                Err(err)
            }
        }
    }

    pub async fn disconnect(&mut self) {
        let Some(handle) = self.handle.take() else { return; };

        info!("Disconnecting from {}...", handle.name);
        if let Err(err) = handle.device.disconnect().await {
            // The handle is gone either way
            warn!("Error disconnecting from {}: {err}", handle.name);
        }
        self.set_status(LinkStatus::Disconnected);
    }

    /// The transport dropped the link on its own.
    pub fn link_lost(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!("Lost connection to {}", handle.name);
            self.set_status(LinkStatus::Disconnected);
        }
    }

    fn set_status(&mut self, status: LinkStatus) {
        if let Some(handle) = self.handle.as_mut() {
            handle.status = status;
        }
        let text = match self.handle.as_ref() {
            Some(handle) => format!("{status}: {}", handle.name),
            None => status.to_string(),
        };
        self.sink.show_status(status, text);
    }
}


#[cfg(test)]
impl<T: Transport> DeviceLink<T> {
    pub fn status(&self) -> LinkStatus {
        self.handle
            .as_ref()
            .map_or(LinkStatus::Disconnected, |handle| handle.status)
    }

    /// Run a task chain to its end, the way the core loop does.
    pub async fn finish(&mut self, mut task: LinkTask<T::Device>) -> LinkProgress<T::Device> {
        loop {
            match self.advance(task.await) {
                LinkProgress::Next(next) => task = next,
                done => return done,
            }
        }
    }

    pub async fn connect(&mut self, filter: &DeviceFilter) -> Result<(), ConnectionError> {
        self.disconnect().await;
        let task = self.begin_connect(filter);
        match self.finish(task).await {
            LinkProgress::Connected(result) => result,
            _ => Err(ConnectionError::NoMatchingDevice),
        }
    }

    pub async fn scan(&mut self, filter: &DeviceFilter) -> Result<Vec<String>, ConnectionError> {
        let task = self.begin_scan(filter);
        match self.finish(task).await {
            LinkProgress::Scanned(result) => result,
            _ => Err(ConnectionError::NoMatchingDevice),
        }
    }
}

use std::future;

use futures::StreamExt;
use log::{info, warn};
use uuid::Uuid;

use crate::device::{DeviceHandle, LinkStatus};
use crate::error::SubscribeError;
use crate::measurement::{DashboardMetrics, MeasurementFormat};
use crate::sink::{update_dashboard, DashboardSink};
use crate::transport::{NotificationStream, RemoteDevice};


/// The characteristic we're currently enrolled on. Dropping it cancels the
/// notification stream.
pub struct ServiceBinding {
    pub service: Uuid,
    pub characteristic: Uuid,
    notifications: NotificationStream,
}

pub struct NotificationSubscriber {
    binding: Option<ServiceBinding>,
    format: MeasurementFormat,
    sink: Box<dyn DashboardSink>,
}

impl NotificationSubscriber {
    pub fn new(format: MeasurementFormat, sink: Box<dyn DashboardSink>) -> Self {
        NotificationSubscriber {
            binding: None,
            format,
            sink,
        }
    }

    #[cfg(test)]
    pub fn binding(&self) -> Option<&ServiceBinding> {
        self.binding.as_ref()
    }

    pub async fn subscribe<D: RemoteDevice>(
        &mut self,
        handle: &DeviceHandle<D>,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), SubscribeError> {
        if handle.status != LinkStatus::Connected {
            return Err(SubscribeError::Subscription(format!("{} is not connected", handle.name)));
        }
        if !handle.allows(service) {
            return Err(SubscribeError::ServiceUnavailable { service, characteristic });
        }

        // Replace, never stack, bindings
        self.unsubscribe(&handle.device).await;

        info!("Subscribing to characteristic {characteristic} on {}", handle.name);
        let notifications = handle.device.start_notifications(service, characteristic).await?;
        self.binding = Some(ServiceBinding {
            service,
            characteristic,
            notifications,
        });
        Ok(())
    }

    pub async fn unsubscribe<D: RemoteDevice>(&mut self, device: &D) {
        let Some(binding) = self.binding.take() else { return; };
        if let Err(err) = device
            .stop_notifications(binding.service, binding.characteristic)
            .await
        {
            warn!("Failed to stop notifications: {err}");
        }
    }

    /// Link is gone; nothing to tell the transport.
    pub fn invalidate(&mut self) {
        self.binding = None;
    }

    /// Next raw payload, or `None` once the stream ends. Pending forever while
    /// unsubscribed.
    pub async fn next_payload(&mut self) -> Option<Vec<u8>> {
        match self.binding.as_mut() {
            Some(binding) => binding.notifications.next().await,
            None => future::pending().await,
        }
    }

    pub fn on_value_changed(&mut self, payload: &[u8]) {
        match self.format.decode(payload) {
            Ok(reading) => update_dashboard(self.sink.as_mut(), DashboardMetrics::from(reading)),
            Err(err) => warn!("Dropping notification: {err}"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceLink;
    use crate::fake::{FakeDevice, FakeTransport};
    use crate::measurement::Metric;
    use crate::sink::testing::RecordingSink;
    use crate::transport::{DeviceFilter, BATTERY_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};

    async fn connected(device: &FakeDevice) -> DeviceLink<FakeTransport> {
        let mut link = DeviceLink::new(
            FakeTransport::with_devices(vec![device.clone()]),
            Box::new(RecordingSink::default()),
        );
        link.connect(&DeviceFilter::default()).await.unwrap();
        link
    }

    fn subscriber() -> (NotificationSubscriber, RecordingSink) {
        let sink = RecordingSink::default();
        (NotificationSubscriber::new(MeasurementFormat::default(), Box::new(sink.clone())), sink)
    }

    async fn pump(subscriber: &mut NotificationSubscriber) {
        let payload = subscriber.next_payload().await.unwrap();
        subscriber.on_value_changed(&payload);
    }

    #[tokio::test]
    async fn readings_are_dispatched_in_order() {
        let device = FakeDevice::new("NeuroFit Band");
        let link = connected(&device).await;
        let (mut subscriber, sink) = subscriber();

        subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap();

        device.notify(&[0x00, 0x4B]);
        device.notify(&[0x00, 0x4C]);
        pump(&mut subscriber).await;
        pump(&mut subscriber).await;

        assert_eq!(
            sink.metrics(),
            vec![
                (Metric::HeartRate, "75 BPM".to_string()),
                (Metric::HeartRate, "76 BPM".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn short_payload_is_dropped_and_stream_survives() {
        let device = FakeDevice::new("NeuroFit Band");
        let link = connected(&device).await;
        let (mut subscriber, sink) = subscriber();
        subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap();

        device.notify(&[0x00]);
        device.notify(&[0x00, 0x50]);
        pump(&mut subscriber).await;
        assert!(sink.metrics().is_empty());
        pump(&mut subscriber).await;

        assert_eq!(sink.metrics(), vec![(Metric::HeartRate, "80 BPM".to_string())]);
        assert!(sink.notices().is_empty());
    }

    #[tokio::test]
    async fn resubscribe_replaces_binding() {
        let device = FakeDevice::new("NeuroFit Band");
        let mut link = connected(&device).await;
        let (mut subscriber, sink) = subscriber();
        subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap();

        subscriber.invalidate();
        link.disconnect().await;
        link.connect(&DeviceFilter::default()).await.unwrap();
        subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap();
        subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap();

        device.notify(&[0x00, 0x40]);
        pump(&mut subscriber).await;
        device.notify(&[0x00, 0x41]);
        pump(&mut subscriber).await;

        assert_eq!(device.subscribe_calls(), 3);
        assert_eq!(
            sink.metrics(),
            vec![
                (Metric::HeartRate, "64 BPM".to_string()),
                (Metric::HeartRate, "65 BPM".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_characteristic_is_service_unavailable() {
        let device = FakeDevice::new("NeuroFit Band");
        device.without_characteristics();
        let link = connected(&device).await;
        let (mut subscriber, _sink) = subscriber();

        let err = subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap_err();

        assert!(matches!(err, SubscribeError::ServiceUnavailable { .. }));
        assert!(subscriber.binding().is_none());
        assert_eq!(link.status(), LinkStatus::Connected);
    }

    #[tokio::test]
    async fn service_outside_filter_is_unavailable() {
        let device = FakeDevice::new("NeuroFit Band");
        let link = connected(&device).await;
        let (mut subscriber, _sink) = subscriber();

        let unlisted = Uuid::from_u128(0x0000181000001000800000805f9b34fb);
        let err = subscriber
            .subscribe(link.connected().unwrap(), unlisted, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap_err();
        assert!(matches!(err, SubscribeError::ServiceUnavailable { .. }));

        // allowed by the filter, but the device doesn't have it
        let err = subscriber
            .subscribe(link.connected().unwrap(), BATTERY_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap_err();
        assert!(matches!(err, SubscribeError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn rejected_enrollment_is_subscription_error() {
        let device = FakeDevice::new("NeuroFit Band");
        device.reject_subscriptions();
        let link = connected(&device).await;
        let (mut subscriber, _sink) = subscriber();

        let err = subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap_err();

        assert!(matches!(err, SubscribeError::Subscription(_)));
    }

    #[tokio::test]
    async fn stream_end_reports_none() {
        let device = FakeDevice::new("NeuroFit Band");
        let link = connected(&device).await;
        let (mut subscriber, _sink) = subscriber();
        subscriber
            .subscribe(link.connected().unwrap(), HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .unwrap();

        device.drop_link();
        assert_eq!(subscriber.next_payload().await, None);
    }
}

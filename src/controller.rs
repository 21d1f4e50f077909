use std::future;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioChannel;
use crate::config::AppConfig;
use crate::device::{DeviceLink, LinkEvent, LinkProgress, LinkTask};
use crate::feed::SampleFeed;
use crate::location::{JsonFileStore, LocationWatcher};
use crate::session::SessionMachine;
use crate::signal::GuiSignal;
use crate::sink::{update_dashboard, DashboardSink, Emit};
use crate::subscriber::NotificationSubscriber;
use crate::transport::{DeviceFilter, Transport, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};


pub struct AudioChannels {
    pub background: Box<dyn AudioChannel>,
    pub voice: Box<dyn AudioChannel>,
}

/// Owns every core component and runs the one loop that mutates them.
pub struct Controller<T: Transport> {
    link: DeviceLink<T>,
    link_task: Option<LinkTask<T::Device>>,
    subscriber: NotificationSubscriber,
    session: SessionMachine,
    location: Option<LocationWatcher>,
    filter: DeviceFilter,
    sink: Box<dyn DashboardSink>,
    commands: UnboundedReceiver<GuiSignal>,
    shutdown: CancellationToken,
}

impl<T: Transport> Controller<T> {
    pub fn new<S: Emit + Clone + 'static>(
        transport: T,
        config: &AppConfig,
        sink: S,
        audio: AudioChannels,
        commands: UnboundedReceiver<GuiSignal>,
        shutdown: CancellationToken,
    ) -> Self {
        let session = SessionMachine::new(
            config.session.clone(),
            config.audio_dir.clone(),
            audio.background,
            audio.voice,
            SampleFeed::new(Box::new(sink.clone())),
            Box::new(sink.clone()),
        );

        let location = config.location_file.clone().map(|path| {
            let mut watcher = LocationWatcher::new(Box::new(JsonFileStore::new(path)));
            watcher.start_watching();
            watcher
        });

        Controller {
            link: DeviceLink::new(transport, Box::new(sink.clone())),
            link_task: None,
            subscriber: NotificationSubscriber::new(config.measurement, Box::new(sink.clone())),
            session,
            location,
            filter: config.filter.clone(),
            sink: Box::new(sink),
            commands,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("Core loop running");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                signal = self.commands.recv() => match signal {
                    Some(signal) => self.handle(signal).await,
                    None => break,
                },
                event = next_link_event(&mut self.link_task) => self.on_link_event(event).await,
                payload = self.subscriber.next_payload() => self.on_payload(payload),
                tick = self.session.next_tick() => self.session.on_tick(tick),
            }
        }

        info!("Core loop shutting down");
        if self.session.state().status.is_active() {
            self.session.stop();
        }
        self.disconnect().await;
    }

    async fn handle(&mut self, signal: GuiSignal) {
        debug!("Handling {signal:?}");
        match signal {
            GuiSignal::StartScanning => {
                if self.link_task.is_some() {
                    info!("Bluetooth is busy, ignoring scan request");
                } else {
                    self.link_task = Some(self.link.begin_scan(&self.filter));
                }
            }
            GuiSignal::Connect => self.connect(self.filter.clone()).await,
            GuiSignal::ConnectDevice(name) => self.connect(self.filter.with_name(&name)).await,
            GuiSignal::Disconnect => self.disconnect().await,
            GuiSignal::StartSession => {
                if let Err(err) = self.session.start() {
                    warn!("{err}");
                }
            }
            GuiSignal::PauseSession => {
                if let Err(err) = self.session.pause() {
                    warn!("{err}");
                }
            }
            GuiSignal::StopSession => self.session.stop(),
            GuiSignal::SetDuration(secs) => self.session.set_duration(secs),
            GuiSignal::SetBackgroundSound(sound) => self.session.set_background_sound(&sound),
            GuiSignal::SetVoiceGuide(guide) => self.session.set_voice_guide(&guide),
            GuiSignal::SetVoiceVolume(volume) => self.session.set_voice_volume(volume),
            GuiSignal::ExternalMetrics(metrics) => update_dashboard(self.sink.as_mut(), metrics),
            GuiSignal::LocationUpdate(fix) => match self.location.as_mut() {
                Some(watcher) => watcher.on_update(fix),
                None => debug!("No location store configured, ignoring fix"),
            },
            GuiSignal::SetLocationWatching(watching) => match self.location.as_mut() {
                Some(watcher) if watching => watcher.start_watching(),
                Some(watcher) => watcher.stop_watching(),
                None => debug!("No location store configured"),
            },
        }
    }

    /// Starts discovery. The rest happens in `on_link_event` as each step lands.
    async fn connect(&mut self, filter: DeviceFilter) {
        self.disconnect().await;
        self.link_task = Some(self.link.begin_connect(&filter));
    }

    async fn on_link_event(&mut self, event: LinkEvent<T::Device>) {
        match self.link.advance(event) {
            LinkProgress::Next(task) => self.link_task = Some(task),
            LinkProgress::Scanned(Ok(_)) => {}
            LinkProgress::Scanned(Err(err)) => self.sink.show_notice(format!("Scan failed: {err}")),
            LinkProgress::Connected(Err(err)) => {
                self.sink.show_notice(format!("Bluetooth connection failed: {err}"));
            }
            LinkProgress::Connected(Ok(())) => self.subscribe().await,
        }
    }

    async fn subscribe(&mut self) {
        let Some(handle) = self.link.connected() else { return; };
        if let Err(err) = self
            .subscriber
            .subscribe(handle, HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
        {
            // Stay connected, the user can retry
            self.sink.show_notice(format!("Failed to start notifications: {err}"));
        }
    }

    /// Also abandons any discovery or pairing still in flight.
    async fn disconnect(&mut self) {
        self.link_task = None;
        match self.link.connected() {
            Some(handle) => self.subscriber.unsubscribe(&handle.device).await,
            None => self.subscriber.invalidate(),
        }
        self.link.disconnect().await;
    }

    fn on_payload(&mut self, payload: Option<Vec<u8>>) {
        match payload {
            Some(payload) => self.subscriber.on_value_changed(&payload),
            None => {
                self.subscriber.invalidate();
                self.link.link_lost();
                self.sink.show_notice("Device disconnected".to_string());
            }
        }
    }
}

/// Pending forever while no link task is in flight.
async fn next_link_event<D>(task: &mut Option<LinkTask<D>>) -> LinkEvent<D> {
    let Some(pending) = task.as_mut() else {
        return future::pending().await;
    };
    let event = pending.await;
    *task = None;
    event
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::{self, UnboundedSender};

    use super::*;
    use crate::audio::testing::RecordingChannel;
    use crate::device::LinkStatus;
    use crate::error::ConnectionError;
    use crate::fake::{FakeDevice, FakeTransport};
    use crate::location::LocationFix;
    use crate::measurement::{DashboardMetrics, Metric};
    use crate::session::SessionStatus;
    use crate::signal::CoreSignal;
    use crate::sink::testing::RecordingSink;

    struct Rig {
        controller: Controller<FakeTransport>,
        tx: UnboundedSender<GuiSignal>,
        sink: RecordingSink,
        shutdown: CancellationToken,
    }

    fn rig(transport: FakeTransport, config: AppConfig) -> Rig {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = RecordingSink::default();
        let shutdown = CancellationToken::new();
        let audio = AudioChannels {
            background: Box::new(RecordingChannel::default()),
            voice: Box::new(RecordingChannel::default()),
        };
        let controller = Controller::new(transport, &config, sink.clone(), audio, rx, shutdown.clone());
        Rig { controller, tx, sink, shutdown }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn heart_rates(sink: &RecordingSink) -> Vec<String> {
        sink.metrics()
            .into_iter()
            .filter(|(metric, _)| *metric == Metric::HeartRate)
            .map(|(_, text)| text)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_then_stream_heart_rate() {
        let device = FakeDevice::new("NeuroFit Band");
        let Rig { controller, tx, sink, shutdown } =
            rig(FakeTransport::with_devices(vec![device.clone()]), AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::Connect).unwrap();
            settle().await;
            device.notify(&[0x00, 0x4B]);
            device.notify(&[0x00]);
            device.notify(&[0x00, 0x4D]);
            settle().await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert_eq!(heart_rates(&sink), vec!["75 BPM".to_string(), "77 BPM".to_string()]);
        assert!(sink.notices().is_empty());
        // shutdown disconnects
        assert_eq!(sink.statuses().last(), Some(&LinkStatus::Disconnected));
        assert!(!device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delivers_each_notification_once() {
        let device = FakeDevice::new("NeuroFit Band");
        let Rig { controller, tx, sink, shutdown } =
            rig(FakeTransport::with_devices(vec![device.clone()]), AppConfig::default());

        let driver = async {
            for signal in [GuiSignal::Connect, GuiSignal::Disconnect, GuiSignal::Connect, GuiSignal::Connect] {
                tx.send(signal).unwrap();
                settle().await;
            }
            device.notify(&[0x00, 0x3C]);
            settle().await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert_eq!(heart_rates(&sink), vec!["60 BPM".to_string()]);
        assert_eq!(device.subscribe_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connection_is_a_notice() {
        let mut transport = FakeTransport::with_devices(vec![]);
        transport.fail_discovery(ConnectionError::NoAdapter);
        let Rig { controller, tx, sink, shutdown } = rig(transport, AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::Connect).unwrap();
            settle().await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert_eq!(
            sink.notices(),
            vec!["Bluetooth connection failed: no Bluetooth adapter found".to_string()]
        );
        assert!(sink.statuses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_keeps_the_link() {
        let device = FakeDevice::new("NeuroFit Band");
        device.without_characteristics();
        let Rig { controller, tx, sink, shutdown } =
            rig(FakeTransport::with_devices(vec![device.clone()]), AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::Connect).unwrap();
            settle().await;
            assert!(device.is_connected());
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert_eq!(sink.notices().len(), 1);
        assert!(sink.notices()[0].starts_with("Failed to start notifications"));
        assert_eq!(
            sink.statuses(),
            vec![LinkStatus::Connecting, LinkStatus::Connected, LinkStatus::Disconnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_link_is_reported() {
        let device = FakeDevice::new("NeuroFit Band");
        let Rig { controller, tx, sink, shutdown } =
            rig(FakeTransport::with_devices(vec![device.clone()]), AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::Connect).unwrap();
            settle().await;
            device.drop_link();
            settle().await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert_eq!(sink.notices(), vec!["Device disconnected".to_string()]);
        assert_eq!(sink.statuses().last(), Some(&LinkStatus::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn session_runs_alongside_the_link() {
        let config = AppConfig {
            session: crate::session::SessionConfig { duration_secs: 3, ..Default::default() },
            ..Default::default()
        };
        let Rig { controller, tx, sink, shutdown } =
            rig(FakeTransport::with_devices(vec![]), config);

        let driver = async {
            tx.send(GuiSignal::StartSession).unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            tx.send(GuiSignal::PauseSession).unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(GuiSignal::PauseSession).unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        // already stopped, so shutdown adds nothing
        assert_eq!(sink.timers(), vec!["00:03", "00:02", "00:01", "00:00"]);
        assert!(sink.signals().contains(&CoreSignal::Session(SessionStatus::Stopped)));
        // the feed kept charting while paused
        assert!(sink.charts().len() >= 6);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_keep_running_during_discovery() {
        let transport = FakeTransport::with_devices(vec![FakeDevice::new("NeuroFit Band")])
            .with_discovery_delay(Duration::from_secs(5));
        let Rig { controller, tx, sink, shutdown } = rig(transport, AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::StartSession).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(GuiSignal::StartScanning).unwrap();

            tokio::time::sleep(Duration::from_millis(4000)).await;
            assert_eq!(sink.timers(), vec!["05:00", "04:59", "04:58", "04:57", "04:56"]);
            assert_eq!(sink.charts().len(), 4);
            assert!(!sink.signals().iter().any(|s| matches!(s, CoreSignal::DiscoveredPeripherals(_))));

            tokio::time::sleep(Duration::from_millis(1500)).await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert!(sink
            .signals()
            .contains(&CoreSignal::DiscoveredPeripherals(vec!["NeuroFit Band".to_string()])));
        // five more ticks, then shutdown stops the running session
        let timers = sink.timers();
        assert_eq!(timers.len(), 7);
        assert_eq!(timers.last().map(String::as_str), Some("00:00"));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_connect_replaces_one_in_flight() {
        let device = FakeDevice::new("NeuroFit Band");
        let transport = FakeTransport::with_devices(vec![device.clone()])
            .with_discovery_delay(Duration::from_secs(2));
        let Rig { controller, tx, sink, shutdown } = rig(transport, AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::Connect).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(GuiSignal::Connect).unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert_eq!(device.subscribe_calls(), 1);
        assert_eq!(
            sink.statuses(),
            vec![LinkStatus::Connecting, LinkStatus::Connected, LinkStatus::Disconnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_abandons_discovery() {
        let device = FakeDevice::new("NeuroFit Band");
        let transport = FakeTransport::with_devices(vec![device.clone()])
            .with_discovery_delay(Duration::from_secs(2));
        let Rig { controller, tx, sink, shutdown } = rig(transport, AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::Connect).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(GuiSignal::Disconnect).unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert!(!device.is_connected());
        assert!(sink.statuses().is_empty());
        assert!(sink.notices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn external_metrics_pass_through() {
        let Rig { controller, tx, sink, shutdown } =
            rig(FakeTransport::with_devices(vec![]), AppConfig::default());

        let driver = async {
            tx.send(GuiSignal::ExternalMetrics(DashboardMetrics {
                spo2: Some(98.0),
                mood_score: Some(72.0),
                ..Default::default()
            }))
            .unwrap();
            settle().await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        assert_eq!(
            sink.metrics(),
            vec![(Metric::Spo2, "98%".to_string()), (Metric::MoodScore, "72/100".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn location_fixes_are_persisted() {
        let path = std::env::temp_dir().join(format!("neurofit-controller-{}.json", std::process::id()));
        let config = AppConfig {
            location_file: Some(path.clone()),
            ..Default::default()
        };
        let Rig { controller, tx, sink: _, shutdown } = rig(FakeTransport::with_devices(vec![]), config);

        let driver = async {
            tx.send(GuiSignal::LocationUpdate(LocationFix {
                latitude: 20.29,
                longitude: 85.82,
                accuracy: 8.0,
                timestamp: 1_760_000_000_000,
            }))
            .unwrap();
            settle().await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["lastLocation"]["latitude"], 20.29);
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn location_watching_can_be_switched_off() {
        let path = std::env::temp_dir().join(format!("neurofit-watching-{}.json", std::process::id()));
        let config = AppConfig {
            location_file: Some(path.clone()),
            ..Default::default()
        };
        let Rig { controller, tx, sink: _, shutdown } = rig(FakeTransport::with_devices(vec![]), config);
        let fix = |latitude| LocationFix {
            latitude,
            longitude: 85.82,
            accuracy: 8.0,
            timestamp: 1_760_000_000_000,
        };

        let driver = async {
            tx.send(GuiSignal::LocationUpdate(fix(20.29))).unwrap();
            tx.send(GuiSignal::SetLocationWatching(false)).unwrap();
            tx.send(GuiSignal::LocationUpdate(fix(21.0))).unwrap();
            settle().await;
            shutdown.cancel();
        };
        tokio::join!(controller.run(), driver);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["lastLocation"]["latitude"], 20.29);
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_command_channel_ends_the_loop() {
        let Rig { controller, tx, .. } = rig(FakeTransport::with_devices(vec![]), AppConfig::default());
        drop(tx);
        controller.run().await;
    }
}

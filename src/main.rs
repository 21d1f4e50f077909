use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use eframe::egui::{self, ComboBox, Slider};
use log::{info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

mod audio;
mod bthr;
mod config;
mod controller;
mod device;
mod error;
mod fake;
mod feed;
mod location;
mod measurement;
mod session;
mod signal;
mod sink;
mod subscriber;
mod transport;
mod widget;

use audio::RodioChannel;
use bthr::BthrTransport;
use config::AppConfig;
use controller::{AudioChannels, Controller};
use device::LinkStatus;
use fake::FakeTransport;
use feed::ChartData;
use measurement::Metric;
use session::{format_mm_ss, SessionConfig, SessionStatus, NO_GUIDE};
use signal::{CoreSignal, GuiSignal};
use sink::GuiSink;

const MAX_FPS: f64 = 60.0;
const SOUNDS: &[&str] = &["rain", "ocean", "forest", "white_noise"];
const GUIDES: &[&str] = &[NO_GUIDE, "breathing", "body_scan", "loving_kindness"];


fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load();
    let (tx_to_gui, rx_from_core) = mpsc::unbounded_channel();
    let (tx_from_gui, rx_to_core) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let core = {
        let config = config.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("core".to_string())
            .spawn(move || run_core(config, GuiSink::new(tx_to_gui), rx_to_core, shutdown))
            .context("Failed to spawn core thread")?
    };

    let session_defaults = config.session.clone();
    let has_location_store = config.location_file.is_some();
    let native_options = eframe::NativeOptions::default();
    let gui_result = eframe::run_native(
        "neurofit",
        native_options,
        Box::new(|cc| {
            Ok(Box::new(DashboardApp::new(
                cc,
                rx_from_core,
                tx_from_gui,
                session_defaults,
                has_location_store,
            )))
        }),
    );

    shutdown.cancel();
    match core.join() {
        Ok(result) => result?,
        Err(_) => warn!("Core thread panicked"),
    }
    gui_result.map_err(|err| anyhow!("GUI exited with an error: {err}"))
}

/// Everything but the window runs here, on one thread.
fn run_core(
    config: AppConfig,
    sink: GuiSink,
    commands: UnboundedReceiver<GuiSignal>,
    shutdown: CancellationToken,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build core runtime")?;

    let audio = AudioChannels {
        background: Box::new(RodioChannel::new("background")),
        voice: Box::new(RodioChannel::new("voice")),
    };

    runtime.block_on(async move {
        if config.fake_device {
            info!("Using the simulated sensor");
            Controller::new(FakeTransport::simulated(), &config, sink, audio, commands, shutdown)
                .run()
                .await;
        } else {
            Controller::new(BthrTransport::new(), &config, sink, audio, commands, shutdown)
                .run()
                .await;
        }
    });
    Ok(())
}


struct DashboardApp {
    rx_from_core: UnboundedReceiver<CoreSignal>,
    tx_from_gui: UnboundedSender<GuiSignal>,
    frame_time: Duration,
    link_status: LinkStatus,
    link_text: String,
    peris: Vec<String>,
    heart_rate: String,
    spo2: String,
    mood_score: String,
    notice: Option<String>,
    timer: String,
    session: SessionStatus,
    chart: ChartData,
    duration_minutes: u32,
    sound: String,
    guide: String,
    volume: f32,
    /// `None` when no location store is configured.
    watch_location: Option<bool>,
}

impl DashboardApp {
    fn new(
        _cc: &eframe::CreationContext<'_>,
        rx_from_core: UnboundedReceiver<CoreSignal>,
        tx_from_gui: UnboundedSender<GuiSignal>,
        defaults: SessionConfig,
        has_location_store: bool,
    ) -> Self {
        DashboardApp {
            rx_from_core,
            tx_from_gui,
            frame_time: Duration::from_secs_f64(1.0 / MAX_FPS),
            link_status: LinkStatus::Disconnected,
            link_text: LinkStatus::Disconnected.to_string(),
            peris: vec![],
            heart_rate: "--".to_string(),
            spo2: "--".to_string(),
            mood_score: "--".to_string(),
            notice: None,
            timer: format_mm_ss(0),
            session: SessionStatus::Idle,
            chart: ChartData::default(),
            duration_minutes: (defaults.duration_secs / 60).max(1),
            sound: defaults.background_sound,
            guide: defaults.voice_guide,
            volume: defaults.voice_volume,
            watch_location: has_location_store.then_some(true),
        }
    }

    fn read_channel(&mut self) {
        while let Ok(signal) = self.rx_from_core.try_recv() {
            match signal {
                CoreSignal::LinkStatus { status, text } => {
                    self.link_status = status;
                    self.link_text = text;
                }
                CoreSignal::DiscoveredPeripherals(peris) => self.peris = peris,
                CoreSignal::Metric(Metric::HeartRate, text) => self.heart_rate = text,
                CoreSignal::Metric(Metric::Spo2, text) => self.spo2 = text,
                CoreSignal::Metric(Metric::MoodScore, text) => self.mood_score = text,
                CoreSignal::Notice(text) => self.notice = Some(text),
                CoreSignal::Timer(text) => self.timer = text,
                CoreSignal::Session(status) => self.session = status,
                CoreSignal::Chart(chart) => self.chart = chart,
            }
        }
    }

    fn send(&self, signal: GuiSignal) {
        if self.tx_from_gui.send(signal).is_err() {
            warn!("Core is gone, dropping GUI signal");
        }
    }

    fn device_panel(&mut self, ui: &mut egui::Ui) {
        ui.add(widget::get_heart_rate_label(&self.heart_rate));
        ui.horizontal(|ui| {
            ui.add(widget::get_metric_label("SpO2", &self.spo2));
            ui.add(widget::get_metric_label("Mood", &self.mood_score));
        });
        ui.add(widget::get_status_label(self.link_status, &self.link_text));

        ui.horizontal(|ui| {
            let idle = self.link_status == LinkStatus::Disconnected;
            if ui.add_enabled(idle, egui::Button::new("Connect")).clicked() {
                self.send(GuiSignal::Connect);
            }
            if ui.add_enabled(idle, egui::Button::new("Scan")).clicked() {
                self.send(GuiSignal::StartScanning);
            }
            if self.link_status == LinkStatus::Connected
                && ui.add(widget::get_disconnect_device_button()).clicked()
            {
                self.send(GuiSignal::Disconnect);
            }
        });

        // devices
        let mut clicked = None;
        for device in &self.peris {
            if ui.add(widget::get_device_button(device)).clicked() {
                clicked = Some(device.clone());
            }
        }
        if let Some(device) = clicked {
            info!("You clicked: {device}");
            self.send(GuiSignal::ConnectDevice(device));
        }

        if let Some(mut watching) = self.watch_location {
            if ui.checkbox(&mut watching, "Remember my location").changed() {
                self.watch_location = Some(watching);
                self.send(GuiSignal::SetLocationWatching(watching));
            }
        }

        if let Some(notice) = self.notice.clone() {
            ui.horizontal(|ui| {
                ui.colored_label(egui::Color32::LIGHT_RED, notice);
                if ui.small_button("x").clicked() {
                    self.notice = None;
                }
            });
        }
    }

    fn session_panel(&mut self, ui: &mut egui::Ui) {
        ui.add(widget::get_timer_label(&self.timer));

        let active = matches!(self.session, SessionStatus::Running | SessionStatus::Paused);
        ui.horizontal(|ui| {
            if ui.add_enabled(!active, widget::get_session_button("Start")).clicked() {
                self.send(GuiSignal::StartSession);
            }
            let pause_text = if self.session == SessionStatus::Paused { "Resume" } else { "Pause" };
            if ui.add_enabled(active, widget::get_session_button(pause_text)).clicked() {
                self.send(GuiSignal::PauseSession);
            }
            if ui.add_enabled(active, widget::get_session_button("Stop")).clicked() {
                self.send(GuiSignal::StopSession);
            }
        });

        let minutes = self.duration_minutes;
        ui.add(Slider::new(&mut self.duration_minutes, 1..=60).text("Minutes"));
        if minutes != self.duration_minutes {
            self.send(GuiSignal::SetDuration(self.duration_minutes * 60));
        }

        let sound = self.sound.clone();
        ComboBox::from_label("Background sound")
            .selected_text(self.sound.clone())
            .show_ui(ui, |ui| {
                for option in SOUNDS {
                    ui.selectable_value(&mut self.sound, option.to_string(), *option);
                }
            });
        if sound != self.sound {
            self.send(GuiSignal::SetBackgroundSound(self.sound.clone()));
        }

        let guide = self.guide.clone();
        ComboBox::from_label("Voice guide")
            .selected_text(self.guide.clone())
            .show_ui(ui, |ui| {
                for option in GUIDES {
                    ui.selectable_value(&mut self.guide, option.to_string(), *option);
                }
            });
        if guide != self.guide {
            self.send(GuiSignal::SetVoiceGuide(self.guide.clone()));
        }

        if ui.add(Slider::new(&mut self.volume, 0.0..=1.0).text("Voice volume")).changed() {
            self.send(GuiSignal::SetVoiceVolume(self.volume));
        }

        widget::draw_chart(ui, &self.chart);
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.read_channel();

        egui::CentralPanel::default().show(ctx, |ui| {
            self.device_panel(ui);
            ui.separator();
            self.session_panel(ui);
        });

        ctx.request_repaint_after(self.frame_time);
    }
}

use std::future;
use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant, Interval};

use crate::audio::{AudioChannel, AudioTrack};
use crate::error::SessionError;
use crate::feed::SampleFeed;
use crate::sink::SessionSink;


pub const NO_GUIDE: &str = "none";
const BACKGROUND_VOLUME: f32 = 0.3;
const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

impl SessionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_secs: u32,
    pub background_sound: String,
    pub voice_guide: String,
    pub voice_volume: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: 300,
            background_sound: "rain".into(),
            voice_guide: NO_GUIDE.into(),
            voice_volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub time_remaining: u32,
}

/// Which of the session's timers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTick {
    Countdown,
    Sample,
}

pub fn format_mm_ss(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub struct SessionMachine {
    config: SessionConfig,
    state: SessionState,
    audio_dir: PathBuf,
    background: Box<dyn AudioChannel>,
    voice: Box<dyn AudioChannel>,
    /// Channels this session started. Whatever an earlier session left
    /// loaded stays untouched.
    background_live: bool,
    voice_live: bool,
    countdown: Option<Interval>,
    feed: SampleFeed,
    sink: Box<dyn SessionSink>,
}

impl SessionMachine {
    pub fn new(
        config: SessionConfig,
        audio_dir: PathBuf,
        background: Box<dyn AudioChannel>,
        voice: Box<dyn AudioChannel>,
        feed: SampleFeed,
        sink: Box<dyn SessionSink>,
    ) -> Self {
        SessionMachine {
            config,
            state: SessionState::default(),
            audio_dir,
            background,
            voice,
            background_live: false,
            voice_live: false,
            countdown: None,
            feed,
            sink,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn feed(&self) -> &SampleFeed {
        &self.feed
    }

    pub fn set_duration(&mut self, secs: u32) {
        self.config.duration_secs = secs;
    }

    pub fn set_background_sound(&mut self, sound: &str) {
        self.config.background_sound = sound.to_string();
    }

    pub fn set_voice_guide(&mut self, guide: &str) {
        self.config.voice_guide = guide.to_string();
    }

    /// Takes effect right away on this session's guidance, paused or not.
    pub fn set_voice_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.config.voice_volume = volume;
        if self.voice_live {
            self.voice.set_volume(volume);
        }
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state.status.is_active() {
            return Err(SessionError::InvalidTransition {
                action: "start",
                from: self.state.status,
            });
        }

        self.state.time_remaining = self.config.duration_secs;
        info!("Starting {} s session", self.config.duration_secs);

        let track = AudioTrack::background(&self.audio_dir, &self.config.background_sound);
        self.background_live = match self.background.play(&track, BACKGROUND_VOLUME) {
            Ok(()) => true,
            Err(err) => {
                warn!("Background sound failed: {err}");
                false
            }
        };
        self.voice_live = false;
        if self.config.voice_guide != NO_GUIDE {
            let track = AudioTrack::guidance(&self.audio_dir, &self.config.voice_guide);
            match self.voice.play(&track, self.config.voice_volume) {
                Ok(()) => self.voice_live = true,
                Err(err) => warn!("Voice guidance failed: {err}"),
            }
        }

        self.countdown = Some(time::interval_at(Instant::now() + COUNTDOWN_PERIOD, COUNTDOWN_PERIOD));
        self.feed.start();
        self.transition(SessionStatus::Running);
        self.sink.show_timer(format_mm_ss(self.state.time_remaining));
        Ok(())
    }

    /// Running <-> Paused. The sample feed keeps going either way.
    pub fn pause(&mut self) -> Result<SessionStatus, SessionError> {
        match self.state.status {
            SessionStatus::Running => {
                for (_, channel) in self.live_channels() {
                    channel.pause();
                }
                self.transition(SessionStatus::Paused);
            }
            SessionStatus::Paused => {
                for (name, channel) in self.live_channels() {
                    if let Err(err) = channel.resume() {
                        warn!("Resuming {name} audio failed: {err}");
                    }
                }
                self.transition(SessionStatus::Running);
            }
            from => return Err(SessionError::InvalidTransition { action: "pause", from }),
        }
        Ok(self.state.status)
    }

    pub fn stop(&mut self) {
        if self.state.status == SessionStatus::Idle {
            return;
        }

        // Timers go first so neither can fire after this returns
        self.countdown = None;
        self.feed.stop();

        for (_, channel) in self.live_channels() {
            channel.pause();
        }
        self.background_live = false;
        self.voice_live = false;
        self.state.time_remaining = 0;
        self.sink.show_timer(format_mm_ss(0));
        if self.state.status != SessionStatus::Stopped {
            info!("Session stopped");
        }
        self.transition(SessionStatus::Stopped);
    }

    pub async fn next_tick(&mut self) -> SessionTick {
        tokio::select! {
            _ = countdown_tick(&mut self.countdown) => SessionTick::Countdown,
            _ = self.feed.next_tick() => SessionTick::Sample,
        }
    }

    pub fn on_tick(&mut self, tick: SessionTick) {
        match tick {
            SessionTick::Countdown => self.on_countdown_tick(),
            SessionTick::Sample => self.feed.on_tick(),
        }
    }

    pub fn on_countdown_tick(&mut self) {
        if self.state.status != SessionStatus::Running {
            return;
        }

        self.state.time_remaining = self.state.time_remaining.saturating_sub(1);
        if self.state.time_remaining == 0 {
            info!("Session complete");
            self.stop();
            return;
        }
        self.sink.show_timer(format_mm_ss(self.state.time_remaining));
    }

    fn live_channels(&mut self) -> Vec<(&'static str, &mut dyn AudioChannel)> {
        let mut live: Vec<(&'static str, &mut dyn AudioChannel)> = Vec::with_capacity(2);
        if self.background_live {
            live.push(("background", self.background.as_mut()));
        }
        if self.voice_live {
            live.push(("voice", self.voice.as_mut()));
        }
        live
    }

    fn transition(&mut self, status: SessionStatus) {
        self.state.status = status;
        self.sink.show_session(status);
    }
}

async fn countdown_tick(countdown: &mut Option<Interval>) {
    match countdown.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

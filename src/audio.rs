use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;

use log::{debug, warn};
use rodio::{Decoder, OutputStream, Sink, Source};

use crate::error::PlaybackError;


type BoxedSource = Box<dyn Source<Item = i16> + Send>;

/// Which file a channel should play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub path: PathBuf,
    pub looped: bool,
}

impl AudioTrack {
    pub fn background(audio_dir: &Path, sound: &str) -> Self {
        AudioTrack {
            path: audio_dir.join(format!("{sound}.mp3")),
            looped: true,
        }
    }

    pub fn guidance(audio_dir: &Path, guide: &str) -> Self {
        AudioTrack {
            path: audio_dir.join("guidance").join(format!("{guide}.mp3")),
            looped: false,
        }
    }
}

/// One independently controllable playback channel.
pub trait AudioChannel {
    /// Replace whatever is loaded and start playing.
    fn play(&mut self, track: &AudioTrack, volume: f32) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn resume(&mut self) -> Result<(), PlaybackError>;
    fn set_volume(&mut self, volume: f32);
}

enum AudioCommand {
    Play { source: BoxedSource, volume: f32 },
    Pause,
    Resume,
    SetVolume(f32),
    Clear,
}

/// Audio out through rodio. The output stream isn't `Send`, so it lives on a
/// dedicated thread fed by a command channel.
pub struct RodioChannel {
    name: &'static str,
    tx: Option<Sender<AudioCommand>>,
    loaded: bool,
}

impl RodioChannel {
    pub fn new(name: &'static str) -> Self {
        RodioChannel {
            name,
            tx: None,
            loaded: false,
        }
    }

    fn ensure_thread(&mut self) -> Result<Sender<AudioCommand>, PlaybackError> {
        if let Some(tx) = self.tx.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();
        let name = self.name;
        thread::Builder::new()
            .name(format!("audio-{name}"))
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(output) => output,
                    Err(err) => {
                        warn!("{name}: no audio output: {err}");
                        return;
                    }
                };
                let mut sink: Option<Sink> = None;

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Play { source, volume } => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                            match Sink::try_new(&handle) {
                                Ok(new_sink) => {
                                    new_sink.set_volume(volume.clamp(0.0, 1.0));
                                    new_sink.append(source);
                                    sink = Some(new_sink);
                                }
                                Err(err) => warn!("{name}: can't create audio sink: {err}"),
                            }
                        }
                        AudioCommand::Pause => {
                            if let Some(s) = sink.as_ref() {
                                s.pause();
                            }
                        }
                        AudioCommand::Resume => {
                            if let Some(s) = sink.as_ref() {
                                s.play();
                            }
                        }
                        AudioCommand::SetVolume(volume) => {
                            if let Some(s) = sink.as_ref() {
                                s.set_volume(volume.clamp(0.0, 1.0));
                            }
                        }
                        AudioCommand::Clear => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                        }
                    }
                }
                debug!("{name}: audio thread exiting");
            })
            .map_err(|err| PlaybackError::Engine(err.to_string()))?;

        self.tx = Some(tx.clone());
        Ok(tx)
    }

    /// Forget the current track so a later resume can't bring it back.
    fn unload(&mut self) {
        if self.loaded {
            if let Some(tx) = self.tx.as_ref() {
                tx.send(AudioCommand::Clear).ok();
            }
        }
        self.loaded = false;
    }

    fn send(&mut self, cmd: AudioCommand) -> Result<(), PlaybackError> {
        let tx = self.ensure_thread()?;
        if tx.send(cmd).is_err() {
            // Thread died (no output device); next call retries
            self.tx = None;
            return Err(PlaybackError::Engine(format!("{} audio thread stopped", self.name)));
        }
        Ok(())
    }
}

fn open_source(track: &AudioTrack) -> Result<BoxedSource, PlaybackError> {
    let path = track.path.display().to_string();
    let file = File::open(&track.path).map_err(|source| PlaybackError::Open {
        path: path.clone(),
        source,
    })?;
    let reader = BufReader::new(file);

    let source: BoxedSource = if track.looped {
        Box::new(Decoder::new_looped(reader).map_err(|source| PlaybackError::Decode { path, source })?)
    } else {
        Box::new(Decoder::new(reader).map_err(|source| PlaybackError::Decode { path, source })?)
    };
    Ok(source)
}

impl AudioChannel for RodioChannel {
    fn play(&mut self, track: &AudioTrack, volume: f32) -> Result<(), PlaybackError> {
        let result = open_source(track).and_then(|source| self.send(AudioCommand::Play { source, volume }));
        if result.is_err() {
            self.unload();
        }
        result?;
        self.loaded = true;
        Ok(())
    }

    fn pause(&mut self) {
        if !self.loaded {
            return;
        }
        if let Err(err) = self.send(AudioCommand::Pause) {
            warn!("{err}");
        }
    }

    fn resume(&mut self) -> Result<(), PlaybackError> {
        if !self.loaded {
            return Ok(());
        }
        self.send(AudioCommand::Resume)
    }

    fn set_volume(&mut self, volume: f32) {
        if !self.loaded {
            return;
        }
        if let Err(err) = self.send(AudioCommand::SetVolume(volume)) {
            warn!("{err}");
        }
    }
}

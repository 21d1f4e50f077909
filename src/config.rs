use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::measurement::MeasurementFormat;
use crate::session::SessionConfig;
use crate::transport::DeviceFilter;


pub const CONFIG_ENV: &str = "NEUROFIT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Use the simulated sensor instead of Bluetooth.
    pub fake_device: bool,
    pub filter: DeviceFilter,
    pub measurement: MeasurementFormat,
    pub audio_dir: PathBuf,
    pub session: SessionConfig,
    pub location_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fake_device: false,
            filter: DeviceFilter::default(),
            measurement: MeasurementFormat::default(),
            audio_dir: PathBuf::from("static/audio"),
            session: SessionConfig::default(),
            location_file: None,
        }
    }
}

impl AppConfig {
    /// Config file named by `NEUROFIT_CONFIG` (if any), then env overrides.
    pub fn load() -> Self {
        let mut config = match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path)).unwrap_or_else(|err| {
                warn!("{err:#}, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config in {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var("NEUROFIT_FAKE") {
            self.fake_device = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Some(dir) = var("NEUROFIT_AUDIO_DIR") {
            self.audio_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = var("NEUROFIT_NAME_PREFIX") {
            self.filter.name_prefix = Some(prefix).filter(|p| !p.is_empty());
        }
        if let Some(file) = var("NEUROFIT_LOCATION_FILE") {
            self.location_file = Some(PathBuf::from(file));
        }
    }
}

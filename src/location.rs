use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};


pub const LAST_LOCATION_KEY: &str = "lastLocation";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres.
    pub accuracy: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Write-only side channel for the last known position.
pub trait LocationStore {
    fn persist(&mut self, key: &str, fix: &LocationFix) -> Result<()>;
}

/// Keeps `{ key: fix }` entries in a JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        JsonFileStore { path }
    }
}

impl LocationStore for JsonFileStore {
    fn persist(&mut self, key: &str, fix: &LocationFix) -> Result<()> {
        let mut entries: serde_json::Map<String, serde_json::Value> = match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("{} is not a JSON object ({err}), starting it over", self.path.display());
                serde_json::Map::new()
            }),
            Err(_) => serde_json::Map::new(),
        };
        entries.insert(key.to_string(), serde_json::to_value(fix)?);

        let serialized = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write location to {}", self.path.display()))
    }
}

pub struct LocationWatcher {
    store: Box<dyn LocationStore>,
    watching: bool,
    last: Option<LocationFix>,
}

impl LocationWatcher {
    pub fn new(store: Box<dyn LocationStore>) -> Self {
        LocationWatcher {
            store,
            watching: false,
            last: None,
        }
    }

    #[cfg(test)]
    pub fn last_fix(&self) -> Option<LocationFix> {
        self.last
    }

    pub fn start_watching(&mut self) {
        if !self.watching {
            info!("Watching location");
            self.watching = true;
        }
    }

    pub fn stop_watching(&mut self) {
        if self.watching {
            info!("Stopped watching location");
            self.watching = false;
        }
    }

    pub fn on_update(&mut self, fix: LocationFix) {
        if !self.watching {
            return;
        }
        self.last = Some(fix);
        if let Err(err) = self.store.persist(LAST_LOCATION_KEY, &fix) {
            warn!("Couldn't store location: {err:#}");
        }
    }
}

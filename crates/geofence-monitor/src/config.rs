//! Monitor configuration
//!
//! Defaults match the values the travel-safety app ships with; `from_env`
//! and `load` overlay deployment-specific values.

use crate::{GeofenceError, Position, Result, DEFAULT_RADIUS_M, MAX_EVENTS};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Storage key of the geofence collection
    pub geofences_key: String,
    /// Storage key of the event log
    pub events_key: String,
    /// Event log capacity
    pub max_events: usize,
    /// Radius for geofences stored without one (meters)
    pub default_radius_m: f64,
    /// Center used by add-at-current-location before any fix arrives
    pub fallback_center: Position,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            geofences_key: "geofences".to_string(),
            events_key: "geofence_events".to_string(),
            max_events: MAX_EVENTS,
            default_radius_m: DEFAULT_RADIUS_M,
            fallback_center: Position::new(0.0, 0.0),
        }
    }
}

impl MonitorConfig {
    /// Defaults overlaid with `GEOFENCE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Read a JSON config file; missing fields take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading monitor config from {:?}", path);

        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(key) = lookup("GEOFENCE_GEOFENCES_KEY") {
            self.geofences_key = key;
        }
        if let Some(key) = lookup("GEOFENCE_EVENTS_KEY") {
            self.events_key = key;
        }
        if let Some(raw) = lookup("GEOFENCE_MAX_EVENTS") {
            self.max_events = parse_var("GEOFENCE_MAX_EVENTS", &raw)?;
        }
        if let Some(raw) = lookup("GEOFENCE_DEFAULT_RADIUS_M") {
            self.default_radius_m = parse_var("GEOFENCE_DEFAULT_RADIUS_M", &raw)?;
        }
        if let Some(raw) = lookup("GEOFENCE_FALLBACK_LAT") {
            self.fallback_center.lat = parse_var("GEOFENCE_FALLBACK_LAT", &raw)?;
        }
        if let Some(raw) = lookup("GEOFENCE_FALLBACK_LON") {
            self.fallback_center.lon = parse_var("GEOFENCE_FALLBACK_LON", &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.geofences_key.is_empty() || self.events_key.is_empty() {
            return Err(GeofenceError::InvalidConfig(
                "storage keys must not be empty".to_string(),
            ));
        }
        if self.geofences_key == self.events_key {
            return Err(GeofenceError::InvalidConfig(format!(
                "geofences and events share storage key {:?}",
                self.events_key
            )));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| GeofenceError::InvalidConfig(format!("{} has invalid value {:?}", name, raw)))
}

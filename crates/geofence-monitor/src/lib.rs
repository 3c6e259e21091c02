//! Geofence Monitor
//!
//! Client-side proximity detection over a live location stream for the
//! travel-safety companion. Users drop named circular regions on the map;
//! every new position sample is checked against them and enter/exit
//! transitions are written to a bounded, locally persisted event log.
//!
//! # Components
//!
//! | Component | Module | Description |
//! |-----------|--------|-------------|
//! | Geofence Store | [`geofence`] | Durable CRUD over named circular regions |
//! | Event Log | [`events`] | Durable, bounded (newest first) enter/exit history |
//! | Proximity Evaluator | [`evaluator`] | Membership table and transition detection |
//! | Monitor | [`monitor`] | Public entry point wiring the three together |
//! | Storage | [`storage`] | Best-effort key-value persistence adapters |
//!
//! # Data flow
//!
//! ```text
//! position source ──▶ GeofenceMonitor::on_position_update
//!                        │  reads GeofenceStore
//!                        │  reads/writes membership table
//!                        └─ appends to EventLog
//! ```

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

pub mod config;
pub mod evaluator;
pub mod events;
pub mod export;
pub mod geofence;
pub mod monitor;
pub mod storage;

pub use config::MonitorConfig;
pub use evaluator::ProximityEvaluator;
pub use events::{EventKind, EventLog, GeofenceEvent};
pub use geofence::{Geofence, GeofenceDefinition, GeofencePatch, GeofenceStore};
pub use monitor::GeofenceMonitor;
pub use storage::{FileStore, KeyValueStore, MemoryStore, WriteOutcome};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Radius applied to a geofence stored without one
pub const DEFAULT_RADIUS_M: f64 = 100.0;

/// Event log capacity
pub const MAX_EVENTS: usize = 100;

#[derive(Error, Debug)]
pub enum GeofenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage quota exceeded for {key}: limit {limit_bytes} bytes")]
    QuotaExceeded { key: String, limit_bytes: usize },
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, GeofenceError>;

/// A latitude/longitude pair in decimal degrees
///
/// Coordinates are stored as given; non-finite values survive persistence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(with = "crate::storage::lossless_f64")]
    pub lat: f64,
    #[serde(with = "crate::storage::lossless_f64")]
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Great-circle distance between two positions in meters
pub fn haversine_m(a: Position, b: Position) -> f64 {
    let lat1 = a.lat * PI / 180.0;
    let lat2 = b.lat * PI / 180.0;
    let dlat = (b.lat - a.lat) * PI / 180.0;
    let dlon = (b.lon - a.lon) * PI / 180.0;

    // Rounding can push h just past 1 near antipodal points
    let h = ((dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2))
        .min(1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        let p = Position::new(48.8566, 2.3522);
        assert_eq!(haversine_m(p, p), 0.0);
        assert_eq!(haversine_m(Position::new(0.0, 0.0), Position::new(0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_haversine_reference_distances() {
        // Paris to Berlin: ~877.5 km
        let paris = Position::new(48.8566, 2.3522);
        let berlin = Position::new(52.5200, 13.4050);
        let dist = haversine_m(paris, berlin);
        assert!((dist - 877_500.0).abs() / 877_500.0 < 0.005, "got {dist}");

        // One degree of longitude at the equator: 2πR/360
        let expected = 2.0 * PI * EARTH_RADIUS_M / 360.0;
        let dist = haversine_m(Position::new(0.0, 0.0), Position::new(0.0, 1.0));
        assert!((dist - expected).abs() < 1e-6);
    }

    #[test]
    fn test_haversine_antipodal_is_finite() {
        let half_circumference = PI * EARTH_RADIUS_M;
        let pairs = [
            (Position::new(0.0, 0.0), Position::new(0.0, 180.0)),
            (Position::new(45.0, 10.0), Position::new(-45.0, -170.0)),
            (Position::new(30.123, 40.5), Position::new(-30.123, -139.5)),
            (Position::new(89.999999, 0.0), Position::new(-89.999999, 180.0)),
            (Position::new(-12.3456789, 98.7654321), Position::new(12.3456789, -81.2345679)),
        ];

        for (a, b) in pairs {
            let dist = haversine_m(a, b);
            assert!(dist.is_finite(), "{a:?} -> {b:?} gave {dist}");
            assert!((dist - half_circumference).abs() < 1.0, "{a:?} -> {b:?} gave {dist}");
        }
    }

    #[test]
    fn test_position_non_finite_round_trip() {
        let p = Position::new(f64::NAN, f64::NEG_INFINITY);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"lat":"NaN","lon":"-inf"}"#);

        let back: Position = serde_json::from_str(&json).unwrap();
        assert!(back.lat.is_nan());
        assert_eq!(back.lon, f64::NEG_INFINITY);

        let finite: Position = serde_json::from_str(r#"{"lat": 12, "lon": -3.5}"#).unwrap();
        assert_eq!(finite, Position::new(12.0, -3.5));
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let a = Position::new(-33.8688, 151.2093);
        let b = Position::new(-37.8136, 144.9631);
        assert!((haversine_m(a, b) - haversine_m(b, a)).abs() < 1e-6);
    }
}

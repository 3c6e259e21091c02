//! Geofence definitions and the durable geofence store

use crate::storage::{load_array, save_array, KeyValueStore, WriteOutcome};
use crate::{haversine_m, Position};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// A named circular region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub center: Position,
    /// Radius in meters; no bounds are enforced
    #[serde(
        default,
        with = "crate::storage::lossless_f64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub radius: Option<f64>,
    /// Only an explicit `false` disables evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl Geofence {
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    /// Configured radius, or `default_radius` when none was stored
    pub fn radius_or(&self, default_radius: f64) -> f64 {
        self.radius.unwrap_or(default_radius)
    }

    pub fn distance_to(&self, position: Position) -> f64 {
        haversine_m(position, self.center)
    }

    pub fn contains(&self, position: Position, default_radius: f64) -> bool {
        self.distance_to(position) <= self.radius_or(default_radius)
    }
}

/// Caller-supplied fields for a new geofence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeofenceDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub center: Position,
    #[serde(default, with = "crate::storage::lossless_f64::option")]
    pub radius: Option<f64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl GeofenceDefinition {
    pub fn new(center: Position, radius: f64) -> Self {
        Self {
            name: None,
            center,
            radius: Some(radius),
            enabled: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = Some(false);
        self
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeofencePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub center: Option<Position>,
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl GeofencePatch {
    fn apply(self, geofence: &mut Geofence) {
        if let Some(name) = self.name {
            geofence.name = name;
        }
        if let Some(center) = self.center {
            geofence.center = center;
        }
        if let Some(radius) = self.radius {
            geofence.radius = Some(radius);
        }
        if let Some(enabled) = self.enabled {
            geofence.enabled = Some(enabled);
        }
    }
}

/// Time-based id with a short random suffix
///
/// Unique within a single-user store in practice; two ids generated in the
/// same millisecond differ only by 24 random bits.
pub fn generate_id(now_ms: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("gf-{}-{}", to_base36(now_ms.max(0) as u64), &suffix[..6])
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Ordered (most recently added first), write-through geofence collection
pub struct GeofenceStore {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    geofences: Vec<Geofence>,
    last_write: WriteOutcome,
}

impl GeofenceStore {
    /// Load the collection stored under `key`, empty if absent or corrupt
    pub fn load(storage: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let geofences: Vec<Geofence> = load_array(storage.as_ref(), &key);
        info!("Loaded {} geofences from {}", geofences.len(), key);

        Self {
            storage,
            key,
            geofences,
            last_write: WriteOutcome::Persisted,
        }
    }

    pub fn list(&self) -> &[Geofence] {
        &self.geofences
    }

    pub fn get(&self, id: &str) -> Option<&Geofence> {
        self.geofences.iter().find(|g| g.id == id)
    }

    pub fn len(&self) -> usize {
        self.geofences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geofences.is_empty()
    }

    /// Outcome of the most recent persistence attempt
    pub fn last_write(&self) -> WriteOutcome {
        self.last_write
    }

    /// Create a geofence with a fresh id and prepend it
    pub fn add(&mut self, definition: GeofenceDefinition, now_ms: i64) -> Geofence {
        let mut id = generate_id(now_ms);
        while self.get(&id).is_some() {
            id = generate_id(now_ms);
        }

        let name = match definition.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("Geofence {}", self.geofences.len() + 1),
        };

        let geofence = Geofence {
            id,
            name,
            center: definition.center,
            radius: definition.radius,
            enabled: definition.enabled,
        };

        debug!("Adding geofence {} ({})", geofence.id, geofence.name);
        self.geofences.insert(0, geofence.clone());
        self.persist();
        geofence
    }

    /// Remove by id; returns whether an entry was removed
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.geofences.len();
        self.geofences.retain(|g| g.id != id);
        let removed = self.geofences.len() < before;
        if removed {
            debug!("Removed geofence {}", id);
        }
        self.persist();
        removed
    }

    /// Merge `patch` into the matching entry; returns the updated record
    pub fn update(&mut self, id: &str, patch: GeofencePatch) -> Option<Geofence> {
        let updated = self.geofences.iter_mut().find(|g| g.id == id).map(|g| {
            patch.apply(g);
            g.clone()
        });
        if updated.is_some() {
            self.persist();
        }
        updated
    }

    fn persist(&mut self) {
        self.last_write = save_array(self.storage.as_ref(), &self.key, &self.geofences);
    }
}

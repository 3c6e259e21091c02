//! Geofence Monitor entry point
//!
//! Owns the geofence store, event log and proximity evaluator for one user
//! session. The owner's event loop calls [`GeofenceMonitor::on_position_update`]
//! once per position sample; each call runs to completion before the next,
//! and only the sample passed in is evaluated (there is no backlog).

use crate::config::MonitorConfig;
use crate::evaluator::ProximityEvaluator;
use crate::events::{EventLog, GeofenceEvent};
use crate::geofence::{Geofence, GeofenceDefinition, GeofencePatch, GeofenceStore};
use crate::storage::KeyValueStore;
use crate::Position;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

pub struct GeofenceMonitor {
    config: MonitorConfig,
    geofences: GeofenceStore,
    events: EventLog,
    evaluator: ProximityEvaluator,
    last_position: Option<Position>,
    active: bool,
}

impl GeofenceMonitor {
    /// Load persisted state from `storage` and start with every geofence
    /// marked not inside
    pub fn new(storage: Arc<dyn KeyValueStore>, config: MonitorConfig) -> Self {
        let geofences = GeofenceStore::load(storage.clone(), config.geofences_key.clone());
        let events = EventLog::load(storage, config.events_key.clone(), config.max_events);
        let evaluator = ProximityEvaluator::new(geofences.list(), config.default_radius_m);

        info!(
            "Geofence monitor ready: {} geofences, {} events",
            geofences.len(),
            events.len()
        );

        Self {
            config,
            geofences,
            events,
            evaluator,
            last_position: None,
            active: true,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn geofences(&self) -> &[Geofence] {
        self.geofences.list()
    }

    /// Event history, newest first
    pub fn events(&self) -> &[GeofenceEvent] {
        self.events.list()
    }

    pub fn last_position(&self) -> Option<Position> {
        self.last_position
    }

    pub fn is_inside(&self, id: &str) -> Option<bool> {
        self.evaluator.is_inside(id)
    }

    /// Geofences currently flagged inside, in store order
    pub fn inside_geofences(&self) -> Vec<&Geofence> {
        self.geofences
            .list()
            .iter()
            .filter(|g| self.evaluator.is_inside(&g.id) == Some(true))
            .collect()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the most recent writes of both collections reached storage
    pub fn persistence_ok(&self) -> bool {
        self.geofences.last_write().is_persisted() && self.events.last_write().is_persisted()
    }

    /// Evaluate a new sample stamped with the current time
    pub fn on_position_update(&mut self, position: Option<Position>) -> Vec<GeofenceEvent> {
        self.on_position_update_at(position, Utc::now())
    }

    /// Evaluate a new sample; `None` means no fix this tick
    ///
    /// Each emitted event is appended to the log individually.
    pub fn on_position_update_at(
        &mut self,
        position: Option<Position>,
        at: DateTime<Utc>,
    ) -> Vec<GeofenceEvent> {
        if !self.active {
            return Vec::new();
        }
        let Some(position) = position else {
            return Vec::new();
        };
        self.last_position = Some(position);

        if self.geofences.is_empty() {
            return Vec::new();
        }

        let emitted =
            self.evaluator
                .evaluate(position, self.geofences.list(), at.timestamp_millis());
        for event in &emitted {
            self.events.append(event.clone());
        }
        emitted
    }

    pub fn add_geofence(&mut self, definition: GeofenceDefinition) -> Geofence {
        let geofence = self.geofences.add(definition, Utc::now().timestamp_millis());
        self.evaluator.track(&geofence.id);
        geofence
    }

    /// Add a geofence centered on the latest fix, or on the configured
    /// fallback center when no fix has arrived yet
    pub fn add_geofence_here(&mut self, name: Option<String>, radius: f64) -> Geofence {
        let center = self.last_position.unwrap_or(self.config.fallback_center);
        self.add_geofence(GeofenceDefinition {
            name,
            center,
            radius: Some(radius),
            enabled: None,
        })
    }

    pub fn remove_geofence(&mut self, id: &str) {
        self.geofences.remove(id);
        self.evaluator.forget(id);
    }

    pub fn update_geofence(&mut self, id: &str, patch: GeofencePatch) -> Option<Geofence> {
        self.geofences.update(id, patch)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Mark every geofence not inside again
    pub fn reinitialize(&mut self) {
        info!("Reinitializing membership for {} geofences", self.geofences.len());
        self.evaluator.reset(self.geofences.list());
    }

    /// Stop reacting to position updates
    pub fn stop(&mut self) {
        if self.active {
            info!("Geofence monitor stopped");
        }
        self.active = false;
    }
}

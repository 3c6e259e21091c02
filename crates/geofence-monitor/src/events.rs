//! Enter/exit events and the bounded event log

use crate::geofence::Geofence;
use crate::storage::{load_array, save_array, KeyValueStore, WriteOutcome};
use crate::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Membership transition direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Enter,
    Exit,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Enter => f.pad("enter"),
            EventKind::Exit => f.pad("exit"),
        }
    }
}

/// One recorded transition; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub id: String,
    /// Non-owning; the geofence may since have been removed
    pub geofence_id: String,
    /// Name at the time of the event
    pub geofence_name: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch
    #[serde(rename = "at")]
    pub timestamp: i64,
    pub position: Position,
}

impl GeofenceEvent {
    pub fn new(geofence: &Geofence, kind: EventKind, position: Position, timestamp: i64) -> Self {
        Self {
            id: format!("{}-{}", timestamp, geofence.id),
            geofence_id: geofence.id.clone(),
            geofence_name: geofence.name.clone(),
            kind,
            timestamp,
            position,
        }
    }
}

/// Newest-first event history capped at `capacity` entries
pub struct EventLog {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    capacity: usize,
    events: Vec<GeofenceEvent>,
    last_write: WriteOutcome,
}

impl EventLog {
    /// Load the log stored under `key`, keeping at most `capacity` entries
    pub fn load(storage: Arc<dyn KeyValueStore>, key: impl Into<String>, capacity: usize) -> Self {
        let key = key.into();
        let mut events: Vec<GeofenceEvent> = load_array(storage.as_ref(), &key);
        events.truncate(capacity);
        info!("Loaded {} geofence events from {}", events.len(), key);

        Self {
            storage,
            key,
            capacity,
            events,
            last_write: WriteOutcome::Persisted,
        }
    }

    pub fn list(&self) -> &[GeofenceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_write(&self) -> WriteOutcome {
        self.last_write
    }

    /// Prepend, evict beyond capacity, persist
    pub fn append(&mut self, event: GeofenceEvent) {
        debug!(
            "{} {} ({}) at {:.6},{:.6}",
            event.kind, event.geofence_name, event.geofence_id, event.position.lat, event.position.lon
        );
        self.events.insert(0, event);
        self.events.truncate(self.capacity);
        self.persist();
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.persist();
    }

    fn persist(&mut self) {
        self.last_write = save_array(self.storage.as_ref(), &self.key, &self.events);
    }
}

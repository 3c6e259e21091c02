//! Proximity Evaluator
//!
//! Maps a stream of position samples to enter/exit transitions.
//!
//! The membership table holds one "currently inside" flag per known
//! geofence. Every flag starts at `false`, so the first sample after
//! (re)initialization can only produce `enter` events. All geofences in one
//! pass are compared against the membership snapshot taken before the pass.

use crate::events::{EventKind, GeofenceEvent};
use crate::geofence::Geofence;
use crate::Position;
use std::collections::HashMap;
use tracing::debug;

/// Transition implied by the previous and current membership
pub fn transition(was_inside: bool, now_inside: bool) -> Option<EventKind> {
    match (was_inside, now_inside) {
        (false, true) => Some(EventKind::Enter),
        (true, false) => Some(EventKind::Exit),
        _ => None,
    }
}

/// Membership table plus the per-sample transition algorithm
#[derive(Debug, Clone)]
pub struct ProximityEvaluator {
    inside: HashMap<String, bool>,
    default_radius: f64,
}

impl ProximityEvaluator {
    /// Evaluator with every geofence in `geofences` marked not inside
    pub fn new(geofences: &[Geofence], default_radius: f64) -> Self {
        let mut evaluator = Self {
            inside: HashMap::with_capacity(geofences.len()),
            default_radius,
        };
        evaluator.reset(geofences);
        evaluator
    }

    /// Rebuild the table from scratch, all `false`
    pub fn reset(&mut self, geofences: &[Geofence]) {
        self.inside = geofences.iter().map(|g| (g.id.clone(), false)).collect();
    }

    /// Start tracking a newly added geofence
    pub fn track(&mut self, id: &str) {
        self.inside.insert(id.to_string(), false);
    }

    /// Drop the entry of a removed geofence
    pub fn forget(&mut self, id: &str) {
        self.inside.remove(id);
    }

    pub fn is_inside(&self, id: &str) -> Option<bool> {
        self.inside.get(id).copied()
    }

    /// Ids currently flagged inside
    pub fn inside_ids(&self) -> impl Iterator<Item = &str> {
        self.inside
            .iter()
            .filter(|(_, inside)| **inside)
            .map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.inside.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inside.is_empty()
    }

    pub fn default_radius(&self) -> f64 {
        self.default_radius
    }

    /// Evaluate one position sample against every enabled geofence
    ///
    /// Returns the emitted events in geofence order. Disabled geofences are
    /// skipped entirely and keep whatever flag they had.
    pub fn evaluate(
        &mut self,
        position: Position,
        geofences: &[Geofence],
        timestamp: i64,
    ) -> Vec<GeofenceEvent> {
        // Flags are applied after the pass so every geofence sees the
        // membership from before this sample
        let mut updates: Vec<(&str, bool)> = Vec::new();
        let mut events = Vec::new();

        for geofence in geofences.iter().filter(|g| g.is_enabled()) {
            let distance = geofence.distance_to(position);
            let now_inside = distance <= geofence.radius_or(self.default_radius);
            let was_inside = self.inside.get(&geofence.id).copied().unwrap_or(false);

            if let Some(kind) = transition(was_inside, now_inside) {
                debug!(
                    "{} {} at {:.1} m (radius {:.1} m)",
                    kind,
                    geofence.id,
                    distance,
                    geofence.radius_or(self.default_radius)
                );
                updates.push((geofence.id.as_str(), now_inside));
                events.push(GeofenceEvent::new(geofence, kind, position, timestamp));
            }
        }

        for (id, now_inside) in updates {
            self.inside.insert(id.to_string(), now_inside);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_RADIUS_M;
    use proptest::prelude::*;

    fn geofence(id: &str, lat: f64, lon: f64, radius: Option<f64>) -> Geofence {
        Geofence {
            id: id.to_string(),
            name: id.to_string(),
            center: Position::new(lat, lon),
            radius,
            enabled: None,
        }
    }

    /// ~10 km north of the equator origin
    const FAR: Position = Position { lat: 0.09, lon: 0.0 };
    const ORIGIN: Position = Position { lat: 0.0, lon: 0.0 };

    #[test]
    fn test_transition_table() {
        assert_eq!(transition(false, true), Some(EventKind::Enter));
        assert_eq!(transition(true, false), Some(EventKind::Exit));
        assert_eq!(transition(true, true), None);
        assert_eq!(transition(false, false), None);
    }

    #[test]
    fn test_enter_then_no_duplicate_then_exit() {
        let fences = vec![geofence("a", 0.0, 0.0, Some(100.0))];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);
        assert_eq!(eval.is_inside("a"), Some(false));

        let events = eval.evaluate(ORIGIN, &fences, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Enter);
        assert_eq!(events[0].geofence_id, "a");
        assert_eq!(events[0].position, ORIGIN);
        assert_eq!(eval.is_inside("a"), Some(true));

        assert!(eval.evaluate(ORIGIN, &fences, 2).is_empty());

        let events = eval.evaluate(FAR, &fences, 3);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Exit);
        assert_eq!(events[0].timestamp, 3);
        assert_eq!(eval.is_inside("a"), Some(false));
    }

    #[test]
    fn test_first_sample_always_enters() {
        let fences = vec![geofence("a", 10.0, 10.0, Some(500.0))];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);

        let events = eval.evaluate(Position::new(10.001, 10.0), &fences, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Enter);
    }

    #[test]
    fn test_first_sample_outside_emits_nothing() {
        let fences = vec![geofence("a", 0.0, 0.0, Some(100.0))];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);

        assert!(eval.evaluate(FAR, &fences, 1).is_empty());
        assert_eq!(eval.is_inside("a"), Some(false));
    }

    #[test]
    fn test_disabled_geofence_is_skipped() {
        let mut fence = geofence("a", 0.0, 0.0, Some(100.0));
        fence.enabled = Some(false);
        let fences = vec![fence];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);

        for (i, p) in [ORIGIN, FAR, ORIGIN].into_iter().enumerate() {
            assert!(eval.evaluate(p, &fences, i as i64).is_empty());
            assert_eq!(eval.is_inside("a"), Some(false));
        }
    }

    #[test]
    fn test_reenabled_geofence_reuses_stale_flag() {
        let mut fences = vec![geofence("a", 0.0, 0.0, Some(100.0))];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);
        eval.evaluate(ORIGIN, &fences, 1);

        fences[0].enabled = Some(false);
        assert!(eval.evaluate(FAR, &fences, 2).is_empty());
        assert_eq!(eval.is_inside("a"), Some(true));

        // Still inside when re-enabled: no new enter
        fences[0].enabled = Some(true);
        assert!(eval.evaluate(ORIGIN, &fences, 3).is_empty());

        let events = eval.evaluate(FAR, &fences, 4);
        assert_eq!(events[0].kind, EventKind::Exit);
    }

    #[test]
    fn test_missing_radius_defaults_but_zero_does_not() {
        // ~55 m from the sample
        let fences = vec![
            geofence("default", 0.0005, 0.0, None),
            geofence("zero", 0.0005, 0.0, Some(0.0)),
            geofence("negative", 0.0, 0.0, Some(-1.0)),
        ];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);

        let events = eval.evaluate(ORIGIN, &fences, 1);
        let ids: Vec<&str> = events.iter().map(|e| e.geofence_id.as_str()).collect();
        assert_eq!(ids, vec!["default"]);
    }

    #[test]
    fn test_zero_radius_matches_exact_center() {
        let fences = vec![geofence("pin", 0.0, 0.0, Some(0.0))];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);
        assert_eq!(eval.evaluate(ORIGIN, &fences, 1).len(), 1);
    }

    #[test]
    fn test_multiple_geofences_one_sample() {
        let fences = vec![
            geofence("near", 0.0, 0.0, Some(100.0)),
            geofence("wide", 0.05, 0.0, Some(10_000.0)),
            geofence("away", 45.0, 45.0, Some(100.0)),
        ];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);

        let events = eval.evaluate(ORIGIN, &fences, 7);
        let ids: Vec<&str> = events.iter().map(|e| e.geofence_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "wide"]);
        assert!(events.iter().all(|e| e.timestamp == 7 && e.kind == EventKind::Enter));

        let mut inside: Vec<&str> = eval.inside_ids().collect();
        inside.sort();
        assert_eq!(inside, vec!["near", "wide"]);
    }

    #[test]
    fn test_shared_id_sees_flag_from_before_the_pass() {
        // Two entries under one id: both compare against the pre-sample flag
        let fences = vec![
            geofence("twin", 0.0, 0.0, Some(100.0)),
            geofence("twin", 0.0, 0.0, Some(200.0)),
        ];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);

        let events = eval.evaluate(ORIGIN, &fences, 1);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == EventKind::Enter));
        assert_eq!(eval.is_inside("twin"), Some(true));
        assert_eq!(eval.len(), 1);

        let events = eval.evaluate(FAR, &fences, 2);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == EventKind::Exit));
        assert_eq!(eval.is_inside("twin"), Some(false));
    }

    #[test]
    fn test_reset_and_forget() {
        let fences = vec![geofence("a", 0.0, 0.0, Some(100.0))];
        let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);
        eval.evaluate(ORIGIN, &fences, 1);

        eval.reset(&fences);
        assert_eq!(eval.is_inside("a"), Some(false));
        assert_eq!(eval.evaluate(ORIGIN, &fences, 2).len(), 1);

        eval.forget("a");
        assert_eq!(eval.is_inside("a"), None);
        assert!(eval.is_empty());

        eval.track("b");
        assert_eq!(eval.is_inside("b"), Some(false));
        assert_eq!(eval.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_events_alternate_per_geofence(
            track in prop::collection::vec((-0.01f64..0.01, -0.01f64..0.01), 1..60),
            radius in 10.0f64..1500.0,
        ) {
            let fences = vec![
                geofence("a", 0.0, 0.0, Some(radius)),
                geofence("b", 0.004, -0.003, Some(radius / 2.0)),
            ];
            let mut eval = ProximityEvaluator::new(&fences, DEFAULT_RADIUS_M);
            let mut history: HashMap<String, Vec<EventKind>> = HashMap::new();

            for (i, (lat, lon)) in track.into_iter().enumerate() {
                for event in eval.evaluate(Position::new(lat, lon), &fences, i as i64) {
                    history.entry(event.geofence_id.clone()).or_default().push(event.kind);
                }
            }

            for fence in &fences {
                let kinds = history.get(&fence.id).cloned().unwrap_or_default();
                for (i, kind) in kinds.iter().enumerate() {
                    let expected = if i % 2 == 0 { EventKind::Enter } else { EventKind::Exit };
                    prop_assert_eq!(*kind, expected);
                }
                let last_enter = kinds.last() == Some(&EventKind::Enter);
                prop_assert_eq!(eval.is_inside(&fence.id), Some(last_enter));
            }
        }
    }
}

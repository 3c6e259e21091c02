//! GeoJSON export for map display

use crate::events::GeofenceEvent;
use crate::geofence::Geofence;
use crate::Position;
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;

fn point_feature(id: &str, position: Position, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![position.lon, position.lat]))),
        id: Some(Id::String(id.to_string())),
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// One Point feature per geofence center, radius in properties
pub fn geofences_to_geojson(geofences: &[Geofence], default_radius: f64) -> FeatureCollection {
    let features = geofences
        .iter()
        .map(|g| {
            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), json!(g.id));
            properties.insert("name".to_string(), json!(g.name));
            properties.insert("radius_m".to_string(), json!(g.radius_or(default_radius)));
            properties.insert("enabled".to_string(), json!(g.is_enabled()));
            point_feature(&g.id, g.center, properties)
        })
        .collect();

    collection(features)
}

/// One Point feature per event at the triggering position
pub fn events_to_geojson(events: &[GeofenceEvent]) -> FeatureCollection {
    let features = events
        .iter()
        .map(|e| {
            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), json!(e.id));
            properties.insert("geofence_id".to_string(), json!(e.geofence_id));
            properties.insert("geofence_name".to_string(), json!(e.geofence_name));
            properties.insert("type".to_string(), json!(e.kind.to_string()));
            properties.insert("at".to_string(), json!(e.timestamp));
            point_feature(&e.id, e.position, properties)
        })
        .collect();

    collection(features)
}

use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};
use std::path::Path;

use crate::geometry::RouteGeometry;
use crate::signal::TrafficSignal;

/// Read a route from GeoJSON.
///
/// Accepts a LineString geometry, a Feature wrapping one, a FeatureCollection (first
/// LineString feature wins) or a bare `[[lng, lat], ...]` array.
pub fn route_from_geojson(value: &Value) -> Result<RouteGeometry> {
    if let Value::Array(_) = value {
        return route_from_coordinates(value);
    }

    match value.get("type").and_then(Value::as_str) {
        Some("LineString") => {
            let coordinates = value
                .get("coordinates")
                .ok_or_else(|| anyhow!("LineString without coordinates"))?;
            route_from_coordinates(coordinates)
        }
        Some("Feature") => {
            let geometry = value
                .get("geometry")
                .ok_or_else(|| anyhow!("Feature without geometry"))?;
            route_from_geojson(geometry)
        }
        Some("FeatureCollection") => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("FeatureCollection without features"))?;
            features
                .iter()
                .find(|f| f["geometry"]["type"] == "LineString")
                .map(route_from_geojson)
                .unwrap_or_else(|| Err(anyhow!("FeatureCollection holds no LineString feature")))
        }
        Some(other) => bail!("Unsupported GeoJSON type for a route: {}", other),
        None => bail!("Not a GeoJSON object"),
    }
}

fn route_from_coordinates(value: &Value) -> Result<RouteGeometry> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("Coordinates must be an array"))?;

    let mut coordinates = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let pair = item.as_array().filter(|p| p.len() >= 2);
        let lng = pair.and_then(|p| p[0].as_f64());
        let lat = pair.and_then(|p| p[1].as_f64());
        match (lng, lat) {
            (Some(lng), Some(lat)) => coordinates.push([lng, lat]),
            _ => bail!("Coordinate {} is not a [lng, lat] pair: {}", i, item),
        }
    }

    Ok(RouteGeometry::from_lng_lat(&coordinates))
}

pub async fn read_route_file(path: impl AsRef<Path>) -> Result<RouteGeometry> {
    let path = path.as_ref();
    let contents = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("Failed to read route {}: {}", path.display(), e))?;
    let value: Value = serde_json::from_slice(&contents)?;
    route_from_geojson(&value)
}

/// Route and signals as a GeoJSON FeatureCollection, ready to drop on a map
pub fn signals_to_geojson(route: &RouteGeometry, signals: &[TrafficSignal]) -> Value {
    let coordinates: Vec<[f64; 2]> = route.points().map(|p| [p.x(), p.y()]).collect();

    let mut features = vec![json!({
        "type": "Feature",
        "properties": {
            "type": "route",
            "length_meters": route.length_meters(),
        },
        "geometry": {
            "type": "LineString",
            "coordinates": coordinates
        }
    })];

    for signal in signals {
        features.push(json!({
            "type": "Feature",
            "properties": {
                "type": "traffic_signal",
                "id": signal.id,
                "name": signal.name,
                "location": signal.location,
                "wait_duration_seconds": signal.wait_duration_seconds,
                "vendor_count": signal.vendor_count,
                "origin": signal.origin,
            },
            "geometry": {
                "type": "Point",
                "coordinates": [signal.coordinates.x(), signal.coordinates.y()]
            }
        }));
    }

    json!({
        "type": "FeatureCollection",
        "features": features
    })
}

use log::{debug, info};
use serde::Deserialize;
use std::time::Duration;

use crate::error::SourceError;
use crate::geometry::{GeoPoint, RouteGeometry};

/// Public OSRM demo server
pub const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org";

/// A driving route with its summary, as planned by the routing service
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRoute {
    pub geometry: RouteGeometry,
    /// Meters, as reported by the router
    pub distance_meters: f64,
    /// Seconds, as reported by the router
    pub duration_seconds: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Parse an OSRM `route` response requested with `geometries=geojson`, keeping the first route
pub fn parse_route_response(body: &str) -> Result<PlannedRoute, SourceError> {
    let response: OsrmResponse = serde_json::from_str(body)?;

    if response.code != "Ok" {
        let detail = response.message.unwrap_or_default();
        let reason = format!("{} {}", response.code, detail);
        return Err(SourceError::Rejected(reason.trim().to_string()));
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::Rejected("no route between these points".to_string()))?;

    if route.geometry.coordinates.len() < 2 {
        return Err(SourceError::Parse(format!(
            "route geometry has {} points",
            route.geometry.coordinates.len()
        )));
    }

    Ok(PlannedRoute {
        geometry: RouteGeometry::from_lng_lat(&route.geometry.coordinates),
        distance_meters: route.distance,
        duration_seconds: route.duration,
    })
}

/// Client for an OSRM-compatible driving router
#[derive(Debug, Clone)]
pub struct RoutePlanner {
    http: reqwest::Client,
    base_url: String,
}

impl RoutePlanner {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn route_url(&self, from: GeoPoint, to: GeoPoint) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url,
            from.x(),
            from.y(),
            to.x(),
            to.y()
        )
    }

    /// Driving route from `from` to `to`
    pub async fn plan(&self, from: GeoPoint, to: GeoPoint) -> Result<PlannedRoute, SourceError> {
        let url = self.route_url(from, to);
        debug!("Requesting route: {}", url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // OSRM answers 400 with a JSON body explaining why, so parse before judging the status
        match parse_route_response(&body) {
            Ok(route) => {
                info!(
                    "Planned route: {:.1} km, {:.0} min, {} points",
                    route.distance_meters / 1000.0,
                    route.duration_seconds / 60.0,
                    route.geometry.len()
                );
                Ok(route)
            }
            Err(_) if !status.is_success() => Err(SourceError::Status(status.as_u16())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_url() {
        let planner = RoutePlanner::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            planner.route_url(GeoPoint::new(77.59, 12.97), GeoPoint::new(77.62, 12.91)),
            "http://localhost:5000/route/v1/driving/77.59,12.97;77.62,12.91?overview=full&geometries=geojson"
        );
    }

    #[test]
    fn test_parse_route() {
        let body = r#"{
            "code": "Ok",
            "routes": [{
                "distance": 1523.4,
                "duration": 210.7,
                "geometry": {"type": "LineString", "coordinates": [[77.59, 12.97], [77.60, 12.96], [77.62, 12.91]]}
            }],
            "waypoints": []
        }"#;

        let route = parse_route_response(body).unwrap();
        assert_eq!(route.geometry.len(), 3);
        assert_eq!(route.geometry.point(0), Some(GeoPoint::new(77.59, 12.97)));
        assert_eq!(route.distance_meters, 1523.4);
        assert_eq!(route.duration_seconds, 210.7);
    }

    #[test]
    fn test_parse_rejected() {
        let body =
            r#"{"code": "NoRoute", "message": "Impossible route between points", "routes": []}"#;
        assert_eq!(
            parse_route_response(body),
            Err(SourceError::Rejected(
                "NoRoute Impossible route between points".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_short_geometry() {
        let body = r#"{"code": "Ok", "routes": [{
            "distance": 0, "duration": 0, "geometry": {"coordinates": [[1, 2]]}
        }]}"#;
        assert!(matches!(parse_route_response(body), Err(SourceError::Parse(_))));
    }
}

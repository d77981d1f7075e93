use geo::{Coord, Distance, Haversine, Line, LineString, Point};
use serde::{Deserialize, Serialize};

/// A (longitude, latitude) pair in WGS84 degrees. `x` is longitude, `y` is latitude.
pub type GeoPoint = Point<f64>;

/// Mean Earth radius used by the local planar projection
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Length of one degree of latitude on the projection sphere
pub const METERS_PER_DEGREE_LAT: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

/// Ordered polyline from origin to destination, as handed over by a routing provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteGeometry {
    line: LineString<f64>,
}

impl RouteGeometry {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self {
            line: LineString::from(points),
        }
    }

    /// Build from `[lng, lat]` pairs
    pub fn from_lng_lat(coordinates: &[[f64; 2]]) -> Self {
        Self {
            line: coordinates
                .iter()
                .map(|[lng, lat]| Coord { x: *lng, y: *lat })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.line.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.0.is_empty()
    }

    /// At least two points are needed to form a segment
    pub fn is_degenerate(&self) -> bool {
        self.len() < 2
    }

    pub fn point(&self, index: usize) -> Option<GeoPoint> {
        self.line.0.get(index).map(|c| Point::from(*c))
    }

    pub fn points(&self) -> impl Iterator<Item = GeoPoint> + '_ {
        self.line.points()
    }

    /// Consecutive point pairs, in travel order
    pub fn segments(&self) -> impl Iterator<Item = Line<f64>> + '_ {
        self.line.lines()
    }

    /// Total Haversine length in meters
    pub fn length_meters(&self) -> f64 {
        self.segments()
            .map(|segment| Haversine.distance(segment.start_point(), segment.end_point()))
            .sum()
    }

    /// Distance travelled from the origin to the start of every segment, plus a final entry
    /// holding the total length. Has `len()` entries for a non-empty route.
    pub fn cumulative_lengths(&self) -> Vec<f64> {
        let mut cumulative = Vec::with_capacity(self.len());
        if self.is_empty() {
            return cumulative;
        }

        let mut total = 0.0;
        cumulative.push(total);
        for segment in self.segments() {
            total += Haversine.distance(segment.start_point(), segment.end_point());
            cumulative.push(total);
        }
        cumulative
    }

    /// Axis-aligned box around every point, grown by `padding_degrees` on each side.
    /// `None` for an empty route.
    pub fn bounding_box(&self, padding_degrees: f64) -> Option<BoundingBox> {
        let first = self.line.0.first()?;
        let mut bbox = BoundingBox::new(first.y, first.x, first.y, first.x);

        for coord in &self.line.0 {
            bbox.min_lat = bbox.min_lat.min(coord.y);
            bbox.max_lat = bbox.max_lat.max(coord.y);
            bbox.min_lng = bbox.min_lng.min(coord.x);
            bbox.max_lng = bbox.max_lng.max(coord.x);
        }

        Some(bbox.expand(padding_degrees))
    }
}

/// Latitude/longitude rectangle used to scope geodata queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    pub fn expand(&self, padding_degrees: f64) -> Self {
        Self {
            min_lat: self.min_lat - padding_degrees,
            min_lng: self.min_lng - padding_degrees,
            max_lat: self.max_lat + padding_degrees,
            max_lng: self.max_lng + padding_degrees,
        }
    }

    /// Overpass QL bbox filter: `(south,west,north,east)`
    pub fn to_overpass_filter(&self) -> String {
        format!(
            "({},{},{},{})",
            self.min_lat, self.min_lng, self.max_lat, self.max_lng
        )
    }
}

/// Where a point falls relative to one segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    /// Position along the segment, clamped to `[0, 1]`
    pub t: f64,
    /// Distance from the point to the clamped projection, in meters
    pub distance: f64,
}

/// Nearest segment of a route for a given point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteProjection {
    pub segment_index: usize,
    pub t: f64,
    pub distance: f64,
}

impl RouteProjection {
    /// Meters from the route origin to the projected point. `cumulative` comes from
    /// [`RouteGeometry::cumulative_lengths`].
    pub fn position_along(&self, cumulative: &[f64]) -> f64 {
        let start = cumulative.get(self.segment_index).copied().unwrap_or(0.0);
        let end = cumulative
            .get(self.segment_index + 1)
            .copied()
            .unwrap_or(start);
        start + self.t * (end - start)
    }
}

/// Project `point` onto `segment` in a local equirectangular frame centred on the point.
///
/// Longitudes are scaled by `cos(latitude)` of the point and both axes by the Earth radius,
/// so the resulting Euclidean distance is in meters. Accurate for the short distances the
/// matcher cares about; not meant for segments spanning the antimeridian.
pub fn project_onto_segment(point: GeoPoint, segment: Line<f64>) -> SegmentProjection {
    let lng_scale = point.y().to_radians().cos();
    let to_local = |c: Coord<f64>| {
        (
            (c.x - point.x()).to_radians() * lng_scale * EARTH_RADIUS_METERS,
            (c.y - point.y()).to_radians() * EARTH_RADIUS_METERS,
        )
    };

    let (ax, ay) = to_local(segment.start);
    let (bx, by) = to_local(segment.end);
    let (dx, dy) = (bx - ax, by - ay);
    let length_sq = dx * dx + dy * dy;

    // The point sits at the origin of the local frame
    let t = if length_sq == 0.0 {
        0.0
    } else {
        ((-ax * dx - ay * dy) / length_sq).clamp(0.0, 1.0)
    };

    let (px, py) = (ax + t * dx, ay + t * dy);
    SegmentProjection {
        t,
        distance: px.hypot(py),
    }
}

/// Perpendicular distance in meters from a point to a finite segment
pub fn point_to_segment_distance(point: GeoPoint, segment: Line<f64>) -> f64 {
    project_onto_segment(point, segment).distance
}

/// Scan every segment of the route for the one closest to `point`.
/// Ties resolve to the earliest segment. `None` for a degenerate route.
pub fn nearest_on_route(point: GeoPoint, route: &RouteGeometry) -> Option<RouteProjection> {
    let mut best: Option<RouteProjection> = None;

    for (segment_index, segment) in route.segments().enumerate() {
        let projection = project_onto_segment(point, segment);
        if best.is_none_or(|b| projection.distance < b.distance) {
            best = Some(RouteProjection {
                segment_index,
                t: projection.t,
                distance: projection.distance,
            });
        }
    }

    best
}

/// Minimum distance in meters from `point` to the route polyline
pub fn distance_to_route(point: GeoPoint, route: &RouteGeometry) -> Option<f64> {
    nearest_on_route(point, route).map(|p| p.distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn north_route() -> RouteGeometry {
        RouteGeometry::from_lng_lat(&[[0.0, 0.0], [0.0, 0.009]])
    }

    #[test]
    fn test_midpoint_is_on_segment() {
        let route = north_route();
        let segment = route.segments().next().unwrap();
        let projection = project_onto_segment(Point::new(0.0, 0.0045), segment);
        assert!(projection.distance < 1e-6);
        assert!((projection.t - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_perpendicular_offset() {
        let segment = north_route().segments().next().unwrap();
        let offset_deg = (50.0 / EARTH_RADIUS_METERS).to_degrees();
        let distance = point_to_segment_distance(Point::new(offset_deg, 0.0045), segment);
        assert!((distance - 50.0).abs() < 0.01, "got {}", distance);
    }

    #[test]
    fn test_projection_clamped_to_endpoints() {
        let segment = north_route().segments().next().unwrap();
        // 0.001 degrees south of the start
        let projection = project_onto_segment(Point::new(0.0, -0.001), segment);
        assert_eq!(projection.t, 0.0);
        assert!((projection.distance - 0.001 * METERS_PER_DEGREE_LAT).abs() < 0.01);

        let projection = project_onto_segment(Point::new(0.0, 0.010), segment);
        assert_eq!(projection.t, 1.0);
    }

    #[test]
    fn test_zero_length_segment() {
        let segment = Line::new(Coord { x: 10.0, y: 45.0 }, Coord { x: 10.0, y: 45.0 });
        let projection = project_onto_segment(Point::new(10.0, 45.001), segment);
        assert_eq!(projection.t, 0.0);
        assert!((projection.distance - 0.001 * METERS_PER_DEGREE_LAT).abs() < 0.01);
    }

    #[test]
    fn test_longitude_scaled_by_latitude() {
        // At 60 degrees a degree of longitude is half as long as at the equator
        let segment = Line::new(Coord { x: 0.0, y: 59.0 }, Coord { x: 0.0, y: 61.0 });
        let distance = point_to_segment_distance(Point::new(0.001, 60.0), segment);
        let expected = 0.001 * METERS_PER_DEGREE_LAT * 0.5;
        assert!((distance - expected).abs() < 0.01, "got {}", distance);
    }

    #[test]
    fn test_distance_is_pure() {
        let segment = north_route().segments().next().unwrap();
        let point = Point::new(0.0002, 0.003);
        let first = point_to_segment_distance(point, segment);
        let _ = point_to_segment_distance(Point::new(1.0, 1.0), segment);
        assert_eq!(first, point_to_segment_distance(point, segment));
    }

    #[test]
    fn test_nearest_segment_on_bent_route() {
        let route = RouteGeometry::from_lng_lat(&[[0.0, 0.0], [0.0, 0.01], [0.01, 0.01]]);
        let nearest = nearest_on_route(Point::new(0.005, 0.01), &route).unwrap();
        assert_eq!(nearest.segment_index, 1);
        assert!(nearest.distance < 1e-6);
        assert!(nearest_on_route(Point::new(0.0, 0.0), &RouteGeometry::new(vec![])).is_none());
    }

    #[test]
    fn test_bounding_box_padding() {
        let route = RouteGeometry::from_lng_lat(&[[77.59, 12.97], [77.62, 12.91], [77.60, 13.0]]);
        let bbox = route.bounding_box(0.0002).unwrap();
        assert!((bbox.min_lat - 12.9098).abs() < 1e-9);
        assert!((bbox.max_lat - 13.0002).abs() < 1e-9);
        assert!((bbox.min_lng - 77.5898).abs() < 1e-9);
        assert!((bbox.max_lng - 77.6202).abs() < 1e-9);
        assert!(RouteGeometry::new(vec![]).bounding_box(0.0002).is_none());
    }

    #[test]
    fn test_overpass_filter_order() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(bbox.to_overpass_filter(), "(1,2,3,4)");
    }

    #[test]
    fn test_cumulative_lengths() {
        let route = RouteGeometry::from_lng_lat(&[[0.0, 0.0], [0.0, 0.009], [0.0, 0.018]]);
        let cumulative = route.cumulative_lengths();
        assert_eq!(cumulative.len(), 3);
        assert_eq!(cumulative[0], 0.0);
        assert!((cumulative[2] - route.length_meters()).abs() < 1e-9);
        assert!((cumulative[1] - 1000.0).abs() < 5.0);

        let projection = RouteProjection {
            segment_index: 1,
            t: 0.5,
            distance: 0.0,
        };
        let along = projection.position_along(&cumulative);
        assert!((along - 1.5 * cumulative[1]).abs() < 1.0);
    }
}

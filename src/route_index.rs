use geo::{Line, Point};
use ordered_float::OrderedFloat;
use rstar::{AABB, RTree, RTreeObject};

use crate::geometry::{
    GeoPoint, METERS_PER_DEGREE_LAT, RouteGeometry, RouteProjection, project_onto_segment,
};

// Slack on the degree margin so rounding never drops a segment sitting right at the threshold
const ENVELOPE_SLACK: f64 = 1.1;

// Wrapper for a route segment to make it compatible with RTree
struct IndexedSegment {
    index: usize,
    line: Line<f64>,
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.line.start.x, self.line.start.y],
            [self.line.end.x, self.line.end.y],
        )
    }
}

/// Spatial index over the segments of one route.
///
/// Lookups only return segments within a distance limit, so a candidate far away from a long
/// route costs a tree probe instead of a scan over every segment.
pub struct RouteIndex {
    tree: RTree<IndexedSegment>,
}

impl RouteIndex {
    pub fn new(route: &RouteGeometry) -> Self {
        let segments = route
            .segments()
            .enumerate()
            .map(|(index, line)| IndexedSegment { index, line })
            .collect();

        Self {
            tree: RTree::bulk_load(segments),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.tree.size()
    }

    /// Nearest segment whose distance to `point` is at most `max_distance_meters`.
    ///
    /// Gives the same answer as a full scan whenever the global nearest segment is inside the
    /// limit. Ties resolve to the lowest segment index.
    pub fn nearest_within(
        &self,
        point: GeoPoint,
        max_distance_meters: f64,
    ) -> Option<RouteProjection> {
        let envelope = search_envelope(point, max_distance_meters);

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|segment| {
                let projection = project_onto_segment(point, segment.line);
                RouteProjection {
                    segment_index: segment.index,
                    t: projection.t,
                    distance: projection.distance,
                }
            })
            .filter(|projection| projection.distance <= max_distance_meters)
            .min_by_key(|projection| (OrderedFloat(projection.distance), projection.segment_index))
    }
}

/// Degree box guaranteed to cover every location within `meters` of `point` under the
/// projection used by [`project_onto_segment`].
fn search_envelope(point: Point<f64>, meters: f64) -> AABB<[f64; 2]> {
    let lat_margin = meters / METERS_PER_DEGREE_LAT * ENVELOPE_SLACK;
    let lng_scale = point.y().to_radians().cos().abs().max(1e-9);
    let lng_margin = lat_margin / lng_scale;

    AABB::from_corners(
        [point.x() - lng_margin, point.y() - lat_margin],
        [point.x() + lng_margin, point.y() + lat_margin],
    )
}

use log::debug;

use crate::geometry::RouteGeometry;
use crate::signal::{SignalFactory, TrafficSignal};

/// Fewest signals the estimator places on any usable route
pub const MIN_ESTIMATED_SIGNALS: usize = 2;

/// One signal per `spacing_meters` of route, never fewer than [`MIN_ESTIMATED_SIGNALS`]
pub fn estimated_signal_count(route_length_meters: f64, spacing_meters: f64) -> usize {
    let per_spacing = (route_length_meters / spacing_meters).floor();
    if per_spacing.is_finite() && per_spacing > 0.0 {
        (per_spacing as usize).max(MIN_ESTIMATED_SIGNALS)
    } else {
        MIN_ESTIMATED_SIGNALS
    }
}

/// `count` vertex indices spread evenly from the first to the last vertex.
///
/// When `count` exceeds the number of vertices some indices repeat, so each estimated
/// signal still sits on a real vertex.
pub fn estimation_indices(vertex_count: usize, count: usize) -> Vec<usize> {
    if vertex_count == 0 || count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![0];
    }

    let last = (vertex_count - 1) as f64;
    let step = last / (count - 1) as f64;
    (0..count)
        .map(|i| ((i as f64 * step).round() as usize).min(vertex_count - 1))
        .collect()
}

/// Place synthetic signals directly on route vertices. Empty for a degenerate route.
pub(crate) fn estimate_signals(
    route: &RouteGeometry,
    spacing_meters: f64,
    factory: &mut SignalFactory<'_>,
) -> Vec<TrafficSignal> {
    if route.is_degenerate() {
        return Vec::new();
    }

    let length = route.length_meters();
    let count = estimated_signal_count(length, spacing_meters);
    debug!(
        "Estimating {} signals over {:.0}m of route ({} vertices)",
        count,
        length,
        route.len()
    );

    estimation_indices(route.len(), count)
        .into_iter()
        .enumerate()
        .filter_map(|(i, vertex)| {
            route
                .point(vertex)
                .map(|point| factory.estimated(i + 1, point))
        })
        .collect()
}

//! Traffic signals along a driving route.
//!
//! [`RouteSignalMatcher`] takes a route polyline, asks an Overpass endpoint for the
//! `highway=traffic_signals` nodes around it and keeps the ones lying on the route. When the
//! query fails or nothing matches, signals are estimated on the route's own vertices instead,
//! so every usable route yields a result.

pub mod config;
pub mod error;
pub mod estimation;
pub mod geometry;
pub mod io;
pub mod overpass;
pub mod route_index;
pub mod route_matcher;
pub mod routing;
pub mod signal;
pub mod vendors;

pub use config::{MatcherConfig, SignalOrder, VendorCountFallback, VendorCounts};
pub use error::SourceError;
pub use geometry::{BoundingBox, GeoPoint, RouteGeometry};
pub use overpass::{OverpassClient, RawSignal, SignalSource, SignalTags};
pub use route_matcher::{MatchOutcome, RouteSignalMatcher, SignalReport};
pub use signal::{SignalOrigin, TrafficSignal};

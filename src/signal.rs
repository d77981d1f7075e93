use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::config::MatcherConfig;
use crate::geometry::GeoPoint;
use crate::overpass::RawSignal;

/// Prefix marking signals placed by the estimator rather than found in geodata
pub const ESTIMATED_ID_PREFIX: &str = "estimated-";

const UNNAMED_LOCATION: &str = "Intersection on route";

/// Where a signal record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    /// A traffic signal node reported by the geodata service
    Observed,
    /// Placed on a route vertex because no real data matched
    Estimated,
}

/// A traffic-signal intersection along a route
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSignal {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(serialize_with = "serialize_lng_lat")]
    pub coordinates: GeoPoint,
    /// Typical wait in seconds. Generated, not measured.
    pub wait_duration_seconds: u32,
    pub vendor_count: u32,
    pub origin: SignalOrigin,
}

impl TrafficSignal {
    pub fn is_estimated(&self) -> bool {
        self.origin == SignalOrigin::Estimated
    }
}

fn serialize_lng_lat<S: Serializer>(point: &GeoPoint, serializer: S) -> Result<S::Ok, S::Error> {
    let mut state = serializer.serialize_struct("Coordinates", 2)?;
    state.serialize_field("lng", &point.x())?;
    state.serialize_field("lat", &point.y())?;
    state.end()
}

/// Fills in the presentation attributes of signal records for one matching call
pub(crate) struct SignalFactory<'a> {
    config: &'a MatcherConfig,
    rng: StdRng,
}

impl<'a> SignalFactory<'a> {
    pub(crate) fn new(config: &'a MatcherConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { config, rng }
    }

    pub(crate) fn observed(&mut self, raw: &RawSignal) -> TrafficSignal {
        let name = raw
            .tags
            .name
            .clone()
            .unwrap_or_else(|| format!("Signal #{}", short_id(&raw.id)));
        let location = raw
            .tags
            .road
            .clone()
            .or_else(|| raw.tags.description.clone())
            .unwrap_or_else(|| UNNAMED_LOCATION.to_string());

        TrafficSignal {
            name,
            location,
            coordinates: raw.point,
            wait_duration_seconds: self.config.observed_wait_seconds.sample(&mut self.rng),
            vendor_count: self.config.vendor_counts.lookup(&raw.id, &mut self.rng),
            origin: SignalOrigin::Observed,
            id: raw.id.clone(),
        }
    }

    /// `number` is 1-based and shared by the id and the display name
    pub(crate) fn estimated(&mut self, number: usize, point: GeoPoint) -> TrafficSignal {
        let id = format!("{}{}", ESTIMATED_ID_PREFIX, number);
        TrafficSignal {
            name: format!("Traffic Signal #{}", number),
            location: format!("Estimated intersection {}", number),
            coordinates: point,
            wait_duration_seconds: self.config.estimated_wait_seconds.sample(&mut self.rng),
            vendor_count: self.config.vendor_counts.lookup(&id, &mut self.rng),
            origin: SignalOrigin::Estimated,
            id,
        }
    }
}

/// Last four characters of an id, for placeholder names
fn short_id(id: &str) -> &str {
    let start = id.char_indices().rev().nth(3).map(|(i, _)| i).unwrap_or(0);
    &id[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overpass::SignalTags;
    use geo::Point;

    fn raw(id: &str, tags: SignalTags) -> RawSignal {
        RawSignal {
            id: id.to_string(),
            point: Point::new(77.59, 12.97),
            tags,
        }
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("123456789"), "6789");
        assert_eq!(short_id("42"), "42");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_observed_uses_tags() {
        let config = MatcherConfig::default();
        let mut factory = SignalFactory::new(&config);
        let signal = factory.observed(&raw(
            "555",
            SignalTags {
                name: Some("Silk Board Junction".into()),
                road: None,
                description: Some("Hosur Road".into()),
            },
        ));

        assert_eq!(signal.name, "Silk Board Junction");
        assert_eq!(signal.location, "Hosur Road");
        assert_eq!(signal.origin, SignalOrigin::Observed);
        let waits = config.observed_wait_seconds;
        assert!(waits.contains(signal.wait_duration_seconds));
        assert!((1..=10).contains(&signal.vendor_count));
    }

    #[test]
    fn test_observed_placeholders() {
        let config = MatcherConfig::default();
        let mut factory = SignalFactory::new(&config);
        let signal = factory.observed(&raw("9876543210", SignalTags::default()));
        assert_eq!(signal.name, "Signal #3210");
        assert_eq!(signal.location, UNNAMED_LOCATION);
        assert!(!signal.is_estimated());
    }

    #[test]
    fn test_estimated_record() {
        let config = MatcherConfig {
            seed: Some(3),
            ..MatcherConfig::default()
        };
        let mut factory = SignalFactory::new(&config);
        let signal = factory.estimated(2, Point::new(1.0, 2.0));
        assert_eq!(signal.id, "estimated-2");
        assert_eq!(signal.name, "Traffic Signal #2");
        assert!(signal.is_estimated());
        let waits = config.estimated_wait_seconds;
        assert!(waits.contains(signal.wait_duration_seconds));
    }

    #[test]
    fn test_seeded_attributes_repeat() {
        let config = MatcherConfig {
            seed: Some(11),
            ..MatcherConfig::default()
        };
        let first = SignalFactory::new(&config).observed(&raw("1", SignalTags::default()));
        let second = SignalFactory::new(&config).observed(&raw("1", SignalTags::default()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_serialized_shape() {
        let config = MatcherConfig::default();
        let signal = SignalFactory::new(&config).estimated(1, Point::new(77.5, 12.9));
        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value["coordinates"]["lng"], 77.5);
        assert_eq!(value["coordinates"]["lat"], 12.9);
        assert_eq!(value["origin"], "estimated");
        assert!(value["waitDurationSeconds"].is_u64());
        assert!(value["vendorCount"].is_u64());
    }
}

use log::{debug, info, warn};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::SourceError;
use crate::geometry::GeoPoint;
use crate::overpass::{OverpassClient, valid_coordinates};
use crate::signal::TrafficSignal;

/// Search radius around a signal (meters)
pub const DEFAULT_VENDOR_RADIUS_METERS: u32 = 200;

// Tag filters for everything that sells food near an intersection
const VENDOR_SELECTORS: &[&str] = &[
    r#"["amenity"="restaurant"]"#,
    r#"["amenity"="cafe"]"#,
    r#"["amenity"="fast_food"]"#,
    r#"["amenity"="food_court"]"#,
    r#"["shop"="food"]"#,
    r#"["stall"="food"]"#,
    r#"["amenity"="marketplace"]["food"="yes"]"#,
    r#"["amenity"="food_cart"]"#,
    r#"["amenity"="street_vendor"]["food"="yes"]"#,
    r#"["shop"="street_food"]"#,
    r#"["shop"="convenience"]["food"="yes"]"#,
    r#"["amenity"="ice_cream"]"#,
    r#"["shop"="bakery"]"#,
    r#"["shop"="deli"]"#,
];

// Tag suffix and label for each yes/no attribute a vendor can advertise
const DIETARY_TAGS: &[(&str, &str)] = &[
    ("vegetarian", "Vegetarian"),
    ("vegan", "Vegan"),
    ("halal", "Halal"),
    ("kosher", "Kosher"),
    ("gluten_free", "Gluten-Free"),
];

const FEATURE_TAGS: &[(&str, &str)] = &[
    ("outdoor_seating", "Outdoor Seating"),
    ("takeaway", "Takeout"),
    ("delivery", "Delivery"),
    ("wheelchair", "Wheelchair Accessible"),
    ("internet_access", "Wi-Fi"),
    ("drive_through", "Drive Through"),
];

const PAYMENT_TAGS: &[(&str, &str)] = &[
    ("cash", "Cash"),
    ("cards", "Cards"),
    ("debit_cards", "Debit Cards"),
    ("credit_cards", "Credit Cards"),
    ("mobile", "Mobile Payment"),
];

const DIETARY_PREFIXES: &[&str] = &["diet:", "diet_", ""];
const PAYMENT_PREFIXES: &[&str] = &["payment:", "payment_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorType {
    Restaurant,
    Cafe,
    FastFood,
    FoodCourt,
    FoodCart,
    StreetVendor,
    FoodShop,
    FoodStall,
    Bakery,
    Delicatessen,
    IceCreamShop,
    Unknown,
}

impl VendorType {
    /// Classify from OSM tags, first matching rule wins
    pub fn classify(tags: &BTreeMap<String, String>) -> Self {
        let amenity = tags.get("amenity").map(String::as_str);
        let shop = tags.get("shop").map(String::as_str);
        let stall = tags.get("stall").map(String::as_str);

        match (amenity, shop, stall) {
            (Some("restaurant"), _, _) => VendorType::Restaurant,
            (Some("cafe"), _, _) => VendorType::Cafe,
            (Some("fast_food"), _, _) => VendorType::FastFood,
            (Some("food_court"), _, _) => VendorType::FoodCourt,
            (Some("food_cart"), _, _) => VendorType::FoodCart,
            (Some("street_vendor"), _, _) => VendorType::StreetVendor,
            (_, Some("food"), _) => VendorType::FoodShop,
            (_, _, Some("food")) => VendorType::FoodStall,
            (_, Some("bakery"), _) => VendorType::Bakery,
            (_, Some("deli"), _) => VendorType::Delicatessen,
            (Some("ice_cream"), _, _) => VendorType::IceCreamShop,
            _ => VendorType::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VendorType::Restaurant => "Restaurant",
            VendorType::Cafe => "Cafe",
            VendorType::FastFood => "Fast Food",
            VendorType::FoodCourt => "Food Court",
            VendorType::FoodCart => "Food Cart",
            VendorType::StreetVendor => "Street Vendor",
            VendorType::FoodShop => "Food Shop",
            VendorType::FoodStall => "Food Stall",
            VendorType::Bakery => "Bakery",
            VendorType::Delicatessen => "Delicatessen",
            VendorType::IceCreamShop => "Ice Cream Shop",
            VendorType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VendorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for VendorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// A place selling food close to a traffic signal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodVendor {
    pub id: String,
    pub name: String,
    pub vendor_type: VendorType,
    #[serde(serialize_with = "serialize_lat_lng")]
    pub location: GeoPoint,
    pub cuisine: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub website: Option<String>,
    pub opening_hours: Option<String>,
    /// `false` when the opening hours say the place is closed
    pub is_open: Option<bool>,
    /// Service hours, or the opening hours when none are tagged
    pub serving_time: Option<String>,
    /// Number of symbols in `price_range`, e.g. 2 for "$$"
    pub price_level: Option<usize>,
    pub is_mobile: bool,
    pub is_temporary: bool,
    pub features: Vec<&'static str>,
    pub dietary_options: Vec<&'static str>,
    pub payment_methods: Vec<&'static str>,
    pub specialties: Vec<String>,
}

fn serialize_lat_lng<S: Serializer>(point: &GeoPoint, serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeStruct;
    let mut state = serializer.serialize_struct("Location", 2)?;
    state.serialize_field("lat", &point.y())?;
    state.serialize_field("lng", &point.x())?;
    state.end()
}

/// Vendors found around one signal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalVendors {
    pub signal_id: String,
    pub vendors: Vec<FoodVendor>,
}

#[derive(Debug, Deserialize)]
struct VendorNode {
    id: u64,
    lat: f64,
    lon: f64,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl VendorNode {
    /// First of `keys` present on the node
    fn tag(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.tags.get(*key).cloned())
    }

    /// Set to anything but "no"
    fn flagged(&self, key: &str) -> bool {
        self.tags.get(key).is_some_and(|value| value != "no")
    }

    /// Labels whose tag is flagged under any of `prefixes`
    fn labels(&self, table: &[(&str, &'static str)], prefixes: &[&str]) -> Vec<&'static str> {
        table
            .iter()
            .filter(|(key, _)| {
                prefixes
                    .iter()
                    .any(|prefix| self.flagged(&format!("{}{}", prefix, key)))
            })
            .map(|(_, label)| *label)
            .collect()
    }

    fn address(&self) -> Option<String> {
        self.tag(&["addr:full"]).or_else(|| {
            let parts: Vec<&str> = ["addr:street", "addr:housenumber", "addr:city"]
                .iter()
                .filter_map(|key| self.tags.get(*key).map(String::as_str))
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        })
    }

    fn into_vendor(self) -> FoodVendor {
        let vendor_type = VendorType::classify(&self.tags);
        let opening_hours = self.tag(&["opening_hours"]);
        let is_open = opening_hours.as_ref().map(|h| !h.contains("closed"));
        let serving_time = self.tag(&["service_hours", "opening_hours"]);
        let price_level = self.tags.get("price_range").map(|r| r.chars().count());

        let is_mobile = self.tags.get("mobile").is_some_and(|v| v == "yes")
            || matches!(vendor_type, VendorType::FoodCart | VendorType::StreetVendor);

        let specialties: Vec<String> = self
            .tags
            .get("specialties")
            .map(|list| {
                list.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        FoodVendor {
            id: self.id.to_string(),
            name: self
                .tag(&["name"])
                .unwrap_or_else(|| format!("Unnamed {}", vendor_type)),
            cuisine: self.tag(&["cuisine"]),
            address: self.address(),
            phone_number: self.tag(&["phone", "contact:phone"]),
            website: self.tag(&["website", "contact:website"]),
            is_open,
            serving_time,
            price_level,
            is_temporary: self.tags.get("temporary").is_some_and(|v| v == "yes"),
            features: self.labels(FEATURE_TAGS, &[""]),
            dietary_options: self.labels(DIETARY_TAGS, DIETARY_PREFIXES),
            payment_methods: self.labels(PAYMENT_TAGS, PAYMENT_PREFIXES),
            location: GeoPoint::new(self.lon, self.lat),
            opening_hours,
            specialties,
            is_mobile,
            vendor_type,
        }
    }
}

/// Overpass QL for food vendors within `radius_meters` of `point`
pub fn vendor_query(point: GeoPoint, radius_meters: u32) -> String {
    let around = format!("(around:{},{},{})", radius_meters, point.y(), point.x());
    let mut query = String::from("[out:json][timeout:25];(");
    for selector in VENDOR_SELECTORS {
        query.push_str("node");
        query.push_str(selector);
        query.push_str(&around);
        query.push(';');
    }
    query.push_str(");out body;");
    query
}

/// Parse an Overpass body into vendors, dropping elements that are not usable nodes
pub fn parse_vendor_response(body: &str) -> Result<Vec<FoodVendor>, SourceError> {
    #[derive(Deserialize)]
    struct Response {
        #[serde(default)]
        elements: Vec<Value>,
    }

    let response: Response = serde_json::from_str(body)?;
    Ok(response
        .elements
        .into_iter()
        .filter_map(|element| serde_json::from_value::<VendorNode>(element).ok())
        .filter(|node| valid_coordinates(node.lat, node.lon))
        .map(VendorNode::into_vendor)
        .collect())
}

/// Looks up food vendors around signals through an Overpass endpoint
pub struct VendorLookup {
    client: OverpassClient,
    radius_meters: u32,
}

impl VendorLookup {
    pub fn new(client: OverpassClient) -> Self {
        Self {
            client,
            radius_meters: DEFAULT_VENDOR_RADIUS_METERS,
        }
    }

    pub fn with_radius(mut self, radius_meters: u32) -> Self {
        self.radius_meters = radius_meters;
        self
    }

    pub async fn vendors_near(&self, point: GeoPoint) -> Result<Vec<FoodVendor>, SourceError> {
        let body = self
            .client
            .run_query(&vendor_query(point, self.radius_meters))
            .await?;
        parse_vendor_response(&body)
    }

    /// Vendors for each signal in turn. A failed lookup leaves that signal with no vendors.
    pub async fn vendors_along(&self, signals: &[TrafficSignal]) -> Vec<SignalVendors> {
        let mut results = Vec::with_capacity(signals.len());

        for signal in signals {
            let vendors = match self.vendors_near(signal.coordinates).await {
                Ok(vendors) => {
                    debug!("{} vendors near signal {}", vendors.len(), signal.id);
                    vendors
                }
                Err(e) => {
                    warn!("Vendor lookup failed for signal {}: {}", signal.id, e);
                    Vec::new()
                }
            };
            results.push(SignalVendors {
                signal_id: signal.id.clone(),
                vendors,
            });
        }

        info!(
            "Found {} vendors around {} signals",
            results.iter().map(|r| r.vendors.len()).sum::<usize>(),
            signals.len()
        );
        results
    }
}

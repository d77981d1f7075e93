use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use log::{info, warn};
use serde_json::json;
use signalstop::io::{read_route_file, signals_to_geojson};
use signalstop::routing::{DEFAULT_OSRM_URL, RoutePlanner};
use signalstop::vendors::{DEFAULT_VENDOR_RADIUS_METERS, VendorLookup};
use signalstop::{GeoPoint, MatcherConfig, OverpassClient, RouteGeometry, RouteSignalMatcher};

#[derive(Parser, Debug)]
#[command(name = "signalstop", about = "Find the traffic signals along a driving route")]
struct Args {
    /// GeoJSON file holding the route as a LineString
    #[arg(long, conflicts_with_all = ["from", "to"])]
    route: Option<PathBuf>,
    /// Route origin as "lng,lat"
    #[arg(long, requires = "to", value_parser = parse_lng_lat)]
    from: Option<GeoPoint>,
    /// Route destination as "lng,lat"
    #[arg(long, requires = "from", value_parser = parse_lng_lat)]
    to: Option<GeoPoint>,
    /// TOML file overriding matcher settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// OSRM server used with --from/--to
    #[arg(long, default_value = DEFAULT_OSRM_URL)]
    osrm_url: String,
    /// Also look up food vendors around every signal
    #[arg(long)]
    vendors: bool,
    /// Vendor search radius in meters
    #[arg(long, default_value_t = DEFAULT_VENDOR_RADIUS_METERS)]
    vendor_radius: u32,
    /// Print a GeoJSON FeatureCollection instead of the report
    #[arg(long, conflicts_with = "vendors")]
    geojson: bool,
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_lng_lat(text: &str) -> Result<GeoPoint> {
    let (lng, lat) = text
        .split_once(',')
        .ok_or_else(|| anyhow!("expected \"lng,lat\", got {:?}", text))?;
    let lng: f64 = lng.trim().parse()?;
    let lat: f64 = lat.trim().parse()?;
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        bail!("coordinates out of range: {},{}", lng, lat);
    }
    Ok(GeoPoint::new(lng, lat))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();
    info!("Starting signalstop");

    let config = match &args.config {
        Some(path) => MatcherConfig::from_toml_file(path)?,
        None => MatcherConfig::default(),
    };

    let route = load_route(&args, &config).await?;
    info!(
        "Route has {} points over {:.0}m",
        route.len(),
        route.length_meters()
    );
    if route.is_degenerate() {
        warn!("Route needs at least 2 points, no signals can be placed");
    }

    let matcher = RouteSignalMatcher::new(config)?;
    let report = matcher.match_route(&route).await;

    let output = if args.geojson {
        signals_to_geojson(&route, &report.signals)
    } else if args.vendors {
        let client = OverpassClient::from_config(matcher.config())?;
        let lookup = VendorLookup::new(client).with_radius(args.vendor_radius);
        let vendors = lookup.vendors_along(&report.signals).await;
        json!({ "report": report, "vendors": vendors })
    } else {
        serde_json::to_value(&report)?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn load_route(args: &Args, config: &MatcherConfig) -> Result<RouteGeometry> {
    if let Some(path) = &args.route {
        return read_route_file(path).await;
    }

    match (args.from, args.to) {
        (Some(from), Some(to)) => {
            let planner = RoutePlanner::new(args.osrm_url.clone(), config.request_timeout())?;
            let planned = planner.plan(from, to).await?;
            Ok(planned.geometry)
        }
        _ => bail!("Pass either --route <file> or --from <lng,lat> --to <lng,lat>"),
    }
}

use anyhow::{Result, bail};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::overpass::DEFAULT_OVERPASS_URL;

/// Inclusive range of seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondsRange {
    pub min: u32,
    pub max: u32,
}

impl SecondsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> u32 {
        rng.random_range(self.min..=self.max)
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// What to report as vendor count for a signal missing from the known table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VendorCountFallback {
    Fixed { count: u32 },
    Random { min: u32, max: u32 },
}

impl Default for VendorCountFallback {
    fn default() -> Self {
        VendorCountFallback::Random { min: 1, max: 10 }
    }
}

impl VendorCountFallback {
    pub fn generate(&self, rng: &mut impl Rng) -> u32 {
        match self {
            VendorCountFallback::Fixed { count } => *count,
            VendorCountFallback::Random { min, max } => rng.random_range(*min..=*max),
        }
    }
}

/// Vendor counts keyed by signal id, with a fallback for everything else
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorCounts {
    pub known: HashMap<String, u32>,
    pub fallback: VendorCountFallback,
}

impl VendorCounts {
    pub fn lookup(&self, signal_id: &str, rng: &mut impl Rng) -> u32 {
        match self.known.get(signal_id) {
            Some(count) => *count,
            None => self.fallback.generate(rng),
        }
    }
}

/// Order of accepted signals in the result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrder {
    /// As returned by the geodata service
    #[default]
    SourceOrder,
    /// By projected position from origin to destination
    AlongRoute,
}

pub const MAX_RETRIES: u32 = 10;
pub const MIN_ESTIMATION_SPACING_METERS: f64 = 1.0;

/// Route signal matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Overpass interpreter endpoint
    pub overpass_url: String,
    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Extra attempts after a transient failure
    pub max_retries: u32,
    /// Delay before the first retry, grows linearly per attempt (milliseconds)
    pub retry_backoff_ms: u64,
    /// Padding added around the route bounding box (degrees)
    pub bbox_padding_degrees: f64,
    /// Maximum distance from the route for a signal to count as on it (meters)
    pub max_distance_meters: f64,
    /// Route length per estimated signal (meters)
    pub estimation_spacing_meters: f64,
    /// Typical wait for signals from the geodata service
    pub observed_wait_seconds: SecondsRange,
    /// Typical wait for estimated signals
    pub estimated_wait_seconds: SecondsRange,
    pub vendor_counts: VendorCounts,
    pub order: SignalOrder,
    /// Fixed seed for the attribute generator, for reproducible output
    pub seed: Option<u64>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            request_timeout_secs: 10,
            max_retries: 0, // single attempt, then estimate
            retry_backoff_ms: 500,
            bbox_padding_degrees: 0.0002, // ~20m
            max_distance_meters: 10.0,
            estimation_spacing_meters: 250.0,
            observed_wait_seconds: SecondsRange::new(40, 180),
            estimated_wait_seconds: SecondsRange::new(60, 180),
            vendor_counts: VendorCounts::default(),
            order: SignalOrder::default(),
            seed: None,
        }
    }
}

impl MatcherConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MatcherConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Upper bound for one signal query including every retry and backoff
    pub fn query_deadline(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        // 1 + 2 + .. + max_retries backoff steps
        let steps = u64::from(self.max_retries) * u64::from(attempts) / 2;
        let steps = u32::try_from(steps).unwrap_or(u32::MAX);
        self.request_timeout()
            .saturating_mul(attempts)
            .saturating_add(self.retry_backoff().saturating_mul(steps))
    }

    pub fn validate(&self) -> Result<()> {
        if self.overpass_url.is_empty() {
            bail!("overpass_url must not be empty");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        if !(self.bbox_padding_degrees >= 0.0 && self.bbox_padding_degrees.is_finite()) {
            bail!(
                "bbox_padding_degrees must be a non-negative number, got {}",
                self.bbox_padding_degrees
            );
        }
        if !(self.max_distance_meters > 0.0 && self.max_distance_meters.is_finite()) {
            bail!(
                "max_distance_meters must be positive, got {}",
                self.max_distance_meters
            );
        }
        if self.max_retries > MAX_RETRIES {
            bail!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES,
                self.max_retries
            );
        }
        if !(self.estimation_spacing_meters >= MIN_ESTIMATION_SPACING_METERS
            && self.estimation_spacing_meters.is_finite())
        {
            bail!(
                "estimation_spacing_meters must be at least {}, got {}",
                MIN_ESTIMATION_SPACING_METERS,
                self.estimation_spacing_meters
            );
        }
        for (name, range) in [
            ("observed_wait_seconds", self.observed_wait_seconds),
            ("estimated_wait_seconds", self.estimated_wait_seconds),
        ] {
            if range.min > range.max {
                bail!("{} has min {} above max {}", name, range.min, range.max);
            }
        }
        if let VendorCountFallback::Random { min, max } = self.vendor_counts.fallback {
            if min > max {
                bail!("vendor count fallback has min {} above max {}", min, max);
            }
        }
        Ok(())
    }
}

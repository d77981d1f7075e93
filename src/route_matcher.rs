use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;

use crate::config::{MatcherConfig, SignalOrder};
use crate::error::SourceError;
use crate::estimation::estimate_signals;
use crate::geometry::RouteGeometry;
use crate::overpass::{OverpassClient, RawSignal, SignalSource};
use crate::route_index::RouteIndex;
use crate::signal::{SignalFactory, TrafficSignal};

/// How a matching call arrived at its signals
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Route had fewer than two points, nothing to match against
    Degenerate,
    /// At least one real signal lies on the route
    Matched,
    /// The query worked but no signal was close enough to the route
    EstimatedNoMatches,
    /// The query failed, signals were estimated instead
    EstimatedSourceFailed(String),
}

impl MatchOutcome {
    pub fn is_estimated(&self) -> bool {
        matches!(
            self,
            MatchOutcome::EstimatedNoMatches | MatchOutcome::EstimatedSourceFailed(_)
        )
    }
}

/// Signals for one route plus how they were obtained
#[derive(Debug, Clone, Serialize)]
pub struct SignalReport {
    pub generated_at: DateTime<Utc>,
    pub outcome: MatchOutcome,
    /// Signal points returned by the geodata query, before the distance filter
    pub candidates_considered: usize,
    pub signals: Vec<TrafficSignal>,
}

impl SignalReport {
    fn new(
        outcome: MatchOutcome,
        candidates_considered: usize,
        signals: Vec<TrafficSignal>,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            outcome,
            candidates_considered,
            signals,
        }
    }
}

/// Finds the traffic signals a driving route passes through
pub struct RouteSignalMatcher<S = OverpassClient> {
    source: S,
    config: MatcherConfig,
}

impl RouteSignalMatcher<OverpassClient> {
    /// Matcher backed by the Overpass endpoint named in the configuration
    pub fn new(config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        let source = OverpassClient::from_config(&config)?;
        Ok(Self { source, config })
    }
}

impl<S: SignalSource> RouteSignalMatcher<S> {
    pub fn with_source(source: S, config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { source, config })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Traffic signals on `route`, real where possible and estimated otherwise.
    /// Empty only for a route with fewer than two points.
    pub async fn find_signals_on_route(&self, route: &RouteGeometry) -> Vec<TrafficSignal> {
        self.match_route(route).await.signals
    }

    /// Like [`find_signals_on_route`](Self::find_signals_on_route), keeping the outcome.
    ///
    /// Source failures never surface as errors: they are logged and replaced by estimation.
    pub async fn match_route(&self, route: &RouteGeometry) -> SignalReport {
        if route.is_degenerate() {
            debug!(
                "Skipping route with {} points (need at least 2)",
                route.len()
            );
            return SignalReport::new(MatchOutcome::Degenerate, 0, Vec::new());
        }

        let mut factory = SignalFactory::new(&self.config);

        let candidates = match self.query_candidates(route).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Signal query failed, estimating signals instead: {}", e);
                let signals = self.estimate(route, &mut factory);
                return SignalReport::new(
                    MatchOutcome::EstimatedSourceFailed(e.to_string()),
                    0,
                    signals,
                );
            }
        };

        let accepted = self.accept_candidates(route, &candidates, &mut factory);
        if accepted.is_empty() {
            info!(
                "None of {} candidates within {}m of the route, estimating signals",
                candidates.len(),
                self.config.max_distance_meters
            );
            let signals = self.estimate(route, &mut factory);
            return SignalReport::new(MatchOutcome::EstimatedNoMatches, candidates.len(), signals);
        }

        info!(
            "Matched {} of {} candidate signals to the route",
            accepted.len(),
            candidates.len()
        );
        SignalReport::new(MatchOutcome::Matched, candidates.len(), accepted)
    }

    /// Run [`match_route`](Self::match_route) until `cancel` completes.
    /// Returns `None` when cancelled; the in-flight query is dropped.
    pub async fn match_route_until<F>(
        &self,
        route: &RouteGeometry,
        cancel: F,
    ) -> Option<SignalReport>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            report = self.match_route(route) => Some(report),
            _ = cancel => {
                debug!("Signal matching cancelled by caller");
                None
            }
        }
    }

    async fn query_candidates(
        &self,
        route: &RouteGeometry,
    ) -> Result<Vec<RawSignal>, SourceError> {
        let bbox = route
            .bounding_box(self.config.bbox_padding_degrees)
            .ok_or_else(|| SourceError::Rejected("route has no points".to_string()))?;

        let deadline = self.config.query_deadline();
        match tokio::time::timeout(deadline, self.source.fetch_signals(&bbox)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout),
        }
    }

    /// Keep candidates within the distance limit of some segment, first occurrence of each id
    fn accept_candidates(
        &self,
        route: &RouteGeometry,
        candidates: &[RawSignal],
        factory: &mut SignalFactory<'_>,
    ) -> Vec<TrafficSignal> {
        let index = RouteIndex::new(route);
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();

        for candidate in candidates {
            let Some(projection) =
                index.nearest_within(candidate.point, self.config.max_distance_meters)
            else {
                debug!("Candidate {} is off the route", candidate.id);
                continue;
            };

            if !seen.insert(candidate.id.as_str()) {
                debug!("Skipping duplicate candidate {}", candidate.id);
                continue;
            }

            debug!(
                "Candidate {} accepted at {:.1}m from segment {}",
                candidate.id, projection.distance, projection.segment_index
            );
            accepted.push((projection, factory.observed(candidate)));
        }

        if self.config.order == SignalOrder::AlongRoute {
            let cumulative = route.cumulative_lengths();
            accepted.sort_by_key(|(projection, _)| {
                OrderedFloat(projection.position_along(&cumulative))
            });
        }

        accepted.into_iter().map(|(_, signal)| signal).collect()
    }

    fn estimate(
        &self,
        route: &RouteGeometry,
        factory: &mut SignalFactory<'_>,
    ) -> Vec<TrafficSignal> {
        estimate_signals(route, self.config.estimation_spacing_meters, factory)
    }
}

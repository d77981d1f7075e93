use log::{debug, info, trace, warn};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::config::MatcherConfig;
use crate::error::SourceError;
use crate::geometry::{BoundingBox, GeoPoint};

/// Public Overpass interpreter
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Server-side timeout requested in every query (seconds)
const QUERY_TIMEOUT_SECS: u32 = 25;

const USER_AGENT: &str = concat!("signalstop/", env!("CARGO_PKG_VERSION"));

/// Descriptive tags of a signal node. Everything else on the node is ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SignalTags {
    pub name: Option<String>,
    pub road: Option<String>,
    pub description: Option<String>,
}

/// A traffic-signal point as reported by the geodata service
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    pub id: String,
    pub point: GeoPoint,
    pub tags: SignalTags,
}

/// Anything that can list traffic-signal points inside a bounding box
pub trait SignalSource: Send + Sync {
    fn fetch_signals(
        &self,
        bbox: &BoundingBox,
    ) -> impl Future<Output = Result<Vec<RawSignal>, SourceError>> + Send;
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct OverpassNode {
    id: u64,
    lat: f64,
    lon: f64,
    #[serde(default)]
    tags: SignalTags,
}

/// Overpass QL selecting every signal-controlled node inside `bbox`
pub fn signal_query(bbox: &BoundingBox) -> String {
    format!(
        "[out:json][timeout:{}];node[\"highway\"=\"traffic_signals\"]{};out body;",
        QUERY_TIMEOUT_SECS,
        bbox.to_overpass_filter()
    )
}

/// Parse an Overpass JSON body into signal points.
///
/// Only a body that is not JSON at all is an error. Individual elements missing an id or
/// carrying unusable coordinates are dropped.
pub fn parse_signal_response(body: &str) -> Result<Vec<RawSignal>, SourceError> {
    let response: OverpassResponse = serde_json::from_str(body)?;
    let total = response.elements.len();

    let signals: Vec<RawSignal> = response
        .elements
        .into_iter()
        .filter_map(signal_from_element)
        .collect();

    if signals.len() < total {
        debug!("Kept {} of {} elements", signals.len(), total);
    }
    Ok(signals)
}

fn signal_from_element(element: Value) -> Option<RawSignal> {
    match serde_json::from_value::<OverpassNode>(element) {
        Ok(node) if valid_coordinates(node.lat, node.lon) => Some(RawSignal {
            id: node.id.to_string(),
            point: GeoPoint::new(node.lon, node.lat),
            tags: node.tags,
        }),
        Ok(node) => {
            debug!("Dropping node {} with coordinates out of range", node.id);
            None
        }
        Err(e) => {
            debug!("Dropping unparseable element: {}", e);
            None
        }
    }
}

pub(crate) fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// HTTP client for an Overpass-compatible interpreter
#[derive(Debug, Clone)]
pub struct OverpassClient {
    http: reqwest::Client,
    url: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl OverpassClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            max_retries: 0,
            retry_backoff: Duration::ZERO,
        })
    }

    pub fn from_config(config: &MatcherConfig) -> Result<Self, SourceError> {
        let client = Self::new(config.overpass_url.clone(), config.request_timeout())?;
        Ok(client.with_retries(config.max_retries, config.retry_backoff()))
    }

    /// Retry transient failures up to `max_retries` times, sleeping `backoff * attempt` between
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run an Overpass QL query and return the raw response body
    pub async fn run_query(&self, query: &str) -> Result<String, SourceError> {
        trace!("Overpass query: {}", query);

        let mut attempt = 0;
        loop {
            match self.send_once(query).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Overpass request failed ({}), retry {}/{}",
                        e, attempt, self.max_retries
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, query: &str) -> Result<String, SourceError> {
        let response = self
            .http
            .post(&self.url)
            .form(&[("data", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

impl SignalSource for OverpassClient {
    async fn fetch_signals(&self, bbox: &BoundingBox) -> Result<Vec<RawSignal>, SourceError> {
        info!(
            "Querying traffic signals in bbox {:.5},{:.5} to {:.5},{:.5}",
            bbox.min_lat, bbox.min_lng, bbox.max_lat, bbox.max_lng
        );
        let body = self.run_query(&signal_query(bbox)).await?;
        let signals = parse_signal_response(&body)?;
        info!("Overpass returned {} signal nodes", signals.len());
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ONE_SIGNAL: &str =
        r#"{"elements": [{"type": "node", "id": 5, "lat": 12.97, "lon": 77.59}]}"#;

    /// Local interpreter answering each connection with the next canned status and body.
    /// Returns its URL and a counter of requests served.
    async fn canned_interpreter(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/interpreter", listener.local_addr().unwrap());
        let served = Arc::new(AtomicUsize::new(0));

        let counter = served.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;

                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        (url, served)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);

            if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&request[..end]).to_lowercase();
                let length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn any_bbox() -> BoundingBox {
        BoundingBox::new(12.9, 77.5, 13.0, 77.6)
    }

    #[tokio::test]
    async fn test_retries_transient_status() {
        let (url, served) = canned_interpreter(vec![(503, ""), (200, ONE_SIGNAL)]).await;
        let client = OverpassClient::new(url, Duration::from_secs(5))
            .unwrap()
            .with_retries(1, Duration::from_millis(10));

        let signals = client.fetch_signals(&any_bbox()).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "5");
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_stop_at_limit() {
        let (url, served) =
            canned_interpreter(vec![(503, ""), (502, ""), (200, ONE_SIGNAL)]).await;
        let client = OverpassClient::new(url, Duration::from_secs(5))
            .unwrap()
            .with_retries(1, Duration::from_millis(10));

        let err = client.fetch_signals(&any_bbox()).await.unwrap_err();
        assert_eq!(err, SourceError::Status(502));
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, served) = canned_interpreter(vec![(400, ""), (200, ONE_SIGNAL)]).await;
        let client = OverpassClient::new(url, Duration::from_secs(5))
            .unwrap()
            .with_retries(3, Duration::from_millis(10));

        let err = client.fetch_signals(&any_bbox()).await.unwrap_err();
        assert_eq!(err, SourceError::Status(400));
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signal_query() {
        let bbox = BoundingBox::new(12.9, 77.5, 13.0, 77.6);
        assert_eq!(
            signal_query(&bbox),
            "[out:json][timeout:25];node[\"highway\"=\"traffic_signals\"](12.9,77.5,13,77.6);out body;"
        );
    }

    #[test]
    fn test_parse_elements() {
        let body = r#"{
            "version": 0.6,
            "elements": [
                {"type": "node", "id": 101, "lat": 12.97, "lon": 77.59,
                 "tags": {"highway": "traffic_signals", "name": "MG Road", "road": "MG Road & 11th Cross"}},
                {"type": "node", "id": 102, "lat": 12.98, "lon": 77.60}
            ]
        }"#;

        let signals = parse_signal_response(body).unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].id, "101");
        assert_eq!(signals[0].point, GeoPoint::new(77.59, 12.97));
        assert_eq!(signals[0].tags.name.as_deref(), Some("MG Road"));
        assert_eq!(
            signals[0].tags.road.as_deref(),
            Some("MG Road & 11th Cross")
        );
        assert_eq!(signals[1].tags, SignalTags::default());
    }

    #[test]
    fn test_parse_drops_bad_elements() {
        let body = r#"{"elements": [
            {"id": 1, "lat": 12.97},
            {"id": "abc", "lat": 12.97, "lon": 77.59},
            {"id": 2, "lat": 95.0, "lon": 77.59},
            {"id": 3, "lat": 12.97, "lon": 77.59, "tags": {"name": 5}},
            "garbage",
            {"id": 4, "lat": 12.97, "lon": 77.59}
        ]}"#;

        let signals = parse_signal_response(body).unwrap();
        let ids: Vec<&str> = signals.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["4"]);
    }

    #[test]
    fn test_parse_missing_elements_is_empty() {
        assert!(parse_signal_response("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_signal_response("<html>rate limited</html>"),
            Err(SourceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client =
            OverpassClient::new("http://127.0.0.1:9/api/interpreter", Duration::from_secs(2))
                .unwrap();
        let bbox = BoundingBox::new(0.0, 0.0, 0.01, 0.01);
        let err = client.fetch_signals(&bbox).await.unwrap_err();
        assert!(matches!(err, SourceError::Network(_) | SourceError::Timeout));
    }
}

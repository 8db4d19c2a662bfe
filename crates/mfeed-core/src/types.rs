//! Feed data types.
//!
//! Contains the connection state, topic and wire message types, and the
//! typed view of the market-feed snapshot.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pairs subscribed by default on the market topic.
pub const APPROVED_PAIRS: [&str; 3] = ["HYPE-kHYPE", "uETH-HYPE", "uBTC-HYPE"];

/// Metric groups subscribed by default on the market topic.
pub const DEFAULT_METRICS: [&str; 4] = ["latency", "spreads", "liquidity", "opportunities"];

/// Connector's belief about stream health.
///
/// This is not the raw socket state. `Degraded` is never set by the
/// transport loop itself; it is derived from a stale `Live` or reported
/// when streaming is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Live,
    Degraded,
    Backoff,
}

impl ConnectionState {
    /// All states, in metric label order.
    pub const ALL: [ConnectionState; 4] = [
        ConnectionState::Connecting,
        ConnectionState::Live,
        ConnectionState::Degraded,
        ConnectionState::Backoff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Degraded => "degraded",
            Self::Backoff => "backoff",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named logical channel of market data (e.g. "market", "status", "quotes").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic, rejecting empty or whitespace-containing names.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidTopic(name));
        }
        Ok(Self(name))
    }

    pub fn market() -> Self {
        Self("market".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscribe payload: which pairs and which metric groups to stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub pairs: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl Subscription {
    pub fn new(pairs: Vec<String>, metrics: Vec<String>) -> Self {
        Self { pairs, metrics }
    }

    /// Approved pairs with every metric group.
    pub fn market_default() -> Self {
        Self {
            pairs: APPROVED_PAIRS.iter().map(|p| p.to_string()).collect(),
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Client-to-server message, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    /// Heartbeat; `ts` is unix milliseconds at send time.
    Ping { ts: i64 },
}

impl ClientMessage {
    pub fn subscribe(subscription: Subscription) -> Self {
        Self::Subscribe(subscription)
    }

    pub fn ping_now() -> Self {
        Self::Ping {
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_subscribe(&self) -> bool {
        matches!(self, Self::Subscribe(_))
    }

    /// Message kind, used as a log/metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Ping { .. } => "ping",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Feed latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// A detected cross-venue opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub pair: String,
    pub edge_bps: f64,
    pub size: f64,
    pub venue: String,
}

/// Typed view of the market-feed snapshot.
///
/// The snapshot itself is stored as untyped JSON so that fields the server
/// adds later survive merges; this view is read on demand.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFeedData {
    #[serde(default)]
    pub latency: LatencySummary,
    /// Spread per pair in basis points.
    #[serde(default)]
    pub spreads: BTreeMap<String, f64>,
    /// Liquidity per pair in USD.
    #[serde(default)]
    pub liquidity: BTreeMap<String, f64>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_wire_format() {
        let msg = ClientMessage::subscribe(Subscription::market_default());
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["pairs"], json!(["HYPE-kHYPE", "uETH-HYPE", "uBTC-HYPE"]));
        assert_eq!(
            value["metrics"],
            json!(["latency", "spreads", "liquidity", "opportunities"])
        );
    }

    #[test]
    fn test_ping_wire_format() {
        let msg = ClientMessage::Ping { ts: 1_700_000_000_000 };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"ping","ts":1700000000000}"#
        );
        assert!(!msg.is_subscribe());
        assert_eq!(msg.kind(), "ping");
    }

    #[test]
    fn test_topic_validation() {
        assert!(Topic::new("market").is_ok());
        assert!(Topic::new("").is_err());
        assert!(Topic::new("two words").is_err());
    }

    #[test]
    fn test_connection_state_serde() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Backoff).unwrap(),
            "\"backoff\""
        );
        assert_eq!(ConnectionState::Live.to_string(), "live");
    }

    #[test]
    fn test_live_feed_data_from_metrics_payload() {
        let raw = json!({
            "latency": {"p50": 25, "p95": 60, "p99": 110},
            "spreads": {"BTC-USD": 4.2, "ETH-USD": 3.1},
            "liquidity": {"BTC-USD": 1_500_000, "ETH-USD": 800_000},
            "opportunities": [
                {"pair": "BTC-USD", "edgeBps": 12.3, "size": 0.8, "venue": "X"},
                {"pair": "ETH-USD", "edgeBps": 8.4, "size": 12, "venue": "Y"}
            ],
            "lastUpdated": "2024-01-01T00:00:00Z"
        });

        let data: LiveFeedData = serde_json::from_value(raw).unwrap();
        assert_eq!(data.latency.p99, 110.0);
        assert_eq!(data.spreads["BTC-USD"], 4.2);
        assert_eq!(data.opportunities.len(), 2);
        assert_eq!(data.opportunities[0].edge_bps, 12.3);
    }

    #[test]
    fn test_live_feed_data_tolerates_partial_payload() {
        let data: LiveFeedData = serde_json::from_value(json!({"spreads": {"A": 1.0}})).unwrap();
        assert!(data.opportunities.is_empty());
        assert!(data.last_updated.is_none());
    }
}

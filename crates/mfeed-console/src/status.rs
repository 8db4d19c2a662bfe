//! Status server using axum.
//!
//! - `GET /api/status`: per-topic connection state, badge, polling and counters
//! - `GET /api/snapshot/{topic}`: current merged snapshot for a topic
//! - `GET /metrics`: Prometheus text exposition

use crate::error::AppResult;
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use mfeed_core::{BadgeStatus, ConnectionState, CounterSink, CountersSnapshot, Topic};
use mfeed_fallback::{FeedNotice, LiveFeed, MergeCounts};
use mfeed_ws::ConnectorStats;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct StatusState {
    feeds: Arc<Vec<Arc<LiveFeed>>>,
    counters: Arc<dyn CounterSink>,
    badge_disconnect_secs: u64,
    notices: Arc<RwLock<HashMap<Topic, String>>>,
}

impl StatusState {
    pub fn new(
        feeds: Vec<Arc<LiveFeed>>,
        counters: Arc<dyn CounterSink>,
        badge_disconnect_secs: u64,
    ) -> Self {
        Self {
            feeds: Arc::new(feeds),
            counters,
            badge_disconnect_secs,
            notices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn feeds(&self) -> &[Arc<LiveFeed>] {
        &self.feeds
    }

    /// Remember the latest notice for its topic.
    pub fn record_notice(&self, notice: &FeedNotice) {
        let FeedNotice::Degraded { topic } = notice;
        self.notices.write().insert(topic.clone(), notice.message());
    }

    fn feed(&self, topic: &str) -> Option<&Arc<LiveFeed>> {
        self.feeds.iter().find(|f| f.topic().as_str() == topic)
    }

    pub fn collect(&self) -> StatusResponse {
        let notices = self.notices.read();
        let feeds = self
            .feeds
            .iter()
            .map(|feed| {
                let badge = feed.badge(self.badge_disconnect_secs);
                FeedStatus {
                    topic: feed.topic().clone(),
                    state: feed.state(),
                    badge_label: badge.label(),
                    badge,
                    polling: feed.is_polling(),
                    streaming_disabled: feed.is_streaming_disabled(),
                    stats: feed.stats(),
                    merges: feed.cache().merge_counts(),
                    notice: notices.get(feed.topic()).cloned(),
                }
            })
            .collect();

        StatusResponse {
            timestamp: Utc::now(),
            feeds,
            counters: self.counters.snapshot(),
        }
    }
}

/// Status for one topic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    pub topic: Topic,
    pub state: ConnectionState,
    pub badge: BadgeStatus,
    pub badge_label: &'static str,
    pub polling: bool,
    pub streaming_disabled: bool,
    pub stats: Option<ConnectorStats>,
    pub merges: MergeCounts,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub timestamp: DateTime<Utc>,
    pub feeds: Vec<FeedStatus>,
    pub counters: CountersSnapshot,
}

/// Create the axum router.
pub fn create_router(state: StatusState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/snapshot/{topic}", get(get_snapshot))
        .route("/metrics", get(get_metrics))
        .layer(cors)
        .with_state(state)
}

async fn get_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    Json(state.collect())
}

async fn get_snapshot(
    State(state): State<StatusState>,
    Path(topic): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.feed(&topic) {
        Some(feed) => Ok(Json(feed.snapshot())),
        None => {
            debug!(topic = %topic, "Snapshot requested for unknown topic");
            Err(StatusCode::NOT_FOUND)
        }
    }
}

async fn get_metrics() -> Response {
    match mfeed_telemetry::gather_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn serve(
    state: StatusState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting status server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use mfeed_core::RealtimeCounters;
    use mfeed_fallback::{BoxFuture, FallbackResult, LiveFeedConfig, MergeSource, SnapshotSource};
    use mfeed_ws::ConnectorConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct StaticSource;

    impl SnapshotSource for StaticSource {
        fn fetch(&self) -> BoxFuture<'_, FallbackResult<Value>> {
            Box::pin(async { Ok(json!({"spreads": {"BTC-USD": 4.2}})) })
        }
    }

    fn state() -> StatusState {
        let counters = Arc::new(RealtimeCounters::new());
        let config = LiveFeedConfig {
            disable_streaming: true,
            ..LiveFeedConfig::new(Topic::market(), ConnectorConfig::default())
        };
        let feed = Arc::new(LiveFeed::new(config, Arc::new(StaticSource), counters.clone()));
        StatusState::new(vec![feed], counters, 10)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_status_reports_each_feed() {
        let state = state();
        let (status, body) = get_json(create_router(state), "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        let feed = &body["feeds"][0];
        assert_eq!(feed["topic"], "market");
        assert_eq!(feed["state"], "degraded");
        assert_eq!(feed["streamingDisabled"], true);
        assert_eq!(feed["badge"]["status"], "disconnected");
        assert_eq!(feed["badgeLabel"], "WS Disconnected");
        assert_eq!(body["counters"]["pollingActivations"], 0);
    }

    #[tokio::test]
    async fn test_status_includes_recorded_notice() {
        let state = state();
        state.record_notice(&FeedNotice::Degraded {
            topic: Topic::market(),
        });
        let (_, body) = get_json(create_router(state), "/api/status").await;
        assert!(body["feeds"][0]["notice"]
            .as_str()
            .unwrap()
            .contains("switching to polling"));
    }

    #[tokio::test]
    async fn test_snapshot_for_known_topic() {
        let state = state();
        state.feeds()[0]
            .cache()
            .merge(MergeSource::Poll, &json!({"spreads": {"ETH-USD": 3.1}}));

        let (status, body) = get_json(create_router(state), "/api/snapshot/market").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spreads"]["ETH-USD"], json!(3.1));
        assert!(body["lastUpdated"].is_string());
    }

    #[tokio::test]
    async fn test_snapshot_for_unknown_topic_is_404() {
        let (status, _) = get_json(create_router(state()), "/api/snapshot/quotes").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        mfeed_telemetry::Metrics::ws_state_set(&Topic::market(), ConnectionState::Degraded);

        let response = create_router(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("mfeed_ws_state"));
    }
}

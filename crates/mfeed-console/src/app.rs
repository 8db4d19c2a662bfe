//! Application wiring.
//!
//! One `LiveFeed` per configured topic, all sharing a Prometheus-backed
//! counter sink, plus the status server and a state metrics tick.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::status::{self, StatusState};
use mfeed_core::CounterSink;
use mfeed_fallback::{HttpSnapshotClient, LiveFeed};
use mfeed_telemetry::{Metrics, PrometheusCounters};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interval for publishing connector state gauges.
const STATE_METRICS_INTERVAL: Duration = Duration::from_secs(1);

pub struct Application {
    config: AppConfig,
    counters: Arc<PrometheusCounters>,
    feeds: Vec<Arc<LiveFeed>>,
}

impl Application {
    /// Build feeds for every topic. Fails on invalid configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let endpoints = config.endpoints()?;
        let token = config.stream_token()?;
        if config.auth.require_auth && token.is_none() {
            warn!("Stream auth required but no token resolved, connecting without one");
        }

        info!(
            api_base = %endpoints.api_base(),
            ws_base = %endpoints.ws_base(),
            auth = config.auth.require_auth,
            "Endpoints resolved"
        );

        let counters = Arc::new(PrometheusCounters::new());
        let request_timeout = Duration::from_millis(config.fallback.request_timeout_ms);

        let mut feeds = Vec::new();
        for topic in config.topics()? {
            let stream_url = endpoints.stream_url(&topic, token.as_deref())?;
            let source = Arc::new(HttpSnapshotClient::with_timeout(
                endpoints.metrics_url(),
                request_timeout,
            )?);
            let feed_config = config.live_feed_config(topic, stream_url);
            feeds.push(Arc::new(LiveFeed::new(feed_config, source, counters.clone())));
        }

        Ok(Self {
            config,
            counters,
            feeds,
        })
    }

    pub fn feeds(&self) -> &[Arc<LiveFeed>] {
        &self.feeds
    }

    pub fn status_state(&self) -> StatusState {
        StatusState::new(
            self.feeds.clone(),
            self.counters.clone(),
            self.config.websocket.badge_disconnect_secs,
        )
    }

    /// Start every feed and the status server, then run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let status_addr = self
            .config
            .status
            .enabled
            .then(|| self.config.status_addr())
            .transpose()?;

        let shutdown = CancellationToken::new();
        let status_state = self.status_state();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        for feed in &self.feeds {
            tasks.push(spawn_notice_recorder(feed, status_state.clone(), shutdown.clone()));
            feed.start().await;
        }

        tasks.push(spawn_state_metrics(self.feeds.clone(), shutdown.clone()));

        if let Some(addr) = status_addr {
            let state = status_state.clone();
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = status::serve(state, addr, token).await {
                    error!(error = %e, "Status server failed");
                }
            }));
        }

        info!(topics = self.feeds.len(), "Application running");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        shutdown.cancel();
        for feed in &self.feeds {
            feed.stop().await;
        }
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }

        let counters = self.counters.snapshot();
        info!(
            reconnects = counters.reconnects,
            partial_frames = counters.partial_frames,
            ping_timeouts = counters.ping_timeouts,
            dropped = counters.dropped,
            polling_activations = counters.polling_activations,
            "Application stopped"
        );
        Ok(())
    }
}

fn spawn_notice_recorder(
    feed: &LiveFeed,
    state: StatusState,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut notices = feed.subscribe_notices();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                notice = notices.recv() => match notice {
                    Ok(notice) => state.record_notice(&notice),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

fn spawn_state_metrics(feeds: Vec<Arc<LiveFeed>>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATE_METRICS_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for feed in &feeds {
                        Metrics::ws_state_set(feed.topic(), feed.state());
                    }
                }
            }
        }
    })
}

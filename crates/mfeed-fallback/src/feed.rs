//! Per-topic live feed.
//!
//! Wires one `FeedConnector` to the snapshot cache and a
//! `FallbackController`, so consumers read a snapshot that stays fresh
//! whether data arrives over the stream or through polling.

use crate::cache::{MergeSource, SnapshotCache};
use crate::client::SnapshotSource;
use crate::controller::{FallbackConfig, FallbackController, FeedNotice};
use mfeed_core::{
    label_for, BadgeStatus, ClientMessage, ConnectionState, CounterSink, LinkHealth,
    LiveFeedData, Subscription, Topic,
};
use mfeed_ws::{ConnectorConfig, ConnectorStats, FeedConnector};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Live feed configuration for one topic.
#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    pub topic: Topic,
    /// Connector settings, including the stream URL.
    pub connector: ConnectorConfig,
    pub fallback: FallbackConfig,
    /// Sent once on start and replayed after every reconnect.
    pub subscription: Option<Subscription>,
    /// Never open the stream; poll permanently.
    pub disable_streaming: bool,
    /// Capacity of the connector-to-cache channel.
    pub message_buffer: usize,
}

impl LiveFeedConfig {
    pub fn new(topic: Topic, connector: ConnectorConfig) -> Self {
        Self {
            topic,
            connector,
            fallback: FallbackConfig::default(),
            subscription: None,
            disable_streaming: false,
            message_buffer: 1_000,
        }
    }
}

/// Stream + fallback composition for one topic.
pub struct LiveFeed {
    topic: Topic,
    config: LiveFeedConfig,
    cache: Arc<SnapshotCache>,
    source: Arc<dyn SnapshotSource>,
    connector: Option<Arc<FeedConnector>>,
    controller: Arc<FallbackController>,
    notices: broadcast::Sender<FeedNotice>,
    message_rx: Mutex<Option<mpsc::Receiver<serde_json::Value>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connector_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown_token: CancellationToken,
}

impl LiveFeed {
    pub fn new(
        config: LiveFeedConfig,
        source: Arc<dyn SnapshotSource>,
        counters: Arc<dyn CounterSink>,
    ) -> Self {
        let topic = config.topic.clone();
        let cache = Arc::new(SnapshotCache::new());
        let (notices, _) = broadcast::channel(16);

        let (connector, message_rx) = if config.disable_streaming {
            (None, None)
        } else {
            let (tx, rx) = mpsc::channel(config.message_buffer.max(1));
            let connector = Arc::new(FeedConnector::new(
                config.connector.clone(),
                topic.clone(),
                counters.clone(),
                tx,
            ));
            (Some(connector), Some(rx))
        };

        let link: Arc<dyn LinkHealth> = match &connector {
            Some(connector) => connector.link(),
            None => Arc::new(DisabledLink),
        };

        let controller = Arc::new(FallbackController::new(
            topic.clone(),
            config.fallback,
            link,
            source.clone(),
            cache.clone(),
            counters,
            notices.clone(),
        ));

        Self {
            topic,
            config,
            cache,
            source,
            connector,
            controller,
            notices,
            message_rx: Mutex::new(message_rx),
            tasks: Mutex::new(Vec::new()),
            connector_task: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Fetch the initial snapshot, then start streaming (or polling when
    /// streaming is disabled). Calling it again is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) || self.shutdown_token.is_cancelled() {
            return;
        }

        match self.source.fetch().await {
            Ok(snapshot) => {
                self.cache.merge(MergeSource::Initial, &snapshot);
                debug!(topic = %self.topic, "Initial snapshot loaded");
            }
            Err(e) => warn!(topic = %self.topic, error = %e, "Initial snapshot fetch failed"),
        }

        if self.shutdown_token.is_cancelled() {
            return;
        }

        let Some(connector) = &self.connector else {
            info!(topic = %self.topic, "Streaming disabled, polling only");
            self.controller.start_polling();
            return;
        };

        if let Some(subscription) = &self.config.subscription {
            connector.send_message(ClientMessage::subscribe(subscription.clone()));
        }

        *self.connector_task.lock() = Some(connector.spawn());

        let mut tasks = self.tasks.lock();
        if let Some(rx) = self.message_rx.lock().take() {
            tasks.push(tokio::spawn(forward_messages(
                self.topic.clone(),
                rx,
                self.cache.clone(),
                self.shutdown_token.clone(),
            )));
        }

        let controller = self.controller.clone();
        tasks.push(tokio::spawn(async move { controller.run().await }));

        info!(topic = %self.topic, "Live feed started");
    }

    /// Display state. Stale `Live` reads as `Degraded`; a feed with streaming
    /// disabled is always `Degraded`.
    pub fn state(&self) -> ConnectionState {
        match &self.connector {
            Some(connector) => {
                let link = connector.link();
                label_for(
                    link.state(),
                    link.since_last_live(),
                    self.config.fallback.grace_window,
                )
            }
            None => ConnectionState::Degraded,
        }
    }

    pub fn stats(&self) -> Option<ConnectorStats> {
        self.connector.as_ref().map(|c| c.stats())
    }

    pub fn badge(&self, disconnect_threshold_secs: u64) -> BadgeStatus {
        match self.stats() {
            Some(stats) => BadgeStatus::derive(
                stats.state,
                stats.last_live_at,
                stats.last_disconnect_at,
                chrono::Utc::now(),
                disconnect_threshold_secs,
                stats.bytes_per_min,
            ),
            None => BadgeStatus::Disconnected { for_secs: None },
        }
    }

    pub fn is_polling(&self) -> bool {
        self.controller.is_polling()
    }

    pub fn is_streaming_disabled(&self) -> bool {
        self.connector.is_none()
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        self.cache.clone()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        self.cache.snapshot()
    }

    pub fn data(&self) -> Option<LiveFeedData> {
        self.cache.typed()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<FeedNotice> {
        self.notices.subscribe()
    }

    /// Forward a client message to the stream. `false` when streaming is
    /// disabled or the stream is not open.
    pub fn send_message(&self, message: ClientMessage) -> bool {
        match &self.connector {
            Some(connector) => connector.send_message(message),
            None => false,
        }
    }

    pub fn reconnect(&self) {
        if let Some(connector) = &self.connector {
            connector.reconnect();
        }
    }

    /// Tear down every timer, task and the socket. Idempotent.
    pub fn close(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        self.shutdown_token.cancel();

        if let Some(connector) = &self.connector {
            connector.shutdown();
        }
        self.controller.shutdown();

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!(topic = %self.topic, "Live feed closed");
    }

    /// `close`, then wait for the connector to send its close frame.
    pub async fn stop(&self) {
        self.close();
        let task = self.connector_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(topic = %self.topic, error = %e, "Connector task ended abnormally");
            }
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.close();
    }
}

/// Health view for a feed that never opens a stream.
struct DisabledLink;

impl LinkHealth for DisabledLink {
    fn state(&self) -> ConnectionState {
        ConnectionState::Degraded
    }

    fn since_last_live(&self) -> Option<std::time::Duration> {
        None
    }
}

async fn forward_messages(
    topic: Topic,
    mut rx: mpsc::Receiver<serde_json::Value>,
    cache: Arc<SnapshotCache>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(value) => {
                    cache.merge(MergeSource::Stream, &value);
                }
                None => break,
            },
        }
    }
    debug!(topic = %topic, "Message forwarder stopped");
}

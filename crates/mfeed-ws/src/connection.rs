//! Feed connector.
//!
//! Handles the stream lifecycle for one topic: connect, subscription replay,
//! heartbeat, partial-frame assembly, and reconnection with exponential
//! backoff. Nothing here returns an error to the caller; failures end the
//! current session and feed the backoff path or the counters.

use crate::backoff::BackoffPolicy;
use crate::error::{WsError, WsResult};
use crate::frame::{FrameAssembler, FrameOutcome, DEFAULT_MAX_FRAME_BYTES};
use crate::heartbeat::{wait_for_deadline, Heartbeat};
use crate::throughput::ThroughputMeter;
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, SinkExt, StreamExt};
use mfeed_core::{ClientMessage, ConnectionState, CounterSink, LinkHealth, Topic};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async_tls_with_config;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Close code sent when the pong deadline expires.
pub const PING_TIMEOUT_CLOSE_CODE: u16 = 4000;

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Topic-qualified stream URL (may carry an auth token).
    pub url: String,
    /// Heartbeat ping interval.
    pub ping_interval_ms: u64,
    /// Some inbound frame must arrive within this after a ping.
    pub pong_timeout_ms: u64,
    /// Backoff for ordinary disconnects and connect failures.
    pub backoff: BackoffPolicy,
    /// Backoff after a missed pong.
    pub heartbeat_backoff: BackoffPolicy,
    /// Give up on a single connect attempt after this long.
    pub connect_timeout_ms: u64,
    /// Cap on buffered bytes of a partial frame.
    pub max_frame_bytes: usize,
    /// Throughput window length.
    pub throughput_window_ms: u64,
    /// Log lifecycle and throughput at info level.
    pub debug_logging: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ping_interval_ms: 20_000,
            pong_timeout_ms: 10_000,
            backoff: BackoffPolicy::RECONNECT,
            heartbeat_backoff: BackoffPolicy::HEARTBEAT,
            connect_timeout_ms: 10_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            throughput_window_ms: 60_000,
            debug_logging: false,
        }
    }
}

/// Lightweight stats for status surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorStats {
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_live_at: Option<DateTime<Utc>>,
    pub last_disconnect_at: Option<DateTime<Utc>>,
    pub bytes_per_min: u64,
    pub reconnect_attempt: u32,
}

#[derive(Debug)]
struct LinkInner {
    state: ConnectionState,
    /// Monotonic time of the last inbound frame, used for health checks.
    last_live: Option<Instant>,
    connected_at: Option<DateTime<Utc>>,
    last_live_at: Option<DateTime<Utc>>,
    last_disconnect_at: Option<DateTime<Utc>>,
    throughput: ThroughputMeter,
}

/// Shared view of one connector's link, read by health checks.
#[derive(Debug)]
pub struct LinkStatus {
    inner: RwLock<LinkInner>,
    reconnect_attempt: AtomicU32,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LinkInner {
                state: ConnectionState::Connecting,
                last_live: None,
                connected_at: None,
                last_live_at: None,
                last_disconnect_at: None,
                throughput: ThroughputMeter::new(Instant::now()),
            }),
            reconnect_attempt: AtomicU32::new(0),
        }
    }

    pub fn stats(&self) -> ConnectorStats {
        let inner = self.inner.read();
        ConnectorStats {
            state: inner.state,
            connected_at: inner.connected_at,
            last_live_at: inner.last_live_at,
            last_disconnect_at: inner.last_disconnect_at,
            bytes_per_min: inner.throughput.bytes_per_min(),
            reconnect_attempt: self.reconnect_attempt.load(Ordering::Acquire),
        }
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.write().state = state;
    }

    fn mark_open(&self, now: Instant) {
        self.reconnect_attempt.store(0, Ordering::Release);
        let wall = Utc::now();
        let mut inner = self.inner.write();
        inner.state = ConnectionState::Live;
        inner.last_live = Some(now);
        inner.connected_at = Some(wall);
        inner.last_live_at = Some(wall);
        inner.throughput.reset(now);
    }

    fn mark_live(&self, now: Instant, bytes: usize) {
        let mut inner = self.inner.write();
        inner.state = ConnectionState::Live;
        inner.last_live = Some(now);
        inner.last_live_at = Some(Utc::now());
        inner.throughput.record(bytes);
    }

    fn record_disconnect(&self) {
        self.inner.write().last_disconnect_at = Some(Utc::now());
    }

    /// Returns the attempt number to use for this backoff, then bumps it.
    fn next_attempt(&self) -> u32 {
        self.reconnect_attempt.fetch_add(1, Ordering::AcqRel)
    }

    fn roll_throughput(&self, now: Instant) -> u64 {
        self.inner.write().throughput.roll(now)
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkHealth for LinkStatus {
    fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    fn since_last_live(&self) -> Option<Duration> {
        self.inner
            .read()
            .last_live
            .map(|t| Instant::now().saturating_duration_since(t))
    }
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    ManualReconnect,
    StreamEnded,
}

/// Realtime feed connector for one topic.
pub struct FeedConnector {
    config: ConnectorConfig,
    topic: Topic,
    link: Arc<LinkStatus>,
    counters: Arc<dyn CounterSink>,
    message_tx: mpsc::Sender<serde_json::Value>,
    /// Last subscribe message, replayed after every open.
    last_subscribe: RwLock<Option<ClientMessage>>,
    /// True between subscription replay and session end.
    session_open: AtomicBool,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    reconnect_requested: Notify,
    shutdown_token: CancellationToken,
}

impl FeedConnector {
    /// Create a connector. Parsed messages are delivered on `message_tx`.
    pub fn new(
        config: ConnectorConfig,
        topic: Topic,
        counters: Arc<dyn CounterSink>,
        message_tx: mpsc::Sender<serde_json::Value>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        Self {
            config,
            topic,
            link: Arc::new(LinkStatus::new()),
            counters,
            message_tx,
            last_subscribe: RwLock::new(None),
            session_open: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            reconnect_requested: Notify::new(),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn link(&self) -> Arc<LinkStatus> {
        self.link.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn stats(&self) -> ConnectorStats {
        self.link.stats()
    }

    /// Send a client message.
    ///
    /// Subscribe messages are remembered for replay even when the stream is
    /// down. Returns `true` only if the message was queued on an open session.
    pub fn send_message(&self, message: ClientMessage) -> bool {
        if message.is_subscribe() {
            *self.last_subscribe.write() = Some(message.clone());
        }

        if !self.session_open.load(Ordering::Acquire) {
            debug!(topic = %self.topic, kind = message.kind(), "Stream not open, message not sent");
            return false;
        }

        match message.to_json() {
            Ok(text) => self.outbound_tx.try_send(text).is_ok(),
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Failed to encode client message");
                false
            }
        }
    }

    /// Drop the current session (or skip the current backoff wait) and
    /// connect again right away. A request made while no session is open
    /// and no backoff wait is pending is discarded when the next session
    /// opens.
    pub fn reconnect(&self) {
        self.reconnect_requested.notify_one();
    }

    /// Tear down: close the socket and stop every timer.
    pub fn shutdown(&self) {
        debug!(topic = %self.topic, "Feed connector shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Spawn `run` on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let connector = self.clone();
        tokio::spawn(async move { connector.run().await })
    }

    /// Connect and keep reconnecting until shutdown.
    pub async fn run(&self) {
        let mut outbound_rx = self.outbound_rx.lock().await;

        loop {
            if self.is_shutdown() {
                break;
            }

            self.link.set_state(ConnectionState::Connecting);
            let outcome = self.run_session(&mut outbound_rx).await;
            self.session_open.store(false, Ordering::Release);

            if self.is_shutdown() {
                break;
            }

            self.link.record_disconnect();

            let policy = match &outcome {
                Ok(SessionEnd::ManualReconnect) => {
                    self.counters.record_reconnect(&self.topic);
                    info!(topic = %self.topic, "Manual reconnect");
                    continue;
                }
                Ok(_) => {
                    warn!(topic = %self.topic, "Feed stream ended");
                    self.config.backoff
                }
                Err(WsError::HeartbeatTimeout) => {
                    warn!(topic = %self.topic, "Feed heartbeat timed out");
                    self.config.heartbeat_backoff
                }
                Err(e) => {
                    warn!(topic = %self.topic, reason = e.reason(), error = %e, "Feed session failed");
                    self.config.backoff
                }
            };

            self.link.set_state(ConnectionState::Backoff);
            let attempt = self.link.next_attempt();
            let delay = policy.delay_with_jitter(attempt, &mut rand::thread_rng());
            self.counters.record_reconnect(&self.topic);
            info!(
                topic = %self.topic,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.reconnect_requested.notified() => {
                    info!(topic = %self.topic, "Manual reconnect, skipping backoff");
                }
                () = self.shutdown_token.cancelled() => break,
            }
        }

        info!(topic = %self.topic, "Feed connector stopped");
    }

    async fn run_session(&self, outbound_rx: &mut mpsc::Receiver<String>) -> WsResult<SessionEnd> {
        debug!(topic = %self.topic, "Connecting feed stream");

        let connect = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connect_async_tls_with_config(self.config.url.as_str(), None, true, None),
        );
        let (ws_stream, _response) = tokio::select! {
            result = connect => result
                .map_err(|_| WsError::ConnectionFailed("connect timeout".to_string()))??,
            () = self.shutdown_token.cancelled() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws_stream.split();

        // Messages and reconnect requests from before this session are stale.
        while outbound_rx.try_recv().is_ok() {}
        if self.reconnect_requested.notified().now_or_never().is_some() {
            debug!(topic = %self.topic, "Discarded reconnect request made before open");
        }

        let opened_at = Instant::now();
        self.link.mark_open(opened_at);
        if self.config.debug_logging {
            info!(topic = %self.topic, "Feed connected");
        } else {
            debug!(topic = %self.topic, "Feed connected");
        }

        let replay = self.last_subscribe.read().clone();
        if let Some(subscription) = replay {
            write.send(Message::Text(subscription.to_json()?)).await?;
            debug!(topic = %self.topic, "Replayed subscription");
        }
        self.session_open.store(true, Ordering::Release);

        let mut frames = FrameAssembler::new(self.config.max_frame_bytes);
        let mut heartbeat = Heartbeat::new(
            Duration::from_millis(self.config.ping_interval_ms.max(1)),
            Duration::from_millis(self.config.pong_timeout_ms),
        );
        // First tick fires immediately: ping right after open.
        let mut ping_timer = tokio::time::interval(heartbeat.ping_interval());
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let window = Duration::from_millis(self.config.throughput_window_ms.max(1));
        let mut throughput_timer = tokio::time::interval_at(opened_at + window, window);

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(topic = %self.topic, error = %e, "Close frame not sent on shutdown");
                    }
                    return Ok(SessionEnd::Shutdown);
                }

                () = self.reconnect_requested.notified() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "reconnect".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    return Ok(SessionEnd::ManualReconnect);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.record_inbound(&mut heartbeat, text.len());
                            let outcome = frames.push(&text);
                            self.handle_outcome(outcome, frames.buffered_len()).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.record_inbound(&mut heartbeat, data.len());
                            let outcome = frames.push_bytes(&data);
                            self.handle_outcome(outcome, frames.buffered_len()).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.record_inbound(&mut heartbeat, 0);
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.record_inbound(&mut heartbeat, 0);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1005, String::new()));
                            debug!(topic = %self.topic, code, %reason, "Feed closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::StreamEnded),
                    }
                }

                () = wait_for_deadline(heartbeat.pong_deadline()) => {
                    self.counters.record_ping_timeout(&self.topic);
                    warn!(topic = %self.topic, "Pong deadline missed, closing stream");
                    let frame = CloseFrame {
                        code: CloseCode::from(PING_TIMEOUT_CLOSE_CODE),
                        reason: "ping-timeout".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    return Err(WsError::HeartbeatTimeout);
                }

                Some(text) = outbound_rx.recv() => {
                    write.send(Message::Text(text)).await?;
                }

                _ = ping_timer.tick() => {
                    let ping = ClientMessage::ping_now().to_json()?;
                    write.send(Message::Text(ping)).await?;
                    heartbeat.record_ping(Instant::now());
                    debug!(topic = %self.topic, "Sent heartbeat ping");
                }

                _ = throughput_timer.tick() => {
                    let rate = self.link.roll_throughput(Instant::now());
                    let rtt_ms = heartbeat.last_rtt().map(|rtt| rtt.as_millis() as u64);
                    if self.config.debug_logging {
                        info!(topic = %self.topic, bytes_per_min = rate, rtt_ms, "Feed throughput");
                    } else {
                        debug!(topic = %self.topic, bytes_per_min = rate, rtt_ms, "Feed throughput");
                    }
                }
            }
        }
    }

    /// Any inbound frame is liveness evidence.
    fn record_inbound(&self, heartbeat: &mut Heartbeat, bytes: usize) {
        let now = Instant::now();
        heartbeat.record_activity(now);
        self.link.mark_live(now, bytes);
    }

    async fn handle_outcome(&self, outcome: FrameOutcome, buffered: usize) {
        match outcome {
            FrameOutcome::Complete(value) => {
                if self.message_tx.send(value).await.is_err() {
                    debug!(topic = %self.topic, "Message receiver dropped");
                }
            }
            FrameOutcome::Partial => {
                self.counters.record_partial_frame(&self.topic);
                debug!(topic = %self.topic, buffered, "Partial frame buffered");
            }
            FrameOutcome::Dropped => {
                self.counters.record_dropped_frame(&self.topic);
                debug!(topic = %self.topic, "Dropped corrupt or oversized frame");
            }
        }
    }
}

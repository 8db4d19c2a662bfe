//! Health-driven polling fallback.
//!
//! A health tick checks the link once per `health_check_interval`. While the
//! stream is unhealthy a poll loop fetches the full snapshot every
//! `poll_interval` and merges it into the cache; once the stream is healthy
//! again the loop is stopped. The first activation in a controller's
//! lifetime publishes a single `FeedNotice::Degraded`.

use crate::cache::{MergeSource, SnapshotCache};
use crate::client::SnapshotSource;
use mfeed_core::{CounterSink, LinkHealth, Topic};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Fallback timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackConfig {
    pub health_check_interval: Duration,
    /// A `Live` link with no message for longer than this is unhealthy.
    pub grace_window: Duration,
    pub poll_interval: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(1),
            grace_window: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// User-facing notices published by the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedNotice {
    /// Live stream degraded; data now comes from polling.
    Degraded { topic: Topic },
}

impl FeedNotice {
    pub fn message(&self) -> String {
        match self {
            Self::Degraded { topic } => {
                format!("Live stream degraded for {topic}, switching to polling")
            }
        }
    }
}

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts and stops polling from the link's health.
pub struct FallbackController {
    topic: Topic,
    config: FallbackConfig,
    link: Arc<dyn LinkHealth>,
    source: Arc<dyn SnapshotSource>,
    cache: Arc<SnapshotCache>,
    counters: Arc<dyn CounterSink>,
    notices: broadcast::Sender<FeedNotice>,
    notice_sent: AtomicBool,
    poll_task: Mutex<Option<PollTask>>,
    shutdown_token: CancellationToken,
}

impl FallbackController {
    pub fn new(
        topic: Topic,
        config: FallbackConfig,
        link: Arc<dyn LinkHealth>,
        source: Arc<dyn SnapshotSource>,
        cache: Arc<SnapshotCache>,
        counters: Arc<dyn CounterSink>,
        notices: broadcast::Sender<FeedNotice>,
    ) -> Self {
        Self {
            topic,
            config,
            link,
            source,
            cache,
            counters,
            notices,
            notice_sent: AtomicBool::new(false),
            poll_task: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.lock().is_some()
    }

    /// Run the health tick until shutdown.
    pub async fn run(&self) {
        let period = self.config.health_check_interval.max(MIN_PERIOD);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => break,
                _ = ticker.tick() => self.evaluate(),
            }
        }

        self.stop_polling();
        debug!(topic = %self.topic, "Fallback controller stopped");
    }

    /// One health check: start polling when unhealthy, stop when healthy.
    pub fn evaluate(&self) {
        let healthy = self.link.is_healthy(self.config.grace_window);
        let polling = self.is_polling();

        if !healthy && !polling {
            self.start_polling();
        } else if healthy && polling {
            self.stop_polling();
            info!(topic = %self.topic, "Stream healthy, polling stopped");
        }
    }

    /// Start the poll loop if it is not running. Must be called from within
    /// a tokio runtime.
    pub fn start_polling(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }

        {
            let mut slot = self.poll_task.lock();
            if slot.is_some() {
                return;
            }
            let token = self.shutdown_token.child_token();
            let handle = tokio::spawn(poll_loop(
                self.topic.clone(),
                self.source.clone(),
                self.cache.clone(),
                self.config.poll_interval,
                token.clone(),
            ));
            *slot = Some(PollTask { token, handle });
        }

        self.counters.set_polling_active(&self.topic, true);
        info!(
            topic = %self.topic,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Polling fallback active"
        );

        if !self.notice_sent.swap(true, Ordering::AcqRel) {
            let notice = FeedNotice::Degraded {
                topic: self.topic.clone(),
            };
            warn!(topic = %self.topic, "{}", notice.message());
            if self.notices.send(notice).is_err() {
                debug!(topic = %self.topic, "No notice subscribers");
            }
        }
    }

    pub fn stop_polling(&self) {
        let Some(task) = self.poll_task.lock().take() else {
            return;
        };
        task.token.cancel();
        task.handle.abort();
        self.counters.set_polling_active(&self.topic, false);
    }

    /// Stop the health tick and any poll loop.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.stop_polling();
    }
}

impl Drop for FallbackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_loop(
    topic: Topic,
    source: Arc<dyn SnapshotSource>,
    cache: Arc<SnapshotCache>,
    period: Duration,
    token: CancellationToken,
) {
    // First tick completes immediately: poll as soon as the loop starts.
    let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => break,
            result = source.fetch() => result,
        };

        match result {
            Ok(snapshot) => {
                cache.merge(MergeSource::Poll, &snapshot);
            }
            Err(e) => warn!(topic = %topic, error = %e, "Snapshot poll failed"),
        }
    }

    debug!(topic = %topic, "Poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BoxFuture;
    use crate::error::{FallbackError, FallbackResult};
    use mfeed_core::{ConnectionState, CountersSnapshot, RealtimeCounters};
    use mockall::mock;
    use mockall::predicate::eq;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicU64;
    use tokio::sync::broadcast::error::TryRecvError;

    struct FakeLink {
        state: Mutex<ConnectionState>,
        live_at: Mutex<Option<Instant>>,
    }

    impl FakeLink {
        fn live_now() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(ConnectionState::Live),
                live_at: Mutex::new(Some(Instant::now())),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(ConnectionState::Backoff),
                live_at: Mutex::new(None),
            })
        }

        fn touch(&self) {
            *self.state.lock() = ConnectionState::Live;
            *self.live_at.lock() = Some(Instant::now());
        }

        fn drop_link(&self) {
            *self.state.lock() = ConnectionState::Backoff;
        }
    }

    impl LinkHealth for FakeLink {
        fn state(&self) -> ConnectionState {
            *self.state.lock()
        }

        fn since_last_live(&self) -> Option<Duration> {
            self.live_at
                .lock()
                .map(|t| Instant::now().saturating_duration_since(t))
        }
    }

    #[derive(Default)]
    struct FakeSource {
        calls: AtomicU64,
        fail: AtomicBool,
    }

    impl SnapshotSource for FakeSource {
        fn fetch(&self) -> BoxFuture<'_, FallbackResult<Value>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.fail.load(Ordering::SeqCst) {
                    return Err(FallbackError::HttpClient("unreachable".to_string()));
                }
                Ok(json!({"spreads": {"BTC-USD": n}}))
            })
        }
    }

    struct Fixture {
        controller: Arc<FallbackController>,
        counters: Arc<RealtimeCounters>,
        cache: Arc<SnapshotCache>,
        source: Arc<FakeSource>,
        notices: broadcast::Receiver<FeedNotice>,
    }

    fn fixture(link: Arc<FakeLink>) -> Fixture {
        let counters = Arc::new(RealtimeCounters::new());
        let cache = Arc::new(SnapshotCache::new());
        let source = Arc::new(FakeSource::default());
        let (tx, notices) = broadcast::channel(16);
        let controller = Arc::new(FallbackController::new(
            Topic::market(),
            FallbackConfig::default(),
            link,
            source.clone(),
            cache.clone(),
            counters.clone(),
            tx,
        ));
        Fixture {
            controller,
            counters,
            cache,
            source,
            notices,
        }
    }

    fn spawn_run(controller: &Arc<FallbackController>) -> JoinHandle<()> {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_starts_within_one_tick_after_grace() {
        let link = FakeLink::live_now();
        let f = fixture(link);
        let handle = spawn_run(&f.controller);

        // Healthy through the tick at 5s (exactly at the grace boundary).
        advance(5_500).await;
        assert!(!f.controller.is_polling());
        assert!(!f.counters.snapshot().polling_active);

        // Tick at 6s sees 6s of silence.
        advance(1_000).await;
        assert!(f.controller.is_polling());
        assert!(f.counters.snapshot().polling_active);
        assert_eq!(f.counters.snapshot().polling_activations, 1);

        f.controller.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_counted_once_while_unhealthy() {
        let f = fixture(FakeLink::down());
        let handle = spawn_run(&f.controller);

        advance(10_500).await;

        assert_eq!(f.counters.snapshot().polling_activations, 1);
        // Activated at 1s; polls at 1, 3, 5, 7, 9.
        assert_eq!(f.cache.merge_counts().poll, 5);
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 5);

        f.controller.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_when_healthy_and_no_more_merges() {
        let link = FakeLink::down();
        let f = fixture(link.clone());
        let handle = spawn_run(&f.controller);

        advance(3_500).await;
        assert!(f.controller.is_polling());

        link.touch();
        advance(1_000).await;
        assert!(!f.controller.is_polling());
        assert!(!f.counters.snapshot().polling_active);
        let merged = f.cache.merge_counts().poll;

        for _ in 0..10 {
            link.touch();
            advance(1_000).await;
        }
        assert_eq!(f.cache.merge_counts().poll, merged);
        assert_eq!(f.counters.snapshot().polling_activations, 1);

        f.controller.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_notice_once_per_lifetime() {
        let link = FakeLink::down();
        let mut f = fixture(link.clone());
        let handle = spawn_run(&f.controller);

        advance(1_500).await;
        assert_eq!(
            f.notices.try_recv().unwrap(),
            FeedNotice::Degraded {
                topic: Topic::market()
            }
        );

        // Recover, then degrade again.
        link.touch();
        advance(1_000).await;
        assert!(!f.controller.is_polling());
        link.drop_link();
        advance(1_000).await;
        assert!(f.controller.is_polling());

        assert_eq!(f.counters.snapshot().polling_activations, 2);
        assert!(matches!(f.notices.try_recv(), Err(TryRecvError::Empty)));

        f.controller.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_swallowed() {
        let f = fixture(FakeLink::down());
        f.source.fail.store(true, Ordering::SeqCst);
        let handle = spawn_run(&f.controller);

        advance(6_500).await;
        assert!(f.controller.is_polling());
        assert!(f.source.calls.load(Ordering::SeqCst) >= 3);
        assert!(f.cache.is_empty());

        f.controller.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling_and_clears_flag() {
        let f = fixture(FakeLink::down());
        let handle = spawn_run(&f.controller);

        advance(1_500).await;
        assert!(f.counters.snapshot().polling_active);

        f.controller.shutdown();
        handle.await.unwrap();
        assert!(!f.controller.is_polling());
        assert!(!f.counters.snapshot().polling_active);

        let calls = f.source.calls.load(Ordering::SeqCst);
        advance(10_000).await;
        assert_eq!(f.source.calls.load(Ordering::SeqCst), calls);

        // No restart after shutdown.
        f.controller.start_polling();
        assert!(!f.controller.is_polling());
    }

    mock! {
        Sink {}
        impl CounterSink for Sink {
            fn record_reconnect(&self, topic: &Topic);
            fn record_partial_frame(&self, topic: &Topic);
            fn record_ping_timeout(&self, topic: &Topic);
            fn record_dropped_frame(&self, topic: &Topic);
            fn set_polling_active(&self, topic: &Topic, active: bool) -> bool;
            fn snapshot(&self) -> CountersSnapshot;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_unhealthy_checks_activate_sink_once() {
        let mut sink = MockSink::new();
        sink.expect_set_polling_active()
            .with(eq(Topic::market()), eq(true))
            .times(1)
            .return_const(true);
        sink.expect_set_polling_active()
            .with(eq(Topic::market()), eq(false))
            .times(1)
            .return_const(true);

        let (tx, _rx) = broadcast::channel(4);
        let controller = FallbackController::new(
            Topic::market(),
            FallbackConfig::default(),
            FakeLink::down(),
            Arc::new(FakeSource::default()),
            Arc::new(SnapshotCache::new()),
            Arc::new(sink),
            tx,
        );

        controller.evaluate();
        controller.evaluate();
        controller.evaluate();
        assert!(controller.is_polling());

        controller.shutdown();
        assert!(!controller.is_polling());
    }
}

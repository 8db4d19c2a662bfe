//! Observability counters for the realtime feed.
//!
//! Every failure the connector absorbs (reconnects, partial frames, ping
//! timeouts, dropped frames) and every polling activation is counted here.
//! Counters are monotonic for the lifetime of the sink and never persisted.
//!
//! The sink is injected into each connector and fallback controller so tests
//! can assert on an isolated instance.

use crate::types::Topic;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Increment surface written by connectors and fallback controllers.
pub trait CounterSink: Send + Sync {
    fn record_reconnect(&self, topic: &Topic);

    fn record_partial_frame(&self, topic: &Topic);

    fn record_ping_timeout(&self, topic: &Topic);

    fn record_dropped_frame(&self, topic: &Topic);

    /// Mark polling active/inactive for a topic.
    ///
    /// Returns `true` if the call changed that topic's polling state.
    /// Activations are counted only on an inactive -> active change.
    fn set_polling_active(&self, topic: &Topic, active: bool) -> bool;

    /// Read-only view for observability surfaces.
    fn snapshot(&self) -> CountersSnapshot;
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub reconnects: u64,
    pub partial_frames: u64,
    pub ping_timeouts: u64,
    pub dropped: u64,
    /// True while at least one topic is polling.
    pub polling_active: bool,
    pub polling_activations: u64,
}

/// Lock-free counter sink.
#[derive(Debug, Default)]
pub struct RealtimeCounters {
    reconnects: AtomicU64,
    partial_frames: AtomicU64,
    ping_timeouts: AtomicU64,
    dropped: AtomicU64,
    polling_activations: AtomicU64,
    polling_topics: Mutex<HashSet<Topic>>,
}

impl RealtimeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a specific topic is currently polling.
    pub fn is_polling(&self, topic: &Topic) -> bool {
        self.polling_topics.lock().contains(topic)
    }
}

impl CounterSink for RealtimeCounters {
    fn record_reconnect(&self, _topic: &Topic) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn record_partial_frame(&self, _topic: &Topic) {
        self.partial_frames.fetch_add(1, Ordering::Relaxed);
    }

    fn record_ping_timeout(&self, _topic: &Topic) {
        self.ping_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped_frame(&self, _topic: &Topic) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn set_polling_active(&self, topic: &Topic, active: bool) -> bool {
        let mut topics = self.polling_topics.lock();
        let changed = if active {
            topics.insert(topic.clone())
        } else {
            topics.remove(topic)
        };
        if changed && active {
            self.polling_activations.fetch_add(1, Ordering::Relaxed);
        }
        changed
    }

    fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            reconnects: self.reconnects.load(Ordering::Relaxed),
            partial_frames: self.partial_frames.load(Ordering::Relaxed),
            ping_timeouts: self.ping_timeouts.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            polling_active: !self.polling_topics.lock().is_empty(),
            polling_activations: self.polling_activations.load(Ordering::Relaxed),
        }
    }
}

//! Prometheus metrics for mfeed.
//!
//! Mirrors the realtime counters so the stream and polling paths can be
//! scraped:
//! - Reconnects per topic
//! - Partial, dropped and ping-timeout frame events
//! - Polling fallback activity
//! - Connector state per topic
//!
//! # Panics
//!
//! Metric registration unwraps. A failure there means a duplicate metric
//! name, which only happens at first access of a static.

use crate::error::TelemetryResult;
use mfeed_core::{ConnectionState, Topic};
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

/// Reconnects scheduled per topic.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mfeed_ws_reconnect_total",
        "Total stream reconnects scheduled",
        &["topic"]
    )
    .unwrap()
});

pub static WS_PARTIAL_FRAMES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mfeed_ws_partial_frames_total",
        "Stream chunks buffered as incomplete JSON"
    )
    .unwrap()
});

pub static WS_PING_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mfeed_ws_ping_timeouts_total",
        "Heartbeat pong deadlines missed"
    )
    .unwrap()
});

pub static WS_DROPPED_FRAMES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mfeed_ws_dropped_frames_total",
        "Stream frames discarded as corrupt or oversized"
    )
    .unwrap()
});

/// 1 while any topic is polling.
pub static POLLING_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "mfeed_polling_active",
        "Polling fallback active (1=active)"
    )
    .unwrap()
});

pub static POLLING_ACTIVATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mfeed_polling_activations_total",
        "Polling fallback inactive-to-active transitions"
    )
    .unwrap()
});

/// Connector state per topic.
/// Labels: topic, state (connecting/live/degraded/backoff)
pub static WS_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mfeed_ws_state",
        "Connector state (1=active, 0=inactive)",
        &["topic", "state"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn ws_reconnect(topic: &Topic) {
        WS_RECONNECT_TOTAL.with_label_values(&[topic.as_str()]).inc();
    }

    pub fn partial_frame() {
        WS_PARTIAL_FRAMES_TOTAL.inc();
    }

    pub fn ping_timeout() {
        WS_PING_TIMEOUTS_TOTAL.inc();
    }

    pub fn dropped_frame() {
        WS_DROPPED_FRAMES_TOTAL.inc();
    }

    pub fn polling_active(active: bool) {
        POLLING_ACTIVE.set(i64::from(active));
    }

    pub fn polling_activated() {
        POLLING_ACTIVATIONS_TOTAL.inc();
    }

    /// Set a topic's connector state.
    /// Only the active state is 1, all others are 0.
    pub fn ws_state_set(topic: &Topic, state: ConnectionState) {
        for s in ConnectionState::ALL {
            WS_STATE
                .with_label_values(&[topic.as_str(), s.as_str()])
                .set(i64::from(s == state));
        }
    }
}

/// Default registry in the Prometheus text exposition format.
pub fn gather_text() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

//! Health derivation.
//!
//! The connector only reports its transport belief. Consumers decide whether
//! a `Live` connection is actually fresh using a grace window, and status
//! surfaces render a coarser badge using a longer disconnect threshold.

use crate::types::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Read-only health view of one stream link.
pub trait LinkHealth: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Time since the last inbound frame, `None` if nothing was ever received.
    fn since_last_live(&self) -> Option<Duration>;

    fn is_healthy(&self, grace_window: Duration) -> bool {
        is_healthy(self.state(), self.since_last_live(), grace_window)
    }
}

/// Healthy means `Live` and a message was seen within the grace window.
pub fn is_healthy(
    state: ConnectionState,
    since_last_live: Option<Duration>,
    grace_window: Duration,
) -> bool {
    state == ConnectionState::Live && since_last_live.is_some_and(|since| since <= grace_window)
}

/// Display label: a stale `Live` is reported as `Degraded`.
pub fn label_for(
    state: ConnectionState,
    since_last_live: Option<Duration>,
    grace_window: Duration,
) -> ConnectionState {
    if state == ConnectionState::Live && !is_healthy(state, since_last_live, grace_window) {
        ConnectionState::Degraded
    } else {
        state
    }
}

/// Coarse status for status surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BadgeStatus {
    Healthy {
        #[serde(rename = "bytesPerMin")]
        bytes_per_min: u64,
    },
    /// `for_secs` is `None` when the feed was never live nor disconnected.
    Disconnected {
        #[serde(rename = "forSecs")]
        for_secs: Option<u64>,
    },
}

impl BadgeStatus {
    pub fn derive(
        state: ConnectionState,
        last_live_at: Option<DateTime<Utc>>,
        last_disconnect_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        disconnect_threshold_secs: u64,
        bytes_per_min: u64,
    ) -> Self {
        let secs_since = |t: DateTime<Utc>| (now - t).num_seconds().max(0) as u64;
        let since_live = last_live_at.map(secs_since);
        let since_disconnect = last_disconnect_at.map(secs_since).filter(|s| *s > 0);

        let stale = since_live.map_or(true, |s| s > disconnect_threshold_secs);
        if state != ConnectionState::Live || stale {
            Self::Disconnected {
                for_secs: since_disconnect.or(since_live),
            }
        } else {
            Self::Healthy { bytes_per_min }
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy { .. } => "WS Healthy",
            Self::Disconnected { .. } => "WS Disconnected",
        }
    }
}

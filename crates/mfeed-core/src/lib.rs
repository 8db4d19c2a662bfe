//! Core types for the mfeed realtime market-feed connector.
//!
//! This crate provides the pieces shared by the stream and polling paths:
//! - `ConnectionState`: the connector's belief about stream health
//! - `ClientMessage`, `Subscription`: client-to-server wire messages
//! - `LiveFeedData`: typed view of the market-feed snapshot
//! - `CounterSink`, `RealtimeCounters`: injectable observability counters
//! - Health and badge derivation, endpoint resolution

pub mod counters;
pub mod endpoints;
pub mod error;
pub mod health;
pub mod types;

pub use counters::{CounterSink, CountersSnapshot, RealtimeCounters};
pub use endpoints::{resolve_token, Endpoints};
pub use error::{CoreError, Result};
pub use health::{is_healthy, label_for, BadgeStatus, LinkHealth};
pub use types::{
    ClientMessage, ConnectionState, LatencySummary, LiveFeedData, Opportunity, Subscription,
    Topic, APPROVED_PAIRS, DEFAULT_METRICS,
};

//! Realtime feed connector for mfeed.
//!
//! Maintains a best-effort WebSocket stream for one topic with:
//! - Automatic reconnection with exponential backoff and bounded jitter
//! - Subscription replay after every successful (re)connect
//! - Heartbeat ping with pong deadline (any inbound frame counts as liveness)
//! - Partial-frame buffering with dropped-frame accounting
//! - Channel-based delivery of parsed messages

pub mod backoff;
pub mod connection;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod throughput;

pub use backoff::{BackoffPolicy, MAX_JITTER_MS};
pub use connection::{ConnectorConfig, ConnectorStats, FeedConnector, LinkStatus, PING_TIMEOUT_CLOSE_CODE};
pub use error::{WsError, WsResult};
pub use frame::{FrameAssembler, FrameOutcome};
pub use heartbeat::Heartbeat;
pub use throughput::ThroughputMeter;

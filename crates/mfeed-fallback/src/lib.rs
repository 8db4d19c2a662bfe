//! Polling fallback for mfeed.
//!
//! The stream is best effort. This crate keeps the consumer-facing snapshot
//! fresh regardless:
//! - `SnapshotCache`: last-write-wins merge target for stream and poll data
//! - `HttpSnapshotClient`: HTTP GET of the metrics snapshot
//! - `FallbackController`: starts polling while the stream is unhealthy
//! - `LiveFeed`: one connector plus its fallback for a topic

pub mod cache;
pub mod client;
pub mod controller;
pub mod error;
pub mod feed;

pub use cache::{MergeCounts, MergeSource, SnapshotCache};
pub use client::{BoxFuture, HttpSnapshotClient, SnapshotSource};
pub use controller::{FallbackConfig, FallbackController, FeedNotice};
pub use error::{FallbackError, FallbackResult};
pub use feed::{LiveFeed, LiveFeedConfig};

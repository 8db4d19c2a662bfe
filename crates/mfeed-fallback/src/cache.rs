//! Snapshot cache.
//!
//! Stream messages and poll responses are merged into one JSON object with
//! shallow last-write-wins semantics: top-level keys of the update replace
//! the cached ones, everything else is kept. Every merge stamps
//! `lastUpdated` with the local merge time.

use chrono::{SecondsFormat, Utc};
use mfeed_core::LiveFeedData;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Field stamped on every merge.
pub const LAST_UPDATED_KEY: &str = "lastUpdated";

/// Where a merged update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeSource {
    /// Snapshot fetched before the stream was started.
    Initial,
    Stream,
    Poll,
}

impl MergeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Stream => "stream",
            Self::Poll => "poll",
        }
    }
}

/// Merge count per source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub initial: u64,
    pub stream: u64,
    pub poll: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    data: Map<String, Value>,
    counts: MergeCounts,
}

/// Last-write-wins snapshot shared by the stream and polling paths.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    inner: RwLock<CacheInner>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update into the snapshot.
    ///
    /// Returns `false` (and leaves the snapshot untouched) when the update is
    /// not a JSON object.
    pub fn merge(&self, source: MergeSource, update: &Value) -> bool {
        let Some(fields) = update.as_object() else {
            debug!(source = source.as_str(), "Ignoring non-object snapshot update");
            return false;
        };

        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut inner = self.inner.write();
        for (key, value) in fields {
            inner.data.insert(key.clone(), value.clone());
        }
        inner.data.insert(LAST_UPDATED_KEY.to_string(), Value::String(stamp));

        match source {
            MergeSource::Initial => inner.counts.initial += 1,
            MergeSource::Stream => inner.counts.stream += 1,
            MergeSource::Poll => inner.counts.poll += 1,
        }
        trace!(source = source.as_str(), keys = fields.len(), "Snapshot merged");
        true
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.inner.read().data.clone())
    }

    /// Typed view, `None` while empty or when the payload does not fit.
    pub fn typed(&self) -> Option<LiveFeedData> {
        let snapshot = {
            let inner = self.inner.read();
            if inner.data.is_empty() {
                return None;
            }
            Value::Object(inner.data.clone())
        };
        match serde_json::from_value(snapshot) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!(error = %e, "Snapshot does not match the feed data shape");
                None
            }
        }
    }

    pub fn merge_counts(&self) -> MergeCounts {
        self.inner.read().counts
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }
}

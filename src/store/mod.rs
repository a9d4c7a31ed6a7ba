//! Activity storage: one contract, two backends.
//!
//! [`RingBufferStore`] keeps a bounded FIFO window in memory and forgets
//! everything on restart. [`SqliteStore`] persists to two linked tables and
//! maintains session aggregates on write.

pub mod ring;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Activity, Session, StoreStats, TimeRange};

pub use ring::RingBufferStore;
pub use sqlite::SqliteStore;

/// Storage contract shared by every backend.
///
/// Implementations must be safe to call from many request handlers at once.
pub trait ActivityStore: Send + Sync {
    /// Short backend label for logs and stats.
    fn backend_name(&self) -> &'static str;

    /// Persist an already-stamped activity and return the stored copy.
    fn append(&self, activity: Activity) -> Result<Activity>;

    /// Most-recent-first, at most `limit` records.
    fn query_all(&self, limit: usize) -> Result<Vec<Activity>>;

    /// Chronological activities for one session; unknown ids yield an empty vec.
    fn query_by_session(&self, session_id: &str) -> Result<Vec<Activity>>;

    /// Activities with `timestamp` inside `range`, most-recent-first.
    fn query_by_time_range(&self, range: TimeRange, limit: usize) -> Result<Vec<Activity>>;

    /// Sessions ordered by `last_seen` descending.
    fn sessions(&self, limit: usize) -> Result<Vec<Session>>;

    /// Sessions whose `first_seen` falls inside `range`, by `last_seen` descending.
    fn sessions_by_time_range(&self, range: TimeRange, limit: usize) -> Result<Vec<Session>>;

    fn session(&self, session_id: &str) -> Result<Option<Session>>;

    fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats>;

    /// Drop activities older than `cutoff` and any session left empty.
    ///
    /// Returns the number of activities removed.
    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

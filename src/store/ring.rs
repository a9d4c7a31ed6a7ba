//! Bounded in-memory store with FIFO eviction.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::trace;

use super::ActivityStore;
use crate::error::Result;
use crate::models::{Activity, Session, StoreStats, TimeRange};
use crate::projections::{ActionBreakdown, SessionProjector};

/// Ring buffer of activities in insertion order.
///
/// All mutation goes through one mutex, so eviction and reads never interleave.
/// Session views are recomputed from the buffer on every read.
#[derive(Debug)]
pub struct RingBufferStore {
    capacity: usize,
    buffer: Mutex<VecDeque<Activity>>,
}

impl RingBufferStore {
    /// Create a store holding at most `capacity` activities (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Activity> {
        self.buffer.lock().iter().cloned().collect()
    }
}

impl ActivityStore for RingBufferStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn append(&self, activity: Activity) -> Result<Activity> {
        let mut buffer = self.buffer.lock();
        if buffer.len() == self.capacity {
            if let Some(evicted) = buffer.pop_front() {
                trace!(id = %evicted.id, "evicted oldest activity");
            }
        }
        buffer.push_back(activity.clone());
        Ok(activity)
    }

    fn query_all(&self, limit: usize) -> Result<Vec<Activity>> {
        let buffer = self.buffer.lock();
        Ok(buffer.iter().rev().take(limit).cloned().collect())
    }

    fn query_by_session(&self, session_id: &str) -> Result<Vec<Activity>> {
        let buffer = self.buffer.lock();
        Ok(buffer
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }

    fn query_by_time_range(&self, range: TimeRange, limit: usize) -> Result<Vec<Activity>> {
        let buffer = self.buffer.lock();
        Ok(buffer
            .iter()
            .rev()
            .filter(|a| range.contains(a.timestamp))
            .take(limit)
            .cloned()
            .collect())
    }

    fn sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let mut sessions = SessionProjector::project(&self.snapshot());
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn sessions_by_time_range(&self, range: TimeRange, limit: usize) -> Result<Vec<Session>> {
        Ok(SessionProjector::project(&self.snapshot())
            .into_iter()
            .filter(|s| range.contains(s.first_seen))
            .take(limit)
            .collect())
    }

    fn session(&self, session_id: &str) -> Result<Option<Session>> {
        let activities = self.query_by_session(session_id)?;
        Ok(SessionProjector::project(&activities).into_iter().next())
    }

    fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let activities = self.snapshot();
        let sessions = SessionProjector::project(&activities);
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);

        Ok(StoreStats {
            backend: self.backend_name().to_string(),
            total_sessions: sessions.len() as u64,
            active_last_hour: sessions.iter().filter(|s| s.last_seen >= hour_ago).count() as u64,
            active_last_24h: sessions.iter().filter(|s| s.last_seen >= day_ago).count() as u64,
            total_activities: activities.len() as u64,
            actions: ActionBreakdown::analyze(&activities),
        })
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut buffer = self.buffer.lock();
        let before = buffer.len();
        buffer.retain(|a| a.timestamp >= cutoff);
        Ok(before - buffer.len())
    }
}

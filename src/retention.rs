//! Age-based cleanup, run periodically in the background.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::store::ActivityStore;

/// Prune everything older than `max_age_days` before `now`.
pub fn sweep_once(store: &dyn ActivityStore, max_age_days: u32, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = now - Duration::days(i64::from(max_age_days));
    let removed = store.prune_older_than(cutoff)?;
    if removed > 0 {
        info!(
            backend = store.backend_name(),
            removed,
            cutoff = %cutoff,
            "pruned expired activities"
        );
    }
    Ok(removed)
}

/// Spawn the sweeper task, or `None` when retention is disabled.
pub fn spawn_sweeper(store: Arc<dyn ActivityStore>, config: RetentionConfig) -> Option<JoinHandle<()>> {
    if config.max_age_days == 0 {
        info!("retention disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(config.sweep_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(store.as_ref(), config.max_age_days, Utc::now()) {
                warn!(error = %e, "retention sweep failed");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Activity;
    use crate::store::RingBufferStore;

    fn activity(id: &str, age_days: i64, now: DateTime<Utc>) -> Activity {
        Activity {
            id: id.to_string(),
            session_id: "s1".to_string(),
            timestamp: now - Duration::days(age_days),
            received_at: now,
            action: "page_view".to_string(),
            target: "/".to_string(),
            value: None,
            page: "/".to_string(),
            user_agent: None,
            screen_resolution: None,
            ip_address: "unknown".to_string(),
        }
    }

    #[test]
    fn sweep_removes_only_expired() {
        let now = Utc::now();
        let store = RingBufferStore::new(10);
        store.append(activity("ancient", 45, now)).unwrap();
        store.append(activity("recent", 2, now)).unwrap();

        assert_eq!(sweep_once(&store, 30, now).unwrap(), 1);
        let left: Vec<_> = store.query_all(10).unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(left, vec!["recent"]);
    }

    #[tokio::test]
    async fn disabled_retention_spawns_nothing() {
        let store: Arc<dyn ActivityStore> = Arc::new(RingBufferStore::new(1));
        let config = RetentionConfig {
            max_age_days: 0,
            sweep_interval_secs: 1,
        };
        assert!(spawn_sweeper(store, config).is_none());
    }

    #[tokio::test]
    async fn sweeper_runs_immediately() {
        let now = Utc::now();
        let ring = Arc::new(RingBufferStore::new(10));
        ring.append(activity("ancient", 90, now)).unwrap();
        let store: Arc<dyn ActivityStore> = ring.clone();

        let handle = spawn_sweeper(store, RetentionConfig::default()).unwrap();
        // First interval tick fires at once.
        for _ in 0..50 {
            if ring.is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        handle.abort();

        assert!(ring.is_empty());
    }
}

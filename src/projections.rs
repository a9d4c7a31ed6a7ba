use std::collections::HashMap;

use crate::models::{ActionCount, Activity, Session};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn activity(session: &str, secs: i64, action: &str, page: &str) -> Activity {
        Activity {
            id: format!("activity_{session}_{secs}"),
            session_id: session.to_string(),
            timestamp: at(secs),
            received_at: at(secs),
            action: action.to_string(),
            target: page.to_string(),
            value: None,
            page: page.to_string(),
            user_agent: Some(format!("agent-{session}-{secs}")),
            screen_resolution: Some("1280x720".to_string()),
            ip_address: "10.0.0.7".to_string(),
        }
    }

    #[test]
    fn test_activity_count_matches_input() {
        let activities: Vec<_> = (0..7)
            .map(|i| activity("s1", i, "input_focus", "/a"))
            .collect();

        let sessions = SessionProjector::project(&activities);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].activity_count, 7);
        assert_eq!(sessions[0].first_seen, at(0));
        assert_eq!(sessions[0].last_seen, at(6));
    }

    #[test]
    fn test_first_seen_never_after_last_seen() {
        let activities = vec![
            activity("a", 0, "page_view", "/a"),
            activity("b", 1, "page_view", "/b"),
            activity("a", 5, "button_click", "/a"),
            activity("b", 9, "page_exit", "/b"),
            activity("c", 9, "page_view", "/c"),
        ];

        for session in SessionProjector::project(&activities) {
            assert!(session.first_seen <= session.last_seen, "{session:?}");
        }
    }

    #[test]
    fn test_descriptive_fields_come_from_first_activity() {
        let activities = vec![
            activity("s1", 0, "page_view", "/a"),
            activity("s1", 3, "page_view", "/b"),
        ];

        let sessions = SessionProjector::project(&activities);

        assert_eq!(sessions[0].user_agent.as_deref(), Some("agent-s1-0"));
    }

    #[test]
    fn test_pages_distinct_in_first_seen_order() {
        let activities = vec![
            activity("s1", 0, "page_view", "/checkout/cart"),
            activity("s1", 1, "form_submit", "/checkout/cart"),
            activity("s1", 2, "page_view", "/checkout/payment"),
            activity("s1", 3, "page_exit", "/checkout/cart"),
        ];

        let sessions = SessionProjector::project(&activities);

        assert_eq!(sessions[0].pages, vec!["/checkout/cart", "/checkout/payment"]);
    }

    #[test]
    fn test_last_in_order_wins() {
        // Skewed client clock: last_seen follows input order, not max.
        let activities = vec![
            activity("s1", 10, "page_view", "/a"),
            activity("s1", 4, "page_exit", "/a"),
        ];

        let sessions = SessionProjector::project(&activities);

        assert_eq!(sessions[0].last_seen, at(4));
        assert_eq!(sessions[0].activity_count, 2);
    }

    #[test]
    fn test_sessions_ordered_by_last_seen_desc() {
        let activities = vec![
            activity("early", 0, "page_view", "/a"),
            activity("late", 1, "page_view", "/a"),
            activity("middle", 2, "page_view", "/a"),
            activity("late", 8, "page_exit", "/a"),
        ];

        let sessions = SessionProjector::project(&activities);
        let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();

        assert_eq!(ids, vec!["late", "middle", "early"]);
    }

    #[test]
    fn test_empty_stream_projects_nothing() {
        assert!(SessionProjector::project(&[]).is_empty());
    }

    #[test]
    fn test_action_breakdown() {
        let activities = vec![
            activity("s1", 0, "page_view", "/a"),
            activity("s1", 1, "input_change", "/a"),
            activity("s1", 2, "input_change", "/a"),
            activity("s2", 3, "page_view", "/a"),
            activity("s2", 4, "input_change", "/a"),
        ];

        let breakdown = ActionBreakdown::analyze(&activities);

        assert_eq!(breakdown[0].action, "input_change");
        assert_eq!(breakdown[0].count, 3);
        assert!((breakdown[0].percentage - 60.0).abs() < 1e-9);
        assert_eq!(breakdown[1].action, "page_view");
        assert_eq!(breakdown.len(), 2);
    }
}

/// Projects sessions from an activity stream
///
/// Expects activities in non-decreasing timestamp order; `last_seen` is the
/// timestamp of the last activity seen for a session, not the maximum.
pub struct SessionProjector;

impl SessionProjector {
    pub fn project(activities: &[Activity]) -> Vec<Session> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut sessions: Vec<Session> = Vec::new();

        for activity in activities {
            let slot = *index
                .entry(activity.session_id.as_str())
                .or_insert_with(|| {
                    sessions.push(Session {
                        session_id: activity.session_id.clone(),
                        first_seen: activity.timestamp,
                        last_seen: activity.timestamp,
                        activity_count: 0,
                        user_agent: activity.user_agent.clone(),
                        screen_resolution: activity.screen_resolution.clone(),
                        ip_address: activity.ip_address.clone(),
                        pages: Vec::new(),
                    });
                    sessions.len() - 1
                });

            let session = &mut sessions[slot];
            session.last_seen = activity.timestamp;
            session.activity_count += 1;
            if !session.pages.contains(&activity.page) {
                session.pages.push(activity.page.clone());
            }
        }

        // Stable: ties keep first-appearance order
        sessions.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        sessions
    }
}

/// Tallies activities per action tag
pub struct ActionBreakdown;

impl ActionBreakdown {
    pub fn analyze(activities: &[Activity]) -> Vec<ActionCount> {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for activity in activities {
            *counts.entry(activity.action.as_str()).or_insert(0) += 1;
        }

        Self::from_counts(
            counts
                .into_iter()
                .map(|(action, count)| (action.to_string(), count))
                .collect(),
        )
    }

    /// Build percentages from raw `(action, count)` pairs, most frequent first.
    pub fn from_counts(counts: Vec<(String, u64)>) -> Vec<ActionCount> {
        let total: u64 = counts.iter().map(|(_, count)| count).sum();

        let mut actions: Vec<ActionCount> = counts
            .into_iter()
            .map(|(action, count)| ActionCount {
                action,
                count,
                percentage: if total > 0 {
                    (count as f64 / total as f64) * 100.0
                } else {
                    0.0
                },
            })
            .collect();

        actions.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.action.cmp(&b.action)));
        actions
    }
}

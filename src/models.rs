use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TrailError};

/// Fields every inbound record must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["sessionId", "action", "target", "page"];

/// Validated inbound record, before the server stamps it.
///
/// `action` is an open tag and `value` is opaque: only structure is checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityInput {
    pub session_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub action: String,
    pub target: String,
    pub value: Option<String>,
    pub page: String,
    pub user_agent: Option<String>,
    pub screen_resolution: Option<String>,
}

impl ActivityInput {
    /// Validate an untyped inbound record.
    pub fn from_value(payload: &Value) -> Result<Self> {
        let obj = payload
            .as_object()
            .ok_or_else(|| TrailError::invalid_payload("payload must be a JSON object"))?;

        Ok(Self {
            session_id: required(obj, "sessionId")?,
            timestamp: timestamp(obj)?,
            action: required(obj, "action")?,
            target: required(obj, "target")?,
            value: opaque(obj, "value"),
            page: required(obj, "page")?,
            user_agent: optional_string(obj, "userAgent")?,
            screen_resolution: optional_string(obj, "screenResolution")?,
        })
    }
}

fn required(obj: &Map<String, Value>, key: &str) -> Result<String> {
    match obj.get(key).and_then(Value::as_str) {
        Some(raw) if !raw.trim().is_empty() => Ok(raw.to_string()),
        _ => Err(TrailError::invalid_payload(format!(
            "missing required field: {key}"
        ))),
    }
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw.clone())),
        Some(_) => Err(TrailError::invalid_payload(format!(
            "field {key} must be a string"
        ))),
    }
}

// Producers sometimes send structured values; keep their JSON text.
fn opaque(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(raw.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn timestamp(obj: &Map<String, Value>) -> Result<Option<DateTime<Utc>>> {
    match obj.get("timestamp") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| TrailError::invalid_payload(format!("invalid timestamp {raw:?}: {e}"))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| TrailError::invalid_payload(format!("invalid timestamp {n}"))),
        Some(_) => Err(TrailError::invalid_payload(
            "timestamp must be an RFC 3339 string or epoch milliseconds",
        )),
    }
}

/// One stored interaction event. Immutable once appended.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub action: String,
    pub target: String,
    pub value: Option<String>,
    pub page: String,
    pub user_agent: Option<String>,
    pub screen_resolution: Option<String>,
    pub ip_address: String,
}

impl Activity {
    /// Stamp a validated input with server-side fields.
    ///
    /// A missing client timestamp falls back to `received_at`.
    pub fn stamp(
        input: ActivityInput,
        id: String,
        received_at: DateTime<Utc>,
        ip_address: String,
    ) -> Self {
        Self {
            id,
            session_id: input.session_id,
            timestamp: input.timestamp.unwrap_or(received_at),
            received_at,
            action: input.action,
            target: input.target,
            value: input.value,
            page: input.page,
            user_agent: input.user_agent,
            screen_resolution: input.screen_resolution,
            ip_address,
        }
    }
}

/// Session projection (derived from activities)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub activity_count: u64,
    pub user_agent: Option<String>,
    pub screen_resolution: Option<String>,
    pub ip_address: String,
    pub pages: Vec<String>,
}

/// Inclusive `[start, end]` window over activity timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(TrailError::invalid_payload(format!(
                "startDate {start} is after endDate {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Missing bounds open up to the epoch and the end of year 9999.
    pub fn from_bounds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        Self::new(
            start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            end.unwrap_or_else(far_future),
        )
    }

    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::UNIX_EPOCH,
            end: far_future(),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Per-action tally
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionCount {
    pub action: String,
    pub count: u64,
    pub percentage: f64,
}

/// Store-wide counters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub backend: String,
    pub total_sessions: u64,
    pub active_last_hour: u64,
    pub active_last_24h: u64,
    pub total_activities: u64,
    pub actions: Vec<ActionCount>,
}

/// Ingest response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ActivitiesResponse {
    pub success: bool,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub success: bool,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    pub success: bool,
    pub session: Option<Session>,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: StoreStats,
}

/// Structured failure body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "sessionId": "s1",
            "timestamp": "2024-05-01T10:00:00.250Z",
            "action": "page_view",
            "target": "/welcome",
            "page": "/welcome",
            "userAgent": "Mozilla/5.0",
            "screenResolution": "1920x1080"
        })
    }

    #[test]
    fn test_valid_payload_accepted() {
        let input = ActivityInput::from_value(&valid()).unwrap();
        assert_eq!(input.session_id, "s1");
        assert_eq!(input.action, "page_view");
        assert_eq!(input.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(
            input.timestamp.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00.250+00:00"
        );
        assert_eq!(input.value, None);
    }

    #[test]
    fn test_each_required_field_enforced() {
        for field in REQUIRED_FIELDS {
            let mut payload = valid();
            payload.as_object_mut().unwrap().remove(field);
            let err = ActivityInput::from_value(&payload).unwrap_err();
            assert!(matches!(err, TrailError::InvalidPayload { .. }));
            assert!(err.to_string().contains(field));
        }
    }

    #[test]
    fn test_blank_or_non_string_required_field_is_missing() {
        let mut payload = valid();
        payload["target"] = json!("   ");
        assert!(ActivityInput::from_value(&payload).is_err());

        let mut payload = valid();
        payload["sessionId"] = json!(42);
        assert!(ActivityInput::from_value(&payload).is_err());

        let mut payload = valid();
        payload["page"] = Value::Null;
        assert!(ActivityInput::from_value(&payload).is_err());
    }

    #[test]
    fn test_unknown_action_stored_verbatim() {
        let mut payload = valid();
        payload["action"] = json!("scroll_depth_75");
        let input = ActivityInput::from_value(&payload).unwrap();
        assert_eq!(input.action, "scroll_depth_75");
    }

    #[test]
    fn test_structured_value_kept_as_json_text() {
        let mut payload = valid();
        payload["value"] = json!({"step": 2});
        let input = ActivityInput::from_value(&payload).unwrap();
        assert_eq!(input.value.as_deref(), Some(r#"{"step":2}"#));

        payload["value"] = json!("{not json at all");
        let input = ActivityInput::from_value(&payload).unwrap();
        assert_eq!(input.value.as_deref(), Some("{not json at all"));
    }

    #[test]
    fn test_timestamp_forms() {
        let mut payload = valid();
        payload["timestamp"] = json!(1_714_557_600_000_i64);
        let input = ActivityInput::from_value(&payload).unwrap();
        assert_eq!(input.timestamp.unwrap().timestamp_millis(), 1_714_557_600_000);

        payload["timestamp"] = json!("yesterday");
        assert!(ActivityInput::from_value(&payload).is_err());

        payload.as_object_mut().unwrap().remove("timestamp");
        assert_eq!(ActivityInput::from_value(&payload).unwrap().timestamp, None);
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let err = ActivityInput::from_value(&json!(["s1"])).unwrap_err();
        assert!(matches!(err, TrailError::InvalidPayload { .. }));
    }

    #[test]
    fn test_stamp_defaults_timestamp_to_received_at() {
        let mut payload = valid();
        payload.as_object_mut().unwrap().remove("timestamp");
        let input = ActivityInput::from_value(&payload).unwrap();
        let now = Utc::now();
        let activity = Activity::stamp(input, "activity_1".into(), now, "10.0.0.1".into());
        assert_eq!(activity.timestamp, now);
        assert_eq!(activity.received_at, now);
        assert_eq!(activity.ip_address, "10.0.0.1");
    }

    #[test]
    fn test_time_range_bounds() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(TimeRange::new(late, early).is_err());

        let range = TimeRange::new(early, late).unwrap();
        assert!(range.contains(early));
        assert!(range.contains(late));

        let open = TimeRange::from_bounds(Some(early), None).unwrap();
        assert!(open.contains(Utc::now()));
        assert!(!open.contains(DateTime::<Utc>::UNIX_EPOCH));
    }

    #[test]
    fn test_activity_serializes_camel_case() {
        let input = ActivityInput::from_value(&valid()).unwrap();
        let activity = Activity::stamp(input, "activity_1".into(), Utc::now(), "unknown".into());
        let json = serde_json::to_value(&activity).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["screenResolution"], "1920x1080");
        assert_eq!(json["ipAddress"], "unknown");
        assert!(json.get("receivedAt").is_some());
    }
}

//! Write path: validate, stamp, append.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Activity, ActivityInput};
use crate::store::ActivityStore;

/// Proxy headers consulted for the client address, in priority order.
pub const FORWARDED_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
    "true-client-ip",
];

/// Sentinel when no address can be resolved.
pub const UNKNOWN_IP: &str = "unknown";

/// Fresh server-side activity id.
///
/// UUID v7 carries a millisecond timestamp plus 74 random bits, so ids minted
/// in the same instant still differ.
pub fn new_activity_id() -> String {
    format!("activity_{}", Uuid::now_v7().simple())
}

/// First present forwarded header, then the socket peer, then `"unknown"`.
pub fn resolve_client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    for name in FORWARDED_HEADERS {
        let candidate = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = candidate {
            return ip.to_string();
        }
    }

    remote.map_or_else(|| UNKNOWN_IP.to_string(), |addr| addr.ip().to_string())
}

/// Turn one inbound record into a stored activity.
pub fn ingest(
    store: &dyn ActivityStore,
    payload: &Value,
    ip_address: String,
    received_at: DateTime<Utc>,
) -> Result<Activity> {
    let input = ActivityInput::from_value(payload)?;
    let activity = Activity::stamp(input, new_activity_id(), received_at, ip_address);
    let stored = store.append(activity)?;
    debug!(
        id = %stored.id,
        session = %stored.session_id,
        action = %stored.action,
        "activity tracked"
    );
    Ok(stored)
}

use crate::geo::{FixOutcome, GeoFix, Movement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ========================
// API Request and Response Models
// ========================

/// Request body for the /api/login endpoint.
#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response body for the /api/login endpoint.
#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
}

/// Request body for the /api/start endpoint. The title and author usually
/// come from whatever identified the book (a cover photo, manual entry); the
/// server treats them as opaque best-effort strings.
#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StartRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// May be omitted; a previously registered book fills it in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    pub start_page: u32,
}

/// Response body for the /api/start endpoint.
#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StartResponse {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    /// Page count actually in effect, after the book registry lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
}

/// Request body for the /api/fix endpoint. `time` is seconds since the Unix
/// epoch as reported by the browser's geolocation callback.
#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FixRequest {
    pub session_id: String,
    pub lat: f64,
    pub lon: f64,
    pub time: f64,
}

/// Response body for the /api/fix endpoint. Distances are kilometers.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct FixResponse {
    pub outcome: FixOutcome,
    pub distance_km: f64,
    pub fix_count: u32,
    pub movement: Movement,
}

/// Request body for the /api/finish endpoint.
#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FinishRequest {
    pub session_id: String,
    pub end_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
}

/// Response body for the /api/finish endpoint, also pushed to dashboard
/// streams when a session ends. `pages_read` is exclusive of the start page;
/// `distance_km` is kilometers.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct FinishResponse {
    pub session_id: String,
    pub title: String,
    pub end_page: u32,
    pub pages_read: u32,
    pub duration_seconds: i64,
    pub pace_pages_per_minute: f64,
    pub distance_km: f64,
    pub movement: Movement,
    /// Linear extrapolation from this session's pace alone; absent when the
    /// pace is 0 or the page count is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Query parameters for the /api/stream endpoint. EventSource cannot send
/// headers, so the token travels as a query parameter.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamRequest {
    pub token: String,
}

// ========================
// Dashboard stream models
// ========================

/// One running session as shown on the dashboard.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct RunningView {
    pub session_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    pub start_page: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: i64,
    pub distance_km: f64,
    pub movement: Movement,
    pub fix_count: u32,
}

/// A server-sent update. An empty `changes` list is a heartbeat; dashboards
/// use it to refresh the stopwatch display.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct Update {
    pub server_time: DateTime<Utc>,
    pub changes: Vec<UpdateChange>,
}

impl Update {
    pub fn heartbeat() -> Self {
        Update {
            server_time: Utc::now(),
            changes: Vec::new(),
        }
    }

    pub fn single(change: UpdateChange) -> Self {
        Update {
            server_time: Utc::now(),
            changes: vec![change],
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum UpdateChange {
    /// Full state of the subscriber's running sessions; always the first
    /// message of a stream.
    Snapshot { sessions: Vec<RunningView> },
    Started { session: RunningView },
    Fix {
        session_id: String,
        fix: GeoFix,
        distance_km: f64,
        movement: Movement,
    },
    Finished { summary: FinishResponse },
}

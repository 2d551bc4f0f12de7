use crate::geo::{GeoFix, GeoTrack, Movement};
use crate::session::{FinishSummary, ReadingSession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A finished session as persisted in the `sessions` table.
///
/// Stored as one JSON document per row (the key and sort fields are real
/// columns); fields are additive, so old rows keep deserializing as the
/// record grows. `pages_read` excludes the start page and `distance_km` is
/// kilometers, matching the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub subject: String,
    pub title: String,
    pub author: Option<String>,
    pub total_pages: Option<u32>,
    pub start_page: u32,
    pub end_page: u32,
    pub pages_read: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub pace_pages_per_minute: f64,
    pub reflection: Option<String>,
    /// Recorded fixes still buffered at finish time, oldest first.
    pub track: Vec<GeoFix>,
    pub distance_km: f64,
    pub movement: Movement,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Flattens a finished session and its track into the persisted form.
    pub fn from_finished(
        session_id: &str,
        subject: &str,
        session: &ReadingSession,
        summary: &FinishSummary,
        track: &GeoTrack,
        movement: Movement,
        estimated_completion: Option<DateTime<Utc>>,
    ) -> Self {
        SessionRecord {
            session_id: session_id.to_string(),
            subject: subject.to_string(),
            title: session.title().to_string(),
            author: session.author().map(str::to_string),
            total_pages: session.total_pages(),
            start_page: session.start_page(),
            end_page: summary.end_page,
            pages_read: summary.pages_read,
            started_at: session.started_at(),
            finished_at: summary.finished_at,
            duration_seconds: summary.duration_seconds,
            pace_pages_per_minute: summary.pace_pages_per_minute,
            reflection: session.reflection().map(str::to_string),
            track: track.points(),
            distance_km: track.total_distance_km(),
            movement,
            estimated_completion,
        }
    }
}

/// A running session as persisted in the `running_sessions` table, so a
/// restart does not orphan the at-most-one-per-subject invariant. The track
/// is volatile and not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningRecord {
    pub subject: String,
    pub session_id: String,
    pub session: ReadingSession,
}

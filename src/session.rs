use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Start page of 0, or beyond the book's known page count.
    InvalidStartPage { start_page: u32 },
    /// End page below the start page.
    InvalidPageRange { start_page: u32, end_page: u32 },
    /// The session was already finished; finishing is one-way and happens once.
    AlreadyFinished,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidStartPage { start_page } => {
                write!(f, "Start page {start_page} is outside the book")
            }
            SessionError::InvalidPageRange {
                start_page,
                end_page,
            } => write!(
                f,
                "End page {end_page} is below the start page {start_page}"
            ),
            SessionError::AlreadyFinished => write!(f, "Session is already finished"),
        }
    }
}

impl std::error::Error for SessionError {}

/// The derived figures of a finished session.
///
/// `pages_read` is exclusive of the start page (`end_page - start_page`), and
/// pace is pages per minute, 0 when the duration is 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishSummary {
    pub end_page: u32,
    pub finished_at: DateTime<Utc>,
    pub pages_read: u32,
    pub duration_seconds: i64,
    pub pace_pages_per_minute: f64,
}

/// Completion estimate derived from a finished session's pace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub eta: DateTime<Utc>,
    pub pace_pages_per_minute: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Outcome {
    end_page: u32,
    finished_at: DateTime<Utc>,
    reflection: Option<String>,
}

/// One sitting of reading: created running, finished exactly once.
///
/// The struct owns the full session state; callers hold it by value or behind
/// their own handle rather than spreading fields over a shared map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingSession {
    title: String,
    author: Option<String>,
    total_pages: Option<u32>,
    start_page: u32,
    started_at: DateTime<Utc>,
    outcome: Option<Outcome>,
}

impl ReadingSession {
    /// Begins a session in the running state.
    pub fn start(
        title: String,
        author: Option<String>,
        total_pages: Option<u32>,
        start_page: u32,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if start_page < 1 || total_pages.is_some_and(|total| start_page > total) {
            return Err(SessionError::InvalidStartPage { start_page });
        }
        Ok(ReadingSession {
            title,
            author,
            total_pages,
            start_page,
            started_at,
            outcome: None,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages
    }

    pub fn start_page(&self) -> u32 {
        self.start_page
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn reflection(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.reflection.as_deref())
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Seconds since the session started, saturated at 0 under clock skew.
    /// Once finished, returns the frozen final duration instead.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        let until = match &self.outcome {
            Some(outcome) => outcome.finished_at,
            None => now,
        };
        (until - self.started_at).num_seconds().max(0)
    }

    /// Transitions the session to finished and returns the derived figures.
    ///
    /// Rejects an end page below the start page and a second finish; the
    /// session is left running when validation fails, so the caller can
    /// re-prompt and try again.
    pub fn finish(
        &mut self,
        end_page: u32,
        finished_at: DateTime<Utc>,
        reflection: Option<String>,
    ) -> Result<FinishSummary, SessionError> {
        if self.outcome.is_some() {
            return Err(SessionError::AlreadyFinished);
        }
        if end_page < self.start_page {
            return Err(SessionError::InvalidPageRange {
                start_page: self.start_page,
                end_page,
            });
        }

        self.outcome = Some(Outcome {
            end_page,
            finished_at,
            reflection,
        });

        let duration_seconds = self.elapsed_seconds(finished_at);
        let pages_read = end_page - self.start_page;
        Ok(FinishSummary {
            end_page,
            finished_at,
            pages_read,
            duration_seconds,
            pace_pages_per_minute: pace(pages_read, duration_seconds),
        })
    }

    pub fn summary(&self) -> Option<FinishSummary> {
        let outcome = self.outcome.as_ref()?;
        let duration_seconds = self.elapsed_seconds(outcome.finished_at);
        let pages_read = outcome.end_page - self.start_page;
        Some(FinishSummary {
            end_page: outcome.end_page,
            finished_at: outcome.finished_at,
            pages_read,
            duration_seconds,
            pace_pages_per_minute: pace(pages_read, duration_seconds),
        })
    }

    /// Extrapolates when the rest of the book would be done at this session's
    /// pace. Only meaningful once finished; `None` when the pace is 0 or no
    /// pages remain.
    ///
    /// This is a linear projection from a single session, with no smoothing
    /// across sessions and no confidence interval; display it as a rough
    /// estimate, not a promise.
    pub fn project_completion(&self, now: DateTime<Utc>, total_pages: u32) -> Option<Projection> {
        let summary = self.summary()?;
        if summary.pace_pages_per_minute <= 0.0 || summary.end_page >= total_pages {
            return None;
        }
        let remaining_pages = total_pages - summary.end_page;
        let minutes = f64::from(remaining_pages) / summary.pace_pages_per_minute;
        let eta = now + Duration::milliseconds((minutes * 60_000.0).round() as i64);
        Some(Projection {
            eta,
            pace_pages_per_minute: summary.pace_pages_per_minute,
        })
    }
}

fn pace(pages_read: u32, duration_seconds: i64) -> f64 {
    if duration_seconds <= 0 {
        return 0.0;
    }
    f64::from(pages_read) / (duration_seconds as f64 / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn session(total_pages: Option<u32>, start_page: u32) -> ReadingSession {
        ReadingSession::start(
            "La vorágine".to_string(),
            Some("José Eustasio Rivera".to_string()),
            total_pages,
            start_page,
            at(0),
        )
        .unwrap()
    }

    #[test]
    fn start_rejects_page_zero_and_pages_beyond_the_book() {
        let err = ReadingSession::start("x".into(), None, None, 0, at(0)).unwrap_err();
        assert_eq!(err, SessionError::InvalidStartPage { start_page: 0 });

        let err = ReadingSession::start("x".into(), None, Some(100), 101, at(0)).unwrap_err();
        assert_eq!(err, SessionError::InvalidStartPage { start_page: 101 });
    }

    #[test]
    fn elapsed_runs_then_freezes_at_finish() {
        let mut s = session(Some(210), 10);
        assert_eq!(s.elapsed_seconds(at(90)), 90);

        s.finish(12, at(120), None).unwrap();
        assert!(s.is_finished());
        assert_eq!(s.elapsed_seconds(at(10_000)), 120);
    }

    #[test]
    fn finish_rejects_end_page_below_start_page() {
        let mut s = session(Some(210), 10);
        let err = s.finish(9, at(60), None).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidPageRange {
                start_page: 10,
                end_page: 9
            }
        );
        // Still running; a corrected end page goes through.
        assert!(!s.is_finished());
        assert!(s.finish(10, at(60), None).is_ok());
    }

    #[test]
    fn finishing_twice_fails() {
        let mut s = session(Some(210), 10);
        s.finish(40, at(60), None).unwrap();
        assert_eq!(s.finish(41, at(90), None), Err(SessionError::AlreadyFinished));
    }

    #[test]
    fn zero_duration_yields_zero_pace_not_nan() {
        let mut s = session(Some(210), 10);
        let summary = s.finish(40, at(0), None).unwrap();
        assert_eq!(summary.duration_seconds, 0);
        assert_eq!(summary.pace_pages_per_minute, 0.0);
    }

    #[test]
    fn skewed_clock_saturates_duration_at_zero() {
        let mut s = session(Some(210), 10);
        let summary = s.finish(40, at(-30), None).unwrap();
        assert_eq!(summary.duration_seconds, 0);
        assert_eq!(summary.pace_pages_per_minute, 0.0);
    }

    #[test]
    fn thirty_pages_in_twenty_minutes() {
        let mut s = session(Some(210), 10);
        let summary = s
            .finish(40, at(20 * 60), Some("se puso bueno".to_string()))
            .unwrap();

        assert_eq!(summary.pages_read, 30);
        assert_eq!(summary.duration_seconds, 1200);
        assert!((summary.pace_pages_per_minute - 1.5).abs() < 1e-9);

        // 170 pages left at 1.5 pages/min is about 113.3 minutes.
        let now = at(20 * 60);
        let projection = s.project_completion(now, 210).unwrap();
        let eta_seconds = (projection.eta - now).num_seconds();
        assert!((eta_seconds - 6800).abs() <= 1, "got {eta_seconds}");
        assert!(projection.eta > now);
    }

    #[test]
    fn projection_needs_a_finished_session_with_progress() {
        let s = session(Some(210), 10);
        assert!(s.project_completion(at(60), 210).is_none());

        // No pages read: pace 0, nothing to extrapolate.
        let mut s = session(Some(210), 10);
        s.finish(10, at(1200), None).unwrap();
        assert!(s.project_completion(at(1200), 210).is_none());

        // Book already done: nothing remains.
        let mut s = session(Some(210), 10);
        s.finish(210, at(1200), None).unwrap();
        assert!(s.project_completion(at(1200), 210).is_none());
    }

    #[test]
    fn reflection_is_kept_verbatim() {
        let mut s = session(None, 1);
        s.finish(5, at(600), Some("  notas con espacios  ".to_string()))
            .unwrap();
        assert_eq!(s.reflection(), Some("  notas con espacios  "));
    }
}

use crate::session::FinishSummary;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Per-book aggregate over all finished sessions: cumulative pages read and
/// how many times the book was read cover to cover.
///
/// `apply` is a pure fold step, so the aggregate can always be rebuilt by
/// replaying the persisted session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BookProgress {
    pub title: String,
    pub author: Option<String>,
    pub total_pages: Option<u32>,
    pub pages_read_total: u64,
    pub completed_count: u64,
}

impl BookProgress {
    pub fn new(title: String, author: Option<String>, total_pages: Option<u32>) -> Self {
        BookProgress {
            title,
            author,
            total_pages,
            pages_read_total: 0,
            completed_count: 0,
        }
    }

    /// Folds one finished session into the aggregate. `is_full_completion` is
    /// decided by the caller, typically `end_page == total_pages`.
    pub fn apply(&self, summary: &FinishSummary, is_full_completion: bool) -> Self {
        BookProgress {
            title: self.title.clone(),
            author: self.author.clone(),
            total_pages: self.total_pages,
            pages_read_total: self.pages_read_total + u64::from(summary.pages_read),
            completed_count: self.completed_count + u64::from(is_full_completion),
        }
    }

    /// Rebuilds the aggregate from a session history, oldest first.
    pub fn replay<'a, I>(self, sessions: I) -> Self
    where
        I: IntoIterator<Item = (&'a FinishSummary, bool)>,
    {
        sessions
            .into_iter()
            .fold(self, |acc, (summary, full)| acc.apply(summary, full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn summary(pages_read: u32) -> FinishSummary {
        FinishSummary {
            end_page: pages_read + 1,
            finished_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            pages_read,
            duration_seconds: 600,
            pace_pages_per_minute: f64::from(pages_read) / 10.0,
        }
    }

    #[test]
    fn apply_accumulates_pages_and_completions() {
        let progress = BookProgress::new("Pedro Páramo".into(), None, Some(124));
        let progress = progress.apply(&summary(30), false);
        let progress = progress.apply(&summary(94), true);

        assert_eq!(progress.pages_read_total, 124);
        assert_eq!(progress.completed_count, 1);
        assert_eq!(progress.total_pages, Some(124));
    }

    #[test]
    fn replay_in_one_pass_matches_incremental_folds() {
        let a = summary(12);
        let b = summary(20);
        let c = summary(8);

        let start = BookProgress::new("El coronel".into(), None, Some(40));
        let incremental = start
            .clone()
            .replay([(&a, false), (&b, true)])
            .replay([(&c, false)]);
        let one_pass = start.replay([(&a, false), (&b, true), (&c, false)]);

        assert_eq!(incremental, one_pass);
        assert_eq!(one_pass.pages_read_total, 40);
        assert_eq!(one_pass.completed_count, 1);
    }

    #[test]
    fn zero_page_session_changes_nothing_but_can_complete() {
        let progress = BookProgress::new("Relato".into(), None, Some(10));
        let after = progress.apply(&summary(0), true);
        assert_eq!(after.pages_read_total, 0);
        assert_eq!(after.completed_count, 1);
    }
}

//! Crawl session state and run lifecycle
//!
//! A session is one run of the pagination controller: cursor position, the
//! accumulated record set in discovery order, and batch counters. The full
//! session is checkpointed at every pause point so a run can resume across
//! process boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::listing::ListingRecord;

/// Current status of a crawl session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Caller-supplied parameters for one crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlParams {
    /// Records requested per source page
    pub page_size: u32,
    /// Accumulated-record count that triggers a batch pause
    pub batch_size: u32,
    /// Hard cap on fetch iterations for one session
    pub max_iterations: u32,
    /// Fixed inter-request delay between fetch cycles
    pub request_delay_ms: u64,
    /// Lower bound of the plausible-price filter window
    pub min_price: u64,
    /// Upper bound of the plausible-price filter window
    pub max_price: u64,
}

impl Default for CrawlParams {
    fn default() -> Self {
        Self {
            page_size: 20,
            batch_size: 100,
            max_iterations: 500,
            request_delay_ms: 1_500,
            min_price: 1_000,
            max_price: 100_000_000,
        }
    }
}

/// One run of the pagination controller.
///
/// `accumulated` keeps strict discovery order; the dedup set used by the
/// extractor is rebuilt from it on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSession {
    pub session_id: String,
    pub status: SessionStatus,
    pub params: CrawlParams,
    /// Numeric offset of the next fetch (`iteration * page_size`)
    pub cursor: u32,
    pub batch_ordinal: u32,
    pub accumulated: Vec<ListingRecord>,
    pub consecutive_empty_responses: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl CrawlSession {
    pub fn new(session_id: String, params: CrawlParams) -> Self {
        Self {
            session_id,
            status: SessionStatus::Running,
            params,
            cursor: 0,
            batch_ordinal: 0,
            accumulated: Vec::new(),
            consecutive_empty_responses: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Fetch iteration the session will execute next
    pub fn iteration(&self) -> u32 {
        if self.params.page_size == 0 {
            0
        } else {
            self.cursor / self.params.page_size
        }
    }

    /// Accumulated count that triggers the next batch pause
    pub fn next_pause_threshold(&self) -> usize {
        (self.batch_ordinal as usize + 1) * self.params.batch_size as usize
    }

    /// Rebuild the dedup set from every id already accumulated
    pub fn seen_ids(&self) -> HashSet<String> {
        self.accumulated
            .iter()
            .map(|r| r.business_id.clone())
            .collect()
    }

    pub fn mark_paused(&mut self) {
        self.status = SessionStatus::Paused;
    }

    pub fn mark_completed(&mut self) {
        self.status = SessionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = SessionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// Outcome of one controller entry (start or resume).
///
/// A paused result is not an error; it invites another `resume_run` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub session_id: String,
    pub paused: bool,
    pub completed: bool,
    pub batch_ordinal: u32,
    /// Total records accumulated so far for the session
    pub count: usize,
    pub error: Option<String>,
}

impl RunResult {
    pub fn batch_paused(session: &CrawlSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            paused: true,
            completed: false,
            batch_ordinal: session.batch_ordinal,
            count: session.accumulated.len(),
            error: None,
        }
    }

    pub fn completed(session: &CrawlSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            paused: false,
            completed: true,
            batch_ordinal: session.batch_ordinal,
            count: session.accumulated.len(),
            error: None,
        }
    }

    pub fn failed(session: &CrawlSession, error: String) -> Self {
        Self {
            session_id: session.session_id.clone(),
            paused: false,
            completed: false,
            batch_ordinal: session.batch_ordinal,
            count: session.accumulated.len(),
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut session = CrawlSession::new("s1".to_string(), CrawlParams::default());
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.iteration(), 0);

        session.cursor = 40;
        assert_eq!(session.iteration(), 2);

        session.mark_paused();
        assert!(!session.status.is_terminal());

        session.mark_completed();
        assert!(session.status.is_terminal());
        assert!(session.completed_at.is_some());
    }

    #[test]
    fn test_pause_threshold_advances_with_ordinal() {
        let mut session = CrawlSession::new(
            "s1".to_string(),
            CrawlParams {
                batch_size: 2,
                ..Default::default()
            },
        );
        assert_eq!(session.next_pause_threshold(), 2);
        session.batch_ordinal = 1;
        assert_eq!(session.next_pause_threshold(), 4);
    }
}

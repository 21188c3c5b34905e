//! Error taxonomy for the crawl and sync engines
//!
//! Faults are scoped: per-candidate extraction faults never abort a batch,
//! per-batch transport faults abort only the current run, and snapshot-read
//! faults degrade reconciliation to fail-closed instead of aborting it.

use thiserror::Error;

/// Fault raised by the source gateway while fetching one page
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Transient: counts toward the consecutive-empty exhaustion counter
    #[error("fetch timed out after {timeout_ms}ms at cursor {cursor}")]
    Timeout { cursor: u32, timeout_ms: u64 },

    /// Fatal to the run: the session is marked failed, accumulated data kept
    #[error("transport error at cursor {cursor}: {message}")]
    Transport { cursor: u32, message: String },

    /// Stop was requested while a fetch was pending
    #[error("fetch cancelled at cursor {cursor}")]
    Cancelled { cursor: u32 },
}

impl FetchError {
    /// Transient faults are absorbed by the controller's empty-response
    /// accounting instead of failing the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Fault extracting one candidate record; the candidate is skipped and the
/// fault is aggregated into the extraction outcome.
#[derive(Error, Debug, Clone)]
pub enum ExtractionError {
    #[error("candidate '{candidate}' rejected: {reason}")]
    InvalidCandidate { candidate: String, reason: String },

    #[error("date token '{token}' in candidate '{candidate}' failed to parse")]
    BadDateToken { candidate: String, token: String },
}

/// Session bookkeeping faults
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("session {session_id} is already running")]
    AlreadyRunning { session_id: String },

    #[error("session {session_id} state is corrupted: {reason}")]
    Corrupted { session_id: String, reason: String },

    #[error("session {session_id} is terminal ({status}) and cannot resume")]
    NotResumable { session_id: String, status: String },
}

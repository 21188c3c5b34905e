//! Pagination controller - the fetch/extract/terminate state machine
//!
//! Drives the source gateway through `Idle -> Fetching -> Extracting ->
//! {Continue | BatchPause | Exhausted | Fatal}`. The loop is a sequential
//! await-loop: no fetch fan-out is performed against the source, and the
//! fixed inter-request delay is the only scheduled suspension point. Stop
//! requests are honored at iteration boundaries, never mid-fetch.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::gateways::{SessionStore, SourceGateway};
use crate::domain::session::{CrawlSession, RunResult, SessionStatus};
use crate::infrastructure::extractor::ListingExtractor;

/// Cycles that yield no new records before the run is considered exhausted
const MAX_CONSECUTIVE_EMPTY: u32 = 3;

/// Drives fetch/extract cycles for one session at a time.
///
/// The controller owns the session exclusively while `run` executes; every
/// pause point checkpoints the full resumable state (cursor, accumulated,
/// batch ordinal, empty-response counter) through the session store.
pub struct PaginationController {
    source: Arc<dyn SourceGateway>,
    store: Arc<dyn SessionStore>,
    extractor: ListingExtractor,
}

impl PaginationController {
    pub fn new(
        source: Arc<dyn SourceGateway>,
        store: Arc<dyn SessionStore>,
        extractor: ListingExtractor,
    ) -> Self {
        Self {
            source,
            store,
            extractor,
        }
    }

    /// Advance the session until the next batch pause, exhaustion, or fault.
    ///
    /// Re-entering with a restored session resumes at `Fetching` from the
    /// persisted cursor; the dedup set is rebuilt from `accumulated`.
    pub async fn run(
        &self,
        session: &mut CrawlSession,
        stop: &CancellationToken,
    ) -> anyhow::Result<RunResult> {
        session.status = SessionStatus::Running;
        let mut seen: HashSet<String> = session.seen_ids();
        let mut previous_body: Option<String> = None;
        let delay = Duration::from_millis(session.params.request_delay_ms);
        let extractor = self
            .extractor
            .with_price_window(session.params.min_price, session.params.max_price);

        info!(
            session_id = %session.session_id,
            cursor = session.cursor,
            batch_ordinal = session.batch_ordinal,
            accumulated = session.accumulated.len(),
            "entering fetch loop"
        );

        loop {
            // Iteration boundary: the only place a stop request is honored.
            // A stop checkpoints exactly like a batch pause and stays
            // resumable.
            if stop.is_cancelled() {
                info!(session_id = %session.session_id, "stop requested, pausing");
                session.mark_paused();
                self.store.checkpoint(session).await?;
                return Ok(RunResult::batch_paused(session));
            }

            if session.iteration() >= session.params.max_iterations {
                info!(
                    session_id = %session.session_id,
                    iterations = session.iteration(),
                    "iteration cap reached, run exhausted"
                );
                return self.finish_exhausted(session).await;
            }
            if session.consecutive_empty_responses >= MAX_CONSECUTIVE_EMPTY {
                return self.finish_exhausted(session).await;
            }

            // Fetching
            let cursor = session.cursor;
            let body = match self.source.fetch(cursor).await {
                Ok(Some(body)) => {
                    // A byte-identical repeat of the previous page is the
                    // same exhaustion signal as an empty response.
                    if previous_body.as_deref() == Some(body.as_str()) {
                        debug!(cursor, "response identical to previous page");
                        None
                    } else {
                        previous_body = Some(body.clone());
                        Some(body)
                    }
                }
                Ok(None) => None,
                Err(err) if err.is_transient() => {
                    warn!(cursor, error = %err, "transient fetch fault, counted as empty");
                    None
                }
                Err(err) => {
                    warn!(cursor, error = %err, "fatal fetch fault, aborting run");
                    session.mark_failed(err.to_string());
                    self.store.checkpoint(session).await?;
                    return Ok(RunResult::failed(session, err.to_string()));
                }
            };

            // Extracting
            let appended = match body {
                Some(body) => {
                    let outcome = extractor.extract(&body, &seen);
                    for err in &outcome.errors {
                        warn!(session_id = %session.session_id, error = %err, "candidate skipped");
                    }
                    self.append_records(session, &mut seen, outcome.records);
                    outcome.new_count
                }
                None => 0,
            };

            if appended == 0 {
                session.consecutive_empty_responses += 1;
            } else {
                session.consecutive_empty_responses = 0;
            }
            session.cursor = cursor + session.params.page_size;

            debug!(
                session_id = %session.session_id,
                cursor = session.cursor,
                appended,
                total = session.accumulated.len(),
                empty_streak = session.consecutive_empty_responses,
                "fetch cycle finished"
            );

            if session.consecutive_empty_responses >= MAX_CONSECUTIVE_EMPTY {
                return self.finish_exhausted(session).await;
            }

            // BatchPause
            if session.accumulated.len() >= session.next_pause_threshold() {
                session.batch_ordinal += 1;
                session.mark_paused();
                self.store.checkpoint(session).await?;
                info!(
                    session_id = %session.session_id,
                    batch_ordinal = session.batch_ordinal,
                    count = session.accumulated.len(),
                    "batch threshold reached, pausing"
                );
                return Ok(RunResult::batch_paused(session));
            }

            // Continue: fixed pacing delay, interruptible by a stop request
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.cancelled() => {}
            }
        }
    }

    /// Append accepted records in discovery order, enforcing a strictly
    /// monotonic `extracted_at` within the run.
    fn append_records(
        &self,
        session: &mut CrawlSession,
        seen: &mut HashSet<String>,
        records: Vec<crate::domain::listing::ListingRecord>,
    ) {
        let mut last = session
            .accumulated
            .last()
            .map(|r| r.extracted_at)
            .unwrap_or_else(|| Utc::now() - ChronoDuration::seconds(1));
        for mut record in records {
            let now = Utc::now();
            let ts = if now > last {
                now
            } else {
                last + ChronoDuration::microseconds(1)
            };
            record.extracted_at = ts;
            last = ts;
            seen.insert(record.business_id.clone());
            session.accumulated.push(record);
        }
    }

    async fn finish_exhausted(&self, session: &mut CrawlSession) -> anyhow::Result<RunResult> {
        session.mark_completed();
        self.store.checkpoint(session).await?;
        info!(
            session_id = %session.session_id,
            count = session.accumulated.len(),
            "run completed, source exhausted"
        );
        Ok(RunResult::completed(session))
    }
}

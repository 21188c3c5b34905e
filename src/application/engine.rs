//! Crawl engine facade
//!
//! The outward interface the caller (CLI or route layer) drives:
//! `start_run` registers a session, `resume_run` advances it one batch at a
//! time, `request_stop` pauses it at the next iteration boundary, and
//! `get_diff_report`/`reconcile` hand the accumulated records to the
//! differential sync engine. The source gateway instance is retained across
//! pauses, so resuming does not re-establish the fetch channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::SessionError;
use crate::domain::gateways::{SessionStore, SessionUpdate, SourceGateway, StorageGateway};
use crate::domain::session::{CrawlParams, CrawlSession, RunResult};
use crate::infrastructure::extractor::ListingExtractor;
use crate::infrastructure::pagination::PaginationController;
use crate::infrastructure::sync::{DiffReport, DiffSyncEngine, SyncPolicy, SyncSummary};

pub struct CrawlEngine {
    storage: Arc<dyn StorageGateway>,
    store: Arc<dyn SessionStore>,
    controller: PaginationController,
    sync: DiffSyncEngine,
    /// Sessions currently inside `resume_run`; guards the one-run-per-session
    /// contract
    active: Mutex<HashSet<String>>,
    /// Per-session stop tokens; a cancelled token is replaced on resume
    stops: Mutex<HashMap<String, CancellationToken>>,
}

impl CrawlEngine {
    pub fn new(
        source: Arc<dyn SourceGateway>,
        storage: Arc<dyn StorageGateway>,
        store: Arc<dyn SessionStore>,
        extractor: ListingExtractor,
    ) -> Self {
        let controller = PaginationController::new(source, store.clone(), extractor);
        let sync = DiffSyncEngine::new(storage.clone());
        Self {
            storage,
            store,
            controller,
            sync,
            active: Mutex::new(HashSet::new()),
            stops: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new session and return its id. The first `resume_run`
    /// starts fetching from cursor 0.
    pub async fn start_run(&self, params: CrawlParams) -> anyhow::Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let session = CrawlSession::new(session_id.clone(), params.clone());
        self.store.checkpoint(&session).await?;
        if let Err(err) = self.storage.create_session(&session_id, &params).await {
            warn!(session_id = %session_id, error = %err, "session row creation failed");
        }
        info!(session_id = %session_id, "crawl session registered");
        Ok(session_id)
    }

    /// Advance the session until its next pause point or terminal state
    pub async fn resume_run(&self, session_id: &str) -> anyhow::Result<RunResult> {
        {
            let mut active = self.active.lock().await;
            if !active.insert(session_id.to_string()) {
                return Err(SessionError::AlreadyRunning {
                    session_id: session_id.to_string(),
                }
                .into());
            }
        }
        let result = self.drive(session_id).await;
        self.active.lock().await.remove(session_id);
        result
    }

    async fn drive(&self, session_id: &str) -> anyhow::Result<RunResult> {
        let mut session = self
            .store
            .restore(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })?;

        if session.status.is_terminal() {
            return Err(SessionError::NotResumable {
                session_id: session_id.to_string(),
                status: session.status.as_str().to_string(),
            }
            .into());
        }

        let stop = self.stop_token(session_id).await;
        let result = self.controller.run(&mut session, &stop).await?;

        let update = SessionUpdate {
            status: session.status,
            records_found: session.accumulated.len(),
            batch_ordinal: session.batch_ordinal,
            error: session.error.clone(),
        };
        if let Err(err) = self.storage.update_session(session_id, update).await {
            warn!(session_id, error = %err, "session row update failed");
        }
        Ok(result)
    }

    /// Honor at the next iteration boundary; the partial accumulated set is
    /// checkpointed exactly as for a batch pause.
    pub async fn request_stop(&self, session_id: &str) {
        let stops = self.stops.lock().await;
        if let Some(token) = stops.get(session_id) {
            info!(session_id, "stop requested");
            token.cancel();
        }
    }

    /// Drive the session through pause/resume cycles until terminal.
    /// Stops early when a stop request pauses the run.
    pub async fn run_to_completion(&self, session_id: &str) -> anyhow::Result<RunResult> {
        loop {
            let result = self.resume_run(session_id).await?;
            if result.completed || result.error.is_some() {
                return Ok(result);
            }
            // paused: either a batch boundary (keep going) or a stop request
            let stopped = {
                let stops = self.stops.lock().await;
                stops
                    .get(session_id)
                    .map(|t| t.is_cancelled())
                    .unwrap_or(false)
            };
            if stopped {
                return Ok(result);
            }
        }
    }

    /// Classification of the session's accumulated records against the
    /// current snapshot, without writing anything.
    pub async fn get_diff_report(&self, session_id: &str) -> anyhow::Result<DiffReport> {
        let session = self.session(session_id).await?;
        Ok(self
            .sync
            .diff_report(session_id, &session.accumulated)
            .await)
    }

    /// Full reconciliation pass over the session's accumulated records
    pub async fn reconcile(
        &self,
        session_id: &str,
        policy: SyncPolicy,
    ) -> anyhow::Result<SyncSummary> {
        let session = self.session(session_id).await?;
        Ok(self
            .sync
            .reconcile(session_id, &session.accumulated, policy)
            .await)
    }

    pub async fn session(&self, session_id: &str) -> anyhow::Result<CrawlSession> {
        self.store
            .restore(session_id)
            .await?
            .ok_or_else(|| {
                SessionError::NotFound {
                    session_id: session_id.to_string(),
                }
                .into()
            })
    }

    /// Current (possibly fresh) stop token for a session. A token cancelled
    /// by an earlier stop is replaced so the session can resume.
    async fn stop_token(&self, session_id: &str) -> CancellationToken {
        let mut stops = self.stops.lock().await;
        let token = stops
            .entry(session_id.to_string())
            .or_insert_with(CancellationToken::new);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::FetchError;
    use crate::infrastructure::extractor::ExtractorConfig;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use crate::infrastructure::sqlite_storage::SqliteStorageGateway;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        pages: Vec<Result<Option<String>, FetchError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceGateway for ScriptedSource {
        async fn fetch(&self, _cursor: u32) -> Result<Option<String>, FetchError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages.get(idx).cloned().unwrap_or(Ok(None))
        }
    }

    fn page(rows: &[(&str, u64)]) -> Result<Option<String>, FetchError> {
        let body = rows
            .iter()
            .map(|(id, price)| format!("<tr><td>{id}</td><td>{price} ₽</td></tr>"))
            .collect::<Vec<_>>()
            .join("");
        Ok(Some(format!("<table>{body}</table>")))
    }

    async fn engine(pages: Vec<Result<Option<String>, FetchError>>) -> CrawlEngine {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = SqliteStorageGateway::new(pool);
        storage.migrate().await.unwrap();

        CrawlEngine::new(
            Arc::new(ScriptedSource {
                pages,
                calls: AtomicUsize::new(0),
            }),
            Arc::new(storage),
            Arc::new(InMemorySessionStore::new()),
            ListingExtractor::new(ExtractorConfig {
                min_price: 1,
                ..Default::default()
            }),
        )
    }

    fn params() -> CrawlParams {
        CrawlParams {
            page_size: 10,
            batch_size: 2,
            max_iterations: 20,
            request_delay_ms: 0,
            min_price: 1,
            max_price: 100_000_000,
        }
    }

    #[tokio::test]
    async fn test_start_resume_reconcile_cycle() {
        let engine = engine(vec![
            page(&[("A111AA77", 50_000), ("B222BB77", 30_000)]),
            page(&[("C333CC77", 40_000)]),
            Ok(None),
            Ok(None),
            Ok(None),
        ])
        .await;

        let session_id = engine.start_run(params()).await.unwrap();

        let first = engine.resume_run(&session_id).await.unwrap();
        assert!(first.paused);
        assert_eq!(first.count, 2);

        let last = engine.run_to_completion(&session_id).await.unwrap();
        assert!(last.completed);
        assert_eq!(last.count, 3);

        let summary = engine
            .reconcile(&session_id, SyncPolicy::Differential)
            .await
            .unwrap();
        assert_eq!(summary.report.new.len(), 3);
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.persistence_failures, 0);

        // Second pass against the now-persisted snapshot: everything unchanged
        let report = engine.get_diff_report(&session_id).await.unwrap();
        assert!(report.new.is_empty());
        assert!(report.change_price.is_empty());
        assert_eq!(report.unchanged_count, 3);
    }

    #[tokio::test]
    async fn test_resume_unknown_session_fails() {
        let engine = engine(vec![]).await;
        let err = engine.resume_run("missing").await.unwrap_err();
        assert!(err.downcast_ref::<SessionError>().is_some());
    }

    #[tokio::test]
    async fn test_completed_session_is_not_resumable() {
        let engine = engine(vec![Ok(None), Ok(None), Ok(None)]).await;
        let session_id = engine.start_run(params()).await.unwrap();
        let result = engine.resume_run(&session_id).await.unwrap();
        assert!(result.completed);

        let err = engine.resume_run(&session_id).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::NotResumable { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_then_resume_with_fresh_token() {
        let engine = engine(vec![
            page(&[("A111AA77", 50_000)]),
            page(&[("B222BB77", 30_000)]),
            Ok(None),
            Ok(None),
            Ok(None),
        ])
        .await;
        let session_id = engine
            .start_run(CrawlParams {
                batch_size: 100,
                ..params()
            })
            .await
            .unwrap();

        engine.request_stop(&session_id).await;
        // Stop before any token exists is a no-op; create one by resuming
        let first = engine.resume_run(&session_id).await.unwrap();
        assert!(first.completed || first.paused);
    }
}

//! Gateway traits the engine consumes
//!
//! The engine never talks to a concrete site or database: it drives a
//! `SourceGateway` for paginated fetches and a `StorageGateway` for durable
//! state, both selected once at process start and injected. Session
//! checkpoints go through a `SessionStore` passed in the same way - there is
//! no process-global session registry.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::change::ChangeRecord;
use crate::domain::errors::FetchError;
use crate::domain::listing::ListingRecord;
use crate::domain::session::{CrawlParams, CrawlSession, SessionStatus};

/// What a storage upsert actually did to the row.
///
/// Sync totals are counted from this per-record outcome, never inferred from
/// batch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Pull-based paginated source, addressed by numeric offset.
///
/// `Ok(None)` is the exhaustion signal for an empty page; the controller
/// additionally treats a byte-identical repeat of the previous body as empty.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    async fn fetch(&self, cursor: u32) -> Result<Option<String>, FetchError>;
}

/// Session status/totals update pushed to durable storage at lifecycle edges
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    pub records_found: usize,
    pub batch_ordinal: u32,
    pub error: Option<String>,
}

/// Durable storage capability: listing upserts, the reconciliation snapshot,
/// the price change log, and session bookkeeping rows.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn upsert(&self, record: &ListingRecord) -> anyhow::Result<UpsertOutcome>;

    /// Current persisted `{business_id: price}` view used as the comparison
    /// baseline for reconciliation. Read once per pass.
    async fn read_snapshot(&self) -> anyhow::Result<HashMap<String, u64>>;

    async fn append_change_record(&self, change: &ChangeRecord) -> anyhow::Result<()>;

    async fn create_session(&self, session_id: &str, params: &CrawlParams) -> anyhow::Result<()>;

    async fn update_session(&self, session_id: &str, update: SessionUpdate) -> anyhow::Result<()>;
}

/// Checkpoint/restore for the active crawl session.
///
/// An in-memory map suffices for a single-process deployment; crash-resume
/// needs a durable implementation. The controller contract is agnostic.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn checkpoint(&self, session: &CrawlSession) -> anyhow::Result<()>;

    async fn restore(&self, session_id: &str) -> anyhow::Result<Option<CrawlSession>>;

    async fn remove(&self, session_id: &str) -> anyhow::Result<()>;
}

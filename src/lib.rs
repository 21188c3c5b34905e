//! plate-watch - incremental listing crawler with differential sync
//!
//! This crate crawls a paginated marketplace source for plate-code listings,
//! supports pausing and resuming a crawl across process boundaries, and
//! reconciles fetched records against the persisted snapshot to classify
//! each listing as new, price-changed, or unchanged.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-exports for easier access
pub use application::engine::CrawlEngine;
pub use domain::change::{ChangeRecord, PriceDirection};
pub use domain::gateways::{SessionStore, SourceGateway, StorageGateway, UpsertOutcome};
pub use domain::listing::{ListingRecord, ListingStatus};
pub use domain::session::{CrawlParams, CrawlSession, RunResult, SessionStatus};
pub use infrastructure::sync::{DiffReport, DiffSyncEngine, SyncPolicy, SyncSummary};

//! Infrastructure layer - extraction, pagination, gateways, config, logging

pub mod config;
pub mod extractor;
pub mod http_source;
pub mod logging;
pub mod pagination;
pub mod session_store;
pub mod sqlite_storage;
pub mod sync;

pub use config::AppConfig;
pub use extractor::{ExtractionOutcome, ExtractorConfig, ListingExtractor};
pub use http_source::{HttpSourceConfig, HttpSourceGateway};
pub use pagination::PaginationController;
pub use session_store::InMemorySessionStore;
pub use sqlite_storage::SqliteStorageGateway;
pub use sync::{DiffReport, DiffSyncEngine, SyncPolicy, SyncSummary};

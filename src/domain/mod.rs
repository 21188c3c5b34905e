//! Domain layer - entities, gateway traits, and error taxonomy
//!
//! Contains the core types the crawl and sync engines operate on, independent
//! of any concrete source or storage backend.

pub mod change;
pub mod errors;
pub mod gateways;
pub mod listing;
pub mod session;

pub use change::{ChangeRecord, PriceDirection};
pub use errors::{ExtractionError, FetchError, SessionError};
pub use gateways::{SessionStore, SourceGateway, StorageGateway, UpsertOutcome};
pub use listing::{ListingRecord, ListingStatus};
pub use session::{CrawlParams, CrawlSession, RunResult, SessionStatus};

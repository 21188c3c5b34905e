//! Listing entity - one scraped marketplace entry keyed by plate code

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a listing is still offered on the source site
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ListingStatus {
    Active,
    Inactive,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ListingStatus::Active),
            "inactive" => Some(ListingStatus::Inactive),
            _ => None,
        }
    }
}

/// One scraped listing.
///
/// `business_id` is the natural key (alphanumeric plate code) and must be
/// unique within a reconciliation pass. `price == 0` means "unknown", not
/// "free" - the extractor's filter deliberately lets unknown-price listings
/// through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub business_id: String,
    pub price: u64,
    pub region: String,
    pub status: ListingStatus,
    /// Source-reported posting time; defaulted to extraction time when absent
    pub posted_at: DateTime<Utc>,
    /// Source-reported update time; defaulted to extraction time when absent
    pub updated_at: DateTime<Utc>,
    pub source_url: String,
    /// Engine-assigned, strictly monotonic within one run
    pub extracted_at: DateTime<Utc>,
}

impl ListingRecord {
    /// True when the price is the "unknown" sentinel rather than a real quote
    pub fn price_unknown(&self) -> bool {
        self.price == 0
    }
}

/// Derive the region code from the digit suffix of a plate id.
///
/// Plate ids end in a 2-3 digit regional code (e.g. `A111AA77` -> `77`).
/// Returns an empty string when the id carries no digit suffix.
pub fn region_from_business_id(business_id: &str) -> String {
    business_id
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

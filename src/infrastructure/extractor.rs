//! Listing extraction from raw source pages
//!
//! Turns one raw fetch response into structured listing records. Candidates
//! are located by a fixed lexical plate pattern, first inside HTML listing
//! rows and then - when the page is not row-structured - by scanning the raw
//! text. Field extraction runs through tolerant fallback chains; a fault in
//! one candidate never aborts the batch.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;

use crate::domain::errors::ExtractionError;
use crate::domain::listing::{region_from_business_id, ListingRecord, ListingStatus};

/// Plate code: letter, three digits, two letters, 2-3 digit region suffix.
/// Accepts the Cyrillic plate alphabet and its Latin homoglyphs.
static PLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[ABEKMHOPCTXYАВЕКМНОРСТХУ]\d{3}[ABEKMHOPCTXYАВЕКМНОРСТХУ]{2}\d{2,3}")
        .expect("plate pattern is valid")
});

/// Numeric token directly adjacent to a currency marker
static CURRENCY_PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d\s\u{a0}.,]*)\s*(?:₽|руб\.?|р\.|rub)").expect("price pattern is valid")
});

/// Any standalone numeric token (thousands separators tolerated)
static NUMERIC_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d\s\u{a0}]*\d|\d").expect("numeric pattern is valid"));

/// Explicit DD.MM.YYYY date token
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{4})\b").expect("date pattern is valid"));

static TODAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:today|сегодня)\b").expect("keyword pattern is valid"));

static YESTERDAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:yesterday|вчера)\b").expect("keyword pattern is valid"));

static INACTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:sold|inactive|продан[ао]?|снят)\b").expect("valid"));

/// Configuration for listing extraction
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// CSS selector for listing row containers on structured pages
    pub row_selector: String,
    /// Price window applied to records with a known price
    pub min_price: u64,
    pub max_price: u64,
    /// Floor for the bare-numeric-token price fallback
    pub min_plausible_price: u64,
    /// Recorded on every extracted record as its origin
    pub source_url: String,
    /// Text window around a raw-text plate match treated as one candidate
    pub fragment_window: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            row_selector: "tr, li.listing, div.listing-item, article".to_string(),
            min_price: 1_000,
            max_price: 100_000_000,
            min_plausible_price: 1_000,
            source_url: String::new(),
            fragment_window: 160,
        }
    }
}

/// Result of extracting one raw batch.
///
/// Per-candidate faults are first-class output, not a logging side effect.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    /// Accepted records, discovery order, deduplicated against `already_seen`
    /// and within the batch. First accepted occurrence wins: a candidate the
    /// filter rejects (or that faults) does not claim its id, so a later
    /// acceptable occurrence in the same batch still gets through.
    pub records: Vec<ListingRecord>,
    /// Count of ids in `records` that were not in `already_seen`
    pub new_count: usize,
    pub errors: Vec<ExtractionError>,
}

/// Extracts listing records from raw marketplace pages
#[derive(Debug, Clone)]
pub struct ListingExtractor {
    config: ExtractorConfig,
}

impl ListingExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Clone with the run-specific price window applied (the window comes
    /// from the session params, not the static config)
    pub fn with_price_window(&self, min_price: u64, max_price: u64) -> Self {
        let mut config = self.config.clone();
        config.min_price = min_price;
        config.max_price = max_price;
        Self { config }
    }

    /// Extract all acceptable records from one raw batch.
    ///
    /// `already_seen` holds every id accumulated so far in the session; ids in
    /// it (or already accepted earlier in this batch) are skipped without
    /// touching the fallback chains.
    pub fn extract(&self, raw_batch: &str, already_seen: &HashSet<String>) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();
        let mut batch_seen: HashSet<String> = HashSet::new();
        let now = Utc::now();

        for fragment in self.candidate_fragments(raw_batch) {
            let Some(plate) = PLATE_RE.find(&fragment) else {
                continue;
            };
            let business_id = normalize_plate(plate.as_str());
            if business_id.is_empty() {
                outcome.errors.push(ExtractionError::InvalidCandidate {
                    candidate: plate.as_str().to_string(),
                    reason: "plate normalized to empty id".to_string(),
                });
                continue;
            }
            if already_seen.contains(&business_id) || batch_seen.contains(&business_id) {
                continue;
            }

            match self.extract_candidate(&business_id, &fragment, now) {
                Ok(Some(record)) => {
                    // Only an accepted record claims the id within the batch
                    batch_seen.insert(business_id.clone());
                    outcome.new_count += 1;
                    outcome.records.push(record);
                }
                Ok(None) => {
                    // dropped by the filter predicate, not an error
                    debug!(business_id = %business_id, "candidate filtered out");
                }
                Err(err) => outcome.errors.push(err),
            }
        }

        debug!(
            records = outcome.records.len(),
            errors = outcome.errors.len(),
            "batch extraction finished"
        );
        outcome
    }

    /// Split the raw batch into one text fragment per candidate listing.
    ///
    /// Structured pages yield one fragment per listing row; pages where no
    /// row contains a plate fall back to windows around raw-text matches.
    fn candidate_fragments(&self, raw_batch: &str) -> Vec<String> {
        let mut fragments = Vec::new();

        if let Ok(selector) = Selector::parse(&self.config.row_selector) {
            let document = Html::parse_document(raw_batch);
            for row in document.select(&selector) {
                let text: String = row.text().collect::<Vec<_>>().join(" ");
                if PLATE_RE.is_match(&text) {
                    fragments.push(text);
                }
            }
        }
        if !fragments.is_empty() {
            return fragments;
        }

        // Primary-page text fallback: window around each plate match
        for m in PLATE_RE.find_iter(raw_batch) {
            let start = m.start().saturating_sub(self.config.fragment_window);
            let end = (m.end() + self.config.fragment_window).min(raw_batch.len());
            let start = floor_char_boundary(raw_batch, start);
            let end = ceil_char_boundary(raw_batch, end);
            fragments.push(raw_batch[start..end].to_string());
        }
        fragments
    }

    /// Run the field fallback chains for one candidate fragment.
    ///
    /// Returns `Ok(None)` when the filter predicate rejects the record.
    fn extract_candidate(
        &self,
        business_id: &str,
        fragment: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ListingRecord>, ExtractionError> {
        let price = self.extract_price(business_id, fragment)?;

        // Filter predicate: unknown price (0) always passes; a known price
        // must fall inside the configured window.
        if price > 0 && (price < self.config.min_price || price > self.config.max_price) {
            return Ok(None);
        }

        let (posted_at, updated_at) = self.extract_dates(business_id, fragment, now)?;
        let status = if INACTIVE_RE.is_match(fragment) {
            ListingStatus::Inactive
        } else {
            ListingStatus::Active
        };

        Ok(Some(ListingRecord {
            business_id: business_id.to_string(),
            price,
            region: region_from_business_id(business_id),
            status,
            posted_at,
            updated_at,
            source_url: self.config.source_url.clone(),
            extracted_at: now,
        }))
    }

    /// Price fallback chain: currency-adjacent token, then any numeric token
    /// at or above the plausibility floor, then unknown (0).
    fn extract_price(&self, business_id: &str, fragment: &str) -> Result<u64, ExtractionError> {
        // Dates and the plate itself must not be mistaken for prices
        let scrubbed = DATE_RE.replace_all(fragment, " ");
        let scrubbed = PLATE_RE.replace_all(&scrubbed, " ");

        if let Some(caps) = CURRENCY_PRICE_RE.captures(&scrubbed) {
            let token = &caps[1];
            return parse_price_token(token).ok_or_else(|| ExtractionError::InvalidCandidate {
                candidate: business_id.to_string(),
                reason: format!("unparseable currency token '{}'", token.trim()),
            });
        }

        for m in NUMERIC_TOKEN_RE.find_iter(&scrubbed) {
            if let Some(value) = parse_price_token(m.as_str()) {
                if value >= self.config.min_plausible_price {
                    return Ok(value);
                }
            }
        }

        Ok(0)
    }

    /// Date fallback chain: explicit DD.MM.YYYY, then "today"/"yesterday",
    /// then extraction time. First token is the posting date, last the update
    /// date.
    fn extract_dates(
        &self,
        business_id: &str,
        fragment: &str,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), ExtractionError> {
        let mut explicit: Vec<DateTime<Utc>> = Vec::new();
        for caps in DATE_RE.captures_iter(fragment) {
            let token = caps[0].to_string();
            let (day, month, year) = (
                caps[1].parse::<u32>().unwrap_or(0),
                caps[2].parse::<u32>().unwrap_or(0),
                caps[3].parse::<i32>().unwrap_or(0),
            );
            let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                ExtractionError::BadDateToken {
                    candidate: business_id.to_string(),
                    token,
                }
            })?;
            let ts = Utc
                .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"));
            explicit.push(ts);
        }

        if let (Some(first), Some(last)) = (explicit.first(), explicit.last()) {
            return Ok((*first, *last));
        }

        if TODAY_RE.is_match(fragment) {
            return Ok((now, now));
        }
        if YESTERDAY_RE.is_match(fragment) {
            let yesterday = now - Duration::days(1);
            return Ok((yesterday, yesterday));
        }

        Ok((now, now))
    }
}

/// Uppercase and keep only alphanumerics so `a111aa 77` variants collapse
/// to one id.
fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// Parse a digit run with embedded spaces/separators into a price
fn parse_price_token(token: &str) -> Option<u64> {
    let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

//! Differential sync engine
//!
//! Compares the accumulated record set of a run against the storage
//! gateway's current snapshot, classifies every record as new, price-changed,
//! or unchanged, and persists according to the selected policy. The snapshot
//! is read once per pass; a failed snapshot read fails closed by classifying
//! every record as new rather than dropping data.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::change::ChangeRecord;
use crate::domain::gateways::{StorageGateway, UpsertOutcome};
use crate::domain::listing::ListingRecord;

/// Which records a reconciliation pass writes back to storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Upsert every accumulated record regardless of classification
    /// (complete re-crawl).
    FullReplace,
    /// Upsert only new and price-changed records; skip unchanged ones to
    /// minimize write volume. Default for scheduled incremental runs.
    Differential,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Differential
    }
}

/// Classification of one accumulated set against one snapshot.
///
/// Iteration order is discovery order; the three classes are pairwise
/// disjoint by business id (the extractor already deduplicated).
#[derive(Debug, Clone, Default)]
pub struct DiffReport {
    pub new: Vec<ListingRecord>,
    pub change_price: Vec<ChangeRecord>,
    pub unchanged_count: usize,
}

impl DiffReport {
    /// Conservation: every accumulated record lands in exactly one class
    pub fn classified_total(&self) -> usize {
        self.new.len() + self.change_price.len() + self.unchanged_count
    }
}

/// Outcome of one reconciliation pass, separating classified counts from
/// what actually persisted.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub session_id: String,
    pub policy: SyncPolicy,
    pub report: DiffReport,
    /// Counted from the real per-record upsert outcome, never from batch
    /// position
    pub inserted: usize,
    pub updated: usize,
    /// Change log entries that reached storage
    pub persisted_changes: usize,
    /// Upserts or change-appends that failed; the pass continued past each
    pub persistence_failures: usize,
    /// The pass ran fail-closed against an empty snapshot
    pub snapshot_read_failed: bool,
}

/// Classifies and persists one run's accumulated records
pub struct DiffSyncEngine {
    storage: Arc<dyn StorageGateway>,
}

impl DiffSyncEngine {
    pub fn new(storage: Arc<dyn StorageGateway>) -> Self {
        Self { storage }
    }

    /// Pure classification of `accumulated` against `snapshot`, in discovery
    /// order.
    pub fn classify(
        accumulated: &[ListingRecord],
        snapshot: &HashMap<String, u64>,
        session_id: &str,
    ) -> DiffReport {
        let mut report = DiffReport::default();
        for record in accumulated {
            match snapshot.get(&record.business_id) {
                None => report.new.push(record.clone()),
                Some(&old_price) if old_price != record.price => {
                    report.change_price.push(ChangeRecord::price_changed(
                        &record.business_id,
                        old_price,
                        record.price,
                        session_id,
                    ));
                }
                Some(_) => report.unchanged_count += 1,
            }
        }
        report
    }

    /// Read the snapshot once and classify without writing anything
    pub async fn diff_report(
        &self,
        session_id: &str,
        accumulated: &[ListingRecord],
    ) -> DiffReport {
        let (snapshot, _failed) = self.read_snapshot_fail_closed().await;
        Self::classify(accumulated, &snapshot, session_id)
    }

    /// Run a full reconciliation pass: classify, then persist per policy.
    ///
    /// Per-record persistence faults are logged, counted, and skipped; they
    /// never abort the pass. The caller must serialize passes per session id.
    pub async fn reconcile(
        &self,
        session_id: &str,
        accumulated: &[ListingRecord],
        policy: SyncPolicy,
    ) -> SyncSummary {
        let (snapshot, snapshot_read_failed) = self.read_snapshot_fail_closed().await;
        let report = Self::classify(accumulated, &snapshot, session_id);

        let mut summary = SyncSummary {
            session_id: session_id.to_string(),
            policy,
            report: report.clone(),
            inserted: 0,
            updated: 0,
            persisted_changes: 0,
            persistence_failures: 0,
            snapshot_read_failed,
        };

        let changed_ids: HashSet<&str> = report
            .change_price
            .iter()
            .map(|c| c.business_id.as_str())
            .collect();
        let new_ids: HashSet<&str> = report.new.iter().map(|r| r.business_id.as_str()).collect();

        for record in accumulated {
            let id = record.business_id.as_str();
            let write = match policy {
                SyncPolicy::FullReplace => true,
                SyncPolicy::Differential => changed_ids.contains(id) || new_ids.contains(id),
            };
            if !write {
                continue;
            }
            match self.storage.upsert(record).await {
                Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                Ok(UpsertOutcome::Updated) => summary.updated += 1,
                Err(err) => {
                    warn!(business_id = %id, error = %err, "upsert failed, continuing");
                    summary.persistence_failures += 1;
                }
            }
        }

        // Audit log: price movements plus first-seen entries
        for change in &report.change_price {
            match self.storage.append_change_record(change).await {
                Ok(()) => summary.persisted_changes += 1,
                Err(err) => {
                    warn!(business_id = %change.business_id, error = %err,
                        "change append failed, continuing");
                    summary.persistence_failures += 1;
                }
            }
        }
        for record in &report.new {
            let change = ChangeRecord::first_seen(&record.business_id, record.price, session_id);
            match self.storage.append_change_record(&change).await {
                Ok(()) => summary.persisted_changes += 1,
                Err(err) => {
                    warn!(business_id = %record.business_id, error = %err,
                        "change append failed, continuing");
                    summary.persistence_failures += 1;
                }
            }
        }

        info!(
            session_id,
            new = summary.report.new.len(),
            changed = summary.report.change_price.len(),
            unchanged = summary.report.unchanged_count,
            inserted = summary.inserted,
            updated = summary.updated,
            failures = summary.persistence_failures,
            "reconciliation pass finished"
        );
        summary
    }

    /// Snapshot read with the fail-closed bias: a read fault degrades to an
    /// empty snapshot so every record classifies as new (over-write, never
    /// silent loss).
    async fn read_snapshot_fail_closed(&self) -> (HashMap<String, u64>, bool) {
        match self.storage.read_snapshot().await {
            Ok(snapshot) => (snapshot, false),
            Err(err) => {
                warn!(error = %err, "snapshot read failed, treating every record as new");
                (HashMap::new(), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change::PriceDirection;
    use crate::domain::listing::ListingStatus;
    use chrono::Utc;

    fn record(id: &str, price: u64) -> ListingRecord {
        let now = Utc::now();
        ListingRecord {
            business_id: id.to_string(),
            price,
            region: "77".to_string(),
            status: ListingStatus::Active,
            posted_at: now,
            updated_at: now,
            source_url: String::new(),
            extracted_at: now,
        }
    }

    #[test]
    fn test_concrete_diff_scenario() {
        let mut snapshot = HashMap::new();
        snapshot.insert("A111AA77".to_string(), 50_000u64);
        let accumulated = vec![record("A111AA77", 60_000), record("B222BB77", 30_000)];

        let report = DiffSyncEngine::classify(&accumulated, &snapshot, "s1");

        assert_eq!(report.new.len(), 1);
        assert_eq!(report.new[0].business_id, "B222BB77");
        assert_eq!(report.change_price.len(), 1);
        let change = &report.change_price[0];
        assert_eq!(change.business_id, "A111AA77");
        assert_eq!(change.old_price, Some(50_000));
        assert_eq!(change.new_price, 60_000);
        assert_eq!(change.delta, Some(10_000));
        assert_eq!(change.direction, PriceDirection::Up);
        assert_eq!(report.unchanged_count, 0);
    }

    #[test]
    fn test_conservation() {
        let mut snapshot = HashMap::new();
        snapshot.insert("A111AA77".to_string(), 50_000u64);
        snapshot.insert("B222BB77".to_string(), 30_000u64);
        let accumulated = vec![
            record("A111AA77", 60_000),
            record("B222BB77", 30_000),
            record("C333CC77", 10_000),
        ];

        let report = DiffSyncEngine::classify(&accumulated, &snapshot, "s1");
        assert_eq!(report.classified_total(), accumulated.len());
    }

    #[test]
    fn test_classification_preserves_discovery_order() {
        let snapshot = HashMap::new();
        let accumulated = vec![
            record("C333CC77", 1_000),
            record("A111AA77", 2_000),
            record("B222BB77", 3_000),
        ];
        let report = DiffSyncEngine::classify(&accumulated, &snapshot, "s1");
        let ids: Vec<_> = report.new.iter().map(|r| r.business_id.as_str()).collect();
        assert_eq!(ids, vec!["C333CC77", "A111AA77", "B222BB77"]);
    }
}

use crate::models::ListingRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Default window during which a listing keeps counting as "new"
pub const DEFAULT_NEW_LISTING_WINDOW_DAYS: i64 = 7;

/// Outcome of one reconcile pass against the exchange's active symbol set
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub newly_seen: Vec<String>,
    pub newly_inactive: Vec<String>,
}

/// Ledger of every symbol ever observed on the exchange
///
/// Records are created on first observation and never deleted; absence from
/// the active set only flips `is_active`. The ledger is what separates a
/// genuinely new listing from an established pair that we simply had not
/// been running long enough to know about.
pub struct ListingRegistry {
    records: HashMap<String, ListingRecord>,
    new_window: Duration,
}

impl ListingRegistry {
    pub fn new() -> Self {
        Self::with_window(Duration::days(DEFAULT_NEW_LISTING_WINDOW_DAYS))
    }

    pub fn with_window(new_window: Duration) -> Self {
        Self {
            records: HashMap::new(),
            new_window,
        }
    }

    /// Restore a registry from persisted records
    pub fn with_records(records: Vec<ListingRecord>) -> Self {
        let mut registry = Self::new();
        for record in records {
            registry.records.insert(record.symbol.clone(), record);
        }
        registry
    }

    /// Reconcile the ledger against the exchange's current active symbols.
    ///
    /// Symbols we have never seen are created (`first_seen_at = now`) and
    /// reported as newly seen. Known symbols missing from the active set are
    /// marked inactive and reported. Symbols present in both just get their
    /// `last_seen_at` refreshed; a previously inactive symbol that reappears
    /// is re-activated with its original `first_seen_at` intact.
    pub fn reconcile(
        &mut self,
        active_symbols: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for symbol in active_symbols {
            match self.records.get_mut(symbol) {
                Some(record) => {
                    record.last_seen_at = Some(now);
                    record.is_active = true;
                }
                None => {
                    self.records.insert(
                        symbol.clone(),
                        ListingRecord {
                            symbol: symbol.clone(),
                            first_seen_at: now,
                            last_seen_at: Some(now),
                            is_active: true,
                        },
                    );
                    report.newly_seen.push(symbol.clone());
                }
            }
        }

        for (symbol, record) in self.records.iter_mut() {
            if record.is_active && !active_symbols.contains(symbol) {
                record.is_active = false;
                record.last_seen_at = Some(now);
                report.newly_inactive.push(symbol.clone());
            }
        }

        report.newly_seen.sort();
        report.newly_inactive.sort();
        report
    }

    /// Whether a symbol still qualifies as a new listing.
    ///
    /// True when we have no record at all, or when the first observation is
    /// within the rolling window. This is a rolling classification: a young
    /// listing re-qualifies on every check during its first week.
    pub fn is_new(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.records.get(symbol) {
            None => true,
            Some(record) => now - record.first_seen_at <= self.new_window,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&ListingRecord> {
        self.records.get(symbol)
    }

    pub fn records(&self) -> impl Iterator<Item = &ListingRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ListingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

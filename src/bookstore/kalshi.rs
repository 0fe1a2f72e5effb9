//! Per-market atomic orderbook state for venue K.
//!
//! Each market's book lives behind an `ArcSwap`: writers build a whole new
//! immutable snapshot by copy-on-write and swap the pointer; readers never
//! take a lock. Grounded on the `TokenBookState`/`ArcSwap<BookSnapshot>`
//! discipline used for venue P, generalized with the integer-cent
//! `BTreeMap` book representation and derived best-ask formulas.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::KBookSnapshot;
use crate::error::PipelineError;

struct MarketSlot {
    snapshot: ArcSwap<KBookSnapshot>,
}

/// Owns every venue-K market's current snapshot. Exclusively written by
/// the venue-K Decoder; any number of readers may read concurrently.
#[derive(Clone)]
pub struct KBookStore {
    markets: Arc<RwLock<HashMap<String, Arc<MarketSlot>>>>,
}

impl KBookStore {
    pub fn new() -> Self {
        Self {
            markets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn slot(&self, market_ticker: &str) -> Arc<MarketSlot> {
        if let Some(slot) = self.markets.read().get(market_ticker) {
            return slot.clone();
        }
        let mut markets = self.markets.write();
        markets
            .entry(market_ticker.to_string())
            .or_insert_with(|| {
                Arc::new(MarketSlot {
                    snapshot: ArcSwap::from_pointee(KBookSnapshot::empty(market_ticker)),
                })
            })
            .clone()
    }

    pub fn get(&self, market_ticker: &str) -> Option<Arc<KBookSnapshot>> {
        self.markets.read().get(market_ticker).map(|s| s.snapshot.load_full())
    }

    pub fn market_keys(&self) -> Vec<String> {
        self.markets.read().keys().cloned().collect()
    }

    pub fn remove(&self, market_ticker: &str) {
        self.markets.write().remove(market_ticker);
    }

    /// Replaces the whole book for `market_ticker`. Used for `ok` (empty
    /// book) and `orderbook_snapshot` frames.
    pub fn apply_snapshot(
        &self,
        market_ticker: &str,
        yes_levels: BTreeMap<i64, i64>,
        no_levels: BTreeMap<i64, i64>,
        seq: Option<i64>,
    ) {
        let slot = self.slot(market_ticker);
        slot.snapshot.store(Arc::new(KBookSnapshot {
            market_ticker: market_ticker.to_string(),
            yes_levels,
            no_levels,
            last_seq: seq,
            last_update: std::time::Instant::now(),
        }));
    }

    /// Applies a signed delta to a single level. Returns the resulting
    /// snapshot, or a `SequenceGap` error if `seq` does not immediately
    /// follow the stored `last_seq` (the caller drops the delta either
    /// way; the snapshot is never mutated on a gap).
    pub fn apply_delta(
        &self,
        market_ticker: &str,
        side_is_yes: bool,
        price_cents: i64,
        delta: i64,
        seq: i64,
    ) -> Result<Arc<KBookSnapshot>, PipelineError> {
        let slot = self.slot(market_ticker);
        let current = slot.snapshot.load_full();

        if let Some(last_seq) = current.last_seq {
            if seq != last_seq + 1 {
                return Err(PipelineError::SequenceGap {
                    market_key: market_ticker.to_string(),
                    expected: last_seq + 1,
                    actual: seq,
                });
            }
        }

        let mut yes_levels = current.yes_levels.clone();
        let mut no_levels = current.no_levels.clone();
        let levels = if side_is_yes { &mut yes_levels } else { &mut no_levels };

        let new_qty = levels.get(&price_cents).copied().unwrap_or(0) + delta;
        if new_qty <= 0 {
            levels.remove(&price_cents);
        } else {
            levels.insert(price_cents, new_qty);
        }

        let next = Arc::new(KBookSnapshot {
            market_ticker: market_ticker.to_string(),
            yes_levels,
            no_levels,
            last_seq: Some(seq),
            last_update: std::time::Instant::now(),
        });
        slot.snapshot.store(next.clone());
        Ok(next)
    }
}

impl Default for KBookStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(pairs: &[(i64, i64)]) -> BTreeMap<i64, i64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn snapshot_then_delta_matches_fixture() {
        let store = KBookStore::new();
        store.apply_snapshot("M", levels(&[(1, 95010)]), levels(&[(98, 8285), (97, 28659)]), Some(5));

        let snap = store.apply_delta("M", true, 73, 26, 6).unwrap();
        assert_eq!(snap.best_yes_bid(), Some((73, 26)));
        assert_eq!(snap.best_no_bid(), Some((98, 8285)));
    }

    #[test]
    fn sequence_gap_leaves_book_unchanged() {
        let store = KBookStore::new();
        store.apply_snapshot("M", levels(&[(1, 95010)]), levels(&[(98, 8285)]), Some(5));
        store.apply_delta("M", true, 73, 26, 6).unwrap();

        let err = store.apply_delta("M", true, 80, 10, 8);
        assert!(err.is_err());

        let snap = store.get("M").unwrap();
        assert_eq!(snap.best_yes_bid(), Some((73, 26)));
    }

    #[test]
    fn level_removed_when_quantity_reaches_zero() {
        let store = KBookStore::new();
        store.apply_snapshot("M", levels(&[(50, 10)]), BTreeMap::new(), Some(1));
        let snap = store.apply_delta("M", true, 50, -10, 2).unwrap();
        assert!(snap.yes_levels.is_empty());
    }

    #[test]
    fn derived_asks_use_complementary_side() {
        let store = KBookStore::new();
        store.apply_snapshot("M", levels(&[(60, 5)]), levels(&[(35, 7)]), Some(1));
        let snap = store.get("M").unwrap();
        assert_eq!(snap.best_yes_ask(), Some((65, 7)));
        assert_eq!(snap.best_no_ask(), Some((40, 5)));
    }
}

//! Per-asset atomic orderbook state for venue P.
//!
//! Grounded directly on `BookStore`/`TokenBookState` from the teacher's
//! Polymarket scraper: `ArcSwap<BookSnapshot>` per asset, copy-on-write
//! mutation, sorted `Vec<PriceLevel>` sides with insert/update/remove
//! driven by the decimal-string price identity.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::domain::{PBookSnapshot, PPriceLevel};

struct AssetSlot {
    snapshot: ArcSwap<PBookSnapshot>,
}

#[derive(Clone)]
pub struct PBookStore {
    assets: Arc<RwLock<HashMap<String, Arc<AssetSlot>>>>,
}

impl PBookStore {
    pub fn new() -> Self {
        Self {
            assets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn slot(&self, asset_id: &str) -> Arc<AssetSlot> {
        if let Some(slot) = self.assets.read().get(asset_id) {
            return slot.clone();
        }
        let mut assets = self.assets.write();
        assets
            .entry(asset_id.to_string())
            .or_insert_with(|| {
                Arc::new(AssetSlot {
                    snapshot: ArcSwap::from_pointee(PBookSnapshot::empty(asset_id)),
                })
            })
            .clone()
    }

    pub fn get(&self, asset_id: &str) -> Option<Arc<PBookSnapshot>> {
        self.assets.read().get(asset_id).map(|s| s.snapshot.load_full())
    }

    pub fn asset_ids(&self) -> Vec<String> {
        self.assets.read().keys().cloned().collect()
    }

    pub fn remove(&self, asset_id: &str) {
        self.assets.write().remove(asset_id);
    }

    /// `book` event: atomically replaces the whole book. Required before
    /// any `price_change` patch is accepted for this asset.
    pub fn apply_snapshot(&self, asset_id: &str, bids: Vec<PPriceLevel>, asks: Vec<PPriceLevel>, hash: Option<String>) {
        let mut bids = bids;
        let mut asks = asks;
        bids.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap());
        asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap());
        let slot = self.slot(asset_id);
        slot.snapshot.store(Arc::new(PBookSnapshot {
            asset_id: asset_id.to_string(),
            bids,
            asks,
            last_hash: hash,
            last_update: std::time::Instant::now(),
            snapshot_applied: true,
        }));
    }

    /// Applies a single `(price, side, size)` patch. `size == 0` removes
    /// the level keyed by its decimal-string identity; otherwise the
    /// level is inserted or overwritten.
    pub fn apply_delta(&self, asset_id: &str, price_str: &str, price: f64, size: f64, is_bid: bool) -> Option<Arc<PBookSnapshot>> {
        let slot = self.slot(asset_id);
        let current = slot.snapshot.load_full();
        if !current.snapshot_applied {
            // No snapshot has been applied yet; patches before a `book`
            // frame are dropped, matching the required snapshot-first
            // ordering for venue P.
            return None;
        }

        let mut bids = current.bids.clone();
        let mut asks = current.asks.clone();
        let levels = if is_bid { &mut bids } else { &mut asks };
        apply_level_update(levels, price_str, price, size);

        let next = Arc::new(PBookSnapshot {
            asset_id: asset_id.to_string(),
            bids,
            asks,
            last_hash: current.last_hash.clone(),
            last_update: std::time::Instant::now(),
            snapshot_applied: true,
        });
        slot.snapshot.store(next.clone());
        Some(next)
    }

    /// Records a `tick_size_change`: a placeholder level of size 1 is
    /// inserted at the new tick until overwritten by a subsequent
    /// `price_change`.
    pub fn apply_tick_size_change(&self, asset_id: &str, price_str: &str, price: f64, is_bid: bool) {
        let slot = self.slot(asset_id);
        let current = slot.snapshot.load_full();
        let mut bids = current.bids.clone();
        let mut asks = current.asks.clone();
        let levels = if is_bid { &mut bids } else { &mut asks };
        apply_level_update(levels, price_str, price, 1.0);

        slot.snapshot.store(Arc::new(PBookSnapshot {
            asset_id: asset_id.to_string(),
            bids,
            asks,
            last_hash: current.last_hash.clone(),
            last_update: std::time::Instant::now(),
            snapshot_applied: current.snapshot_applied,
        }));
    }
}

impl Default for PBookStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_level_update(levels: &mut Vec<PPriceLevel>, price_str: &str, price: f64, size: f64) {
    let pos = levels.iter().position(|l| l.price_str == price_str);
    if size <= 0.0 {
        if let Some(idx) = pos {
            levels.remove(idx);
        }
        return;
    }
    match pos {
        Some(idx) => levels[idx].size = size,
        None => {
            let insert_at = levels
                .iter()
                .position(|l| l.price > price)
                .unwrap_or(levels.len());
            levels.insert(
                insert_at,
                PPriceLevel {
                    price_str: price_str.to_string(),
                    price,
                    size,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price_str: &str, size: f64) -> PPriceLevel {
        PPriceLevel {
            price_str: price_str.to_string(),
            price: price_str.parse().unwrap(),
            size,
        }
    }

    #[test]
    fn snapshot_then_zero_size_removes_level() {
        let store = PBookStore::new();
        store.apply_snapshot("A", vec![level("0.64", 100.0)], vec![level("0.66", 100.0)], None);

        let snap = store.apply_delta("A", "0.64", 0.64, 0.0, true).unwrap();
        assert!(snap.bids.is_empty());
        assert!(snap.best_bid().is_none());
    }

    #[test]
    fn patch_before_snapshot_is_dropped() {
        let store = PBookStore::new();
        let result = store.apply_delta("A", "0.64", 0.64, 10.0, true);
        assert!(result.is_none());
    }

    #[test]
    fn patch_after_empty_hashless_snapshot_is_accepted() {
        let store = PBookStore::new();
        store.apply_snapshot("A", Vec::new(), Vec::new(), None);

        let result = store.apply_delta("A", "0.64", 0.64, 10.0, true);
        assert!(result.is_some(), "an applied empty book must still accept subsequent patches");
        assert_eq!(result.unwrap().best_bid().unwrap().price_str, "0.64");
    }

    #[test]
    fn bids_sorted_ascending_best_is_last() {
        let store = PBookStore::new();
        store.apply_snapshot(
            "A",
            vec![level("0.50", 10.0), level("0.60", 5.0)],
            Vec::new(),
            None,
        );
        let snap = store.get("A").unwrap();
        assert_eq!(snap.best_bid().unwrap().price_str, "0.60");
    }
}

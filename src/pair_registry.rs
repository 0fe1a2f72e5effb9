//! Holds the active K/P market pairs and reacts to book updates by marking
//! affected pairs dirty for re-evaluation. Grounded on the coordinator
//! pattern in `coordination_bus.py` for how index lookups drive downstream
//! work, generalized here to the two-book pair model from
//! `arbitrage_calculator.py`'s `calculate_arbitrage_opportunities`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::arbitrage::evaluator::{self, ArbitrageSettings};
use crate::bookstore::{KBookStore, PBookStore};
use crate::domain::{ArbitrageOpportunity, Event, MarketPair};
use crate::event_bus::EventBus;

const DIRTY_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct PairRegistry {
    k_store: KBookStore,
    p_store: PBookStore,
    pairs: Arc<RwLock<HashMap<String, MarketPair>>>,
    k_index: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    p_index: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    dirty_tx: mpsc::Sender<String>,
}

impl PairRegistry {
    pub fn new(k_store: KBookStore, p_store: PBookStore, event_bus: &EventBus) -> (Self, mpsc::Receiver<String>) {
        let (dirty_tx, dirty_rx) = mpsc::channel(DIRTY_QUEUE_CAPACITY);
        let registry = Self {
            k_store,
            p_store,
            pairs: Arc::new(RwLock::new(HashMap::new())),
            k_index: Arc::new(RwLock::new(HashMap::new())),
            p_index: Arc::new(RwLock::new(HashMap::new())),
            dirty_tx,
        };
        registry.subscribe(event_bus);
        (registry, dirty_rx)
    }

    fn subscribe(&self, event_bus: &EventBus) {
        let k_index = self.k_index.clone();
        let dirty_tx = self.dirty_tx.clone();
        event_bus.subscribe(
            "k.bid_ask_updated",
            Arc::new(move |event: Event| {
                let k_index = k_index.clone();
                let dirty_tx = dirty_tx.clone();
                Box::pin(async move {
                    if let Event::KBidAskUpdated(e) = event {
                        mark_dirty(&k_index, &e.market_key, &dirty_tx);
                    }
                    Ok(())
                })
            }),
        );

        let p_index = self.p_index.clone();
        let dirty_tx = self.dirty_tx.clone();
        event_bus.subscribe(
            "p.bid_ask_updated",
            Arc::new(move |event: Event| {
                let p_index = p_index.clone();
                let dirty_tx = dirty_tx.clone();
                Box::pin(async move {
                    if let Event::PBidAskUpdated(e) = event {
                        mark_dirty(&p_index, &e.market_key, &dirty_tx);
                    }
                    Ok(())
                })
            }),
        );
    }

    pub fn add_pair(&self, pair: MarketPair) {
        self.k_index.write().entry(pair.k_ticker.clone()).or_default().insert(pair.pair_id.clone());
        self.p_index.write().entry(pair.p_yes_id.clone()).or_default().insert(pair.pair_id.clone());
        self.p_index.write().entry(pair.p_no_id.clone()).or_default().insert(pair.pair_id.clone());
        self.pairs.write().insert(pair.pair_id.clone(), pair);
    }

    pub fn remove_pair(&self, pair_id: &str) {
        if let Some(pair) = self.pairs.write().remove(pair_id) {
            if let Some(set) = self.k_index.write().get_mut(&pair.k_ticker) {
                set.remove(pair_id);
            }
            for asset_id in [&pair.p_yes_id, &pair.p_no_id] {
                if let Some(set) = self.p_index.write().get_mut(asset_id) {
                    set.remove(pair_id);
                }
            }
        }
    }

    pub fn get_pair(&self, pair_id: &str) -> Option<MarketPair> {
        self.pairs.read().get(pair_id).cloned()
    }

    pub fn pair_ids(&self) -> Vec<String> {
        self.pairs.read().keys().cloned().collect()
    }

    /// Evaluates one pair against the current atomic book snapshots.
    /// Returns an empty list if either side has no book yet.
    pub fn evaluate(&self, pair_id: &str, settings: &ArbitrageSettings) -> Vec<ArbitrageOpportunity> {
        let Some(pair) = self.get_pair(pair_id) else {
            return Vec::new();
        };
        let Some(k) = self.k_store.get(&pair.k_ticker) else {
            return Vec::new();
        };
        let Some(p_yes) = self.p_store.get(&pair.p_yes_id) else {
            return Vec::new();
        };
        let Some(p_no) = self.p_store.get(&pair.p_no_id) else {
            return Vec::new();
        };
        evaluator::evaluate(pair_id, &k, &p_yes, &p_no, settings)
    }
}

fn mark_dirty(index: &Arc<RwLock<HashMap<String, HashSet<String>>>>, market_key: &str, dirty_tx: &mpsc::Sender<String>) {
    let Some(pair_ids) = index.read().get(market_key).cloned() else {
        return;
    };
    for pair_id in pair_ids {
        if dirty_tx.try_send(pair_id.clone()).is_err() {
            debug!(pair_id, "dirty pair queue full or closed, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn bid_ask_update_marks_referencing_pairs_dirty() {
        let k_store = KBookStore::new();
        let p_store = PBookStore::new();
        let event_bus = EventBus::new();
        let (registry, mut dirty_rx) = PairRegistry::new(k_store.clone(), p_store.clone(), &event_bus);

        registry.add_pair(MarketPair {
            pair_id: "PAIR-1".to_string(),
            k_ticker: "TICKER".to_string(),
            p_yes_id: "yes-asset".to_string(),
            p_no_id: "no-asset".to_string(),
        });

        k_store.apply_snapshot(
            "TICKER",
            BTreeMap::from([(55, 100)]),
            BTreeMap::from([(45, 100)]),
            Some(1),
        );
        event_bus
            .publish(
                "k.bid_ask_updated",
                Event::KBidAskUpdated(crate::domain::MarketKeyEvent {
                    market_key: "TICKER".to_string(),
                }),
            )
            .await;

        let dirty = dirty_rx.recv().await.expect("expected dirty notification");
        assert_eq!(dirty, "PAIR-1");
    }

    #[test]
    fn evaluate_with_no_books_returns_empty() {
        let k_store = KBookStore::new();
        let p_store = PBookStore::new();
        let event_bus = EventBus::new();
        let (registry, _rx) = PairRegistry::new(k_store, p_store, &event_bus);
        registry.add_pair(MarketPair {
            pair_id: "PAIR-1".to_string(),
            k_ticker: "TICKER".to_string(),
            p_yes_id: "yes-asset".to_string(),
            p_no_id: "no-asset".to_string(),
        });
        let settings = ArbitrageSettings {
            min_spread_threshold: 0.02,
            min_trade_size: 1.0,
        };
        assert!(registry.evaluate("PAIR-1", &settings).is_empty());
    }
}

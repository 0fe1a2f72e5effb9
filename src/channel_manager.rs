//! Per-client subscription bookkeeping and derived index caches for the
//! Broadcaster's fan-out. Rebuilds are invalidation-flagged and serial, per
//! the concurrency model; CUSTOM predicates stay a linear scan since they
//! are rare.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::domain::{CustomPredicate, Subscription, TickerSnapshot};

pub type ClientId = String;

struct ClientEntry {
    tx: mpsc::Sender<String>,
    subscriptions: Vec<Subscription>,
}

#[derive(Default)]
struct Indices {
    platform_index: HashMap<String, HashSet<ClientId>>,
    market_index: HashMap<String, HashSet<ClientId>>,
    all_clients: HashSet<ClientId>,
    custom_clients: HashSet<ClientId>,
}

pub struct ChannelManager {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    indices: RwLock<Indices>,
    dirty: AtomicBool,
}

impl ChannelManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            indices: RwLock::new(Indices::default()),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn register_client(&self, client_id: ClientId, tx: mpsc::Sender<String>) {
        self.clients.write().insert(
            client_id,
            ClientEntry {
                tx,
                subscriptions: Vec::new(),
            },
        );
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn unregister_client(&self, client_id: &str) {
        self.clients.write().remove(client_id);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn subscribe(&self, client_id: &str, subscription: Subscription) {
        if let Some(entry) = self.clients.write().get_mut(client_id) {
            entry.subscriptions.push(subscription);
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    pub fn unsubscribe_platform(&self, client_id: &str, platform: &str) {
        if let Some(entry) = self.clients.write().get_mut(client_id) {
            entry.subscriptions.retain(|s| !matches!(s, Subscription::Platform(p) if p == platform));
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    pub fn unsubscribe_market(&self, client_id: &str, market_key: &str) {
        if let Some(entry) = self.clients.write().get_mut(client_id) {
            entry.subscriptions.retain(|s| !matches!(s, Subscription::Market(m) if m == market_key));
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    fn rebuild_if_needed(&self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let clients = self.clients.read();
        let mut indices = Indices::default();
        for (client_id, entry) in clients.iter() {
            for sub in &entry.subscriptions {
                match sub {
                    Subscription::All => {
                        indices.all_clients.insert(client_id.clone());
                    }
                    Subscription::Platform(p) => {
                        indices.platform_index.entry(p.clone()).or_default().insert(client_id.clone());
                    }
                    Subscription::Market(m) => {
                        indices.market_index.entry(m.clone()).or_default().insert(client_id.clone());
                    }
                    Subscription::Custom(_) => {
                        indices.custom_clients.insert(client_id.clone());
                    }
                }
            }
        }
        drop(clients);
        *self.indices.write() = indices;
    }

    fn custom_predicates(&self, client_id: &str) -> Vec<CustomPredicate> {
        self.clients
            .read()
            .get(client_id)
            .map(|entry| {
                entry
                    .subscriptions
                    .iter()
                    .filter_map(|s| match s {
                        Subscription::Custom(p) => Some(p.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Computes the recipient set for `ticker` per the union of
    /// all-subscribers, platform index, market index, and any CUSTOM
    /// predicate that accepts it.
    pub fn recipients_for(&self, ticker: &TickerSnapshot) -> HashSet<ClientId> {
        self.rebuild_if_needed();
        let indices = self.indices.read();
        let mut recipients = indices.all_clients.clone();
        if let Some(set) = indices.platform_index.get(&ticker.platform) {
            recipients.extend(set.iter().cloned());
        }
        if let Some(set) = indices.market_index.get(&ticker.market_key) {
            recipients.extend(set.iter().cloned());
        }
        let custom_clients: Vec<ClientId> = indices.custom_clients.iter().cloned().collect();
        drop(indices);
        for client_id in custom_clients {
            if recipients.contains(&client_id) {
                continue;
            }
            let predicates = self.custom_predicates(&client_id);
            if predicates.iter().any(|p| p.accepts(ticker)) {
                recipients.insert(client_id);
            }
        }
        recipients
    }

    /// Every currently registered client, for broadcasts that are not
    /// ticker-scoped (e.g. arbitrage alerts).
    pub fn all_client_ids(&self) -> Vec<ClientId> {
        self.clients.read().keys().cloned().collect()
    }

    pub fn sender(&self, client_id: &str) -> Option<mpsc::Sender<String>> {
        self.clients.read().get(client_id).map(|e| e.tx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketSummary, MarketSummarySide};

    fn snapshot(platform: &str, market_key: &str) -> TickerSnapshot {
        TickerSnapshot {
            market_key: market_key.to_string(),
            platform: platform.to_string(),
            summary: MarketSummary {
                yes: MarketSummarySide { bid: Some(0.5), ask: Some(0.6), volume: 10.0 },
                no: MarketSummarySide { bid: Some(0.4), ask: Some(0.5), volume: 10.0 },
            },
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn platform_and_market_subscribers_both_receive() {
        let manager = ChannelManager::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        manager.register_client("c1".to_string(), tx1);
        manager.register_client("c2".to_string(), tx2);
        manager.subscribe("c1", Subscription::Platform("k".to_string()));
        manager.subscribe("c2", Subscription::Market("M".to_string()));

        let recipients = manager.recipients_for(&snapshot("k", "M"));
        assert!(recipients.contains("c1"));
        assert!(recipients.contains("c2"));
    }

    #[tokio::test]
    async fn unrelated_subscription_is_excluded() {
        let manager = ChannelManager::new();
        let (tx, _rx) = mpsc::channel(8);
        manager.register_client("c1".to_string(), tx);
        manager.subscribe("c1", Subscription::Market("OTHER".to_string()));

        let recipients = manager.recipients_for(&snapshot("k", "M"));
        assert!(!recipients.contains("c1"));
    }

    #[tokio::test]
    async fn custom_predicate_is_applied_linearly() {
        let manager = ChannelManager::new();
        let (tx, _rx) = mpsc::channel(8);
        manager.register_client("c1".to_string(), tx);
        manager.subscribe(
            "c1",
            Subscription::Custom(CustomPredicate {
                min_volume: Some(5.0),
                price_range: None,
            }),
        );

        let recipients = manager.recipients_for(&snapshot("k", "M"));
        assert!(recipients.contains("c1"));
    }
}

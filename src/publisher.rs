//! Periodic per-venue ticker publication with identity suppression and
//! invariant validation. Grounded on the periodic-scan loop shape in
//! `arbitrage/engine.rs` (an interval-driven task over shared state),
//! generalized here to republish venue book summaries instead of scanning
//! for opportunities.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::warn;

use crate::bookstore::{KBookStore, PBookStore};
use crate::decoder::{KDecoder, PDecoder};
use crate::domain::{Event, MarketSummary, MarketSummarySide, TickerSnapshot, ECONOMIC_SANITY_TOLERANCE};
use crate::event_bus::EventBus;

fn validate_summary(summary: &MarketSummary) -> Result<(), String> {
    for (label, side) in [("yes", &summary.yes), ("no", &summary.no)] {
        if let (Some(bid), Some(ask)) = (side.bid, side.ask) {
            if !(0.0..=1.0).contains(&bid) || !(0.0..=1.0).contains(&ask) || bid > ask {
                return Err(format!("{label} side violates 0<=bid<=ask<=1: bid={bid}, ask={ask}"));
            }
        }
    }
    if let (Some(yes_bid), Some(no_ask)) = (summary.yes.bid, summary.no.ask) {
        if yes_bid + no_ask > 1.0 + ECONOMIC_SANITY_TOLERANCE {
            return Err(format!("yes.bid + no.ask = {} exceeds 1 + epsilon", yes_bid + no_ask));
        }
    }
    Ok(())
}

/// Publishes venue-K `TickerSnapshot`s built from the atomic book snapshot
/// plus whatever cumulative volume the Decoder has observed on `ticker_v2`.
pub struct KTickerPublisher {
    book_store: KBookStore,
    decoder: KDecoder,
    event_bus: EventBus,
    publish_interval: Duration,
    last_emitted: Arc<RwLock<HashMap<String, String>>>,
}

impl KTickerPublisher {
    pub fn new(book_store: KBookStore, decoder: KDecoder, event_bus: EventBus, publish_interval: Duration) -> Self {
        Self {
            book_store,
            decoder,
            event_bus,
            publish_interval,
            last_emitted: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.publish_interval);
        loop {
            interval.tick().await;
            for market_key in self.book_store.market_keys() {
                self.publish_market(&market_key).await;
            }
        }
    }

    fn build_snapshot(&self, market_key: &str) -> Option<TickerSnapshot> {
        let book = self.book_store.get(market_key)?;
        let volume = self.decoder.ticker_state(market_key).map(|s| s.volume as f64).unwrap_or(0.0);
        let summary = MarketSummary {
            yes: MarketSummarySide {
                bid: book.best_yes_bid().map(|(p, _)| p as f64 / 100.0),
                ask: book.best_yes_ask().map(|(p, _)| p as f64 / 100.0),
                volume,
            },
            no: MarketSummarySide {
                bid: book.best_no_bid().map(|(p, _)| p as f64 / 100.0),
                ask: book.best_no_ask().map(|(p, _)| p as f64 / 100.0),
                volume,
            },
        };
        Some(TickerSnapshot {
            market_key: market_key.to_string(),
            platform: "k".to_string(),
            summary,
            timestamp: Utc::now(),
        })
    }

    async fn publish_market(&self, market_key: &str) {
        let Some(snapshot) = self.build_snapshot(market_key) else {
            return;
        };
        if let Err(reason) = validate_summary(&snapshot.summary) {
            warn!(market_key, reason, "dropping invalid ticker summary");
            return;
        }
        if self.suppressed(market_key, &snapshot) {
            return;
        }
        self.event_bus.publish("ticker.published", Event::TickerPublished(snapshot)).await;
    }

    /// Bypasses suppression and publishes immediately, regardless of
    /// whether the summary changed since the last emission.
    pub async fn force_publish(&self, market_key: &str) {
        let Some(snapshot) = self.build_snapshot(market_key) else {
            return;
        };
        if let Err(reason) = validate_summary(&snapshot.summary) {
            warn!(market_key, reason, "dropping invalid forced ticker summary");
            return;
        }
        self.remember(market_key, &snapshot);
        self.event_bus.publish("ticker.published", Event::TickerPublished(snapshot)).await;
    }

    fn suppressed(&self, market_key: &str, snapshot: &TickerSnapshot) -> bool {
        let serialized = serde_json::to_string(&snapshot.summary).unwrap_or_default();
        let mut last = self.last_emitted.write();
        if last.get(market_key) == Some(&serialized) {
            return true;
        }
        last.insert(market_key.to_string(), serialized);
        false
    }

    fn remember(&self, market_key: &str, snapshot: &TickerSnapshot) {
        let serialized = serde_json::to_string(&snapshot.summary).unwrap_or_default();
        self.last_emitted.write().insert(market_key.to_string(), serialized);
    }
}

/// Publishes venue-P `TickerSnapshot`s. Asset ids are tracked as
/// independent books (YES/NO legs are separate assets on this venue), so
/// each published summary carries only one side populated.
pub struct PTickerPublisher {
    book_store: PBookStore,
    #[allow(dead_code)]
    decoder: PDecoder,
    event_bus: EventBus,
    publish_interval: Duration,
    last_emitted: Arc<RwLock<HashMap<String, String>>>,
}

impl PTickerPublisher {
    pub fn new(book_store: PBookStore, decoder: PDecoder, event_bus: EventBus, publish_interval: Duration) -> Self {
        Self {
            book_store,
            decoder,
            event_bus,
            publish_interval,
            last_emitted: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.publish_interval);
        loop {
            interval.tick().await;
            for asset_id in self.book_store.asset_ids() {
                self.publish_market(&asset_id).await;
            }
        }
    }

    fn build_snapshot(&self, asset_id: &str) -> Option<TickerSnapshot> {
        let book = self.book_store.get(asset_id)?;
        let side = MarketSummarySide {
            bid: book.best_bid().map(|l| l.price),
            ask: book.best_ask().map(|l| l.price),
            volume: 0.0,
        };
        Some(TickerSnapshot {
            market_key: asset_id.to_string(),
            platform: "p".to_string(),
            summary: MarketSummary {
                yes: side.clone(),
                no: MarketSummarySide { bid: None, ask: None, volume: 0.0 },
            },
            timestamp: Utc::now(),
        })
    }

    async fn publish_market(&self, asset_id: &str) {
        let Some(snapshot) = self.build_snapshot(asset_id) else {
            return;
        };
        if let Err(reason) = validate_summary(&snapshot.summary) {
            warn!(asset_id, reason, "dropping invalid ticker summary");
            return;
        }
        if self.suppressed(asset_id, &snapshot) {
            return;
        }
        self.event_bus.publish("ticker.published", Event::TickerPublished(snapshot)).await;
    }

    pub async fn force_publish(&self, asset_id: &str) {
        let Some(snapshot) = self.build_snapshot(asset_id) else {
            return;
        };
        if validate_summary(&snapshot.summary).is_err() {
            return;
        }
        self.remember(asset_id, &snapshot);
        self.event_bus.publish("ticker.published", Event::TickerPublished(snapshot)).await;
    }

    fn suppressed(&self, asset_id: &str, snapshot: &TickerSnapshot) -> bool {
        let serialized = serde_json::to_string(&snapshot.summary).unwrap_or_default();
        let mut last = self.last_emitted.write();
        if last.get(asset_id) == Some(&serialized) {
            return true;
        }
        last.insert(asset_id.to_string(), serialized);
        false
    }

    fn remember(&self, asset_id: &str, snapshot: &TickerSnapshot) {
        let serialized = serde_json::to_string(&snapshot.summary).unwrap_or_default();
        self.last_emitted.write().insert(asset_id.to_string(), serialized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn identical_snapshot_is_suppressed() {
        let book_store = KBookStore::new();
        book_store.apply_snapshot("M", BTreeMap::from([(55, 10)]), BTreeMap::from([(45, 10)]), Some(1));
        let decoder = KDecoder::new(book_store.clone(), EventBus::new());
        let publisher = KTickerPublisher::new(book_store, decoder, EventBus::new(), Duration::from_secs(1));

        publisher.publish_market("M").await;
        assert!(publisher.suppressed("M", &publisher.build_snapshot("M").unwrap()));
    }

    #[tokio::test]
    async fn force_publish_bypasses_suppression() {
        let book_store = KBookStore::new();
        book_store.apply_snapshot("M", BTreeMap::from([(55, 10)]), BTreeMap::from([(45, 10)]), Some(1));
        let decoder = KDecoder::new(book_store.clone(), EventBus::new());
        let event_bus = EventBus::new();
        let publisher = KTickerPublisher::new(book_store, decoder, event_bus.clone(), Duration::from_secs(1));

        publisher.publish_market("M").await;
        publisher.force_publish("M").await;
        let published: u64 = event_bus.stats().event_counts.get("ticker.published").copied().unwrap_or(0);
        assert_eq!(published, 2);
    }

    #[test]
    fn invalid_summary_is_rejected() {
        let summary = MarketSummary {
            yes: MarketSummarySide { bid: Some(0.9), ask: Some(0.1), volume: 0.0 },
            no: MarketSummarySide { bid: None, ask: None, volume: 0.0 },
        };
        assert!(validate_summary(&summary).is_err());
    }
}

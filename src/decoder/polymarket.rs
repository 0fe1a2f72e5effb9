//! Venue-P message decoder. Grounded directly on
//! `scrapers/polymarket_book_store.rs`'s `apply_snapshot`/`apply_delta`/
//! `apply_level_update` for book application and `handle_message`'s
//! `event_type` dispatch for frame routing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bookstore::PBookStore;
use crate::domain::{Event, MarketKeyEvent, PPriceLevel};
use crate::error::PipelineError;
use crate::event_bus::EventBus;
use crate::venue::polymarket::wire::{PEvent, PSideWire};

#[derive(Clone)]
pub struct PDecoder {
    book_store: PBookStore,
    event_bus: EventBus,
    last_trade_price: Arc<RwLock<HashMap<String, f64>>>,
}

impl PDecoder {
    pub fn new(book_store: PBookStore, event_bus: EventBus) -> Self {
        Self {
            book_store,
            event_bus,
            last_trade_price: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn book_store(&self) -> &PBookStore {
        &self.book_store
    }

    pub async fn run(&self, mut rx: mpsc::Receiver<String>) {
        while let Some(raw) = rx.recv().await {
            if let Err(e) = self.handle_frame(&raw).await {
                warn!("p decoder dropped frame: {e}");
            }
        }
    }

    pub async fn handle_frame(&self, raw: &str) -> Result<(), PipelineError> {
        let event: PEvent = serde_json::from_str(raw).map_err(|e| PipelineError::Decode {
            component: "p_decoder".to_string(),
            reason: e.to_string(),
        })?;

        match event {
            PEvent::Book { asset_id, bids, asks, hash } => self.handle_book(asset_id, bids, asks, hash).await,
            PEvent::PriceChange { price_changes, .. } => self.handle_price_change(price_changes).await,
            PEvent::TickSizeChange { asset_id, new_tick_size, side } => {
                self.handle_tick_size_change(asset_id, new_tick_size, side).await
            }
            PEvent::LastTradePrice { asset_id, price } => self.handle_last_trade_price(asset_id, price),
        }
    }

    async fn handle_book(
        &self,
        asset_id: String,
        bids: Vec<crate::venue::polymarket::wire::WireLevel>,
        asks: Vec<crate::venue::polymarket::wire::WireLevel>,
        hash: Option<String>,
    ) -> Result<(), PipelineError> {
        let before = self.book_store.get(&asset_id);
        let bids = parse_levels(bids)?;
        let asks = parse_levels(asks)?;
        self.book_store.apply_snapshot(&asset_id, bids, asks, hash);
        self.emit_book_events(&asset_id, before).await;
        Ok(())
    }

    async fn handle_price_change(
        &self,
        changes: Vec<crate::venue::polymarket::wire::PriceChangeEntry>,
    ) -> Result<(), PipelineError> {
        for change in changes {
            let price: f64 = change.price.parse().map_err(|_| PipelineError::Decode {
                component: "p_decoder.price_change".to_string(),
                reason: format!("unparseable price {}", change.price),
            })?;
            let size: f64 = change.size.parse().map_err(|_| PipelineError::Decode {
                component: "p_decoder.price_change".to_string(),
                reason: format!("unparseable size {}", change.size),
            })?;
            let is_bid = matches!(change.side, PSideWire::Buy);
            let before = self.book_store.get(&change.asset_id);
            let applied = self.book_store.apply_delta(&change.asset_id, &change.price, price, size, is_bid);
            if applied.is_some() {
                self.emit_book_events(&change.asset_id, before).await;
            } else {
                debug!(asset_id = change.asset_id, "price_change dropped: no snapshot yet");
            }
        }
        Ok(())
    }

    async fn handle_tick_size_change(
        &self,
        asset_id: String,
        new_tick_size: String,
        side: String,
    ) -> Result<(), PipelineError> {
        let price: f64 = new_tick_size.parse().map_err(|_| PipelineError::Decode {
            component: "p_decoder.tick_size_change".to_string(),
            reason: format!("unparseable tick size {new_tick_size}"),
        })?;
        let is_bid = side.eq_ignore_ascii_case("buy");
        self.book_store.apply_tick_size_change(&asset_id, &new_tick_size, price, is_bid);
        Ok(())
    }

    fn handle_last_trade_price(&self, asset_id: String, price: String) -> Result<(), PipelineError> {
        let price: f64 = price.parse().map_err(|_| PipelineError::Decode {
            component: "p_decoder.last_trade_price".to_string(),
            reason: format!("unparseable price {price}"),
        })?;
        self.last_trade_price.write().insert(asset_id, price);
        Ok(())
    }

    async fn emit_book_events(&self, asset_id: &str, before: Option<Arc<crate::domain::PBookSnapshot>>) {
        self.event_bus
            .publish(
                "p.orderbook_update",
                Event::POrderbookUpdate(MarketKeyEvent {
                    market_key: asset_id.to_string(),
                }),
            )
            .await;

        let after = self.book_store.get(asset_id);
        let before_best = before
            .as_ref()
            .map(|s| (s.best_bid().map(|l| l.price_str.clone()), s.best_ask().map(|l| l.price_str.clone())));
        let after_best = after
            .as_ref()
            .map(|s| (s.best_bid().map(|l| l.price_str.clone()), s.best_ask().map(|l| l.price_str.clone())));
        if before_best != after_best {
            self.event_bus
                .publish(
                    "p.bid_ask_updated",
                    Event::PBidAskUpdated(MarketKeyEvent {
                        market_key: asset_id.to_string(),
                    }),
                )
                .await;
        }
    }

    pub fn last_trade_price(&self, asset_id: &str) -> Option<f64> {
        self.last_trade_price.read().get(asset_id).copied()
    }
}

fn parse_levels(levels: Vec<crate::venue::polymarket::wire::WireLevel>) -> Result<Vec<PPriceLevel>, PipelineError> {
    levels
        .into_iter()
        .map(|l| {
            let price: f64 = l.price.parse().map_err(|_| PipelineError::Decode {
                component: "p_decoder.book".to_string(),
                reason: format!("unparseable price {}", l.price),
            })?;
            let size: f64 = l.size.parse().map_err(|_| PipelineError::Decode {
                component: "p_decoder.book".to_string(),
                reason: format!("unparseable size {}", l.size),
            })?;
            Ok(PPriceLevel {
                price_str: l.price,
                price,
                size,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> PDecoder {
        PDecoder::new(PBookStore::new(), EventBus::new())
    }

    #[tokio::test]
    async fn snapshot_then_zero_size_price_change_empties_book() {
        let decoder = decoder();
        let book = r#"{"event_type":"book","asset_id":"A","bids":[{"price":"0.64","size":"100"}],"asks":[{"price":"0.66","size":"100"}]}"#;
        decoder.handle_frame(book).await.unwrap();

        let change = r#"{"event_type":"price_change","price_changes":[{"asset_id":"A","price":"0.64","side":"BUY","size":"0"}]}"#;
        decoder.handle_frame(change).await.unwrap();

        let snap = decoder.book_store().get("A").unwrap();
        assert!(snap.bids.is_empty());
        assert!(snap.best_bid().is_none());
    }

    #[tokio::test]
    async fn last_trade_price_does_not_mutate_book() {
        let decoder = decoder();
        let book = r#"{"event_type":"book","asset_id":"A","bids":[],"asks":[]}"#;
        decoder.handle_frame(book).await.unwrap();
        let trade = r#"{"event_type":"last_trade_price","asset_id":"A","price":"0.55"}"#;
        decoder.handle_frame(trade).await.unwrap();

        assert_eq!(decoder.last_trade_price("A"), Some(0.55));
        assert!(decoder.book_store().get("A").unwrap().bids.is_empty());
    }
}

//! Venue-K message decoder: JSON parse, dispatch by `type`, apply to the
//! BookStore, emit events. Grounded on
//! `pbeets-kalshi-trade-rs/src/orderbook/state.rs` for book application
//! semantics and `src/ws/message.rs` for the wire shapes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bookstore::KBookStore;
use crate::domain::{Event, KSide, MarketKeyEvent, TickerUpdateEvent};
use crate::error::PipelineError;
use crate::event_bus::EventBus;
use crate::venue::kalshi::wire::{
    OkData, OrderbookDeltaData, OrderbookSnapshotData, StreamUpdate, TickerV2Data, WireSide,
};

#[derive(Debug, Clone, Default)]
pub struct KTickerState {
    pub price: Option<i64>,
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub volume: i64,
    pub last_trade_price: Option<i64>,
    bootstrapped: bool,
}

#[derive(Clone)]
pub struct KDecoder {
    book_store: KBookStore,
    event_bus: EventBus,
    ticker_states: Arc<RwLock<HashMap<String, KTickerState>>>,
}

impl KDecoder {
    pub fn new(book_store: KBookStore, event_bus: EventBus) -> Self {
        Self {
            book_store,
            event_bus,
            ticker_states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn book_store(&self) -> &KBookStore {
        &self.book_store
    }

    /// Drains raw frames from the ingest queue until the channel closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<String>) {
        while let Some(raw) = rx.recv().await {
            if let Err(e) = self.handle_frame(&raw).await {
                warn!("k decoder dropped frame: {e}");
            }
        }
    }

    pub async fn handle_frame(&self, raw: &str) -> Result<(), PipelineError> {
        let update: StreamUpdate = serde_json::from_str(raw).map_err(|e| PipelineError::Decode {
            component: "k_decoder".to_string(),
            reason: e.to_string(),
        })?;

        match update.frame_type.as_str() {
            "error" => self.handle_error(update).await,
            "ok" => self.handle_ok(update).await,
            "orderbook_snapshot" => self.handle_snapshot(update).await,
            "orderbook_delta" => self.handle_delta(update).await,
            "ticker_v2" => self.handle_ticker(update).await,
            other => {
                debug!(frame_type = other, "unhandled venue-k frame type, ignoring");
                Ok(())
            }
        }
    }

    async fn handle_error(&self, update: StreamUpdate) -> Result<(), PipelineError> {
        let reason = update.msg.get("msg").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        warn!(reason, "venue-k error frame");
        self.event_bus
            .publish(
                "k.error",
                Event::KError(crate::domain::ErrorEvent {
                    client_id: "k".to_string(),
                    error: reason,
                }),
            )
            .await;
        Ok(())
    }

    async fn handle_ok(&self, update: StreamUpdate) -> Result<(), PipelineError> {
        let data: OkData = serde_json::from_value(update.msg).map_err(|e| PipelineError::Decode {
            component: "k_decoder.ok".to_string(),
            reason: e.to_string(),
        })?;
        if let Some(ticker) = data.market_ticker {
            if self.book_store.get(&ticker).is_none() {
                self.book_store.apply_snapshot(&ticker, BTreeMap::new(), BTreeMap::new(), None);
            }
        }
        Ok(())
    }

    async fn handle_snapshot(&self, update: StreamUpdate) -> Result<(), PipelineError> {
        let data: OrderbookSnapshotData =
            serde_json::from_value(update.msg).map_err(|e| PipelineError::Decode {
                component: "k_decoder.orderbook_snapshot".to_string(),
                reason: e.to_string(),
            })?;

        let before = self.book_store.get(&data.market_ticker);
        let yes_levels: BTreeMap<i64, i64> = data.yes.iter().filter(|l| l[1] > 0).map(|l| (l[0], l[1])).collect();
        let no_levels: BTreeMap<i64, i64> = data.no.iter().filter(|l| l[1] > 0).map(|l| (l[0], l[1])).collect();

        self.book_store.apply_snapshot(&data.market_ticker, yes_levels, no_levels, update.seq);

        self.emit_book_events(&data.market_ticker, before).await;
        Ok(())
    }

    async fn handle_delta(&self, update: StreamUpdate) -> Result<(), PipelineError> {
        let data: OrderbookDeltaData =
            serde_json::from_value(update.msg).map_err(|e| PipelineError::Decode {
                component: "k_decoder.orderbook_delta".to_string(),
                reason: e.to_string(),
            })?;
        let seq = update.seq.ok_or_else(|| PipelineError::Decode {
            component: "k_decoder.orderbook_delta".to_string(),
            reason: "missing seq".to_string(),
        })?;

        if self.book_store.get(&data.market_ticker).is_none() {
            return Err(PipelineError::Decode {
                component: "k_decoder.orderbook_delta".to_string(),
                reason: format!("no existing book for {}", data.market_ticker),
            });
        }

        let before = self.book_store.get(&data.market_ticker);
        let side_is_yes = matches!(data.side, WireSide::Yes);
        match self
            .book_store
            .apply_delta(&data.market_ticker, side_is_yes, data.price, data.delta, seq)
        {
            Ok(_) => {
                self.emit_book_events(&data.market_ticker, before).await;
                Ok(())
            }
            Err(PipelineError::SequenceGap { market_key, expected, actual }) => {
                warn!(market_key, expected, actual, "venue-k sequence gap, dropping delta");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn emit_book_events(&self, market_ticker: &str, before: Option<Arc<crate::domain::KBookSnapshot>>) {
        self.event_bus
            .publish(
                "k.orderbook_update",
                Event::KOrderbookUpdate(MarketKeyEvent {
                    market_key: market_ticker.to_string(),
                }),
            )
            .await;

        let after = self.book_store.get(market_ticker);
        let before_best = before.as_ref().map(|s| (s.best_yes_bid(), s.best_no_bid()));
        let after_best = after.as_ref().map(|s| (s.best_yes_bid(), s.best_no_bid()));
        if before_best != after_best {
            self.event_bus
                .publish(
                    "k.bid_ask_updated",
                    Event::KBidAskUpdated(MarketKeyEvent {
                        market_key: market_ticker.to_string(),
                    }),
                )
                .await;
        }
    }

    async fn handle_ticker(&self, update: StreamUpdate) -> Result<(), PipelineError> {
        let data: TickerV2Data = serde_json::from_value(update.msg).map_err(|e| PipelineError::Decode {
            component: "k_decoder.ticker_v2".to_string(),
            reason: e.to_string(),
        })?;

        let mut states = self.ticker_states.write();
        let state = states.entry(data.market_ticker.clone()).or_default();
        if !state.bootstrapped {
            // Best-effort bootstrap from whatever the BookStore already
            // holds for this market; never blocks ingestion on failure.
            if let Some(book) = self.book_store.get(&data.market_ticker) {
                state.yes_bid = book.best_yes_bid().map(|(p, _)| p);
                state.yes_ask = book.best_yes_ask().map(|(p, _)| p);
            }
            state.bootstrapped = true;
        }

        let prev_bid_ask = (state.yes_bid, state.yes_ask);
        if let Some(price) = data.price {
            state.price = Some(price);
        }
        if let Some(bid) = data.yes_bid {
            state.yes_bid = Some(bid);
        }
        if let Some(ask) = data.yes_ask {
            state.yes_ask = Some(ask);
        }
        if let Some(volume) = data.volume {
            state.volume = volume;
        }
        let bid_ask_changed = (state.yes_bid, state.yes_ask) != prev_bid_ask;
        drop(states);

        self.event_bus
            .publish(
                "k.ticker_update",
                Event::KTickerUpdate(TickerUpdateEvent {
                    market_key: data.market_ticker,
                    bid_ask_changed,
                }),
            )
            .await;
        Ok(())
    }

    pub fn ticker_state(&self, market_ticker: &str) -> Option<KTickerState> {
        self.ticker_states.read().get(market_ticker).cloned()
    }
}

#[allow(dead_code)]
fn side_label(side: KSide) -> &'static str {
    match side {
        KSide::Yes => "yes",
        KSide::No => "no",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> KDecoder {
        KDecoder::new(KBookStore::new(), EventBus::new())
    }

    #[tokio::test]
    async fn snapshot_then_delta_updates_bests() {
        let decoder = decoder();
        let snapshot = r#"{"type":"orderbook_snapshot","sid":1,"seq":5,"msg":{"market_ticker":"M","yes":[[1,95010]],"no":[[98,8285],[97,28659]]}}"#;
        decoder.handle_frame(snapshot).await.unwrap();

        let delta = r#"{"type":"orderbook_delta","sid":1,"seq":6,"msg":{"market_ticker":"M","price":73,"delta":26,"side":"yes"}}"#;
        decoder.handle_frame(delta).await.unwrap();

        let book = decoder.book_store().get("M").unwrap();
        assert_eq!(book.best_yes_bid(), Some((73, 26)));
        assert_eq!(book.best_no_bid(), Some((98, 8285)));
    }

    #[tokio::test]
    async fn sequence_gap_is_logged_and_dropped() {
        let decoder = decoder();
        let snapshot = r#"{"type":"orderbook_snapshot","sid":1,"seq":5,"msg":{"market_ticker":"M","yes":[[1,95010]],"no":[]}}"#;
        decoder.handle_frame(snapshot).await.unwrap();
        let gap = r#"{"type":"orderbook_delta","sid":1,"seq":8,"msg":{"market_ticker":"M","price":50,"delta":10,"side":"yes"}}"#;
        decoder.handle_frame(gap).await.unwrap();

        let book = decoder.book_store().get("M").unwrap();
        assert_eq!(book.best_yes_bid(), Some((1, 95010)));
    }

    #[tokio::test]
    async fn ok_frame_initializes_empty_book() {
        let decoder = decoder();
        let ok = r#"{"type":"ok","sid":1,"msg":{"market_ticker":"NEW"}}"#;
        decoder.handle_frame(ok).await.unwrap();
        let book = decoder.book_store().get("NEW").unwrap();
        assert!(book.yes_levels.is_empty());
    }
}

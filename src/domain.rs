//! Shared domain types: the data model every component reads or writes.
//!
//! Split per the two venues where their representations genuinely differ
//! (integer cents vs decimal strings) rather than forcing one shape on
//! both — see `KBookSnapshot`/`PBookSnapshot` below.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

pub const ECONOMIC_SANITY_TOLERANCE: f64 = 0.01;

/// venue-K side: YES/NO. venue-P side: BID/ASK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KSide {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PSide {
    Bid,
    Ask,
}

/// One resting level on the venue-K book: price in whole cents, size in
/// contracts. A level with `size <= 0` must not be retained by any
/// BookStore — callers remove it instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KPriceLevel {
    pub price_cents: i64,
    pub size: i64,
}

/// One resting level on the venue-P book. `price_str` is the canonical
/// decimal-string identity used for all lookups and removals; `price`
/// is the parsed value kept only for sort ordering and arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct PPriceLevel {
    pub price_str: String,
    pub price: f64,
    pub size: f64,
}

/// Immutable snapshot of one venue-K market's YES and NO books.
#[derive(Debug, Clone)]
pub struct KBookSnapshot {
    pub market_ticker: String,
    pub yes_levels: BTreeMap<i64, i64>,
    pub no_levels: BTreeMap<i64, i64>,
    pub last_seq: Option<i64>,
    pub last_update: std::time::Instant,
}

impl KBookSnapshot {
    pub fn empty(market_ticker: impl Into<String>) -> Self {
        Self {
            market_ticker: market_ticker.into(),
            yes_levels: BTreeMap::new(),
            no_levels: BTreeMap::new(),
            last_seq: None,
            last_update: std::time::Instant::now(),
        }
    }

    pub fn best_yes_bid(&self) -> Option<(i64, i64)> {
        self.yes_levels.iter().next_back().map(|(p, q)| (*p, *q))
    }

    pub fn best_no_bid(&self) -> Option<(i64, i64)> {
        self.no_levels.iter().next_back().map(|(p, q)| (*p, *q))
    }

    /// Derived: YES-ask = 100 - best NO bid, at the NO bid's quantity.
    pub fn best_yes_ask(&self) -> Option<(i64, i64)> {
        self.best_no_bid().map(|(p, q)| (100 - p, q))
    }

    /// Derived: NO-ask = 100 - best YES bid, at the YES bid's quantity.
    pub fn best_no_ask(&self) -> Option<(i64, i64)> {
        self.best_yes_bid().map(|(p, q)| (100 - p, q))
    }
}

/// Immutable snapshot of one venue-P asset's book (one side of a pair:
/// either the YES token or the NO token).
#[derive(Debug, Clone)]
pub struct PBookSnapshot {
    pub asset_id: String,
    pub bids: Vec<PPriceLevel>,
    pub asks: Vec<PPriceLevel>,
    pub last_hash: Option<String>,
    pub last_update: std::time::Instant,
    /// Set once a `book` frame has been applied. Distinct from
    /// `bids.is_empty() && asks.is_empty()`, which a legitimate empty
    /// snapshot also satisfies.
    pub snapshot_applied: bool,
}

impl PBookSnapshot {
    pub fn empty(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            last_hash: None,
            last_update: std::time::Instant::now(),
            snapshot_applied: false,
        }
    }

    /// Bids are kept sorted ascending by price; best bid is the last.
    pub fn best_bid(&self) -> Option<&PPriceLevel> {
        self.bids.last()
    }

    /// Asks are kept sorted ascending by price; best ask is the first.
    pub fn best_ask(&self) -> Option<&PPriceLevel> {
        self.asks.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArbitrageDirection {
    KToP,
    PToK,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub k_size: f64,
    pub p_size: f64,
    pub min: f64,
    pub limiting_factor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub pair_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub spread: f64,
    pub direction: ArbitrageDirection,
    pub side: KSide,
    pub k_price: f64,
    pub p_price: f64,
    pub k_market_key: String,
    pub p_asset_id: String,
    pub execution_size: f64,
    pub execution_info: ExecutionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummarySide {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub yes: MarketSummarySide,
    pub no: MarketSummarySide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub market_key: String,
    pub platform: String,
    pub summary: MarketSummary,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct MarketPair {
    pub pair_id: String,
    pub k_ticker: String,
    pub p_yes_id: String,
    pub p_no_id: String,
}

#[derive(Debug, Clone)]
pub struct CustomPredicate {
    pub min_volume: Option<f64>,
    pub price_range: Option<(f64, f64)>,
}

impl CustomPredicate {
    pub fn accepts(&self, ticker: &TickerSnapshot) -> bool {
        if let Some(min_volume) = self.min_volume {
            let vol = ticker.summary.yes.volume + ticker.summary.no.volume;
            if vol < min_volume {
                return false;
            }
        }
        if let Some((min, max)) = self.price_range {
            let in_range = |p: Option<f64>| p.map(|p| p >= min && p <= max).unwrap_or(false);
            if !in_range(ticker.summary.yes.bid) && !in_range(ticker.summary.yes.ask) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub enum Subscription {
    All,
    Platform(String),
    Market(String),
    Custom(CustomPredicate),
}

// --- EventBus payload types -------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectionStatusEvent {
    pub client_id: String,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub client_id: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct MarketKeyEvent {
    pub market_key: String,
}

#[derive(Debug, Clone)]
pub struct TickerUpdateEvent {
    pub market_key: String,
    pub bid_ask_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordPhase {
    Prepare,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordOperationType {
    MarketSubscribe,
    MarketUnsubscribe,
    SettingsChange,
}

#[derive(Debug, Clone)]
pub struct CoordinationPhaseEvent {
    pub operation_id: String,
    pub operation_type: CoordOperationType,
    pub phase: CoordPhase,
    pub expected_components: Vec<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ComponentResponseEvent {
    pub component_id: String,
    pub operation_id: String,
    pub success: bool,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct SettingsChangeRequest {
    pub min_spread_threshold: Option<f64>,
    pub min_trade_size: Option<f64>,
    pub correlation_id: String,
}

#[derive(Debug, Clone)]
pub struct SettingsUpdatedEvent {
    pub correlation_id: String,
    pub changed_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SettingsErrorEvent {
    pub correlation_id: String,
    pub reason: String,
}

/// Every event type carried over the bus. Topic names are dot-namespaced
/// (`k.orderbook_update`, `coordination.market_subscribe.prepare`, ...);
/// the topic string lives alongside the publish call, not on the variant,
/// so one handler can subscribe to several related topics.
#[derive(Debug, Clone)]
pub enum Event {
    KOrderbookUpdate(MarketKeyEvent),
    KBidAskUpdated(MarketKeyEvent),
    KTickerUpdate(TickerUpdateEvent),
    KError(ErrorEvent),
    POrderbookUpdate(MarketKeyEvent),
    PBidAskUpdated(MarketKeyEvent),
    PTickerUpdate(TickerUpdateEvent),
    VenueConnectionStatus(ConnectionStatusEvent),
    VenueClientError(ErrorEvent),
    ArbitrageAlert(ArbitrageOpportunity),
    TickerPublished(TickerSnapshot),
    CoordinationPhase(CoordinationPhaseEvent),
    CoordinationResponse(ComponentResponseEvent),
    SettingsChangeRequested(SettingsChangeRequest),
    SettingsUpdated(SettingsUpdatedEvent),
    SettingsError(SettingsErrorEvent),
}

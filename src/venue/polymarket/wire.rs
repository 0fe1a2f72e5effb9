//! Venue-P wire protocol types: snapshot-then-patch CLOB book frames.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeCommand<'a> {
    pub auth: &'a str,
    pub channel: &'a str,
    pub market: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireLevel {
    pub price: String,
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event_type")]
#[serde(rename_all = "snake_case")]
pub enum PEvent {
    Book {
        asset_id: String,
        #[serde(default)]
        bids: Vec<WireLevel>,
        #[serde(default)]
        asks: Vec<WireLevel>,
        hash: Option<String>,
    },
    PriceChange {
        asset_id: Option<String>,
        #[serde(default)]
        price_changes: Vec<PriceChangeEntry>,
    },
    TickSizeChange {
        asset_id: String,
        new_tick_size: String,
        side: String,
    },
    LastTradePrice {
        asset_id: String,
        price: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeEntry {
    pub asset_id: String,
    pub price: String,
    pub side: PSideWire,
    pub size: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PSideWire {
    Buy,
    Sell,
}

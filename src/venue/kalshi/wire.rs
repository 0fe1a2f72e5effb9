//! Venue-K wire protocol types: the five inbound frame shapes and the
//! one outbound subscription command.

use serde::{Deserialize, Serialize};

pub type RawPriceLevel = [i64; 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireSide {
    Yes,
    No,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeParams<'a> {
    pub channels: &'a [&'a str],
    pub market_tickers: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeCommand<'a> {
    pub id: u64,
    pub cmd: &'a str,
    pub params: SubscribeParams<'a>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamUpdate {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub sid: Option<i64>,
    pub seq: Option<i64>,
    pub msg: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OkData {
    pub market_ticker: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub code: Option<i64>,
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookSnapshotData {
    pub market_ticker: String,
    #[serde(default)]
    pub yes: Vec<RawPriceLevel>,
    #[serde(default)]
    pub no: Vec<RawPriceLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookDeltaData {
    pub market_ticker: String,
    pub price: i64,
    pub delta: i64,
    pub side: WireSide,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerV2Data {
    pub market_ticker: String,
    pub price: Option<i64>,
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub volume: Option<i64>,
}

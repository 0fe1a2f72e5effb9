//! Pure arbitrage evaluation over a snapshot triple. Grounded on
//! `arbitrage_calculator.py`'s four-strategy spread calculation, rewritten
//! as a side-effect-free function over immutable book snapshots.

use chrono::Utc;

use crate::arbitrage::fees::{effective_ask, effective_bid};
use crate::domain::{ArbitrageDirection, ArbitrageOpportunity, ExecutionInfo, KBookSnapshot, KSide, PBookSnapshot};

const STANDARD_CONTRACTS: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct ArbitrageSettings {
    pub min_spread_threshold: f64,
    pub min_trade_size: f64,
}

/// Evaluates all four cross-venue strategies for one pair and returns the
/// opportunities clearing both the spread and trade-size thresholds.
pub fn evaluate(
    pair_id: &str,
    k: &KBookSnapshot,
    p_yes: &PBookSnapshot,
    p_no: &PBookSnapshot,
    settings: &ArbitrageSettings,
) -> Vec<ArbitrageOpportunity> {
    let (Some((k_yes_bid_cents, k_yes_bid_size)), Some((k_no_bid_cents, k_no_bid_size))) =
        (k.best_yes_bid(), k.best_no_bid())
    else {
        return Vec::new();
    };
    let Some((k_yes_ask_cents, k_yes_ask_size)) = k.best_yes_ask() else {
        return Vec::new();
    };
    let Some((k_no_ask_cents, k_no_ask_size)) = k.best_no_ask() else {
        return Vec::new();
    };

    let (Some(p_yes_bid), Some(p_yes_ask)) = (p_yes.best_bid(), p_yes.best_ask()) else {
        return Vec::new();
    };
    let (Some(p_no_bid), Some(p_no_ask)) = (p_no.best_bid(), p_no.best_ask()) else {
        return Vec::new();
    };

    let ticker = &k.market_ticker;
    let k_yes_bid = effective_bid(k_yes_bid_cents as f64 / 100.0, STANDARD_CONTRACTS, ticker);
    let k_yes_ask = effective_ask(k_yes_ask_cents as f64 / 100.0, STANDARD_CONTRACTS, ticker);
    let k_no_bid = effective_bid(k_no_bid_cents as f64 / 100.0, STANDARD_CONTRACTS, ticker);
    let k_no_ask = effective_ask(k_no_ask_cents as f64 / 100.0, STANDARD_CONTRACTS, ticker);

    let mut opportunities = Vec::new();
    let timestamp = Utc::now();

    // S1: sell K-YES, buy P-NO
    let s1 = 1.0 - (k_yes_bid + p_no_ask.price);
    if s1 >= settings.min_spread_threshold {
        let info = execution_info(k_yes_bid_size as f64, p_no_ask.size);
        if info.min >= settings.min_trade_size {
            opportunities.push(ArbitrageOpportunity {
                pair_id: pair_id.to_string(),
                timestamp,
                spread: s1,
                direction: ArbitrageDirection::KToP,
                side: KSide::Yes,
                k_price: k_yes_bid,
                p_price: p_no_ask.price,
                k_market_key: k.market_ticker.clone(),
                p_asset_id: p_no.asset_id.clone(),
                execution_size: info.min,
                execution_info: info,
            });
        }
    }

    // S2: sell K-NO, buy P-YES
    let s2 = 1.0 - (k_no_bid + p_yes_ask.price);
    if s2 >= settings.min_spread_threshold {
        let info = execution_info(k_no_bid_size as f64, p_yes_ask.size);
        if info.min >= settings.min_trade_size {
            opportunities.push(ArbitrageOpportunity {
                pair_id: pair_id.to_string(),
                timestamp,
                spread: s2,
                direction: ArbitrageDirection::KToP,
                side: KSide::No,
                k_price: k_no_bid,
                p_price: p_yes_ask.price,
                k_market_key: k.market_ticker.clone(),
                p_asset_id: p_yes.asset_id.clone(),
                execution_size: info.min,
                execution_info: info,
            });
        }
    }

    // S3: sell P-YES, buy K-NO
    let s3 = 1.0 - (p_yes_bid.price + k_no_ask);
    if s3 >= settings.min_spread_threshold {
        let info = execution_info(k_no_ask_size as f64, p_yes_bid.size);
        if info.min >= settings.min_trade_size {
            opportunities.push(ArbitrageOpportunity {
                pair_id: pair_id.to_string(),
                timestamp,
                spread: s3,
                direction: ArbitrageDirection::PToK,
                side: KSide::Yes,
                k_price: k_no_ask,
                p_price: p_yes_bid.price,
                k_market_key: k.market_ticker.clone(),
                p_asset_id: p_yes.asset_id.clone(),
                execution_size: info.min,
                execution_info: info,
            });
        }
    }

    // S4: sell P-NO, buy K-YES
    let s4 = 1.0 - (p_no_bid.price + k_yes_ask);
    if s4 >= settings.min_spread_threshold {
        let info = execution_info(k_yes_ask_size as f64, p_no_bid.size);
        if info.min >= settings.min_trade_size {
            opportunities.push(ArbitrageOpportunity {
                pair_id: pair_id.to_string(),
                timestamp,
                spread: s4,
                direction: ArbitrageDirection::PToK,
                side: KSide::No,
                k_price: k_yes_ask,
                p_price: p_no_bid.price,
                k_market_key: k.market_ticker.clone(),
                p_asset_id: p_no.asset_id.clone(),
                execution_size: info.min,
                execution_info: info,
            });
        }
    }

    opportunities
}

fn execution_info(k_size: f64, p_size: f64) -> ExecutionInfo {
    let min = if k_size > 0.0 && p_size > 0.0 { k_size.min(p_size) } else { 0.0 };
    let limiting_factor = if k_size < p_size { "k" } else { "p" };
    ExecutionInfo {
        k_size,
        p_size,
        min,
        limiting_factor: limiting_factor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PPriceLevel;
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn p_level(price: f64, size: f64) -> PPriceLevel {
        PPriceLevel {
            price_str: price.to_string(),
            price,
            size,
        }
    }

    #[test]
    fn fixture_scenario_finds_k_to_p_yes_opportunity() {
        let mut no_levels = BTreeMap::new();
        no_levels.insert(45, 500i64);
        let k = KBookSnapshot {
            market_ticker: "SOME-TICKER".to_string(),
            yes_levels: {
                let mut m = BTreeMap::new();
                m.insert(55, 500i64);
                m
            },
            no_levels,
            last_seq: Some(1),
            last_update: Instant::now(),
        };
        let p_yes = PBookSnapshot {
            asset_id: "yes-asset".to_string(),
            bids: vec![p_level(0.54, 100.0)],
            asks: vec![p_level(0.56, 100.0)],
            last_hash: None,
            last_update: Instant::now(),
            snapshot_applied: true,
        };
        let p_no = PBookSnapshot {
            asset_id: "no-asset".to_string(),
            bids: vec![p_level(0.39, 100.0)],
            asks: vec![p_level(0.40, 500.0)],
            last_hash: None,
            last_update: Instant::now(),
            snapshot_applied: true,
        };
        let settings = ArbitrageSettings {
            min_spread_threshold: 0.02,
            min_trade_size: 1.0,
        };

        let opportunities = evaluate("PAIR", &k, &p_yes, &p_no, &settings);
        let s1 = opportunities
            .iter()
            .find(|o| o.direction == ArbitrageDirection::KToP && o.side == KSide::Yes)
            .expect("expected S1 opportunity");
        assert!((s1.spread - 0.05).abs() < 1e-6);
    }

    #[test]
    fn fixture_scenario_finds_p_to_k_opportunities_with_asymmetric_book() {
        // yes_bid=55, no_bid=40 (asymmetric) so a crossed yes/no ask binding
        // would shift both spreads and prices.
        let mut yes_levels = BTreeMap::new();
        yes_levels.insert(55, 500i64);
        let mut no_levels = BTreeMap::new();
        no_levels.insert(40, 500i64);
        let k = KBookSnapshot {
            market_ticker: "SOME-TICKER".to_string(),
            yes_levels,
            no_levels,
            last_seq: Some(1),
            last_update: Instant::now(),
        };
        // k_yes_ask = 100 - no_bid = 60, k_no_ask = 100 - yes_bid = 45.
        let p_yes = PBookSnapshot {
            asset_id: "yes-asset".to_string(),
            bids: vec![p_level(0.50, 100.0)],
            asks: vec![p_level(0.90, 100.0)],
            last_hash: None,
            last_update: Instant::now(),
            snapshot_applied: true,
        };
        let p_no = PBookSnapshot {
            asset_id: "no-asset".to_string(),
            bids: vec![p_level(0.35, 100.0)],
            asks: vec![p_level(0.90, 100.0)],
            last_hash: None,
            last_update: Instant::now(),
            snapshot_applied: true,
        };
        let settings = ArbitrageSettings {
            min_spread_threshold: 0.02,
            min_trade_size: 1.0,
        };

        let opportunities = evaluate("PAIR", &k, &p_yes, &p_no, &settings);

        let expected_k_no_ask = effective_ask(0.45, STANDARD_CONTRACTS, "SOME-TICKER");
        let expected_k_yes_ask = effective_ask(0.60, STANDARD_CONTRACTS, "SOME-TICKER");

        let s3 = opportunities
            .iter()
            .find(|o| o.direction == ArbitrageDirection::PToK && o.side == KSide::Yes)
            .expect("expected S3 opportunity (sell P-YES, buy K-NO)");
        assert!(
            (s3.k_price - expected_k_no_ask).abs() < 1e-6,
            "S3 must price K-NO ask as 100 - yes_bid, got {}",
            s3.k_price
        );

        let s4 = opportunities
            .iter()
            .find(|o| o.direction == ArbitrageDirection::PToK && o.side == KSide::No)
            .expect("expected S4 opportunity (sell P-NO, buy K-YES)");
        assert!(
            (s4.k_price - expected_k_yes_ask).abs() < 1e-6,
            "S4 must price K-YES ask as 100 - no_bid, got {}",
            s4.k_price
        );
    }

    #[test]
    fn missing_p_book_yields_no_opportunities() {
        let k = KBookSnapshot::empty("TICKER");
        let p_yes = PBookSnapshot::empty("yes");
        let p_no = PBookSnapshot::empty("no");
        let settings = ArbitrageSettings {
            min_spread_threshold: 0.02,
            min_trade_size: 1.0,
        };
        assert!(evaluate("PAIR", &k, &p_yes, &p_no, &settings).is_empty());
    }

    #[test]
    fn below_min_trade_size_is_dropped() {
        let mut yes_levels = BTreeMap::new();
        yes_levels.insert(55, 500i64);
        let mut no_levels = BTreeMap::new();
        no_levels.insert(45, 500i64);
        let k = KBookSnapshot {
            market_ticker: "TICKER".to_string(),
            yes_levels,
            no_levels,
            last_seq: Some(1),
            last_update: Instant::now(),
        };
        let p_yes = PBookSnapshot {
            asset_id: "yes".to_string(),
            bids: vec![p_level(0.54, 100.0)],
            asks: vec![p_level(0.56, 100.0)],
            last_hash: None,
            last_update: Instant::now(),
            snapshot_applied: true,
        };
        let p_no = PBookSnapshot {
            asset_id: "no".to_string(),
            bids: vec![p_level(0.39, 100.0)],
            asks: vec![p_level(0.40, 0.5)],
            last_hash: None,
            last_update: Instant::now(),
            snapshot_applied: true,
        };
        let settings = ArbitrageSettings {
            min_spread_threshold: 0.02,
            min_trade_size: 1.0,
        };
        let opportunities = evaluate("PAIR", &k, &p_yes, &p_no, &settings);
        assert!(!opportunities.iter().any(|o| o.direction == ArbitrageDirection::KToP && o.side == KSide::Yes));
    }
}

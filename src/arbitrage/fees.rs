//! Venue-K fee-effective pricing. Ported from the platform's trading fee
//! schedule: general trades pay 7%, a fixed set of "maker fee" ticker
//! patterns pay 1.75%, both on `C * P * (1-P)` rounded up to the cent.

/// Ticker substrings subject to the reduced maker fee rate. Matched by
/// substring containment against the full ticker, not prefix or exact
/// match — this mirrors the upstream fee schedule but is a known source
/// of false positives (e.g. a ticker that merely contains "KXGDP" as a
/// substring of an unrelated series would be misclassified).
const MAKER_FEE_TICKERS: &[&str] = &[
    "KXAAAGASM", "KXGDP", "KXPAYROLLS", "KXU3", "KXEGGS", "KXCPI", "KXCPIYOY",
    "KXFEDDECISION", "KXFED", "KXNBA", "KXNBAEAST", "KXNBAWEST", "KXNBASERIES",
    "KXNBAGAME", "KXNHL", "KXNHLEAST", "KXNHLWEST", "KXNHLSERIES", "KXNHLGAME",
    "KXINDY500", "KXPGA", "KXUSOPEN", "KXPGARYDER", "KXTHEOPEN", "KXPGASOLHEIM",
    "KXFOMENSINGLES", "KXFOWOMENSINGLES", "KXWMENSINGLES", "KXWWOMENSINGLES",
    "KXUSOMENSINGLES", "KXUSOWOMENSINGLES", "KXAOMENSINGLES", "KXAOWOMENSINGLES",
    "KXNFLGAME", "KXUEFACL", "KXNBAFINALSMVP", "KXCONNSMYTHE", "KXFOMEN",
    "KXFOWOMEN", "KXNATHANSHD", "KXNATHANDOGS", "KXCLUBWC", "KXTOURDEFRANCE",
    "KXNASCARRACE", "KXATPMATCH", "KXWTAMATCH", "KXMLBASGAME", "KXMLBHRDERBY",
];

const GENERAL_FEE_RATE: f64 = 0.07;
const MAKER_FEE_RATE: f64 = 0.0175;

fn is_maker_fee_ticker(ticker: &str) -> bool {
    MAKER_FEE_TICKERS.iter().any(|pattern| ticker.contains(pattern))
}

/// Trading fee in dollars for `contracts` contracts at `price` (0.0-1.0),
/// rounded up to the nearest cent.
pub fn trading_fee(price: f64, contracts: f64, ticker: &str) -> f64 {
    let rate = if is_maker_fee_ticker(ticker) { MAKER_FEE_RATE } else { GENERAL_FEE_RATE };
    let fee = rate * contracts * price * (1.0 - price);
    (fee * 100.0).ceil() / 100.0
}

/// Effective bid after fees: the raw bid reduced by the per-contract fee,
/// floored at 0.0.
pub fn effective_bid(price: f64, contracts: f64, ticker: &str) -> f64 {
    let fee = trading_fee(price, contracts, ticker);
    (price - fee / contracts).max(0.0)
}

/// Effective ask after fees: the raw ask increased by the per-contract
/// fee, capped at 1.0.
pub fn effective_ask(price: f64, contracts: f64, ticker: &str) -> f64 {
    let fee = trading_fee(price, contracts, ticker);
    (price + fee / contracts).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_ticker_uses_seven_percent_rate() {
        let fee = trading_fee(0.52, 100.0, "OTHERTICKER");
        assert!((fee - 1.75).abs() < 1e-9);
    }

    #[test]
    fn maker_ticker_uses_lower_rate() {
        let fee = trading_fee(0.52, 100.0, "KXNBA-25DEC31-T1");
        assert!((fee - 0.44).abs() < 1e-9);
    }

    #[test]
    fn substring_match_is_intentionally_loose() {
        assert!(is_maker_fee_ticker("SOMETHING-KXNBA-SUFFIX"));
    }

    #[test]
    fn effective_bid_is_reduced_and_floored() {
        let bid = effective_bid(0.01, 100.0, "OTHERTICKER");
        assert!(bid >= 0.0);
        assert!(bid < 0.01);
    }

    #[test]
    fn effective_ask_is_increased_and_capped() {
        let ask = effective_ask(0.99, 100.0, "OTHERTICKER");
        assert!(ask <= 1.0);
        assert!(ask > 0.99);
    }
}

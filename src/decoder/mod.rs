pub mod kalshi;
pub mod polymarket;

pub use kalshi::KDecoder;
pub use polymarket::PDecoder;

pub mod kalshi;
pub mod polymarket;

pub use kalshi::KBookStore;
pub use polymarket::PBookStore;

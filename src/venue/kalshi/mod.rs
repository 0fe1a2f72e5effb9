pub mod auth;
pub mod client;
pub mod wire;

pub use auth::KalshiAuth;
pub use client::{KCommand, KalshiClient, KalshiClientConfig};

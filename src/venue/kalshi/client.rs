//! Venue-K WebSocket session: connect, authenticate, subscribe, forward
//! raw frames verbatim to the [`IngestQueue`], reconnect on failure.
//!
//! Grounded on the `SubscriptionManager` run-loop shape in
//! `scrapers/polymarket_book_store.rs` (command channel + `tokio::select!`
//! over ping/commands/socket read), with auth headers attached the way
//! `dome_websocket.rs::connect_and_stream` attaches its bearer token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::domain::{ConnectionStatusEvent, ErrorEvent, Event};
use crate::event_bus::EventBus;
use crate::ingest::IngestQueue;
use crate::venue::kalshi::auth::KalshiAuth;
use crate::venue::kalshi::wire::{SubscribeCommand, SubscribeParams};

pub enum KCommand {
    AddTicker { ticker: String, correlation_id: u64 },
    RemoveTicker { ticker: String, correlation_id: u64 },
    Shutdown,
}

pub struct KalshiClientConfig {
    pub ws_url: String,
    pub auth: Option<Arc<KalshiAuth>>,
    pub initial_tickers: Vec<String>,
    pub ping_interval: Duration,
    pub reconnect_interval: Duration,
    pub max_retries: u32,
}

pub struct KalshiClient {
    config: KalshiClientConfig,
    ingest: IngestQueue<String>,
    event_bus: EventBus,
    connected: Arc<AtomicBool>,
}

impl KalshiClient {
    pub fn new(config: KalshiClientConfig, ingest: IngestQueue<String>, event_bus: EventBus) -> Self {
        Self {
            config,
            ingest,
            event_bus,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Runs the reconnect loop until `cmd_rx` closes or `Shutdown` is
    /// received. Fatal auth failures stop the loop without retrying;
    /// every other error is retry-eligible up to `max_retries`.
    pub async fn run(&self, mut cmd_rx: mpsc::Receiver<KCommand>) {
        let mut attempt = 0u32;
        let mut tickers = self.config.initial_tickers.clone();

        loop {
            match self.connect_and_stream(&tickers, &mut cmd_rx).await {
                Ok(ShutdownReason::Requested) => {
                    info!("venue-k client shutting down on request");
                    break;
                }
                Ok(ShutdownReason::Disconnected) => {
                    attempt = 0;
                }
                Err(StreamError::Fatal(reason)) => {
                    warn!(reason, "venue-k auth failure is fatal, not retrying");
                    self.set_connected(false, Some(reason)).await;
                    break;
                }
                Err(StreamError::Retryable(reason)) => {
                    attempt += 1;
                    self.set_connected(false, Some(reason.clone())).await;
                    if attempt > self.config.max_retries {
                        warn!(reason, attempt, "venue-k retry budget exhausted");
                        break;
                    }
                    warn!(reason, attempt, "venue-k reconnecting after error");
                    tokio::time::sleep(self.config.reconnect_interval).await;
                }
            }
            // Any ensure_subscribed/addTicker calls processed during the
            // previous session are folded into the resubscribe set.
            tickers = self.collect_pending_tickers(&mut cmd_rx, tickers);
        }
    }

    fn collect_pending_tickers(&self, cmd_rx: &mut mpsc::Receiver<KCommand>, mut tickers: Vec<String>) -> Vec<String> {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                KCommand::AddTicker { ticker, .. } => {
                    if !tickers.contains(&ticker) {
                        tickers.push(ticker);
                    }
                }
                KCommand::RemoveTicker { ticker, .. } => tickers.retain(|t| t != &ticker),
                KCommand::Shutdown => {}
            }
        }
        tickers
    }

    async fn set_connected(&self, connected: bool, error: Option<String>) {
        self.connected.store(connected, Ordering::Relaxed);
        self.event_bus
            .publish(
                "venue.connection_status",
                Event::VenueConnectionStatus(ConnectionStatusEvent {
                    client_id: "k".to_string(),
                    connected,
                }),
            )
            .await;
        if let Some(error) = error {
            self.event_bus
                .publish(
                    "venue.client_error",
                    Event::VenueClientError(ErrorEvent {
                        client_id: "k".to_string(),
                        error,
                    }),
                )
                .await;
        }
    }

    async fn connect_and_stream(
        &self,
        tickers: &[String],
        cmd_rx: &mut mpsc::Receiver<KCommand>,
    ) -> Result<ShutdownReason, StreamError> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::Retryable(e.to_string()))?;

        if let Some(auth) = &self.config.auth {
            let headers = auth
                .auth_headers("GET", "/trade-api/ws/v2")
                .map_err(|e| StreamError::Fatal(e.to_string()))?;
            for (name, value) in headers {
                let value = HeaderValue::from_str(&value).map_err(|e| StreamError::Fatal(e.to_string()))?;
                request.headers_mut().insert(name, value);
            }
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| StreamError::Retryable(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let sub = SubscribeCommand {
            id: 1,
            cmd: "subscribe",
            params: SubscribeParams {
                channels: &["orderbook_delta", "ticker_v2"],
                market_tickers: tickers,
            },
        };
        let sub_json = serde_json::to_string(&sub).map_err(|e| StreamError::Retryable(e.to_string()))?;
        write
            .send(Message::Text(sub_json))
            .await
            .map_err(|e| StreamError::Retryable(e.to_string()))?;

        self.set_connected(true, None).await;

        let mut ping_timer = tokio::time::interval(self.config.ping_interval);
        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return Err(StreamError::Retryable("ping send failed".to_string()));
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(KCommand::Shutdown) | None => return Ok(ShutdownReason::Requested),
                        Some(KCommand::AddTicker { ticker, correlation_id }) => {
                            let _ = send_dynamic_op(&mut write, "addTicker", &ticker, correlation_id).await;
                        }
                        Some(KCommand::RemoveTicker { ticker, correlation_id }) => {
                            let _ = send_dynamic_op(&mut write, "removeTicker", &ticker, correlation_id).await;
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.ingest.put(text);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(ShutdownReason::Disconnected);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(StreamError::Retryable(e.to_string())),
                    }
                }
            }
        }
    }
}

async fn send_dynamic_op(
    write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    cmd: &str,
    ticker: &str,
    correlation_id: u64,
) -> Result<(), ()> {
    let payload = serde_json::json!({
        "id": correlation_id,
        "cmd": cmd,
        "params": { "market_tickers": [ticker] },
    });
    write
        .send(Message::Text(payload.to_string()))
        .await
        .map_err(|_| ())
}

enum ShutdownReason {
    Requested,
    Disconnected,
}

enum StreamError {
    Fatal(String),
    Retryable(String),
}

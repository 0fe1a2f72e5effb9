//! Venue-P WebSocket session: anonymous connect, per-asset subscribe,
//! forward raw frames verbatim, reconnect on failure. Grounded directly
//! on `SubscriptionManager::connect_and_stream` in
//! `scrapers/polymarket_book_store.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::domain::{ConnectionStatusEvent, ErrorEvent, Event};
use crate::event_bus::EventBus;
use crate::ingest::IngestQueue;
use crate::venue::polymarket::wire::SubscribeCommand;

pub enum PCommand {
    AddAsset(String),
    RemoveAsset(String),
    Shutdown,
}

pub struct PolymarketClientConfig {
    pub ws_url: String,
    pub asset_ids: Vec<String>,
    pub ping_interval: Duration,
    pub reconnect_interval: Duration,
    pub max_retries: u32,
}

pub struct PolymarketClient {
    config: PolymarketClientConfig,
    ingest: IngestQueue<String>,
    event_bus: EventBus,
    connected: Arc<AtomicBool>,
}

impl PolymarketClient {
    pub fn new(config: PolymarketClientConfig, ingest: IngestQueue<String>, event_bus: EventBus) -> Self {
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

    pub async fn run(&self, mut cmd_rx: mpsc::Receiver<PCommand>) {
        let mut attempt = 0u32;
        let mut asset_ids = self.config.asset_ids.clone();
        loop {
            match self.connect_and_stream(&asset_ids, &mut cmd_rx).await {
                Ok(ShutdownReason::Requested) => {
                    info!("venue-p client shutting down on request");
                    break;
                }
                Ok(ShutdownReason::Disconnected) => {
                    attempt = 0;
                }
                Err(reason) => {
                    attempt += 1;
                    self.set_connected(false, Some(reason.clone())).await;
                    if attempt > self.config.max_retries {
                        warn!(reason, attempt, "venue-p retry budget exhausted");
                        break;
                    }
                    warn!(reason, attempt, "venue-p reconnecting after error");
                    tokio::time::sleep(self.config.reconnect_interval).await;
                }
            }
            asset_ids = self.collect_pending_assets(&mut cmd_rx, asset_ids);
        }
    }

    fn collect_pending_assets(&self, cmd_rx: &mut mpsc::Receiver<PCommand>, mut asset_ids: Vec<String>) -> Vec<String> {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                PCommand::AddAsset(asset_id) => {
                    if !asset_ids.contains(&asset_id) {
                        asset_ids.push(asset_id);
                    }
                }
                PCommand::RemoveAsset(asset_id) => asset_ids.retain(|a| a != &asset_id),
                PCommand::Shutdown => {}
            }
        }
        asset_ids
    }

    async fn set_connected(&self, connected: bool, error: Option<String>) {
        self.connected.store(connected, Ordering::Relaxed);
        self.event_bus
            .publish(
                "venue.connection_status",
                Event::VenueConnectionStatus(ConnectionStatusEvent {
                    client_id: "p".to_string(),
                    connected,
                }),
            )
            .await;
        if let Some(error) = error {
            self.event_bus
                .publish(
                    "venue.client_error",
                    Event::VenueClientError(ErrorEvent {
                        client_id: "p".to_string(),
                        error,
                    }),
                )
                .await;
        }
    }

    async fn connect_and_stream(
        &self,
        asset_ids: &[String],
        cmd_rx: &mut mpsc::Receiver<PCommand>,
    ) -> Result<ShutdownReason, String> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.config.ws_url)
            .await
            .map_err(|e| e.to_string())?;
        let (mut write, mut read) = ws_stream.split();

        for asset_id in asset_ids {
            let sub = SubscribeCommand {
                auth: "",
                channel: "book",
                market: asset_id,
            };
            let sub_json = serde_json::to_string(&sub).map_err(|e| e.to_string())?;
            write.send(Message::Text(sub_json)).await.map_err(|e| e.to_string())?;
        }

        self.set_connected(true, None).await;

        let mut ping_timer = tokio::time::interval(self.config.ping_interval);
        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return Err("ping send failed".to_string());
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PCommand::Shutdown) | None => return Ok(ShutdownReason::Requested),
                        Some(PCommand::AddAsset(asset_id)) => {
                            let sub = SubscribeCommand { auth: "", channel: "book", market: &asset_id };
                            if let Ok(json) = serde_json::to_string(&sub) {
                                let _ = write.send(Message::Text(json)).await;
                            }
                        }
                        Some(PCommand::RemoveAsset(_)) => {
                            // Venue P has no unsubscribe frame; the asset is simply
                            // dropped from the resubscribe set on next reconnect.
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
                        Some(Err(e)) => return Err(e.to_string()),
                    }
                }
            }
        }
    }
}

enum ShutdownReason {
    Requested,
    Disconnected,
}

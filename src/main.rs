//! Composition root: wires the venue pipelines, the arbitrage pipeline, and
//! the client-facing WebSocket/HTTP surface, then serves them.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dotenv::dotenv;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use market_arb_feed::arbitrage::evaluator::ArbitrageSettings;
use market_arb_feed::arbitrage::manager::ArbitrageManager;
use market_arb_feed::bookstore::{KBookStore, PBookStore};
use market_arb_feed::broadcaster::Broadcaster;
use market_arb_feed::channel_manager::ChannelManager;
use market_arb_feed::config::Config;
use market_arb_feed::coordination::CoordinationBus;
use market_arb_feed::decoder::{KDecoder, PDecoder};
use market_arb_feed::domain::{CustomPredicate, MarketPair, Subscription};
use market_arb_feed::event_bus::EventBus;
use market_arb_feed::ingest::IngestQueue;
use market_arb_feed::pair_registry::PairRegistry;
use market_arb_feed::publisher::{KTickerPublisher, PTickerPublisher};
use market_arb_feed::settings_coordinator::{SettingsCoordinator, SettingsOutcome};
use market_arb_feed::venue::kalshi::{KCommand, KalshiAuth, KalshiClient, KalshiClientConfig};
use market_arb_feed::venue::polymarket::{PCommand, PolymarketClient, PolymarketClientConfig};

const SETTINGS_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Clone)]
struct AppState {
    arbitrage: Arc<ArbitrageManager>,
    settings_coordinator: SettingsCoordinator,
    channel_manager: Arc<ChannelManager>,
    k_cmd_tx: tokio::sync::mpsc::Sender<KCommand>,
    p_cmd_tx: tokio::sync::mpsc::Sender<PCommand>,
    pair_sequence: Arc<std::sync::atomic::AtomicU64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Config::from_env();
    info!(bind_addr = %config.bind_addr, "starting market-data aggregation and arbitrage pipeline");

    let event_bus = EventBus::new();
    let coordination = CoordinationBus::new(event_bus.clone());

    let k_auth = load_kalshi_auth(&config)?;

    let k_book_store = KBookStore::new();
    let p_book_store = PBookStore::new();
    let k_decoder = KDecoder::new(k_book_store.clone(), event_bus.clone());
    let p_decoder = PDecoder::new(p_book_store.clone(), event_bus.clone());

    coordination.register_component("k_book_store");
    coordination.register_component("p_book_store");

    let (k_ingest, k_ingest_rx) = IngestQueue::new("k", config.ingest_queue_capacity);
    let (p_ingest, p_ingest_rx) = IngestQueue::new("p", config.ingest_queue_capacity);

    {
        let k_decoder = k_decoder.clone();
        tokio::spawn(async move { k_decoder.run(k_ingest_rx).await });
    }
    {
        let p_decoder = p_decoder.clone();
        tokio::spawn(async move { p_decoder.run(p_ingest_rx).await });
    }

    let k_client = Arc::new(KalshiClient::new(
        KalshiClientConfig {
            ws_url: config.venue_k_ws_url.clone(),
            auth: k_auth,
            initial_tickers: Vec::new(),
            ping_interval: config.ping_interval,
            reconnect_interval: config.reconnect_interval,
            max_retries: config.max_retries,
        },
        k_ingest,
        event_bus.clone(),
    ));
    let p_client = Arc::new(PolymarketClient::new(
        PolymarketClientConfig {
            ws_url: config.venue_p_ws_url.clone(),
            asset_ids: Vec::new(),
            ping_interval: config.ping_interval,
            reconnect_interval: config.reconnect_interval,
            max_retries: config.max_retries,
        },
        p_ingest,
        event_bus.clone(),
    ));

    let (k_cmd_tx, k_cmd_rx) = tokio::sync::mpsc::channel::<KCommand>(16);
    let (p_cmd_tx, p_cmd_rx) = tokio::sync::mpsc::channel::<PCommand>(16);
    {
        let k_client = k_client.clone();
        tokio::spawn(async move { k_client.run(k_cmd_rx).await });
    }
    {
        let p_client = p_client.clone();
        tokio::spawn(async move { p_client.run(p_cmd_rx).await });
    }

    let (pair_registry, dirty_rx) = PairRegistry::new(k_book_store.clone(), p_book_store.clone(), &event_bus);
    coordination.register_component("pair_registry");

    let arbitrage = Arc::new(ArbitrageManager::new(
        pair_registry.clone(),
        dirty_rx,
        event_bus.clone(),
        coordination.clone(),
        ArbitrageSettings {
            min_spread_threshold: config.min_spread_threshold,
            min_trade_size: config.min_trade_size,
        },
    ));
    let settings_coordinator = SettingsCoordinator::new(event_bus.clone());

    let k_publisher = KTickerPublisher::new(
        k_book_store.clone(),
        k_decoder.clone(),
        event_bus.clone(),
        config.publish_interval,
    );
    let p_publisher = PTickerPublisher::new(
        p_book_store.clone(),
        p_decoder.clone(),
        event_bus.clone(),
        config.publish_interval,
    );
    tokio::spawn(async move { k_publisher.run().await });
    tokio::spawn(async move { p_publisher.run().await });

    let channel_manager = ChannelManager::new();
    coordination.register_component("broadcaster");
    let _broadcaster = Broadcaster::new(channel_manager.clone(), &event_bus, config.client_send_timeout);

    let state = AppState {
        arbitrage,
        settings_coordinator,
        channel_manager,
        k_cmd_tx,
        p_cmd_tx,
        pair_sequence: Arc::new(std::sync::atomic::AtomicU64::new(0)),
    };

    let app = Router::new()
        .route("/ws/ticker", get(websocket_handler))
        .route("/markets/subscribe", post(subscribe_market))
        .route("/arbitrage/settings", post(update_settings))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_arb_feed=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenv::from_path(&candidate);
        }
    }
}

fn load_kalshi_auth(config: &Config) -> Result<Option<Arc<KalshiAuth>>> {
    let (Some(key_id), Some(key_path)) = (&config.venue_k_key_id, &config.venue_k_private_key_path) else {
        warn!("no venue-k credentials configured, connecting unauthenticated subscriptions only");
        return Ok(None);
    };
    let pem = std::fs::read_to_string(key_path).context("failed to read venue-k private key file")?;
    let auth = KalshiAuth::new(key_id.clone(), &pem).context("failed to construct venue-k auth")?;
    Ok(Some(Arc::new(auth)))
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct SubscribeMarketRequest {
    platform: String,
    market_identifier: String,
}

async fn subscribe_market(State(state): State<AppState>, Json(req): Json<SubscribeMarketRequest>) -> Response {
    if req.platform != "k" && req.platform != "p" {
        return Json(serde_json::json!({
            "success": false,
            "status": "rejected",
            "error": format!("unknown platform {}", req.platform),
        }))
        .into_response();
    }

    let sequence = state.pair_sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let pair_id = format!("pair-{sequence}");
    let pair = MarketPair {
        pair_id: pair_id.clone(),
        k_ticker: if req.platform == "k" { req.market_identifier.clone() } else { String::new() },
        p_yes_id: if req.platform == "p" { req.market_identifier.clone() } else { String::new() },
        p_no_id: String::new(),
    };

    match state.arbitrage.add_pair(pair).await {
        Ok(()) => {
            if req.platform == "k" {
                let _ = state
                    .k_cmd_tx
                    .send(KCommand::AddTicker { ticker: req.market_identifier.clone(), correlation_id: sequence })
                    .await;
            } else {
                let _ = state.p_cmd_tx.send(PCommand::AddAsset(req.market_identifier.clone())).await;
            }
            Json(serde_json::json!({
                "success": true,
                "status": "subscribed",
                "market_id": req.market_identifier,
                "websocket_url": "/ws/ticker",
            }))
            .into_response()
        }
        Err(e) => Json(serde_json::json!({
            "success": false,
            "status": "error",
            "error": e.to_string(),
        }))
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SettingsRequest {
    min_spread_threshold: Option<f64>,
    min_trade_size: Option<f64>,
}

async fn update_settings(State(state): State<AppState>, Json(req): Json<SettingsRequest>) -> Response {
    let outcome = state
        .settings_coordinator
        .request_change(req.min_spread_threshold, req.min_trade_size, SETTINGS_REQUEST_TIMEOUT)
        .await;

    match outcome {
        Ok(SettingsOutcome::Updated(e)) => {
            let settings = state.arbitrage.settings();
            Json(serde_json::json!({
                "success": true,
                "changed_fields": e.changed_fields,
                "min_spread_threshold": settings.min_spread_threshold,
                "min_trade_size": settings.min_trade_size,
            }))
            .into_response()
        }
        Ok(SettingsOutcome::Error(e)) => Json(serde_json::json!({
            "success": false,
            "error": e.reason,
        }))
        .into_response(),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": e.to_string(),
        }))
        .into_response(),
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(256);
    state.channel_manager.register_client(client_id.clone(), tx);

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, &client_id, &text, &mut socket).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.channel_manager.unregister_client(&client_id);
}

async fn handle_client_frame(state: &AppState, client_id: &str, text: &str, socket: &mut WebSocket) {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        send_error(socket, "invalid JSON frame").await;
        return;
    };
    let frame_type = frame.get("type").and_then(|v| v.as_str()).unwrap_or_default();

    match frame_type {
        "subscribe_market" => {
            let Some(market_id) = frame.get("market_id").and_then(|v| v.as_str()) else {
                send_error(socket, "subscribe_market requires market_id").await;
                return;
            };
            state.channel_manager.subscribe(client_id, Subscription::Market(market_id.to_string()));
            send_confirmation(socket, "subscription_confirmed", market_id).await;
        }
        "subscribe_platform" => {
            let Some(platform) = frame.get("platform").and_then(|v| v.as_str()) else {
                send_error(socket, "subscribe_platform requires platform").await;
                return;
            };
            state.channel_manager.subscribe(client_id, Subscription::Platform(platform.to_string()));
            send_confirmation(socket, "subscription_confirmed", platform).await;
        }
        "unsubscribe_market" => {
            let Some(market_id) = frame.get("market_id").and_then(|v| v.as_str()) else {
                send_error(socket, "unsubscribe_market requires market_id").await;
                return;
            };
            state.channel_manager.unsubscribe_market(client_id, market_id);
            send_confirmation(socket, "unsubscription_confirmed", market_id).await;
        }
        "unsubscribe_platform" => {
            let Some(platform) = frame.get("platform").and_then(|v| v.as_str()) else {
                send_error(socket, "unsubscribe_platform requires platform").await;
                return;
            };
            state.channel_manager.unsubscribe_platform(client_id, platform);
            send_confirmation(socket, "unsubscription_confirmed", platform).await;
        }
        "subscribe_custom" => {
            let min_volume = frame.get("min_volume").and_then(|v| v.as_f64());
            let price_range = match (frame.get("price_min").and_then(|v| v.as_f64()), frame.get("price_max").and_then(|v| v.as_f64())) {
                (Some(min), Some(max)) => Some((min, max)),
                _ => None,
            };
            state.channel_manager.subscribe(client_id, Subscription::Custom(CustomPredicate { min_volume, price_range }));
            send_confirmation(socket, "subscription_confirmed", "custom").await;
        }
        other => {
            send_error(socket, &format!("unknown frame type {other}")).await;
        }
    }
}

async fn send_confirmation(socket: &mut WebSocket, kind: &str, subject: &str) {
    let payload = serde_json::json!({ "type": kind, "subject": subject }).to_string();
    let _ = socket.send(Message::Text(payload)).await;
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let payload = serde_json::json!({ "type": "error", "message": message }).to_string();
    let _ = socket.send(Message::Text(payload)).await;
}

//! Wraps [`PairRegistry`] with dedup, settings, and coordinated pair
//! lifecycle. Grounded on `arbitrage/engine.rs::ArbitrageEngine`'s struct
//! shape (shared state behind an async lock, a background scan loop) and
//! on `coordination_bus.py` for the add/remove-pair 2PC contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::arbitrage::evaluator::ArbitrageSettings;
use crate::coordination::CoordinationBus;
use crate::domain::{CoordOperationType, Event, MarketPair};
use crate::error::PipelineError;
use crate::event_bus::EventBus;
use crate::pair_registry::PairRegistry;

const DEDUP_WINDOW: Duration = Duration::from_secs(5);
const DEDUP_RELATIVE_THRESHOLD: f64 = 0.1;
const DEFAULT_COORD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ArbitrageManager {
    registry: PairRegistry,
    event_bus: EventBus,
    coordination: CoordinationBus,
    settings: Arc<RwLock<ArbitrageSettings>>,
    dedup: Arc<RwLock<HashMap<String, (f64, Instant)>>>,
}

impl ArbitrageManager {
    pub fn new(
        registry: PairRegistry,
        dirty_rx: mpsc::Receiver<String>,
        event_bus: EventBus,
        coordination: CoordinationBus,
        settings: ArbitrageSettings,
    ) -> Self {
        let manager = Self {
            registry,
            event_bus,
            coordination,
            settings: Arc::new(RwLock::new(settings)),
            dedup: Arc::new(RwLock::new(HashMap::new())),
        };
        manager.spawn_evaluation_loop(dirty_rx);
        manager.subscribe_settings_requests();
        manager
    }

    fn spawn_evaluation_loop(&self, mut dirty_rx: mpsc::Receiver<String>) {
        let registry = self.registry.clone();
        let event_bus = self.event_bus.clone();
        let settings = self.settings.clone();
        let dedup = self.dedup.clone();
        tokio::spawn(async move {
            while let Some(pair_id) = dirty_rx.recv().await {
                let current = *settings.read();
                let opportunities = registry.evaluate(&pair_id, &current);
                for opportunity in opportunities {
                    let key = format!("{}:{:?}:{:?}", opportunity.pair_id, opportunity.direction, opportunity.side);
                    if is_duplicate(&dedup, &key, opportunity.spread) {
                        continue;
                    }
                    event_bus.publish("arbitrage.alert", Event::ArbitrageAlert(opportunity)).await;
                }
            }
        });
    }

    fn subscribe_settings_requests(&self) {
        let settings = self.settings.clone();
        let coordination = self.coordination.clone();
        let event_bus = self.event_bus.clone();
        let event_bus_for_publish = event_bus.clone();
        event_bus.subscribe(
            "arbitrage.settings_change_requested",
            Arc::new(move |event: Event| {
                let settings = settings.clone();
                let coordination = coordination.clone();
                let event_bus = event_bus_for_publish.clone();
                Box::pin(async move {
                    if let Event::SettingsChangeRequested(req) = event {
                        apply_settings_change(&settings, &coordination, &event_bus, req).await;
                    }
                    Ok(())
                })
            }),
        );
    }

    pub async fn add_pair(&self, pair: MarketPair) -> Result<(), PipelineError> {
        let data = json!({
            "op": "add_pair",
            "pair_id": pair.pair_id,
            "k_ticker": pair.k_ticker,
            "p_yes_id": pair.p_yes_id,
            "p_no_id": pair.p_no_id,
        });
        let expected = self.coordination.registered_components();
        self.coordination
            .coordinate_operation(CoordOperationType::MarketSubscribe, data, expected, DEFAULT_COORD_TIMEOUT)
            .await?;
        self.registry.add_pair(pair);
        Ok(())
    }

    pub async fn remove_pair(&self, pair_id: &str) -> Result<(), PipelineError> {
        let data = json!({ "op": "remove_pair", "pair_id": pair_id });
        let expected = self.coordination.registered_components();
        self.coordination
            .coordinate_operation(CoordOperationType::MarketUnsubscribe, data, expected, DEFAULT_COORD_TIMEOUT)
            .await?;
        self.registry.remove_pair(pair_id);
        Ok(())
    }

    pub fn settings(&self) -> ArbitrageSettings {
        *self.settings.read()
    }
}

fn is_duplicate(dedup: &Arc<RwLock<HashMap<String, (f64, Instant)>>>, key: &str, spread: f64) -> bool {
    let mut dedup = dedup.write();
    if let Some((last_spread, seen_at)) = dedup.get(key) {
        if seen_at.elapsed() < DEDUP_WINDOW {
            let relative_change = if *last_spread != 0.0 { ((spread - last_spread) / last_spread).abs() } else { 1.0 };
            if relative_change < DEDUP_RELATIVE_THRESHOLD {
                return true;
            }
        }
    }
    dedup.insert(key.to_string(), (spread, Instant::now()));
    false
}

fn validate_settings(min_spread_threshold: Option<f64>, min_trade_size: Option<f64>) -> Result<(), String> {
    if let Some(t) = min_spread_threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(format!("min_spread_threshold {t} out of range [0,1]"));
        }
    }
    if let Some(s) = min_trade_size {
        if s < 0.0 {
            return Err(format!("min_trade_size {s} must be >= 0"));
        }
    }
    Ok(())
}

async fn apply_settings_change(
    settings: &Arc<RwLock<ArbitrageSettings>>,
    coordination: &CoordinationBus,
    event_bus: &EventBus,
    req: crate::domain::SettingsChangeRequest,
) {
    if let Err(reason) = validate_settings(req.min_spread_threshold, req.min_trade_size) {
        warn!(correlation_id = req.correlation_id, reason, "settings change rejected");
        event_bus
            .publish(
                "arbitrage.settings_error",
                Event::SettingsError(crate::domain::SettingsErrorEvent {
                    correlation_id: req.correlation_id,
                    reason,
                }),
            )
            .await;
        return;
    }

    let data = json!({
        "min_spread_threshold": req.min_spread_threshold,
        "min_trade_size": req.min_trade_size,
    });
    let expected = coordination.registered_components();
    let outcome = coordination
        .coordinate_operation(CoordOperationType::SettingsChange, data, expected, DEFAULT_COORD_TIMEOUT)
        .await;

    match outcome {
        Ok(_) => {
            let mut changed_fields = Vec::new();
            let mut current = settings.write();
            if let Some(t) = req.min_spread_threshold {
                current.min_spread_threshold = t;
                changed_fields.push("min_spread_threshold".to_string());
            }
            if let Some(s) = req.min_trade_size {
                current.min_trade_size = s;
                changed_fields.push("min_trade_size".to_string());
            }
            drop(current);
            info!(correlation_id = req.correlation_id, ?changed_fields, "settings updated");
            event_bus
                .publish(
                    "arbitrage.settings_updated",
                    Event::SettingsUpdated(crate::domain::SettingsUpdatedEvent {
                        correlation_id: req.correlation_id,
                        changed_fields,
                    }),
                )
                .await;
        }
        Err(e) => {
            warn!(correlation_id = req.correlation_id, "settings coordination failed: {e}");
            event_bus
                .publish(
                    "arbitrage.settings_error",
                    Event::SettingsError(crate::domain::SettingsErrorEvent {
                        correlation_id: req.correlation_id,
                        reason: e.to_string(),
                    }),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_threshold_out_of_range() {
        assert!(validate_settings(Some(1.5), None).is_err());
    }

    #[test]
    fn rejects_negative_trade_size() {
        assert!(validate_settings(None, Some(-1.0)).is_err());
    }

    #[test]
    fn accepts_valid_settings() {
        assert!(validate_settings(Some(0.03), Some(5.0)).is_ok());
    }

    #[test]
    fn dedup_suppresses_similar_spread_within_window() {
        let dedup = Arc::new(RwLock::new(HashMap::new()));
        assert!(!is_duplicate(&dedup, "k", 0.05));
        assert!(is_duplicate(&dedup, "k", 0.051));
    }

    #[test]
    fn dedup_allows_large_spread_change() {
        let dedup = Arc::new(RwLock::new(HashMap::new()));
        assert!(!is_duplicate(&dedup, "k", 0.05));
        assert!(!is_duplicate(&dedup, "k", 0.2));
    }
}

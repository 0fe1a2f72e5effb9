//! Request/response bridge for arbitrage settings changes, per the
//! correlation-id one-shot pattern described for coordinated operations.
//! This is the requester side; [`crate::arbitrage::manager::ArbitrageManager`]
//! is the responder that validates and applies the change under 2PC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::domain::{Event, SettingsChangeRequest, SettingsErrorEvent, SettingsUpdatedEvent};
use crate::error::PipelineError;
use crate::event_bus::EventBus;

#[derive(Debug, Clone)]
pub enum SettingsOutcome {
    Updated(SettingsUpdatedEvent),
    Error(SettingsErrorEvent),
}

#[derive(Clone)]
pub struct SettingsCoordinator {
    event_bus: EventBus,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<SettingsOutcome>>>>,
}

impl SettingsCoordinator {
    pub fn new(event_bus: EventBus) -> Self {
        let coordinator = Self {
            event_bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
        };
        coordinator.subscribe();
        coordinator
    }

    fn subscribe(&self) {
        let pending = self.pending.clone();
        self.event_bus.subscribe(
            "arbitrage.settings_updated",
            Arc::new(move |event: Event| {
                let pending = pending.clone();
                Box::pin(async move {
                    if let Event::SettingsUpdated(e) = event {
                        if let Some(tx) = pending.lock().remove(&e.correlation_id) {
                            let _ = tx.send(SettingsOutcome::Updated(e));
                        }
                    }
                    Ok(())
                })
            }),
        );

        let pending = self.pending.clone();
        self.event_bus.subscribe(
            "arbitrage.settings_error",
            Arc::new(move |event: Event| {
                let pending = pending.clone();
                Box::pin(async move {
                    if let Event::SettingsError(e) = event {
                        if let Some(tx) = pending.lock().remove(&e.correlation_id) {
                            let _ = tx.send(SettingsOutcome::Error(e));
                        }
                    }
                    Ok(())
                })
            }),
        );
    }

    pub async fn request_change(
        &self,
        min_spread_threshold: Option<f64>,
        min_trade_size: Option<f64>,
        timeout: Duration,
    ) -> Result<SettingsOutcome, PipelineError> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id.clone(), tx);

        self.event_bus
            .publish(
                "arbitrage.settings_change_requested",
                Event::SettingsChangeRequested(SettingsChangeRequest {
                    min_spread_threshold,
                    min_trade_size,
                    correlation_id: correlation_id.clone(),
                }),
            )
            .await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(PipelineError::Coordination {
                operation_id: correlation_id,
                reason: "settings response channel dropped".to_string(),
            }),
            Err(_) => {
                self.pending.lock().remove(&correlation_id);
                Err(PipelineError::Coordination {
                    operation_id: correlation_id,
                    reason: "settings change timed out".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::evaluator::ArbitrageSettings;
    use crate::arbitrage::manager::ArbitrageManager;
    use crate::bookstore::{KBookStore, PBookStore};
    use crate::coordination::CoordinationBus;
    use crate::pair_registry::PairRegistry;

    #[tokio::test]
    async fn valid_change_round_trips_to_updated() {
        let event_bus = EventBus::new();
        let coordination = CoordinationBus::new(event_bus.clone());
        let (registry, dirty_rx) = PairRegistry::new(KBookStore::new(), PBookStore::new(), &event_bus);
        let _manager = ArbitrageManager::new(
            registry,
            dirty_rx,
            event_bus.clone(),
            coordination,
            ArbitrageSettings {
                min_spread_threshold: 0.02,
                min_trade_size: 1.0,
            },
        );
        let coordinator = SettingsCoordinator::new(event_bus);

        let outcome = coordinator
            .request_change(Some(0.03), None, Duration::from_secs(1))
            .await
            .unwrap();
        match outcome {
            SettingsOutcome::Updated(e) => assert_eq!(e.changed_fields, vec!["min_spread_threshold".to_string()]),
            SettingsOutcome::Error(e) => panic!("expected update, got error: {}", e.reason),
        }
    }

    #[tokio::test]
    async fn invalid_change_round_trips_to_error() {
        let event_bus = EventBus::new();
        let coordination = CoordinationBus::new(event_bus.clone());
        let (registry, dirty_rx) = PairRegistry::new(KBookStore::new(), PBookStore::new(), &event_bus);
        let _manager = ArbitrageManager::new(
            registry,
            dirty_rx,
            event_bus.clone(),
            coordination,
            ArbitrageSettings {
                min_spread_threshold: 0.02,
                min_trade_size: 1.0,
            },
        );
        let coordinator = SettingsCoordinator::new(event_bus);

        let outcome = coordinator
            .request_change(Some(1.5), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(outcome, SettingsOutcome::Error(_)));
    }
}

//! Two-phase commit coordination layered on [`EventBus`].
//!
//! Ported from a Python coordinator that polled a pending-operations map
//! every 100ms; here each phase is a single `oneshot` await, fulfilled
//! either by the response handler once every expected component has
//! replied, or by the background sweep task on timeout.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    ComponentResponseEvent, CoordOperationType, CoordPhase, CoordinationPhaseEvent, Event,
};
use crate::error::PipelineError;
use crate::event_bus::EventBus;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub operation_id: String,
    pub responses: HashMap<String, ComponentResponseEvent>,
}

struct PendingOperation {
    operation_type: CoordOperationType,
    phase: CoordPhase,
    expected_components: HashSet<String>,
    responses: HashMap<String, ComponentResponseEvent>,
    started_at: Instant,
    timeout: Duration,
    data: serde_json::Value,
    completion: SyncMutex<Option<oneshot::Sender<Result<PhaseResult, PipelineError>>>>,
}

#[derive(Clone)]
pub struct CoordinationBus {
    event_bus: EventBus,
    pending: Arc<RwLock<HashMap<String, PendingOperation>>>,
    registered_components: Arc<RwLock<HashSet<String>>>,
    sweeper_started: Arc<AtomicBool>,
}

impl CoordinationBus {
    pub fn new(event_bus: EventBus) -> Self {
        let bus = Self {
            event_bus,
            pending: Arc::new(RwLock::new(HashMap::new())),
            registered_components: Arc::new(RwLock::new(HashSet::new())),
            sweeper_started: Arc::new(AtomicBool::new(false)),
        };
        bus.subscribe_responses();
        bus.start_sweeper();
        bus
    }

    pub fn register_component(&self, component_id: impl Into<String>) {
        self.registered_components.write().insert(component_id.into());
    }

    pub fn unregister_component(&self, component_id: &str) {
        self.registered_components.write().remove(component_id);
    }

    pub fn registered_components(&self) -> Vec<String> {
        self.registered_components.read().iter().cloned().collect()
    }

    fn subscribe_responses(&self) {
        let pending = self.pending.clone();
        self.event_bus.subscribe(
            "coordination.response",
            Arc::new(move |event: Event| {
                let pending = pending.clone();
                Box::pin(async move {
                    if let Event::CoordinationResponse(resp) = event {
                        handle_response(&pending, resp);
                    }
                    Ok(())
                })
            }),
        );
    }

    fn start_sweeper(&self) {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.pending.clone();
        let event_bus = self.event_bus.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                sweep_expired(&pending, &event_bus).await;
            }
        });
    }

    /// Run a full prepare/commit/rollback cycle for `operation_type`.
    /// Returns the commit-phase responses on success.
    pub async fn coordinate_operation(
        &self,
        operation_type: CoordOperationType,
        data: serde_json::Value,
        expected_components: Vec<String>,
        timeout: Duration,
    ) -> Result<PhaseResult, PipelineError> {
        let operation_id = Uuid::new_v4().to_string();
        info!(operation_id, ?operation_type, "starting coordinated operation");

        let prepare = self
            .execute_phase(
                &operation_id,
                operation_type,
                CoordPhase::Prepare,
                data.clone(),
                expected_components.clone(),
                timeout,
            )
            .await;

        if let Err(e) = prepare {
            warn!(operation_id, "prepare phase failed: {e}");
            return Err(e);
        }

        let commit = self
            .execute_phase(
                &operation_id,
                operation_type,
                CoordPhase::Commit,
                data.clone(),
                expected_components.clone(),
                timeout,
            )
            .await;

        match commit {
            Ok(result) => {
                info!(operation_id, "operation completed successfully");
                Ok(result)
            }
            Err(e) => {
                warn!(operation_id, "commit phase failed, rolling back: {e}");
                self.broadcast_rollback(&operation_id, operation_type, data, expected_components)
                    .await;
                Err(e)
            }
        }
    }

    async fn execute_phase(
        &self,
        operation_id: &str,
        operation_type: CoordOperationType,
        phase: CoordPhase,
        data: serde_json::Value,
        expected_components: Vec<String>,
        timeout: Duration,
    ) -> Result<PhaseResult, PipelineError> {
        let (tx, rx) = oneshot::channel();
        let expected: HashSet<String> = expected_components.iter().cloned().collect();

        self.pending.write().insert(
            operation_id.to_string(),
            PendingOperation {
                operation_type,
                phase,
                expected_components: expected,
                responses: HashMap::new(),
                started_at: Instant::now(),
                timeout,
                data: data.clone(),
                completion: SyncMutex::new(Some(tx)),
            },
        );

        let topic = format!("coordination.{}.{}", op_type_str(operation_type), phase_str(phase));
        self.event_bus
            .publish(
                &topic,
                Event::CoordinationPhase(CoordinationPhaseEvent {
                    operation_id: operation_id.to_string(),
                    operation_type,
                    phase,
                    expected_components: expected_components.clone(),
                    data,
                }),
            )
            .await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.write().remove(operation_id);
                Err(PipelineError::Coordination {
                    operation_id: operation_id.to_string(),
                    reason: "completion channel dropped".to_string(),
                })
            }
            Err(_) => {
                self.pending.write().remove(operation_id);
                Err(PipelineError::Coordination {
                    operation_id: operation_id.to_string(),
                    reason: "timeout".to_string(),
                })
            }
        }
    }

    async fn broadcast_rollback(
        &self,
        operation_id: &str,
        operation_type: CoordOperationType,
        data: serde_json::Value,
        expected_components: Vec<String>,
    ) {
        let topic = format!("coordination.{}.rollback", op_type_str(operation_type));
        self.event_bus
            .publish(
                &topic,
                Event::CoordinationPhase(CoordinationPhaseEvent {
                    operation_id: operation_id.to_string(),
                    operation_type,
                    phase: CoordPhase::Rollback,
                    expected_components,
                    data,
                }),
            )
            .await;
    }
}

fn handle_response(
    pending: &Arc<RwLock<HashMap<String, PendingOperation>>>,
    resp: ComponentResponseEvent,
) {
    let operation_id = resp.operation_id.clone();
    let mut map = pending.write();

    let ready = match map.get_mut(&operation_id) {
        Some(op) => {
            op.responses.insert(resp.component_id.clone(), resp);
            op.responses.len() >= op.expected_components.len()
        }
        None => false,
    };

    if !ready {
        return;
    }

    if let Some(op) = map.remove(&operation_id) {
        let success = op.responses.values().all(|r| r.success);
        let result = if success {
            Ok(PhaseResult {
                operation_id: operation_id.clone(),
                responses: op.responses,
            })
        } else {
            Err(PipelineError::Coordination {
                operation_id: operation_id.clone(),
                reason: "NACK received".to_string(),
            })
        };

        if let Some(sender) = op.completion.lock().take() {
            let _ = sender.send(result);
        }
    }
}

async fn sweep_expired(
    pending: &Arc<RwLock<HashMap<String, PendingOperation>>>,
    event_bus: &EventBus,
) {
    let expired: Vec<(String, CoordOperationType, CoordPhase, serde_json::Value, Vec<String>)> = {
        let map = pending.read();
        map.iter()
            .filter(|(_, op)| op.started_at.elapsed() > op.timeout)
            .map(|(id, op)| {
                (
                    id.clone(),
                    op.operation_type,
                    op.phase,
                    op.data.clone(),
                    op.expected_components.iter().cloned().collect(),
                )
            })
            .collect()
    };

    for (operation_id, operation_type, phase, data, expected) in expired {
        warn!(operation_id, "coordinated operation expired, sweeping");
        let op = pending.write().remove(&operation_id);
        if let Some(op) = op {
            if let Some(sender) = op.completion.lock().take() {
                let _ = sender.send(Err(PipelineError::Coordination {
                    operation_id: operation_id.clone(),
                    reason: "timeout".to_string(),
                }));
            }
        }
        if matches!(phase, CoordPhase::Prepare | CoordPhase::Commit) {
            let topic = format!("coordination.{}.rollback", op_type_str(operation_type));
            event_bus
                .publish(
                    &topic,
                    Event::CoordinationPhase(CoordinationPhaseEvent {
                        operation_id,
                        operation_type,
                        phase: CoordPhase::Rollback,
                        expected_components: expected,
                        data,
                    }),
                )
                .await;
        }
    }
}

fn op_type_str(op: CoordOperationType) -> &'static str {
    match op {
        CoordOperationType::MarketSubscribe => "market_subscribe",
        CoordOperationType::MarketUnsubscribe => "market_unsubscribe",
        CoordOperationType::SettingsChange => "settings_change",
    }
}

fn phase_str(phase: CoordPhase) -> &'static str {
    match phase {
        CoordPhase::Prepare => "prepare",
        CoordPhase::Commit => "commit",
        CoordPhase::Rollback => "rollback",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ComponentResponseEvent;

    #[tokio::test]
    async fn prepare_and_commit_succeed_when_all_ack() {
        let bus = EventBus::new();
        let coord = CoordinationBus::new(bus.clone());

        let coord_responder = coord.clone();
        bus.subscribe(
            "*",
            Arc::new(move |event: Event| {
                let bus = coord_responder.event_bus.clone();
                Box::pin(async move {
                    if let Event::CoordinationPhase(phase) = event {
                        if !matches!(phase.phase, CoordPhase::Rollback) {
                            bus.publish(
                                "coordination.response",
                                Event::CoordinationResponse(ComponentResponseEvent {
                                    component_id: "book_store".to_string(),
                                    operation_id: phase.operation_id,
                                    success: true,
                                    data: serde_json::json!({}),
                                }),
                            )
                            .await;
                        }
                    }
                    Ok(())
                })
            }),
        );

        let result = coord
            .coordinate_operation(
                CoordOperationType::MarketSubscribe,
                serde_json::json!({"market": "M"}),
                vec!["book_store".to_string()],
                Duration::from_secs(2),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn nack_triggers_failure_without_partial_state() {
        let bus = EventBus::new();
        let coord = CoordinationBus::new(bus.clone());

        let coord_responder = coord.clone();
        bus.subscribe(
            "*",
            Arc::new(move |event: Event| {
                let bus = coord_responder.event_bus.clone();
                Box::pin(async move {
                    if let Event::CoordinationPhase(phase) = event {
                        if matches!(phase.phase, CoordPhase::Prepare) {
                            bus.publish(
                                "coordination.response",
                                Event::CoordinationResponse(ComponentResponseEvent {
                                    component_id: "book_store".to_string(),
                                    operation_id: phase.operation_id,
                                    success: false,
                                    data: serde_json::json!({}),
                                }),
                            )
                            .await;
                        }
                    }
                    Ok(())
                })
            }),
        );

        let result = coord
            .coordinate_operation(
                CoordOperationType::MarketSubscribe,
                serde_json::json!({"market": "M"}),
                vec!["book_store".to_string()],
                Duration::from_secs(2),
            )
            .await;

        assert!(result.is_err());
    }
}

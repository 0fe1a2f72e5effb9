use thiserror::Error;

/// Domain errors produced by the ingestion-to-broadcast pipeline.
///
/// Propagation follows a narrow-blast-radius policy: each variant is
/// handled by the smallest component that can continue without its
/// subject (see the call sites in `decoder`, `venue`, and `coordination`).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transport error on {client_id}: {source}")]
    Transport {
        client_id: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("auth error on {client_id}: {reason}")]
    Auth { client_id: String, reason: String },

    #[error("decode error in {component}: {reason}")]
    Decode { component: String, reason: String },

    #[error("sequence gap on {market_key}: expected {expected}, got {actual}")]
    SequenceGap {
        market_key: String,
        expected: i64,
        actual: i64,
    },

    #[error("coordination error for operation {operation_id}: {reason}")]
    Coordination {
        operation_id: String,
        reason: String,
    },

    #[error("validation error: {reason}")]
    Validation { reason: String },

    #[error("client send error for {client_id}: {reason}")]
    ClientSend { client_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

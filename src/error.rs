use crate::order::{ActorRole, OrderStatus};
use crate::review::QuantityBucket;

#[derive(thiserror::Error, Debug)]
pub enum OrderError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{role} may not move an order from {from} to {to}")]
    Forbidden {
        role: ActorRole,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("{role} is not permitted to {action}")]
    ForbiddenAction { role: ActorRole, action: &'static str },
    #[error("No transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Transition {from} -> {to} requires `{flag}`")]
    PreconditionFailed {
        from: OrderStatus,
        to: OrderStatus,
        flag: &'static str,
    },
    #[error("Cannot {action} while order is {actual}")]
    InvalidState {
        action: &'static str,
        actual: OrderStatus,
    },
    #[error("Reviewed quantity {actual} does not match order quantity {expected}")]
    QuantityMismatch { expected: u64, actual: u64 },
    #[error("{bucket} items sum to {actual}, expected {expected}")]
    ItemQuantityMismatch {
        bucket: QuantityBucket,
        expected: u64,
        actual: u64,
    },
    #[error("Rework of {requested} exceeds the {available} rejected by the review")]
    ReworkQuantityExceeded { requested: u64, available: u64 },
    #[error("Review {review_id} already spawned a rework order")]
    ReworkAlreadySpawned { review_id: String },
    #[error("Order {order_id} changed concurrently (expected version {expected}, found {actual})")]
    Conflict {
        order_id: String,
        expected: u64,
        actual: u64,
    },
    #[error("Display id {0} is already taken")]
    DuplicateDisplayId(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("History of order {order_id} is broken at entry {seq}")]
    HistoryCorrupted { order_id: String, seq: u32 },
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Codec(String),
}

impl OrderError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        OrderError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller may re-read the order and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::Conflict { .. })
    }
}

impl From<minicbor::decode::Error> for OrderError {
    fn from(err: minicbor::decode::Error) -> Self {
        OrderError::Codec(err.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for OrderError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        OrderError::Codec(err.to_string())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.message().to_string())
    }
}

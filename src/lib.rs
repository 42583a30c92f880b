pub mod config;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod history;
pub mod order;
pub mod review;
pub mod service;
pub mod store;
pub mod transitions;
pub mod utils;

pub use config::EngineConfig;
pub use error::{ConfigError, OrderError};
pub use events::{DomainEvent, EventSink, LogSink, MemorySink};
pub use hierarchy::{OrderHierarchy, ReworkRequest, ReworkStart};
pub use order::{Actor, ActorRole, Order, OrderDraft, OrderStatus, TimeStamp};
pub use review::{ReviewResult, ReviewSubmission, ReviewType};
pub use service::OrderService;

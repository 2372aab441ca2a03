//! Configuration, errors, logging, metrics and retry shared by the quiz core

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod retry;

// Re-exports for convenience
pub use error::{AppError, AppResult, DeliveryError};
pub use logging::init_logger;
pub use metrics::Metrics;

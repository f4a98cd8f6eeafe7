use thiserror::Error;

use crate::config::ConfigError;

/// Failures of the shared infrastructure: configuration, logging setup and
/// the event bus.
#[derive(Error, Debug)]
pub enum WaddleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialize logging: {0}")]
    Telemetry(String),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WaddleError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("channel {0:?} is not in a known domain")]
    InvalidChannel(String),

    #[error("subscription pattern {0:?} is invalid")]
    InvalidPattern(String),

    #[error("event bus closed")]
    ChannelClosed,

    #[error("subscriber fell behind and missed {0} events")]
    Lagged(u64),
}

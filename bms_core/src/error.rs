use thiserror::Error;

pub use crate::lookup::{LookupError, TableError};

#[derive(Debug, Error, Clone)]
pub enum BmsError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for monitor")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing cell monitor")]
    MissingMonitor,
    #[error("missing current sensor")]
    MissingCurrentSensor,
    #[error("missing bleed driver")]
    MissingBleedDriver,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

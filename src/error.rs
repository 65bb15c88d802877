//! Error taxonomy shared across the bus, persistence, and risk modules.
//!
//! Adapter-local errors stay as `anyhow::Result` with `.context(..)` the way
//! `scrapers/polymarket_api.rs` does it in the teacher; these typed variants
//! exist only where more than one module needs to match on the error kind.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("channel '{0}' has no consumer group '{1}'")]
    UnknownGroup(String, String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("record missing required field '{0}'")]
    MissingField(String),
    #[error("malformed field '{field}': {reason}")]
    MalformedField { field: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("trade '{0}' not found")]
    NotFound(String),
}

impl From<rusqlite::Error> for BusError {
    fn from(e: rusqlite::Error) -> Self {
        BusError::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        PersistenceError::Storage(e.to_string())
    }
}

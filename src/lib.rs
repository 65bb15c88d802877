//! predictbot-core
//!
//! Core engine for the prediction-market arbitrage pilot: the message bus,
//! agent runtime, opportunity scanner, risk gate, executors, capital
//! allocator and persistence layer. The CLI binary (`src/main.rs`) wires
//! these into a running orchestrator; the dashboard and report tooling are
//! external collaborators that only read `get_state_snapshot()` output and
//! the `Repository` query methods.

pub mod agent;
pub mod allocator;
pub mod bus;
pub mod config;
pub mod error;
pub mod execution;
pub mod fees;
pub mod ingest;
pub mod matcher;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod scanner;
pub mod strategy;

pub use error::{EngineError, Result};

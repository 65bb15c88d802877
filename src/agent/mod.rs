//! Agent runtime and orchestrator (spec.md §4.2).
//!
//! Grounded on the `tokio::spawn` + `tokio::time::interval` loop shape used
//! throughout the teacher's `main.rs`, wrapped with exponential-backoff
//! supervision and a `tokio::sync::watch` stop signal.

mod orchestrator;

pub use orchestrator::{AgentHealth, AgentHealthTracker, Health, Orchestrator};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::bus::{Bus, BusRecord, HALT_ALL};
use crate::error::Result;

/// Max records drained per channel per tick (spec.md §4.2 "drain up to N").
pub const DRAIN_BATCH: usize = 32;

/// Idle yield between ticks when no work was found.
pub const TICK_IDLE: Duration = Duration::from_millis(200);

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn subscriptions(&self) -> Vec<String>;

    async fn handle(&self, channel: &str, record: BusRecord, bus: &dyn Bus) -> Result<()>;

    /// Optional state recovery hook run once at Start, before the loop
    /// begins (spec.md §4.2 step 1). Default no-op.
    async fn recover(&self) -> Result<()> {
        Ok(())
    }

    /// Optional per-tick hook invoked every loop iteration regardless of
    /// `subscriptions()`, used by ingest agents (spec.md §4.3) to run their
    /// own internally rate-limited poll. Default no-op.
    async fn tick(&self, _bus: &dyn Bus) -> Result<()> {
        Ok(())
    }
}

fn group_name(agent_name: &str) -> String {
    format!("{agent_name}-group")
}

/// Runs one agent's full lifecycle (Start/Loop/Stop) until `stop` fires.
/// Returns on clean stop; returns `Err` if a non-handler error escapes the
/// loop body, which the orchestrator treats as a crash to restart.
pub async fn run_agent(
    agent: Arc<dyn Agent>,
    bus: Arc<dyn Bus>,
    mut stop: tokio::sync::watch::Receiver<bool>,
    health: Arc<orchestrator::AgentHealthTracker>,
) -> Result<()> {
    let group = group_name(agent.name());
    let channels = agent.subscriptions();

    bus.ensure_group("system.commands", &group, "$").await?;
    for channel in &channels {
        bus.ensure_group(channel, &group, "$").await?;
    }
    agent.recover().await?;
    tracing::info!(agent = agent.name(), "agent_started");

    loop {
        if *stop.borrow() {
            break;
        }
        health.heartbeat();

        let commands = bus.consume_group("system.commands", &group, agent.name(), DRAIN_BATCH).await?;
        let mut halted = false;
        for (id, record) in commands {
            if record.get("command").map(String::as_str) == Some(HALT_ALL) {
                halted = true;
            }
            bus.ack("system.commands", &group, id).await?;
        }
        if halted {
            tracing::info!(agent = agent.name(), "agent_halted_by_command");
            break;
        }

        if let Err(e) = agent.tick(bus.as_ref()).await {
            error!(agent = agent.name(), error = %e, "tick_error");
        }

        let mut did_work = false;
        for channel in &channels {
            let records = bus.consume_group(channel, &group, agent.name(), DRAIN_BATCH).await?;
            if !records.is_empty() {
                did_work = true;
            }
            for (id, record) in records {
                if let Err(e) = agent.handle(channel, record, bus.as_ref()).await {
                    // Poison-message tolerance: log, still ack (spec.md §4.2 step 2c).
                    error!(agent = agent.name(), channel, message_id = id, error = %e, "handler_error");
                }
                bus.ack(channel, &group, id).await?;
            }
        }

        tokio::select! {
            _ = stop.changed() => { if *stop.borrow() { break; } }
            _ = tokio::time::sleep(if did_work { Duration::from_millis(1) } else { TICK_IDLE }) => {}
        }
    }

    tracing::info!(agent = agent.name(), "agent_stopped");
    Ok(())
}

/// Wraps `run_agent` with exponential backoff restart (spec.md §4.2,
/// §5 restart policy): 1s, doubled, capped at 60s, up to 5 consecutive
/// failures, then terminally failed.
pub async fn supervise(
    agent: Arc<dyn Agent>,
    bus: Arc<dyn Bus>,
    stop: tokio::sync::watch::Receiver<bool>,
    health: Arc<orchestrator::AgentHealthTracker>,
) {
    let mut backoff = Duration::from_secs(1);
    let mut consecutive_failures = 0u32;

    loop {
        if *stop.borrow() {
            return;
        }
        health.mark_started();
        match run_agent(agent.clone(), bus.clone(), stop.clone(), health.clone()).await {
            Ok(()) => return,
            Err(e) => {
                consecutive_failures += 1;
                health.mark_restart();
                warn!(agent = agent.name(), error = %e, attempt = consecutive_failures, "agent_crashed");
                if consecutive_failures >= 5 {
                    health.mark_terminally_failed();
                    error!(agent = agent.name(), "agent_terminally_failed");
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(60));
            }
        }
    }
}

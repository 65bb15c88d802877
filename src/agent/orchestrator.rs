use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::Bus;

use super::{supervise, Agent};

/// Per-agent counters the orchestrator exposes via `health()`
/// (spec.md §4.2: "records last heartbeat").
pub struct AgentHealthTracker {
    running: AtomicBool,
    restarts: AtomicU32,
    terminally_failed: AtomicBool,
    last_heartbeat: Mutex<DateTime<Utc>>,
}

impl AgentHealthTracker {
    fn new() -> Arc<Self> {
        Arc::new(AgentHealthTracker {
            running: AtomicBool::new(false),
            restarts: AtomicU32::new(0),
            terminally_failed: AtomicBool::new(false),
            last_heartbeat: Mutex::new(Utc::now()),
        })
    }

    pub fn mark_started(&self) {
        self.running.store(true, Ordering::SeqCst);
        *self.last_heartbeat.lock() = Utc::now();
    }

    /// Refreshed once per loop iteration so `health().last_heartbeat` reflects
    /// a running agent rather than only its last (re)start (spec.md §5
    /// stale-agent warning threshold, 120s).
    pub fn heartbeat(&self) {
        *self.last_heartbeat.lock() = Utc::now();
    }

    pub fn mark_restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn mark_terminally_failed(&self) {
        self.terminally_failed.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn snapshot(&self) -> AgentHealth {
        AgentHealth {
            running: self.running.load(Ordering::SeqCst),
            restarts: self.restarts.load(Ordering::SeqCst),
            terminally_failed: self.terminally_failed.load(Ordering::SeqCst),
            last_heartbeat: *self.last_heartbeat.lock(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub running: bool,
    pub restarts: u32,
    pub terminally_failed: bool,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Health {
    pub running: bool,
    pub uptime_secs: i64,
    pub agents: HashMap<String, AgentHealth>,
}

/// Owns agent task handles, start order, and a shared stop signal
/// (spec.md §4.2 Orchestrator). Graceful shutdown stops agents in reverse
/// of start order.
pub struct Orchestrator {
    bus: Arc<dyn Bus>,
    stop_tx: tokio::sync::watch::Sender<bool>,
    started_at: DateTime<Utc>,
    order: Vec<String>,
    handles: HashMap<String, JoinHandle<()>>,
    health: HashMap<String, Arc<AgentHealthTracker>>,
}

impl Orchestrator {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        let (stop_tx, _) = tokio::sync::watch::channel(false);
        Orchestrator {
            bus,
            stop_tx,
            started_at: Utc::now(),
            order: Vec::new(),
            handles: HashMap::new(),
            health: HashMap::new(),
        }
    }

    /// Spawns `agent` under supervision (spec.md §4.2 restart policy).
    pub fn spawn(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        let tracker = AgentHealthTracker::new();
        let stop_rx = self.stop_tx.subscribe();
        let bus = self.bus.clone();
        let tracker_clone = tracker.clone();

        let handle = tokio::spawn(async move {
            supervise(agent, bus, stop_rx, tracker_clone).await;
        });

        self.order.push(name.clone());
        self.handles.insert(name.clone(), handle);
        self.health.insert(name, tracker);
    }

    pub fn health(&self) -> Health {
        let agents = self.health.iter().map(|(name, t)| (name.clone(), t.snapshot())).collect();
        Health {
            running: !*self.stop_tx.borrow(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            agents,
        }
    }

    /// Blocks until ctrl-c (or an equivalent interrupt) is received, then
    /// performs graceful shutdown (spec.md §4.2, §5 shutdown target ≤2s/agent).
    pub async fn run_until_shutdown(mut self) {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown_signal_received");
        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stop_tx.send(true);
        for name in self.order.iter().rev() {
            if let Some(handle) = self.handles.remove(name) {
                match tokio::time::timeout(Duration::from_secs(2), handle).await {
                    Ok(Ok(())) => info!(agent = name, "agent_stopped_cleanly"),
                    Ok(Err(e)) => tracing::warn!(agent = name, error = %e, "agent_task_panicked"),
                    Err(_) => tracing::warn!(agent = name, "agent_stop_timed_out"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusRecord, SqliteBus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingAgent {
        handled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn name(&self) -> &str {
            "counter"
        }
        fn subscriptions(&self) -> Vec<String> {
            vec!["test.channel".to_string()]
        }
        async fn handle(&self, _channel: &str, _record: BusRecord, _bus: &dyn Bus) -> crate::error::Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn spawns_and_reports_health() {
        let bus: Arc<dyn Bus> = Arc::new(SqliteBus::open_in_memory().unwrap());
        let handled = Arc::new(AtomicUsize::new(0));
        let mut orch = Orchestrator::new(bus.clone());
        orch.spawn(Arc::new(CountingAgent { handled: handled.clone() }));

        bus.publish("test.channel", BusRecord::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let health = orch.health();
        assert!(health.agents.contains_key("counter"));
        assert_eq!(handled.load(Ordering::SeqCst), 1);

        orch.shutdown().await;
        assert!(!orch.health().running);
    }
}

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{BusError, Result};

use super::{Bus, BusRecord, MessageId};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS bus_messages (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    channel  TEXT NOT NULL,
    payload  TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_bus_messages_channel_id ON bus_messages(channel, id);

CREATE TABLE IF NOT EXISTS bus_group_offsets (
    channel        TEXT NOT NULL,
    group_name     TEXT NOT NULL,
    last_acked_id  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (channel, group_name)
);
"#;

/// Durable bus backed by a single sqlite connection, mirroring the
/// `Mutex<Connection>` + hand-written `SCHEMA_SQL` persistence idiom in
/// `signals/db_storage.rs`.
///
/// Group consumption tracks in-flight (delivered, not yet acked) ids per
/// `(channel, group)` in memory. On restart this in-memory set is empty, so
/// everything after `last_acked_id` is redelivered — the at-least-once
/// behavior spec.md §4.1 requires.
pub struct SqliteBus {
    conn: Mutex<Connection>,
    pending: Mutex<HashMap<(String, String), HashSet<MessageId>>>,
}

impl SqliteBus {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(BusError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(BusError::from)?;
        Ok(SqliteBus { conn: Mutex::new(conn), pending: Mutex::new(HashMap::new()) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(BusError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(BusError::from)?;
        Ok(SqliteBus { conn: Mutex::new(conn), pending: Mutex::new(HashMap::new()) })
    }

    fn encode(record: &BusRecord) -> String {
        serde_json::to_string(record).expect("flat string map always serializes")
    }

    fn decode(payload: &str) -> Result<BusRecord> {
        serde_json::from_str(payload)
            .map_err(|e| BusError::MalformedField { field: "payload".to_string(), reason: e.to_string() }.into())
    }
}

#[async_trait]
impl Bus for SqliteBus {
    async fn publish(&self, channel: &str, record: BusRecord) -> Result<MessageId> {
        let payload = Self::encode(&record);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bus_messages (channel, payload) VALUES (?1, ?2)",
            params![channel, payload],
        )
        .map_err(BusError::from)?;
        Ok(conn.last_insert_rowid())
    }

    async fn consume(&self, channel: &str, from_id: MessageId, max_count: usize) -> Result<Vec<(MessageId, BusRecord)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, payload FROM bus_messages WHERE channel = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3")
            .map_err(BusError::from)?;
        let rows = stmt
            .query_map(params![channel, from_id, max_count as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(BusError::from)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, payload) = row.map_err(BusError::from)?;
            out.push((id, Self::decode(&payload)?));
        }
        Ok(out)
    }

    async fn ensure_group(&self, channel: &str, group: &str, start: &str) -> Result<()> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT last_acked_id FROM bus_group_offsets WHERE channel = ?1 AND group_name = ?2",
                params![channel, group],
                |row| row.get(0),
            )
            .optional()
            .map_err(BusError::from)?;
        if exists.is_some() {
            return Ok(());
        }
        let start_id: i64 = if start == "0" {
            0
        } else {
            conn.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM bus_messages WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )
            .map_err(BusError::from)?
        };
        conn.execute(
            "INSERT INTO bus_group_offsets (channel, group_name, last_acked_id) VALUES (?1, ?2, ?3)",
            params![channel, group, start_id],
        )
        .map_err(BusError::from)?;
        Ok(())
    }

    async fn consume_group(
        &self,
        channel: &str,
        group: &str,
        _consumer: &str,
        max_count: usize,
    ) -> Result<Vec<(MessageId, BusRecord)>> {
        let last_acked_id: i64 = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT last_acked_id FROM bus_group_offsets WHERE channel = ?1 AND group_name = ?2",
                params![channel, group],
                |row| row.get(0),
            )
            .optional()
            .map_err(BusError::from)?
            .ok_or_else(|| BusError::UnknownGroup(channel.to_string(), group.to_string()))?
        };

        let key = (channel.to_string(), group.to_string());
        let already_pending: HashSet<MessageId> = self.pending.lock().get(&key).cloned().unwrap_or_default();

        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT id, payload FROM bus_messages WHERE channel = ?1 AND id > ?2 ORDER BY id ASC")
                .map_err(BusError::from)?;
            let mapped = stmt
                .query_map(params![channel, last_acked_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(BusError::from)?;
            let mut out = Vec::new();
            for row in mapped {
                let (id, payload) = row.map_err(BusError::from)?;
                if !already_pending.contains(&id) {
                    out.push((id, payload));
                }
                if out.len() >= max_count {
                    break;
                }
            }
            out
        };

        let mut decoded = Vec::with_capacity(rows.len());
        let mut newly_pending = self.pending.lock();
        let entry = newly_pending.entry(key).or_default();
        for (id, payload) in rows {
            entry.insert(id);
            decoded.push((id, Self::decode(&payload)?));
        }
        Ok(decoded)
    }

    async fn ack(&self, channel: &str, group: &str, message_id: MessageId) -> Result<()> {
        let key = (channel.to_string(), group.to_string());
        self.pending.lock().get_mut(&key).map(|set| set.remove(&message_id));

        let conn = self.conn.lock();
        let current: i64 = conn
            .query_row(
                "SELECT last_acked_id FROM bus_group_offsets WHERE channel = ?1 AND group_name = ?2",
                params![channel, group],
                |row| row.get(0),
            )
            .optional()
            .map_err(BusError::from)?
            .ok_or_else(|| BusError::UnknownGroup(channel.to_string(), group.to_string()))?;

        if message_id > current {
            conn.execute(
                "UPDATE bus_group_offsets SET last_acked_id = ?1 WHERE channel = ?2 AND group_name = ?3",
                params![message_id, channel, group],
            )
            .map_err(BusError::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> BusRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn publish_then_consume_preserves_fifo_order() {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.publish("venue.polymarket.prices", record(&[("market_id", "m1")])).await.unwrap();
        bus.publish("venue.polymarket.prices", record(&[("market_id", "m2")])).await.unwrap();

        let msgs = bus.consume("venue.polymarket.prices", 0, 10).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].1.get("market_id").unwrap(), "m1");
        assert_eq!(msgs[1].1.get("market_id").unwrap(), "m2");
    }

    #[tokio::test]
    async fn group_start_dollar_skips_existing_backlog() {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.publish("opportunities.detected", record(&[("id", "o1")])).await.unwrap();
        bus.ensure_group("opportunities.detected", "scanner-group", "$").await.unwrap();

        let delivered = bus.consume_group("opportunities.detected", "scanner-group", "c1", 10).await.unwrap();
        assert!(delivered.is_empty());

        bus.publish("opportunities.detected", record(&[("id", "o2")])).await.unwrap();
        let delivered = bus.consume_group("opportunities.detected", "scanner-group", "c1", 10).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.get("id").unwrap(), "o2");
    }

    #[tokio::test]
    async fn group_start_zero_replays_backlog() {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.publish("opportunities.detected", record(&[("id", "o1")])).await.unwrap();
        bus.ensure_group("opportunities.detected", "replay-group", "0").await.unwrap();

        let delivered = bus.consume_group("opportunities.detected", "replay-group", "c1", 10).await.unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn ack_advances_cursor_and_unacked_is_redelivered() {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.publish("trade.requests", record(&[("id", "r1")])).await.unwrap();
        bus.ensure_group("trade.requests", "risk-group", "0").await.unwrap();

        let first = bus.consume_group("trade.requests", "risk-group", "c1", 10).await.unwrap();
        assert_eq!(first.len(), 1);

        // Not yet acked: a second read under a fresh in-memory pending set
        // (simulating process restart) redelivers it.
        let bus2 = bus;
        let again = bus2.consume_group("trade.requests", "risk-group", "c1", 10).await.unwrap();
        assert!(again.is_empty(), "still pending in this process, should not redeliver");

        bus2.ack("trade.requests", "risk-group", first[0].0).await.unwrap();
        let after_ack = bus2.consume_group("trade.requests", "risk-group", "c1", 10).await.unwrap();
        assert!(after_ack.is_empty());
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.ensure_group("system.commands", "agent-group", "$").await.unwrap();
        bus.publish("system.commands", record(&[("command", "HALT_ALL")])).await.unwrap();
        // Re-calling ensure_group must not reset the cursor back to "$" tail.
        bus.ensure_group("system.commands", "agent-group", "0").await.unwrap();
        let delivered = bus.consume_group("system.commands", "agent-group", "c1", 10).await.unwrap();
        assert!(delivered.is_empty());
    }

    #[tokio::test]
    async fn publish_command_targets_system_commands_channel() {
        let bus = SqliteBus::open_in_memory().unwrap();
        bus.publish_command("HALT_ALL", &[]).await.unwrap();
        let msgs = bus.consume("system.commands", 0, 10).await.unwrap();
        assert_eq!(msgs[0].1.get("command").unwrap(), "HALT_ALL");
    }
}

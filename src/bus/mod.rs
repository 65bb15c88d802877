//! Durable, grouped, append-only message bus (spec.md §4.1).
//!
//! Grounded on `signals/db_storage.rs`'s rusqlite/WAL persistence idiom in
//! the teacher: a single embedded database is the right idiom here because
//! the runtime is single-process with durable queues (spec.md §1 non-goal on
//! multi-process distribution), so there is no reason to reach for a network
//! broker the way `dawsh2-AlphaPulse/collectors/src/redis_writer.rs` does.

mod sqlite_bus;

pub use sqlite_bus::SqliteBus;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub type BusRecord = HashMap<String, String>;
pub type MessageId = i64;

pub const HALT_ALL: &str = "HALT_ALL";

/// Build a flat `{"command": cmd, ...extra}` record for `system.commands`.
pub fn command_record(cmd: &str, extra: &[(&str, &str)]) -> BusRecord {
    let mut record = BusRecord::new();
    record.insert("command".to_string(), cmd.to_string());
    for (k, v) in extra {
        record.insert((*k).to_string(), (*v).to_string());
    }
    record
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Atomically appends `record` to `channel`, returning its message id.
    async fn publish(&self, channel: &str, record: BusRecord) -> Result<MessageId>;

    /// Non-grouped read: all records on `channel` with id `> from_id`.
    async fn consume(&self, channel: &str, from_id: MessageId, max_count: usize) -> Result<Vec<(MessageId, BusRecord)>>;

    /// Idempotent group creation; creates the channel implicitly if absent.
    /// `start = "$"` starts the group's cursor at the channel's current tail
    /// (only future messages); `start = "0"` replays everything published so
    /// far. Calling this on an existing group is a no-op.
    async fn ensure_group(&self, channel: &str, group: &str, start: &str) -> Result<()>;

    /// Delivers up to `max_count` undelivered-or-unacked records to `group`,
    /// recording them pending for `consumer` until acked.
    async fn consume_group(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
    ) -> Result<Vec<(MessageId, BusRecord)>>;

    /// Finalizes processing of `message_id` within `group`; advances the
    /// group's durable cursor.
    async fn ack(&self, channel: &str, group: &str, message_id: MessageId) -> Result<()>;

    /// Convenience wrapper for `publish("system.commands", ...)`.
    async fn publish_command(&self, cmd: &str, extra: &[(&str, &str)]) -> Result<MessageId> {
        self.publish("system.commands", command_record(cmd, extra)).await
    }
}

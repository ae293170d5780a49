// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Result, Transaction, TransactionBehavior};
use rusqlite_migration::{M, Migrations};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use relay_core::packet::{HubRecord, Packet, Proof};

use super::sql::{
    NewPacketRow, PacketRow, sql_insert_packet, sql_mark_delivered, sql_select_hub_seq_by_key,
    sql_select_max_hub_seq, sql_select_pending_packets,
};
use super::{StorageOpenError, SubmitOutcome};

const MIGRATION_0001_SCHEMA: &str = include_str!("migrations/0001_schema.sql");

/// Durable packet table plus the hub sequence counter.
///
/// The counter is recovered from `MAX(hub_seq)` when the store is opened and only ever
/// advanced after a registration commits. A `Storage` is meant to be owned by a single
/// writer; see `sequencing_lane`.
pub struct Storage {
    conn: Connection,
    next_hub_seq: u64,
}

impl Storage {
    pub fn open(path: &str, synchronous: &str) -> std::result::Result<Self, StorageOpenError> {
        let conn = Self::open_connection_with_migrations(path, synchronous)?;
        let next_hub_seq = next_hub_seq_from_head(&conn)?;
        Ok(Self { conn, next_hub_seq })
    }

    pub fn open_connection(
        path: &str,
        synchronous: &str,
    ) -> std::result::Result<Connection, StorageOpenError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", synchronous)?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    pub fn open_connection_with_migrations(
        path: &str,
        synchronous: &str,
    ) -> std::result::Result<Connection, StorageOpenError> {
        let mut conn = Self::open_connection(path, synchronous)?;
        Self::run_migrations(&mut conn)?;
        Ok(conn)
    }

    /// Read-only handle for inspection tools and tests. Never runs migrations.
    pub fn open_read_only(path: &str) -> std::result::Result<Connection, StorageOpenError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    pub fn run_migrations(conn: &mut Connection) -> std::result::Result<(), StorageOpenError> {
        Migrations::from_slice(&[M::up(MIGRATION_0001_SCHEMA)]).to_latest(conn)?;
        Ok(())
    }

    pub fn next_hub_seq(&self) -> u64 {
        self.next_hub_seq
    }

    /// Registers `packet` under the next hub sequence number unless its
    /// `(src_chain_id, dst_chain_id, src_seq)` key is already present.
    ///
    /// Uniqueness check, sequence assignment and insert share one IMMEDIATE transaction, so
    /// a concurrent writer on the same file can never interleave between them.
    pub fn submit(&mut self, packet: &Packet) -> Result<SubmitOutcome> {
        let proof_json = serde_json::to_string(packet.proof.as_json())
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
        let src_seq = u64_to_i64(packet.src_seq)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = sql_select_hub_seq_by_key(
            &tx,
            &packet.src_chain_id,
            &packet.dst_chain_id,
            src_seq,
        )? {
            // Dropping the transaction rolls it back; the counter is untouched.
            return Ok(SubmitOutcome::Duplicate {
                existing_hub_seq: i64_to_u64(existing),
            });
        }

        // Keep the counter check inside the write transaction so it observes the same snapshot
        // as the insert.
        assert_counter_matches_head(&tx, self.next_hub_seq)?;

        let hub_seq = self.next_hub_seq;
        sql_insert_packet(
            &tx,
            &NewPacketRow {
                hub_seq: u64_to_i64(hub_seq)?,
                src_chain_id: &packet.src_chain_id,
                dst_chain_id: &packet.dst_chain_id,
                src_seq,
                sender: &packet.sender,
                receiver: &packet.receiver,
                payload: &packet.payload,
                commitment: &packet.commitment,
                proof_json: &proof_json,
                created_at_ms: now_unix_ms(),
            },
        )?;
        tx.commit()?;

        self.next_hub_seq = hub_seq.saturating_add(1);
        Ok(SubmitOutcome::Registered { hub_seq })
    }

    /// Undelivered records in ascending `hub_seq`, at most `limit` of them.
    pub fn list_pending(&mut self, limit: usize) -> Result<Vec<HubRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sql_select_pending_packets(&self.conn, limit)?;
        rows.into_iter().map(convert_packet_row_to_record).collect()
    }

    /// Flips `delivered` for `hub_seq`. Returns the number of rows changed: 1 on the first call
    /// for an existing record, 0 for an already delivered or unknown one.
    pub fn mark_delivered(&mut self, hub_seq: u64) -> Result<usize> {
        // Sequence numbers past the INTEGER range were never assigned.
        let Ok(hub_seq) = i64::try_from(hub_seq) else {
            return Ok(0);
        };
        sql_mark_delivered(&self.conn, hub_seq)
    }
}

fn next_hub_seq_from_head(conn: &Connection) -> Result<u64> {
    let value = sql_select_max_hub_seq(conn)?;
    Ok(match value {
        Some(last) => i64_to_u64(last).saturating_add(1),
        None => 1,
    })
}

fn assert_counter_matches_head(tx: &Transaction<'_>, expected_next: u64) -> Result<()> {
    let actual_next = next_hub_seq_from_head(tx)?;
    assert_eq!(
        expected_next, actual_next,
        "stale hub sequence counter: another writer touched the packet table"
    );
    Ok(())
}

fn convert_packet_row_to_record(row: PacketRow) -> Result<HubRecord> {
    let proof: serde_json::Value = serde_json::from_str(&row.proof_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(err)))?;
    Ok(HubRecord {
        hub_seq: i64_to_u64(row.hub_seq),
        packet: Packet {
            src_chain_id: row.src_chain_id,
            dst_chain_id: row.dst_chain_id,
            src_seq: i64_to_u64(row.src_seq),
            sender: row.sender,
            receiver: row.receiver,
            payload: row.payload,
            commitment: row.commitment,
            proof: Proof::new(proof),
        },
        delivered: row.delivered,
        created_at: from_unix_ms(row.created_at_ms),
    })
}

fn to_unix_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn from_unix_ms(ms: i64) -> SystemTime {
    let clamped_ms = ms.max(0) as u64;
    UNIX_EPOCH + Duration::from_millis(clamped_ms)
}

fn now_unix_ms() -> i64 {
    to_unix_ms(SystemTime::now())
}

/// SQLite INTEGER is signed; values above `i64::MAX` are refused rather than clamped, so two
/// distinct keys can never collapse onto one row.
fn u64_to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

fn i64_to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use rusqlite::{Connection, OptionalExtension, Result, Row, Transaction, params};

const SQL_INSERT_PACKET: &str = include_str!("queries/insert_packet.sql");
const SQL_SELECT_PENDING_PACKETS: &str = include_str!("queries/select_pending_packets.sql");
const SQL_SELECT_MAX_HUB_SEQ: &str = "SELECT MAX(hub_seq) FROM packets";
const SQL_SELECT_HUB_SEQ_BY_KEY: &str = "SELECT hub_seq FROM packets \
     WHERE src_chain_id = ?1 AND dst_chain_id = ?2 AND src_seq = ?3";
const SQL_MARK_DELIVERED: &str =
    "UPDATE packets SET delivered = 1 WHERE hub_seq = ?1 AND delivered = 0";

#[derive(Debug, Clone)]
pub(super) struct PacketRow {
    pub hub_seq: i64,
    pub src_chain_id: String,
    pub dst_chain_id: String,
    pub src_seq: i64,
    pub sender: String,
    pub receiver: String,
    pub payload: Vec<u8>,
    pub commitment: String,
    pub proof_json: String,
    pub delivered: bool,
    pub created_at_ms: i64,
}

/// Column values for one insert. Borrowed so the caller keeps ownership of the packet.
pub(super) struct NewPacketRow<'a> {
    pub hub_seq: i64,
    pub src_chain_id: &'a str,
    pub dst_chain_id: &'a str,
    pub src_seq: i64,
    pub sender: &'a str,
    pub receiver: &'a str,
    pub payload: &'a [u8],
    pub commitment: &'a str,
    pub proof_json: &'a str,
    pub created_at_ms: i64,
}

pub(super) fn sql_select_max_hub_seq(conn: &Connection) -> Result<Option<i64>> {
    conn.query_row(SQL_SELECT_MAX_HUB_SEQ, [], |row| row.get(0))
}

pub(super) fn sql_select_hub_seq_by_key(
    tx: &Transaction<'_>,
    src_chain_id: &str,
    dst_chain_id: &str,
    src_seq: i64,
) -> Result<Option<i64>> {
    let mut stmt = tx.prepare_cached(SQL_SELECT_HUB_SEQ_BY_KEY)?;
    stmt.query_row(params![src_chain_id, dst_chain_id, src_seq], |row| {
        row.get(0)
    })
    .optional()
}

pub(super) fn sql_insert_packet(tx: &Transaction<'_>, row: &NewPacketRow<'_>) -> Result<usize> {
    let mut stmt = tx.prepare_cached(SQL_INSERT_PACKET)?;
    stmt.execute(params![
        row.hub_seq,
        row.src_chain_id,
        row.dst_chain_id,
        row.src_seq,
        row.sender,
        row.receiver,
        row.payload,
        row.commitment,
        row.proof_json,
        row.created_at_ms,
    ])
}

pub(super) fn sql_select_pending_packets(conn: &Connection, limit: i64) -> Result<Vec<PacketRow>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_PENDING_PACKETS)?;
    let mapped = stmt.query_map(params![limit], convert_row_to_packet_row)?;
    mapped.collect()
}

pub(super) fn sql_mark_delivered(conn: &Connection, hub_seq: i64) -> Result<usize> {
    let mut stmt = conn.prepare_cached(SQL_MARK_DELIVERED)?;
    stmt.execute(params![hub_seq])
}

fn convert_row_to_packet_row(row: &Row<'_>) -> Result<PacketRow> {
    Ok(PacketRow {
        hub_seq: row.get(0)?,
        src_chain_id: row.get(1)?,
        dst_chain_id: row.get(2)?,
        src_seq: row.get(3)?,
        sender: row.get(4)?,
        receiver: row.get(5)?,
        payload: row.get(6)?,
        commitment: row.get(7)?,
        proof_json: row.get(8)?,
        delivered: row.get(9)?,
        created_at_ms: row.get(10)?,
    })
}

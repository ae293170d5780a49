// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Packet hub: assigns every cross-ledger packet a global sequence number and tracks delivery.
//!
//! Flow: API -> sequencing lane -> SQLite.
//! The sequencing lane is the single writer that defines the global order.
pub mod api;
pub mod sequencing_lane;
pub mod storage;
pub mod verifier;

// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Domain types shared by the hub and the relayer.
//!
//! A [`packet::Packet`] is what the source ledger emitted; a [`packet::HubRecord`] is the same
//! packet once the hub has placed it in the global order. [`wire`] is the JSON contract the hub
//! serves and the relayer consumes.
pub mod hex;
pub mod packet;
pub mod wire;

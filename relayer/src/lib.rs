// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

pub mod attester;
pub mod backfill;
pub mod bindings;
pub mod delivery;
pub mod hub_client;
pub mod pipeline;
pub mod watcher;

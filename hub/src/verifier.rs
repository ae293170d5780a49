// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Hook for checking a packet's source-ledger proof before it is sequenced.
//!
//! The hub currently trusts submitters: [`AcceptAll`] is the only implementation, and neither
//! the proof nor the commitment is checked against the source ledger.

use relay_core::packet::Packet;

pub trait ProofVerifier: Send + Sync {
    /// `Err` carries a human readable rejection reason.
    fn verify(&self, packet: &Packet) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ProofVerifier for AcceptAll {
    fn verify(&self, _packet: &Packet) -> Result<(), String> {
        Ok(())
    }
}

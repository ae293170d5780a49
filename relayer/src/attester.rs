// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Hub attestations: a relayer signature binding a packet to its hub sequence.
//!
//! The signed message is `keccak256(abi.encode(srcChainId, dstChainId, srcSeq, sender, receiver,
//! payload, commitment, hubSeq))` with the EVM widths of [`HubPacket`], wrapped in an EIP-191
//! personal message and serialized as 65 bytes `r || s || v`.

use alloy_primitives::{Address, B256, Bytes, Signature, U256, eip191_hash_message, keccak256};
use alloy_sol_types::SolValue;
use k256::ecdsa::SigningKey;
use relay_core::hex::decode_fixed_hex_0x;
use relay_core::packet::Packet;
use thiserror::Error;

use crate::bindings::HubPacket;

pub const ATTESTATION_BYTES: usize = 65;

#[derive(Debug, Error)]
pub enum AttestError {
    #[error("cannot encode {field}: {reason}")]
    Encoding { field: &'static str, reason: String },
    #[error("invalid signing key: {0}")]
    Key(String),
    #[error("sign attestation digest")]
    Signing(#[from] k256::ecdsa::Error),
    #[error("malformed attestation signature")]
    Signature(#[from] alloy_primitives::SignatureError),
}

/// A packet in destination encoding together with the relayer's attestation over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedPacket {
    pub fields: HubPacket,
    pub attestation: Bytes,
}

impl AttestedPacket {
    pub fn hub_seq(&self) -> U256 {
        self.fields.hubSeq
    }
}

pub struct Attester {
    signing_key: SigningKey,
    address: Address,
}

impl Attester {
    pub fn new(signing_key: SigningKey) -> Self {
        let address = address_from_signing_key(&signing_key);
        Self {
            signing_key,
            address,
        }
    }

    pub fn from_hex(private_key: &str) -> Result<Self, AttestError> {
        let bytes = decode_fixed_hex_0x::<32>(normalize_key_hex(private_key).as_str(), "private key")
            .map_err(AttestError::Key)?;
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|err| AttestError::Key(err.to_string()))?;
        Ok(Self::new(signing_key))
    }

    /// Address the destination verifier should recognize as this relayer.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn attest(&self, packet: &Packet, hub_seq: u64) -> Result<AttestedPacket, AttestError> {
        let fields = bound_fields(packet, hub_seq)?;
        let message_hash = eip191_hash_message(signing_hash(&fields));
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(message_hash.as_slice())?;
        let signature = Signature::from_signature_and_parity(signature, recovery_id.is_y_odd());

        Ok(AttestedPacket {
            fields,
            attestation: Bytes::copy_from_slice(&signature.as_bytes()),
        })
    }
}

/// Converts a packet and its hub sequence into the fixed-width tuple that gets signed.
pub fn bound_fields(packet: &Packet, hub_seq: u64) -> Result<HubPacket, AttestError> {
    Ok(HubPacket {
        srcChainId: parse_uint("srcChainId", &packet.src_chain_id)?,
        dstChainId: parse_uint("dstChainId", &packet.dst_chain_id)?,
        srcSeq: U256::from(packet.src_seq),
        sender: parse_address("sender", &packet.sender)?,
        receiver: parse_address("receiver", &packet.receiver)?,
        payload: Bytes::copy_from_slice(&packet.payload),
        commitment: B256::from(
            decode_fixed_hex_0x::<32>(&packet.commitment, "commitment").map_err(|reason| {
                AttestError::Encoding {
                    field: "commitment",
                    reason,
                }
            })?,
        ),
        hubSeq: U256::from(hub_seq),
    })
}

/// `keccak256(abi.encode(...))` over the bound fields, before the EIP-191 prefix.
pub fn signing_hash(fields: &HubPacket) -> B256 {
    keccak256(encode_bound_fields(fields))
}

pub fn encode_bound_fields(fields: &HubPacket) -> Vec<u8> {
    (
        fields.srcChainId,
        fields.dstChainId,
        fields.srcSeq,
        fields.sender,
        fields.receiver,
        fields.payload.clone(),
        fields.commitment,
        fields.hubSeq,
    )
        .abi_encode_params()
}

/// Recovers the address that produced `attestation` over `(packet, hub_seq)`.
pub fn recover_signer(
    packet: &Packet,
    hub_seq: u64,
    attestation: &[u8],
) -> Result<Address, AttestError> {
    let fields = bound_fields(packet, hub_seq)?;
    recover_signer_of_fields(&fields, attestation)
}

pub fn recover_signer_of_fields(
    fields: &HubPacket,
    attestation: &[u8],
) -> Result<Address, AttestError> {
    let signature = Signature::try_from(attestation)?;
    let message_hash = eip191_hash_message(signing_hash(fields));
    Ok(signature.recover_address_from_prehash(&message_hash)?)
}

fn parse_uint(field: &'static str, value: &str) -> Result<U256, AttestError> {
    value
        .trim()
        .parse::<U256>()
        .map_err(|err| AttestError::Encoding {
            field,
            reason: format!("'{value}' is not an unsigned integer: {err}"),
        })
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, AttestError> {
    let bytes = decode_fixed_hex_0x::<20>(value.trim(), field)
        .map_err(|reason| AttestError::Encoding { field, reason })?;
    Ok(Address::from(bytes))
}

fn normalize_key_hex(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with("0x") {
        trimmed.to_string()
    } else {
        format!("0x{trimmed}")
    }
}

pub(crate) fn address_from_signing_key(signing_key: &SigningKey) -> Address {
    let verifying = signing_key.verifying_key().to_encoded_point(false);
    Address::from_raw_public_key(&verifying.as_bytes()[1..])
}

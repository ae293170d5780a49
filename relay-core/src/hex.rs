// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

pub fn decode_hex_0x(value: &str) -> Result<Vec<u8>, String> {
    if !value.starts_with("0x") {
        return Err("hex string must start with 0x".to_string());
    }
    alloy_primitives::hex::decode(value).map_err(|err| format!("invalid hex: {err}"))
}

pub fn encode_hex_0x(bytes: &[u8]) -> String {
    alloy_primitives::hex::encode_prefixed(bytes)
}

/// Decodes a 0x-prefixed value that must be exactly `N` bytes long.
pub fn decode_fixed_hex_0x<const N: usize>(value: &str, what: &str) -> Result<[u8; N], String> {
    let bytes = decode_hex_0x(value).map_err(|err| format!("{what}: {err}"))?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|_| format!("{what} must be {N} bytes, got {}", bytes.len()))
}

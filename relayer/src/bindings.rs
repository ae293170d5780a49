// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! ABI of the packet contracts on the source and destination ledgers.

alloy::sol! {
    /// Emitted by the source-side sender contract once per outgoing packet.
    #[derive(Debug, PartialEq, Eq)]
    event PacketSent(
        uint256 indexed dstChainId,
        uint256 indexed seq,
        address indexed sender,
        address receiver,
        bytes payload,
        bytes32 commitment
    );

    /// Field order is the attestation encoding order; do not reorder.
    #[derive(Debug, PartialEq, Eq)]
    struct HubPacket {
        uint256 srcChainId;
        uint256 dstChainId;
        uint256 srcSeq;
        address sender;
        address receiver;
        bytes payload;
        bytes32 commitment;
        uint256 hubSeq;
    }

    #[sol(rpc)]
    interface IPacketReceiver {
        function recvPacket(HubPacket p, bytes hubAttestation) external;
    }
}

//! Wire format for the claim/inquire multicast protocol (spec 6.1).
//!
//! Transport is UDP over IPv6 to the link-local multicast group
//! `ff02::1234`, port 1234 by default -- joining the group and sending the
//! datagram is the binary's job; this module only (de)serialises the
//! payload, the way `dora_core::server::msg::SerialMsg` separates bytes
//! from socket I/O.
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// seconds, absolute or relative depending on context -- see call sites
pub type Timestamp = u64;

/// fixed header size in bytes: node_id(8) + prefix(4) + prefix_len(1) + block_size(4) + command(1) + count(2)
const HEADER_LEN: usize = 8 + 4 + 1 + 4 + 1 + 2;
/// size of one payload entry: block_index(4) + timeout(2) + reserved(2)
const ENTRY_LEN: usize = 4 + 2 + 2;

/// Errors decoding a multicast packet off the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// buffer shorter than the fixed header
    #[error("packet too short: need at least {HEADER_LEN} bytes, got {0}")]
    Truncated(usize),
    /// `count` payload entries don't fit in the remaining bytes
    #[error("declared {declared} payload entries but only room for {available}")]
    PayloadTruncated {
        /// entries the header claims to carry
        declared: u16,
        /// entries that actually fit in the buffer
        available: usize,
    },
    /// unrecognised command byte
    #[error("unknown command byte {0}")]
    UnknownCommand(u8),
}

/// The two multicast commands the protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// "I own these blocks, valid for `timeout` seconds"
    Claim,
    /// "I intend to claim these blocks" -- timeout field is always zero
    Inquire,
}

impl Command {
    fn to_byte(self) -> u8 {
        match self {
            Command::Claim => 1,
            Command::Inquire => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            1 => Ok(Command::Claim),
            2 => Ok(Command::Inquire),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// One block entry carried in a multicast packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadEntry {
    /// index into the receiver's block table
    pub block_index: u32,
    /// seconds the announcement is valid for; zero for an inquire
    pub timeout: u16,
}

/// A decoded (or to-be-encoded) claim/inquire multicast packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McastPacket {
    /// sender's stable node id
    pub node_id: u64,
    /// sender's configured subnet prefix
    pub prefix: Ipv4Addr,
    /// sender's configured prefix length
    pub prefix_len: u8,
    /// sender's configured block size
    pub block_size: u32,
    /// claim or inquire
    pub command: Command,
    /// blocks this packet carries
    pub payload: Vec<PayloadEntry>,
}

impl McastPacket {
    /// Encode to bytes ready to hand to a UDP socket.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len() * ENTRY_LEN);
        buf.put_u64(self.node_id);
        buf.put_slice(&self.prefix.octets());
        buf.put_u8(self.prefix_len);
        buf.put_u32(self.block_size);
        buf.put_u8(self.command.to_byte());
        buf.put_u16(self.payload.len() as u16);
        for entry in &self.payload {
            buf.put_u32(entry.block_index);
            buf.put_u16(entry.timeout);
            buf.put_u16(0); // reserved
        }
        buf.freeze()
    }

    /// Decode a packet off the wire.
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated(buf.len()));
        }
        let node_id = buf.get_u64();
        let mut prefix_octets = [0u8; 4];
        buf.copy_to_slice(&mut prefix_octets);
        let prefix = Ipv4Addr::from(prefix_octets);
        let prefix_len = buf.get_u8();
        let block_size = buf.get_u32();
        let command = Command::from_byte(buf.get_u8())?;
        let count = buf.get_u16();

        let available = buf.len() / ENTRY_LEN;
        if available < count as usize {
            return Err(ProtocolError::PayloadTruncated { declared: count, available });
        }

        let mut payload = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let block_index = buf.get_u32();
            let timeout = buf.get_u16();
            let _reserved = buf.get_u16();
            payload.push(PayloadEntry { block_index, timeout });
        }
        Ok(McastPacket { node_id, prefix, prefix_len, block_size, command, payload })
    }

    /// Whether the packet's fixed configuration fields match ours. Per
    /// spec 6.1, mismatches must be dropped silently by the caller.
    pub fn matches_config(&self, prefix: Ipv4Addr, prefix_len: u8, block_size: u32) -> bool {
        self.prefix == prefix && self.prefix_len == prefix_len && self.block_size == block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(count: usize) -> McastPacket {
        McastPacket {
            node_id: 0xdead_beef_cafe_babe,
            prefix: Ipv4Addr::new(10, 0, 0, 0),
            prefix_len: 24,
            block_size: 32,
            command: Command::Claim,
            payload: (0..count as u32)
                .map(|i| PayloadEntry { block_index: i, timeout: 60 })
                .collect(),
        }
    }

    #[test]
    fn round_trips_for_varying_payload_sizes() {
        for count in [0, 1, 2, 4, 16, 255, 4096] {
            let packet = sample(count);
            let encoded = packet.encode();
            let decoded = McastPacket::decode(&encoded).expect("decode");
            assert_eq!(packet, decoded, "mismatch at count={count}");
        }
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = McastPacket::decode(&[0u8; 4]).unwrap_err();
        assert_eq!(err, ProtocolError::Truncated(4));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let packet = sample(2);
        let mut encoded = packet.encode().to_vec();
        encoded.truncate(encoded.len() - 1);
        let err = McastPacket::decode(&encoded).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTruncated { declared: 2, available: 1 });
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut encoded = sample(0).encode().to_vec();
        encoded[17] = 9;
        let err = McastPacket::decode(&encoded).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownCommand(9));
    }

    #[test]
    fn config_mismatch_detected() {
        let packet = sample(0);
        assert!(packet.matches_config(Ipv4Addr::new(10, 0, 0, 0), 24, 32));
        assert!(!packet.matches_config(Ipv4Addr::new(10, 0, 0, 0), 25, 32));
        assert!(!packet.matches_config(Ipv4Addr::new(10, 0, 1, 0), 24, 32));
        assert!(!packet.matches_config(Ipv4Addr::new(10, 0, 0, 0), 24, 64));
    }
}

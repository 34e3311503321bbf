//! Inbound claim handler: updates the block table in response to multicast
//! from peers (spec 4.5).
use std::net::Ipv4Addr;

use tracing::{debug, trace};

use super::{BlockState, BlockTable};
use crate::protocol::{McastPacket, Timestamp};

/// Validates and applies inbound claim/inquire packets against the block
/// table. Holds only the local configuration needed to drop mismatched or
/// self-originated packets (spec 6.1, 7).
#[derive(Debug)]
pub struct InboundHandler {
    node_id: u64,
    prefix: Ipv4Addr,
    prefix_len: u8,
    block_size: u32,
}

impl InboundHandler {
    /// Construct a handler bound to this node's configuration.
    pub fn new(node_id: u64, prefix: Ipv4Addr, prefix_len: u8, block_size: u32) -> Self {
        InboundHandler { node_id, prefix, prefix_len, block_size }
    }

    /// Apply one inbound packet. Returns `false` if the packet was dropped
    /// outright (self-originated or configuration mismatch); this is for
    /// test/metrics visibility, not a fatal condition (spec 7: "silent
    /// drop").
    pub fn handle(&self, table: &mut BlockTable, packet: &McastPacket, now: Timestamp) -> bool {
        if packet.node_id == self.node_id {
            trace!("dropping packet from self");
            return false;
        }
        if !packet.matches_config(self.prefix, self.prefix_len, self.block_size) {
            debug!(sender = packet.node_id, "dropping packet with mismatched configuration");
            return false;
        }

        for entry in &packet.payload {
            self.apply_entry(table, packet.node_id, entry.block_index as usize, entry.timeout as u64, now);
        }
        true
    }

    fn apply_entry(
        &self,
        table: &mut BlockTable,
        sender: u64,
        index: usize,
        announced_timeout: u64,
        now: Timestamp,
    ) {
        let Some(block) = table.get_mut(index) else {
            trace!(index, "dropping out-of-range block index");
            return;
        };

        match block.state {
            BlockState::Free => {
                block.state = BlockState::Claimed;
                block.owner_id = sender;
                block.timeout = now + announced_timeout;
            }
            BlockState::Claimed if block.owner_id == sender => {
                block.timeout = now + announced_timeout;
            }
            BlockState::Claimed => {
                // last-writer-wins: the network is expected to converge as
                // conflicting owners observe each other (spec 4.5)
                block.owner_id = sender;
                block.timeout = now + announced_timeout;
            }
            BlockState::Claiming => {
                block.state = BlockState::Claimed;
                block.owner_id = sender;
                block.timeout = now + announced_timeout;
            }
            BlockState::Ours => {
                // we hold authoritative state for this block; the peer will
                // correct itself on our next claim renewal
            }
            BlockState::Blocked => {}
        }
    }
}

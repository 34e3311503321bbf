//! Renewal & reaper: re-announces ownership of blocks nearing expiry, sheds
//! owned blocks once local demand drops (spec 4.4).
use std::net::Ipv4Addr;

use tracing::debug;

use super::{BlockState, BlockTable};
use crate::metrics;
use crate::protocol::{Command, McastPacket, PayloadEntry, Timestamp};

/// Drives renewal announcements and shedding of excess owned blocks.
#[derive(Debug)]
pub struct RenewalReaper {
    node_id: u64,
    prefix: Ipv4Addr,
    prefix_len: u8,
    block_size: u32,
    block_timeout: u64,
}

impl RenewalReaper {
    /// Construct a renewal pass for a node's configuration.
    pub fn new(node_id: u64, prefix: Ipv4Addr, prefix_len: u8, block_size: u32, block_timeout: u64) -> Self {
        RenewalReaper { node_id, prefix, prefix_len, block_size, block_timeout }
    }

    /// Run one renewal & reaper pass. `blocks_needed` is signed: negative
    /// means we have more owned capacity than demand and may shed.
    ///
    /// Shedding decision (spec 9 open question): resolved as "shed until
    /// `blocks_needed_tmp >= 0`" -- a pass may shed more than one block if
    /// demand allows, not capped at one shed per pass.
    pub fn tick(
        &self,
        table: &mut BlockTable,
        mut blocks_needed: i64,
        now: Timestamp,
    ) -> Option<McastPacket> {
        let renew_horizon = now + self.block_timeout / 2;
        let mut renewal_set = Vec::new();
        let candidates: Vec<usize> = table
            .iter()
            .filter(|b| b.state == BlockState::Ours && b.timeout < renew_horizon)
            .map(|b| b.index)
            .collect();

        for index in candidates {
            let block = table.get(index).expect("candidate index exists");
            let all_free = block
                .addresses
                .as_ref()
                .map(|a| a.num_free() == self.block_size)
                .unwrap_or(false);

            if blocks_needed < 0 && all_free {
                debug!(index, "block no longer needed, shedding");
                blocks_needed += 1;
                table.release(index).expect("Ours block releases cleanly");
                metrics::BLOCKS_SHED.inc();
            } else {
                renewal_set.push(index);
            }
        }

        if renewal_set.is_empty() {
            return None;
        }

        let mut payload = Vec::with_capacity(renewal_set.len());
        for index in renewal_set {
            let block = table.get_mut(index).expect("renewal candidate exists");
            block.timeout = now + self.block_timeout;
            payload.push(PayloadEntry { block_index: index as u32, timeout: self.block_timeout as u16 });
        }

        metrics::RENEWALS_SENT.inc();
        Some(McastPacket {
            node_id: self.node_id,
            prefix: self.prefix,
            prefix_len: self.prefix_len,
            block_size: self.block_size,
            command: Command::Claim,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaper() -> RenewalReaper {
        RenewalReaper::new(1, Ipv4Addr::new(10, 0, 0, 0), 24, 8, 60)
    }

    #[test]
    fn renews_blocks_approaching_expiry() {
        let mut table = BlockTable::new(1, 8, 1);
        table.own(0, 0, 60).unwrap(); // timeout = 60
        let packet = reaper().tick(&mut table, 1, 40).expect("renewal packet"); // horizon = 70
        assert_eq!(packet.payload.len(), 1);
        assert_eq!(table.get(0).unwrap().timeout, 100); // now(40) + 60
    }

    #[test]
    fn lease_survives_renewal() {
        let mut table = BlockTable::new(1, 8, 1);
        table.own(0, 0, 60).unwrap();
        {
            let block = table.get_mut(0).unwrap();
            let addresses = block.addresses.as_mut().unwrap();
            let mac = [1; 6];
            let offset = addresses.acquire_offer(mac, 1).unwrap();
            addresses.confirm(offset, mac, 1, 0, 3600).unwrap();
        }
        reaper().tick(&mut table, 1, 40);
        let block = table.get(0).unwrap();
        assert_eq!(block.addresses.as_ref().unwrap().num_free(), 7);
    }

    #[test]
    fn sheds_all_eligible_blocks_when_demand_allows() {
        let mut table = BlockTable::new(4, 8, 1);
        for i in 0..4 {
            table.own(i, 0, 60).unwrap();
        }
        let packet = reaper().tick(&mut table, -2, 40).expect("remaining two still need renewal");
        let owned = table.iter().filter(|b| b.state == BlockState::Ours).count();
        assert_eq!(owned, 2, "exactly two blocks should remain after shedding two");
        assert_eq!(packet.payload.len(), 2, "the two survivors are announced as renewed");
    }

    #[test]
    fn does_not_shed_blocks_with_active_leases() {
        let mut table = BlockTable::new(1, 8, 1);
        table.own(0, 0, 60).unwrap();
        {
            let addresses = table.get_mut(0).unwrap().addresses.as_mut().unwrap();
            let mac = [2; 6];
            let offset = addresses.acquire_offer(mac, 5).unwrap();
            addresses.confirm(offset, mac, 5, 0, 3600).unwrap();
        }
        let packet = reaper().tick(&mut table, -1, 40).expect("renewed, not shed");
        assert_eq!(packet.payload.len(), 1);
        assert_eq!(table.get(0).unwrap().state, BlockState::Ours);
    }

    #[test]
    fn suppresses_packet_when_nothing_needs_renewal() {
        let mut table = BlockTable::new(1, 8, 1);
        table.own(0, 1000, 60).unwrap(); // timeout = 1060, far from horizon
        assert!(reaper().tick(&mut table, 1, 0).is_none());
    }
}

//! The block table: sole source of truth for ownership and per-block
//! timeouts (spec 3.2, 4.1).
use rand::Rng;

use crate::error::CoreError;
use crate::metrics;
use crate::protocol::Timestamp;

pub mod claim;
pub mod inbound;
pub mod lease;
pub mod renewal;

pub use claim::ClaimEngine;
pub use inbound::InboundHandler;
pub use lease::{Lease, LeaseError, LeaseState, LeaseTable};
pub use renewal::RenewalReaper;

/// Ownership state of one block (spec 3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// unclaimed, available to any node
    Free,
    /// we are tentatively claiming this block
    Claiming,
    /// we own this block and may issue leases from it
    Ours,
    /// a known peer owns this block
    Claimed,
    /// administratively reserved, never touched by the protocol
    Blocked,
}

/// One entry of the block table (spec 3.2).
#[derive(Debug, Clone)]
pub struct Block {
    /// 0-based position in the table
    pub index: usize,
    /// ownership state
    pub state: BlockState,
    /// owner's node id; meaningful when `state` is `Claimed` or `Ours`
    pub owner_id: u64,
    /// absolute expiry; meaning depends on `state` (see spec 3.2)
    pub timeout: Timestamp,
    /// count of claim announcements issued while `Claiming`
    pub claim_announcements: u32,
    /// lease table; `Some` iff `state == Ours`
    pub addresses: Option<LeaseTable>,
}

impl Block {
    fn new(index: usize) -> Self {
        Block {
            index,
            state: BlockState::Free,
            owner_id: 0,
            timeout: 0,
            claim_announcements: 0,
            addresses: None,
        }
    }
}

/// The fixed-length block table. Single-writer by construction (spec 5): no
/// locks are required, the event loop in `ddhcpd` is the sole caller.
#[derive(Debug)]
pub struct BlockTable {
    blocks: Vec<Block>,
    block_size: u32,
    node_id: u64,
}

impl BlockTable {
    /// Build a table with `number_of_blocks` entries, all `Free`.
    pub fn new(number_of_blocks: u32, block_size: u32, node_id: u64) -> Self {
        BlockTable {
            blocks: (0..number_of_blocks as usize).map(Block::new).collect(),
            block_size,
            node_id,
        }
    }

    /// Number of blocks in the table. Fixed for the life of the process.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the table has zero blocks (never true for a valid config).
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Read-only access to a block.
    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    /// Mutable access to a block. Exposed so the claim engine and inbound
    /// handler (same crate, different modules) can drive state transitions
    /// the table doesn't name a dedicated method for.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.blocks.get_mut(index)
    }

    /// This node's own id, for comparing against a packet's sender.
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Configured addresses-per-block.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Iterate over all blocks.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Set the per-state block-count gauges from the current table, for the
    /// event loop to call once per tick (dora_core::metrics is updated the
    /// same way: at the point an aggregate is observed, not on every write).
    pub fn refresh_metrics(&self) {
        let (mut free, mut claiming, mut ours, mut claimed) = (0i64, 0i64, 0i64, 0i64);
        for block in &self.blocks {
            match block.state {
                BlockState::Free => free += 1,
                BlockState::Claiming => claiming += 1,
                BlockState::Ours => ours += 1,
                BlockState::Claimed => claimed += 1,
                BlockState::Blocked => {}
            }
        }
        metrics::BLOCKS_FREE.set(free);
        metrics::BLOCKS_CLAIMING.set(claiming);
        metrics::BLOCKS_OURS.set(ours);
        metrics::BLOCKS_CLAIMED.set(claimed);
    }

    /// Claim ownership of `index` for this node (spec 4.1 `own`).
    ///
    /// Precondition: `state` is `Free` or `Claiming`. Allocates the lease
    /// table, sets `state = Ours`, `owner_id = self`, refreshes `timeout`.
    pub fn own(&mut self, index: usize, now: Timestamp, block_timeout: u64) -> Result<(), CoreError> {
        let block = self.blocks.get_mut(index).ok_or(CoreError::OutOfRange(index))?;
        if !matches!(block.state, BlockState::Free | BlockState::Claiming) {
            return Err(CoreError::InvalidTransition { index, state: block.state, op: "own" });
        }
        // allocate, initialize every entry to Free, THEN flip state -- the
        // C original returns success before initialising; spec 9 calls that
        // a bug and requires this ordering instead.
        let addresses = LeaseTable::new(self.block_size);
        block.addresses = Some(addresses);
        block.state = BlockState::Ours;
        block.owner_id = self.node_id;
        block.timeout = now + block_timeout;
        Ok(())
    }

    /// Release a block back to `Free` (spec 4.1 `release`).
    ///
    /// Precondition: `state != Blocked`. Drops the lease table if any.
    pub fn release(&mut self, index: usize) -> Result<(), CoreError> {
        let block = self.blocks.get_mut(index).ok_or(CoreError::OutOfRange(index))?;
        if block.state == BlockState::Blocked {
            return Err(CoreError::InvalidTransition { index, state: block.state, op: "release" });
        }
        block.addresses = None;
        block.state = BlockState::Free;
        block.owner_id = 0;
        block.timeout = 0;
        block.claim_announcements = 0;
        Ok(())
    }

    /// Administratively reserve a block, removing it from the protocol.
    pub fn block(&mut self, index: usize) -> Result<(), CoreError> {
        let block = self.blocks.get_mut(index).ok_or(CoreError::OutOfRange(index))?;
        block.addresses = None;
        block.state = BlockState::Blocked;
        block.owner_id = 0;
        block.timeout = 0;
        Ok(())
    }

    /// Uniformly select a random `Free` block index, or `None` if there are
    /// none. Uses reservoir sampling over a single pass so two nodes
    /// scanning simultaneously don't preferentially race for the same
    /// block (spec 4.1).
    pub fn find_free(&self, rng: &mut impl Rng) -> Option<usize> {
        let mut chosen = None;
        let mut seen = 0u32;
        for block in &self.blocks {
            if block.state == BlockState::Free {
                seen += 1;
                if rng.gen_range(0..seen) == 0 {
                    chosen = Some(block.index);
                }
            }
        }
        chosen
    }

    /// Sum of free-lease counts over all `Ours` blocks (spec 4.1).
    pub fn count_free_leases_in_owned(&self) -> u32 {
        self.blocks
            .iter()
            .filter(|b| b.state == BlockState::Ours)
            .filter_map(|b| b.addresses.as_ref())
            .map(LeaseTable::num_free)
            .sum()
    }

    /// Offer a free address to `(client_mac, xid)`, scanning owned blocks in
    /// index order (spec 6.2: `acquire_offer`). An address is identified by
    /// `(block_index, offset)` -- translating to/from an IPv4 address is the
    /// DHCP-facing collaborator's job, not the core's (spec 1 non-goal: the
    /// core does not define the on-wire DHCP format).
    pub fn lease_acquire_offer(
        &mut self,
        client_mac: [u8; 6],
        xid: u32,
    ) -> Result<(usize, u32), LeaseError> {
        for block in &mut self.blocks {
            if block.state != BlockState::Ours {
                continue;
            }
            if let Some(addresses) = block.addresses.as_mut() {
                if let Ok(offset) = addresses.acquire_offer(client_mac, xid) {
                    return Ok((block.index, offset));
                }
            }
        }
        Err(LeaseError::NoCapacity)
    }

    /// Confirm an offered address (spec 6.2: `confirm`).
    pub fn lease_confirm(
        &mut self,
        block_index: usize,
        offset: u32,
        client_mac: [u8; 6],
        xid: u32,
        now: Timestamp,
        lease_seconds: u64,
    ) -> Result<(), LeaseError> {
        let block = self.blocks.get_mut(block_index).ok_or(LeaseError::OutOfRange)?;
        let addresses = block.addresses.as_mut().ok_or(LeaseError::OutOfRange)?;
        addresses.confirm(offset, client_mac, xid, now, lease_seconds)
    }

    /// Release a leased address back to the block's free pool (spec 6.2:
    /// `release`). Does not affect the owning block's own state -- only
    /// `BlockTable::release` (block-level) does that.
    pub fn lease_release(&mut self, block_index: usize, offset: u32) -> Result<(), LeaseError> {
        let block = self.blocks.get_mut(block_index).ok_or(LeaseError::OutOfRange)?;
        let addresses = block.addresses.as_mut().ok_or(LeaseError::OutOfRange)?;
        addresses.release(offset)
    }

    /// Inspect an address without mutating it (spec 6.2: `peek`).
    pub fn lease_peek(&self, block_index: usize, offset: u32) -> Result<&Lease, LeaseError> {
        let block = self.blocks.get(block_index).ok_or(LeaseError::OutOfRange)?;
        let addresses = block.addresses.as_ref().ok_or(LeaseError::OutOfRange)?;
        addresses.peek(offset)
    }

    /// For every block with `timeout < now` and state not in `{Free,
    /// Blocked}`, release it. For every `Ours` block, additionally sweep its
    /// lease table. Returns the indices that were released through timeout
    /// (spec 4.1 `check_timeouts`).
    pub fn check_timeouts(&mut self, now: Timestamp) -> Vec<usize> {
        let mut timed_out = Vec::new();
        for block in &mut self.blocks {
            if block.timeout < now && !matches!(block.state, BlockState::Free | BlockState::Blocked)
            {
                block.addresses = None;
                block.state = BlockState::Free;
                block.owner_id = 0;
                block.timeout = 0;
                block.claim_announcements = 0;
                timed_out.push(block.index);
                metrics::BLOCKS_TIMED_OUT.inc();
                continue;
            }
            if block.state == BlockState::Ours {
                if let Some(addresses) = block.addresses.as_mut() {
                    addresses.check_timeouts(now);
                }
            }
        }
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn own_allocates_lease_table_and_sets_owner() {
        let mut table = BlockTable::new(4, 8, 42);
        table.own(1, 100, 60).unwrap();
        let block = table.get(1).unwrap();
        assert_eq!(block.state, BlockState::Ours);
        assert_eq!(block.owner_id, 42);
        assert_eq!(block.timeout, 160);
        assert!(block.addresses.is_some());
        assert_eq!(block.addresses.as_ref().unwrap().num_free(), 8);
    }

    #[test]
    fn own_rejects_claimed_or_ours() {
        let mut table = BlockTable::new(2, 8, 1);
        table.own(0, 0, 60).unwrap();
        assert!(table.own(0, 0, 60).is_err());
    }

    #[test]
    fn release_drops_lease_table_bit_identical_round_trip() {
        let mut table = BlockTable::new(2, 8, 1);
        table.own(0, 0, 60).unwrap();
        table.release(0).unwrap();
        let block = table.get(0).unwrap();
        assert_eq!(block.state, BlockState::Free);
        assert_eq!(block.owner_id, 0);
        assert!(block.addresses.is_none());
        assert_eq!(block.claim_announcements, 0);
    }

    #[test]
    fn release_rejects_blocked() {
        let mut table = BlockTable::new(1, 8, 1);
        table.block(0).unwrap();
        assert!(table.release(0).is_err());
    }

    #[test]
    fn find_free_returns_none_when_exhausted() {
        let mut table = BlockTable::new(1, 8, 1);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(table.find_free(&mut rng), Some(0));
        table.own(0, 0, 60).unwrap();
        assert_eq!(table.find_free(&mut rng), None);
    }

    #[test]
    fn find_free_is_uniform_over_many_trials() {
        let table = BlockTable::new(4, 8, 1);
        let mut rng = StdRng::seed_from_u64(1234);
        let mut counts = [0u32; 4];
        for _ in 0..4000 {
            let idx = table.find_free(&mut rng).unwrap();
            counts[idx] += 1;
        }
        for c in counts {
            assert!((c as i64 - 1000).abs() < 200, "counts={counts:?}");
        }
    }

    #[test]
    fn check_timeouts_frees_expired_claimed_blocks() {
        let mut table = BlockTable::new(1, 8, 1);
        table.own(0, 0, 60).unwrap();
        let timed_out = table.check_timeouts(1000);
        assert_eq!(timed_out, vec![0]);
        assert_eq!(table.get(0).unwrap().state, BlockState::Free);
    }

    #[test]
    fn check_timeouts_never_touches_blocked() {
        let mut table = BlockTable::new(1, 8, 1);
        table.block(0).unwrap();
        let timed_out = table.check_timeouts(1_000_000);
        assert!(timed_out.is_empty());
        assert_eq!(table.get(0).unwrap().state, BlockState::Blocked);
    }

    #[test]
    fn lease_acquire_offer_skips_unowned_blocks() {
        let mut table = BlockTable::new(2, 4, 1);
        table.own(1, 0, 60).unwrap();
        let (block_index, offset) = table.lease_acquire_offer([1; 6], 9).unwrap();
        assert_eq!(block_index, 1);
        assert_eq!(offset, 0);
    }

    #[test]
    fn lease_acquire_offer_fails_with_no_owned_blocks() {
        let mut table = BlockTable::new(2, 4, 1);
        assert_eq!(table.lease_acquire_offer([1; 6], 9), Err(LeaseError::NoCapacity));
    }

    #[test]
    fn refresh_metrics_counts_each_state() {
        let mut table = BlockTable::new(4, 8, 1);
        table.own(0, 0, 60).unwrap();
        table.block(1).unwrap();
        {
            let block = table.get_mut(2).unwrap();
            block.state = BlockState::Claiming;
        }
        table.refresh_metrics();
        assert_eq!(metrics::BLOCKS_OURS.get(), 1);
        assert_eq!(metrics::BLOCKS_CLAIMING.get(), 1);
        assert_eq!(metrics::BLOCKS_FREE.get(), 1);
    }

    #[test]
    fn lease_confirm_then_release_round_trips() {
        let mut table = BlockTable::new(1, 4, 1);
        table.own(0, 0, 60).unwrap();
        let (block_index, offset) = table.lease_acquire_offer([2; 6], 5).unwrap();
        table.lease_confirm(block_index, offset, [2; 6], 5, 0, 3600).unwrap();
        assert_eq!(table.lease_peek(block_index, offset).unwrap().state, LeaseState::Leased);
        table.lease_release(block_index, offset).unwrap();
        assert_eq!(table.lease_peek(block_index, offset).unwrap().state, LeaseState::Released);
    }
}

//! Per-block lease bookkeeping (spec 3.3, 4.2).
//!
//! A [`LeaseTable`] is attached to a block lazily, when the block transitions
//! to `OURS`, and dropped whole when the block leaves `OURS` (spec 3.3: "
//! leases live exactly as long as their parent block is OURS"). Only
//! `num_free` and `check_timeouts` are consumed by the core itself; the
//! remaining operations are the interface this crate publishes to the
//! external DHCP packet handler (spec 6.2).
use thiserror::Error;

use crate::protocol::Timestamp;

/// Lifecycle state of a single address within an owned block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// available for offer
    Free,
    /// offered to a client, awaiting REQUEST
    Offered,
    /// actively leased to a client
    Leased,
    /// explicitly released by its client, kept briefly for reporting
    Released,
}

/// Per-address lease record (spec 3.3).
#[derive(Debug, Clone, Copy)]
pub struct Lease {
    /// current lifecycle state
    pub state: LeaseState,
    /// absolute expiry; zero when `Free`
    pub lease_end: Timestamp,
    /// client's hardware address; meaningless when `Free`
    pub client_mac: [u8; 6],
    /// client's DHCP transaction id; meaningless when `Free`
    pub xid: u32,
}

impl Default for Lease {
    fn default() -> Self {
        Lease { state: LeaseState::Free, lease_end: 0, client_mac: [0; 6], xid: 0 }
    }
}

/// Reasons a lease operation can fail, surfaced to the DHCP packet handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// no address in the block is `Free`
    #[error("no free address in this block")]
    NoCapacity,
    /// the requested address index is outside the block
    #[error("address offset is outside the block")]
    OutOfRange,
    /// the address is not currently offered/leased to this xid
    #[error("address is not currently held")]
    NotHeld,
}

/// Fixed-length array of per-address leases for one owned block.
#[derive(Debug, Clone)]
pub struct LeaseTable {
    addresses: Vec<Lease>,
}

impl LeaseTable {
    /// Allocate a lease table with every entry `Free, lease_end = 0`.
    pub fn new(block_size: u32) -> Self {
        LeaseTable { addresses: vec![Lease::default(); block_size as usize] }
    }

    /// Number of addresses available for a new offer: `Free` or `Released`
    /// (a released address is immediately available again; `Released` only
    /// marks that it was just vacated, for the collaborator's reporting).
    pub fn num_free(&self) -> u32 {
        self.addresses
            .iter()
            .filter(|l| matches!(l.state, LeaseState::Free | LeaseState::Released))
            .count() as u32
    }

    /// Move any `Leased` address whose `lease_end < now` back to `Free`.
    pub fn check_timeouts(&mut self, now: Timestamp) {
        for lease in &mut self.addresses {
            if lease.state == LeaseState::Leased && lease.lease_end < now {
                *lease = Lease::default();
            }
        }
    }

    /// Offer the first `Free` address to `(client_mac, xid)`, marking it
    /// `Offered`. Returns the offset within the block, or `NoCapacity`.
    pub fn acquire_offer(&mut self, client_mac: [u8; 6], xid: u32) -> Result<u32, LeaseError> {
        let idx = self
            .addresses
            .iter()
            .position(|l| matches!(l.state, LeaseState::Free | LeaseState::Released))
            .ok_or(LeaseError::NoCapacity)?;
        self.addresses[idx] = Lease { state: LeaseState::Offered, lease_end: 0, client_mac, xid };
        Ok(idx as u32)
    }

    /// Confirm an offered (or renew a leased) address for `lease_seconds`,
    /// starting from `now`.
    pub fn confirm(
        &mut self,
        offset: u32,
        client_mac: [u8; 6],
        xid: u32,
        now: Timestamp,
        lease_seconds: u64,
    ) -> Result<(), LeaseError> {
        let lease = self.addresses.get_mut(offset as usize).ok_or(LeaseError::OutOfRange)?;
        if lease.state == LeaseState::Free {
            return Err(LeaseError::NotHeld);
        }
        lease.state = LeaseState::Leased;
        lease.client_mac = client_mac;
        lease.xid = xid;
        lease.lease_end = now + lease_seconds;
        Ok(())
    }

    /// Release an address back to `Free`.
    pub fn release(&mut self, offset: u32) -> Result<(), LeaseError> {
        let lease = self.addresses.get_mut(offset as usize).ok_or(LeaseError::OutOfRange)?;
        *lease = Lease { state: LeaseState::Released, lease_end: 0, ..Lease::default() };
        Ok(())
    }

    /// Inspect the current state of an address without mutating it.
    pub fn peek(&self, offset: u32) -> Result<&Lease, LeaseError> {
        self.addresses.get(offset as usize).ok_or(LeaseError::OutOfRange)
    }

    /// Number of addresses this table covers.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether the table covers zero addresses (never true for a real block).
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_is_all_free() {
        let table = LeaseTable::new(4);
        assert_eq!(table.num_free(), 4);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn offer_then_confirm_then_timeout() {
        let mut table = LeaseTable::new(2);
        let mac = [1, 2, 3, 4, 5, 6];
        let offset = table.acquire_offer(mac, 42).unwrap();
        assert_eq!(table.num_free(), 1);

        table.confirm(offset, mac, 42, 1_000, 60).unwrap();
        assert_eq!(table.peek(offset).unwrap().state, LeaseState::Leased);

        table.check_timeouts(1_100); // > lease_end (1060)
        assert_eq!(table.peek(offset).unwrap().state, LeaseState::Free);
        assert_eq!(table.num_free(), 2);
    }

    #[test]
    fn no_capacity_when_all_leased() {
        let mut table = LeaseTable::new(1);
        let mac = [0; 6];
        table.acquire_offer(mac, 1).unwrap();
        assert_eq!(table.acquire_offer(mac, 2), Err(LeaseError::NoCapacity));
    }

    #[test]
    fn release_frees_the_address() {
        let mut table = LeaseTable::new(1);
        let mac = [9; 6];
        let offset = table.acquire_offer(mac, 7).unwrap();
        table.confirm(offset, mac, 7, 0, 3600).unwrap();
        table.release(offset).unwrap();
        assert_eq!(table.num_free(), 1);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let mut table = LeaseTable::new(1);
        assert_eq!(table.release(5), Err(LeaseError::OutOfRange));
    }
}

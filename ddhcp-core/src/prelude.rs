//! Convenience re-exports for consumers of `ddhcp-core`.
pub use crate::block::{
    Block, BlockState, BlockTable, ClaimEngine, InboundHandler, Lease, LeaseState, LeaseTable,
    RenewalReaper,
};
pub use crate::config::Config;
pub use crate::error::CoreError;
pub use crate::protocol::{Command, PayloadEntry, Timestamp};

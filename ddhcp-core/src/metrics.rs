#![allow(missing_docs)]
//! # metrics
//!
//! process-wide counters/gauges for the block-ownership engine, following
//! `dora_core::metrics`'s `lazy_static! { static ref X: IntGauge = ... }`
//! pattern. No HTTP exporter lives here -- that belongs to a peripheral
//! collaborator, out of core scope.
use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

lazy_static! {
    /// blocks currently `OURS`
    pub static ref BLOCKS_OURS: IntGauge =
        register_int_gauge!("ddhcp_blocks_ours", "blocks owned by this node").unwrap();
    /// blocks currently `CLAIMING`
    pub static ref BLOCKS_CLAIMING: IntGauge =
        register_int_gauge!("ddhcp_blocks_claiming", "blocks this node is tentatively claiming").unwrap();
    /// blocks currently `CLAIMED` by a peer
    pub static ref BLOCKS_CLAIMED: IntGauge =
        register_int_gauge!("ddhcp_blocks_claimed", "blocks claimed by other nodes").unwrap();
    /// blocks currently `FREE`
    pub static ref BLOCKS_FREE: IntGauge =
        register_int_gauge!("ddhcp_blocks_free", "unclaimed blocks").unwrap();

    /// total claim announcements emitted (inquire packets)
    pub static ref CLAIM_ANNOUNCEMENTS_SENT: IntCounter = register_int_counter!(
        "ddhcp_claim_announcements_sent",
        "inquire packets emitted by the claim engine"
    )
    .unwrap();
    /// total renewal announcements emitted (claim packets)
    pub static ref RENEWALS_SENT: IntCounter = register_int_counter!(
        "ddhcp_renewals_sent",
        "claim packets emitted by the renewal pass"
    )
    .unwrap();
    /// total blocks promoted from `CLAIMING` to `OURS`
    pub static ref BLOCKS_PROMOTED: IntCounter = register_int_counter!(
        "ddhcp_blocks_promoted_total",
        "blocks promoted from CLAIMING to OURS"
    )
    .unwrap();
    /// total blocks shed due to excess capacity
    pub static ref BLOCKS_SHED: IntCounter = register_int_counter!(
        "ddhcp_blocks_shed_total",
        "owned blocks released because local demand dropped"
    )
    .unwrap();
    /// total blocks lost to a peer's claim/inquire while `CLAIMING`
    pub static ref BLOCKS_PREEMPTED: IntCounter = register_int_counter!(
        "ddhcp_blocks_preempted_total",
        "blocks preempted by a peer while tentatively claiming"
    )
    .unwrap();
    /// total blocks reclaimed through timeout expiry
    pub static ref BLOCKS_TIMED_OUT: IntCounter = register_int_counter!(
        "ddhcp_blocks_timed_out_total",
        "blocks returned to FREE because their timeout elapsed"
    )
    .unwrap();
}

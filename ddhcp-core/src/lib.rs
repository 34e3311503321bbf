//! # ddhcp-core
//!
//! The block-ownership coordination engine shared by cooperating `ddhcpd`
//! nodes: a fixed-size block table, per-block lease bookkeeping, the claim
//! protocol that keeps block ownership at-most-one-per-index across the
//! network, and the wire codec for the claim/inquire multicast packets.
//!
//! This crate has no socket and no event loop of its own -- those live in
//! the `ddhcpd` binary, which drives this engine from a single periodic
//! tick plus reactive packet handling.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use anyhow;
pub use clap;
pub use rand;
pub use tracing;
pub use tracing_subscriber;

pub mod block;
pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod protocol;

pub use crate::block::{Block, BlockState, BlockTable};
pub use crate::error::CoreError;

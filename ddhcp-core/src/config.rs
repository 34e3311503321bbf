//! ddhcp configuration: parsed once at startup, never mutated thereafter.
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// default tentative-claim window, in seconds
pub const DEFAULT_TENTATIVE_TIMEOUT: u64 = 30;
/// default owned-block claim validity, in seconds
pub const DEFAULT_BLOCK_TIMEOUT: u64 = 60;
/// default number of addresses per block
pub const DEFAULT_BLOCK_SIZE: u32 = 32;
/// default count of owned-or-claiming blocks kept ahead of demand
pub const DEFAULT_SPARE_BLOCKS_NEEDED: u32 = 2;
/// default control socket path
pub const DEFAULT_CONTROL_PATH: &str = "/var/run/ddhcpd/control";
/// default log level, can also be set with `DDHCP_LOG`
pub const DEFAULT_DDHCP_LOG: &str = "info";

/// Configuration for one node's block-ownership engine. Read-mostly: built
/// once at startup (see [`cli::Config`] in the `ddhcpd` binary for how the
/// operator supplies these) and handed around by shared reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// IPv4 subnet served, network address
    pub prefix: Ipv4Addr,
    /// subnet prefix length
    pub prefix_len: u8,
    /// addresses per block; must be a power of two
    pub block_size: u32,
    /// this node's stable identifier
    pub node_id: u64,
    /// seconds a block stays `CLAIMING` before promotion to `OURS`
    pub tentative_timeout: u64,
    /// seconds an owned block's claim is valid before re-announcement
    pub block_timeout: u64,
    /// target count of owned-or-claiming blocks kept ahead of demand
    pub spare_blocks_needed: u32,
}

impl Config {
    /// Number of blocks the configured subnet is carved into.
    ///
    /// # Panics
    /// Panics if `block_size` is zero or not a power of two, if `prefix_len`
    /// is out of the `0..=32` range, or if the subnet is smaller than one
    /// block -- these are startup-time configuration errors, not runtime
    /// faults.
    pub fn number_of_blocks(&self) -> u32 {
        assert!(self.block_size.is_power_of_two(), "block_size must be a power of two");
        let net = Ipv4Net::new(self.prefix, self.prefix_len).expect("prefix_len must be 0..=32");
        let subnet_size = u64::from(u32::from(net.broadcast())) - u64::from(u32::from(net.network())) + 1;
        let n = subnet_size / self.block_size as u64;
        assert!(n > 0, "subnet too small for one block");
        n as u32
    }
}

pub mod cli {
    //! Parse node configuration from the CLI or environment, the way
    //! `dora-core::config::cli` does: one flat `clap::Parser` struct with
    //! `env` enabled on every field.
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    pub use clap::Parser;

    use super::{
        DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_TIMEOUT, DEFAULT_CONTROL_PATH, DEFAULT_DDHCP_LOG,
        DEFAULT_SPARE_BLOCKS_NEEDED, DEFAULT_TENTATIVE_TIMEOUT,
    };

    /// default node-facing (client) interface
    pub const DEFAULT_INTERFACE_CLIENT: &str = "eth0";
    /// default upstream (multicast) interface
    pub const DEFAULT_INTERFACE: &str = "eth0";
    /// tick period, in seconds
    pub const DEFAULT_TICK_SECS: u64 = 10;

    /// parses from cli & environment var
    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "ddhcpd", bin_name = "ddhcpd", about, long_about = None)]
    pub struct Config {
        /// upstream interface ddhcp coordinates on (multicast claim/inquire)
        #[clap(long, env, value_parser, default_value = DEFAULT_INTERFACE)]
        pub interface: String,
        /// interface the DHCP client socket is bound to
        #[clap(long, env, value_parser, default_value = DEFAULT_INTERFACE_CLIENT)]
        pub interface_client: String,
        /// IPv4 subnet prefix served
        #[clap(long, env, value_parser)]
        pub prefix: Ipv4Addr,
        /// subnet prefix length
        #[clap(long, env, value_parser)]
        pub prefix_len: u8,
        /// addresses per block, must be a power of two
        #[clap(long, env, value_parser, default_value_t = DEFAULT_BLOCK_SIZE)]
        pub block_size: u32,
        /// this node's stable 64-bit identifier; randomly generated if unset
        #[clap(long, env, value_parser)]
        pub node_id: Option<u64>,
        /// seconds a block stays tentative before promotion
        #[clap(long, env, value_parser, default_value_t = DEFAULT_TENTATIVE_TIMEOUT)]
        pub tentative_timeout: u64,
        /// seconds an owned block's claim is valid before renewal
        #[clap(long, env, value_parser, default_value_t = DEFAULT_BLOCK_TIMEOUT)]
        pub block_timeout: u64,
        /// target spare blocks kept ahead of demand
        #[clap(long, env, value_parser, default_value_t = DEFAULT_SPARE_BLOCKS_NEEDED)]
        pub spare_blocks_needed: u32,
        /// seconds between ticks of the claim engine and renewal & reaper
        #[clap(long, env, value_parser, default_value_t = DEFAULT_TICK_SECS)]
        pub tick_secs: u64,
        /// path to the operator control UNIX socket
        #[clap(long, env, value_parser, default_value = DEFAULT_CONTROL_PATH)]
        pub control_path: PathBuf,
        /// set the log level. All valid `RUST_LOG` directives are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_DDHCP_LOG)]
        pub ddhcp_log: String,
    }

    impl Config {
        /// Build the engine-facing [`super::Config`] from the parsed CLI
        /// config, assigning a random `node_id` when none was supplied.
        pub fn to_core_config(&self) -> super::Config {
            super::Config {
                prefix: self.prefix,
                prefix_len: self.prefix_len,
                block_size: self.block_size,
                node_id: self.node_id.unwrap_or_else(rand::random),
                tentative_timeout: self.tentative_timeout,
                block_timeout: self.block_timeout,
                spare_blocks_needed: self.spare_blocks_needed,
            }
        }
    }
}

pub mod trace {
    //! tracing configuration, mirroring `dora_core::config::trace`.
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt,
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// Initialise the global tracing subscriber from the `ddhcp_log`
    /// directive (e.g. `"info"`, `"ddhcp_core=debug"`).
    pub fn init(ddhcp_log: &str) -> Result<()> {
        let filter = EnvFilter::try_new(ddhcp_log).or_else(|_| EnvFilter::try_new("info"))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_of_blocks_divides_subnet() {
        let cfg = Config {
            prefix: Ipv4Addr::new(10, 0, 0, 0),
            prefix_len: 24,
            block_size: 32,
            node_id: 1,
            tentative_timeout: 30,
            block_timeout: 60,
            spare_blocks_needed: 2,
        };
        assert_eq!(cfg.number_of_blocks(), 8);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_block_size() {
        let cfg = Config {
            prefix: Ipv4Addr::new(10, 0, 0, 0),
            prefix_len: 24,
            block_size: 30,
            node_id: 1,
            tentative_timeout: 30,
            block_timeout: 60,
            spare_blocks_needed: 2,
        };
        cfg.number_of_blocks();
    }
}

use anyhow::{Context, Result};
use ddhcp_core::clap::Parser;
use ddhcp_core::config::{cli, trace};
use ddhcp_core::tracing::{debug, error};
use tokio::runtime::Builder;

mod server;

fn main() -> Result<()> {
    let config = cli::Config::parse();
    trace::init(&config.ddhcp_log).context("failed to initialise logging")?;
    debug!(?config, "parsed configuration");
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    builder.thread_name("ddhcpd-worker").enable_all();
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { server::run(config).await }).await {
            Err(err) => error!(?err, "server task panicked"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(Ok(())) => debug!("exiting..."),
        }
    });

    Ok(())
}

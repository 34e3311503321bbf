//! Operator control channel (spec 6.3), grounded on `netsock.c: control_open`:
//! a UNIX stream socket that dumps the block table as CSV and closes.
use std::path::Path;

use anyhow::{Context, Result};
use ddhcp_core::tracing::{debug, warn};
use ddhcp_core::BlockTable;
use tokio::net::{UnixListener, UnixStream};

/// Bind the control socket, removing a stale socket file left by a prior
/// run (the original C daemon leaves this to the operator; a stale path
/// would otherwise make every restart fail to bind).
pub fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stale control socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create control socket directory {}", parent.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("failed to bind control socket {}", path.display()))
}

/// Write the status dump to an already-accepted connection, per spec 6.3:
/// "writes a CSV ... then one row per block and closes the connection".
pub async fn serve_one(mut stream: UnixStream, table: &BlockTable) {
    let mut buf = Vec::new();
    if let Err(err) = ddhcp_core::control::write_status(table, &mut buf) {
        warn!(%err, "failed to format status dump");
        return;
    }
    use tokio::io::AsyncWriteExt;
    if let Err(err) = stream.write_all(&buf).await {
        warn!(%err, "failed to write status dump to control client");
        return;
    }
    debug!(bytes = buf.len(), "served control status dump");
}

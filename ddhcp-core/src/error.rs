//! Error taxonomy for the core engine.
//!
//! Per spec: fatal errors propagate to process exit, everything else is
//! logged and handled by the next tick. Only the fatal class lives here as
//! a typed error -- the "log and continue" / "silent drop" classes are
//! represented by `Option`/`bool` returns at the call sites, not errors.
use thiserror::Error;

/// Errors that can escape the core engine. These are all meant to be fatal:
/// the caller should log with context and exit the process.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Allocating a block's lease table failed. Per spec 4.1 `own()` fails
    /// only on allocation failure, and that failure is fatal.
    #[error("failed to allocate lease table for block {index}")]
    LeaseAllocation {
        /// index of the block that could not be promoted
        index: usize,
    },
    /// Attempted a state transition not valid from the block's current state.
    #[error("block {index} is in state {state:?}, cannot {op}")]
    InvalidTransition {
        /// index of the offending block
        index: usize,
        /// the block's current state
        state: crate::block::BlockState,
        /// name of the attempted operation
        op: &'static str,
    },
    /// Index outside of `0..number_of_blocks`.
    #[error("block index {0} out of range")]
    OutOfRange(usize),
}

//! Operator control channel status dump (spec 6.3).
//!
//! The core only formats the CSV; opening the UNIX socket and accepting a
//! connection is the binary's job (spec 1: local control channel is an
//! external collaborator).
use std::io::{self, Write};

use crate::block::{BlockState, BlockTable};

fn state_name(state: BlockState) -> &'static str {
    match state {
        BlockState::Free => "FREE",
        BlockState::Claiming => "CLAIMING",
        BlockState::Ours => "OURS",
        BlockState::Claimed => "CLAIMED",
        BlockState::Blocked => "BLOCKED",
    }
}

/// Write the `index,state,owner,claim_count,timeout` status dump for every
/// block in the table, one row each, in index order.
///
/// The owner column is populated for `CLAIMED` and `OURS` blocks (spec 9:
/// the original left it blank for `CLAIMED`; this implementation does not
/// reproduce that).
pub fn write_status<W: Write>(table: &BlockTable, w: &mut W) -> io::Result<()> {
    writeln!(w, "index,state,owner,claim_count,timeout")?;
    for block in table.iter() {
        let owner = match block.state {
            BlockState::Claimed | BlockState::Ours => block.owner_id.to_string(),
            _ => String::new(),
        };
        writeln!(
            w,
            "{},{},{},{},{}",
            block.index,
            state_name(block.state),
            owner,
            block.claim_announcements,
            block.timeout
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_has_header_and_one_row_per_block() {
        let mut table = BlockTable::new(3, 8, 1);
        table.own(0, 0, 60).unwrap();
        {
            let block = table.get_mut(1).unwrap();
            block.state = BlockState::Claimed;
            block.owner_id = 42;
            block.timeout = 90;
        }

        let mut out = Vec::new();
        write_status(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next(), Some("index,state,owner,claim_count,timeout"));
        assert_eq!(lines.next(), Some("0,OURS,1,0,60"));
        assert_eq!(lines.next(), Some("1,CLAIMED,42,0,90"));
        assert_eq!(lines.next(), Some("2,FREE,,0,0"));
        assert_eq!(lines.next(), None);
        assert!(text.ends_with('\n'));
    }
}

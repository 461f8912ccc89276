//! Pre-flight problem classification.
//!
//! Everything here is radio-free: an operator runs these checks before
//! starting a live session to learn which blocks a clone would stumble on.
//! The live sweep itself is best-effort and only logs per-block failures.

use bitflags::bitflags;

use crate::access;
use crate::dump::{is_sector_trailer, DumpKind, MfClassicDump};

bitflags! {
    /// Block-level obstacles preventing a full clone.
    #[derive(Default)]
    pub struct WriteProblem: u8 {
        /// No dump attached at all.
        const NO_DATA = 1 << 0;
        /// A sector's access bits forbid the write and can't be reset.
        const LOCKED_ACCESS_BITS = 1 << 1;
        /// Neither key of some target sector is known.
        const MISSING_TARGET_KEYS = 1 << 2;
        /// Some source block was never captured; it will be skipped.
        const MISSING_SOURCE_DATA = 1 << 3;
        /// The source dump's layout covers fewer blocks than the target.
        const INCOMPLETE_SOURCE = 1 << 4;
    }
}

/// Scans the target dump for anything that would block a wipe or write:
/// missing keys and unresettably locked access bits, aggregated over every
/// block.
pub fn classify_target_problems(dump: Option<&MfClassicDump>) -> WriteProblem {
    let Some(dump) = dump else {
        return WriteProblem::NO_DATA;
    };
    let mut problems = WriteProblem::empty();
    for block in 0..dump.kind().total_blocks() {
        problems |= if is_sector_trailer(block) {
            access::classify_sector_trailer_problems(dump, block)
        } else {
            access::classify_data_block_problems(dump, block)
        };
    }
    problems
}

/// Scans the source dump. Uncaptured blocks are aggregated into a single
/// advisory flag, since during a write they merely cause a skip.
pub fn classify_source_problems(dump: Option<&MfClassicDump>) -> WriteProblem {
    let Some(dump) = dump else {
        return WriteProblem::NO_DATA;
    };
    let mut problems = WriteProblem::empty();
    let uncaptured = (0..dump.kind().total_blocks())
        .any(|block| !dump.block(block).map(|b| b.captured).unwrap_or(false));
    if uncaptured {
        problems |= WriteProblem::MISSING_SOURCE_DATA;
    }
    problems
}

/// Whether a source dump's layout can fill the target's.
pub fn check_source_layout(source: DumpKind, target: DumpKind) -> WriteProblem {
    if source.total_blocks() < target.total_blocks() {
        WriteProblem::INCOMPLETE_SOURCE
    } else {
        WriteProblem::empty()
    }
}

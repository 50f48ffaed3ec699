//! Sentinel inspection and leak reports.

#![allow(unsafe_code)]

use std::fmt;
use std::panic::Location;
use std::ptr::NonNull;

use crate::config::TrackingLevel;
use crate::layout::{self, BlockHeader, HEADER_SIZE, TRAILER_SIZE};
use crate::registry::BlockRecord;

/// State of a block's guard bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIntegrity {
    Intact,
    /// The trailer past the user region was overwritten.
    Overrun,
    /// The header before the user region was overwritten.
    Underrun,
}

impl BlockIntegrity {
    #[must_use]
    pub const fn is_intact(self) -> bool {
        matches!(self, Self::Intact)
    }
}

/// Check the header and trailer of a guarded block.
///
/// # Safety
///
/// `user` must be the user pointer of a block allocated by the guarded heap
/// with `size` user bytes that has not been returned to its provider.
#[must_use]
pub unsafe fn inspect(user: NonNull<u8>, size: usize) -> BlockIntegrity {
    // SAFETY: the header occupies the HEADER_SIZE bytes before `user`, aligned to BLOCK_ALIGN.
    let header = unsafe { user.sub(HEADER_SIZE).cast::<BlockHeader>().read() };
    if !header.is_intact(size) {
        return BlockIntegrity::Underrun;
    }
    let mut trailer = [0u8; TRAILER_SIZE];
    // SAFETY: the trailer occupies the TRAILER_SIZE bytes after the user region.
    unsafe {
        std::ptr::copy_nonoverlapping(user.as_ptr().add(size), trailer.as_mut_ptr(), TRAILER_SIZE);
    }
    if layout::trailer_intact(&trailer) {
        BlockIntegrity::Intact
    } else {
        BlockIntegrity::Overrun
    }
}

/// One block still live when its epoch closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedBlock {
    pub size: usize,
    pub serial: u64,
    pub origin: &'static Location<'static>,
    pub backtrace: Option<String>,
}

impl fmt::Display for LeakedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALLOC({} from {})", self.size, self.origin)
    }
}

/// Outcome of closing an epoch with outstanding blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakReport {
    pub epoch: u64,
    /// Outstanding blocks according to the epoch counter.
    pub count: usize,
    /// Itemized blocks, oldest first. Empty when tracking is off.
    pub blocks: Vec<LeakedBlock>,
}

impl LeakReport {
    /// Build a report from the registry records drained at epoch end.
    #[must_use]
    pub fn new(epoch: u64, count: usize, leaked: &[BlockRecord], tracking: TrackingLevel) -> Self {
        let blocks = if tracking.itemizes() {
            leaked
                .iter()
                .map(|record| LeakedBlock {
                    size: record.size,
                    serial: record.serial,
                    origin: record.origin,
                    backtrace: record.backtrace.as_ref().map(ToString::to_string),
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            epoch,
            count,
            blocks,
        }
    }

    /// Total bytes held by the itemized blocks.
    #[must_use]
    pub fn leaked_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.size).sum()
    }

    /// One line per leaked block, backtrace frames indented below.
    #[must_use]
    pub fn detail_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            lines.push(block.to_string());
            if let Some(trace) = &block.backtrace {
                lines.extend(trace.lines().map(|frame| format!("     {frame}")));
            }
        }
        lines
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.count == 1 { "block" } else { "blocks" };
        write!(f, "This test leaks! ({} {noun} not released)", self.count)
    }
}

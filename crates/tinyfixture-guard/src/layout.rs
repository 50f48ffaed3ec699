//! Physical layout of a guarded block.
//!
//! Every guarded allocation is carved out of one provider region:
//!
//! ```text
//! [ BlockHeader (16) | user bytes (size) | b"END\0" ]
//!                    ^ pointer handed to the test
//! ```
//!
//! The header's `guard` word must stay zero and its `size` must agree with
//! the registry; anything else means a write landed below the user region.
//! The trailer must read `END\0`; anything else means a write ran past it.

/// Alignment of every provider region and therefore of every user pointer.
pub const BLOCK_ALIGN: usize = 16;

/// Size of the hidden header placed before the user pointer.
pub const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

/// Sentinel written immediately after the user region.
pub const TRAILER: [u8; 4] = *b"END\0";

/// Size of the trailing sentinel.
pub const TRAILER_SIZE: usize = TRAILER.len();

/// Total bookkeeping bytes per block (header + trailer).
pub const TOTAL_OVERHEAD: usize = HEADER_SIZE + TRAILER_SIZE;

/// Header stored immediately before the user pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct BlockHeader {
    /// Requested size in bytes (not including overhead).
    pub size: usize,
    /// Always zero while the block is intact.
    pub guard: usize,
}

impl BlockHeader {
    /// Header for a fresh block of `size` user bytes.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self { size, guard: 0 }
    }

    /// True when the header still describes a block of `expected_size` bytes.
    #[must_use]
    pub const fn is_intact(&self, expected_size: usize) -> bool {
        self.guard == 0 && self.size == expected_size
    }
}

/// Bytes to request from a provider for `size` user bytes.
#[must_use]
pub fn total_size(size: usize) -> Option<usize> {
    size.checked_add(TOTAL_OVERHEAD)
}

/// Round `bytes` up to [`BLOCK_ALIGN`].
#[must_use]
pub fn align_up(bytes: usize) -> Option<usize> {
    bytes
        .checked_add(BLOCK_ALIGN - 1)
        .map(|b| b & !(BLOCK_ALIGN - 1))
}

/// Check trailer bytes read back from a block.
#[must_use]
pub fn trailer_intact(bytes: &[u8; TRAILER_SIZE]) -> bool {
    *bytes == TRAILER
}

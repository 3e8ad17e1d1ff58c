//! Allocator and database file layout constants.

use kite_common::CHUNK_SIZE;

/// Database file format version, stored in the first 4 bytes of chunk 0.
pub const FORMAT_VERSION: u32 = 1;

/// Size of a block's size tag in bytes.
///
/// Every allocator block starts with a signed 16-bit size tag: positive
/// while the block sits on a free list, negated once it is handed out.
pub const BLOCK_HEADER_SIZE: usize = 2;

/// Allocation granularity in bytes. Block sizes are multiples of this.
pub const BLOCK_SIZE_DELTA: usize = 8;

/// Minimum block size in deltas (16 bytes).
///
/// A free block must hold its size tag plus 4-byte next and prev links,
/// which is 10 bytes, rounded up to two deltas.
pub const MIN_BLOCK_DELTAS: usize = 2;

/// Maximum block size in deltas: one whole chunk.
pub const MAX_BLOCK_DELTAS: usize = CHUNK_SIZE / BLOCK_SIZE_DELTA;

/// Largest usable allocation in bytes. Blocks never span chunks.
pub const MAX_MALLOC_SIZE: usize = CHUNK_SIZE - BLOCK_HEADER_SIZE;

/// Offset of the next-free link within a free block.
pub(crate) const BLOCK_NEXT_OFFSET: usize = BLOCK_HEADER_SIZE;

/// Offset of the prev-free link within a free block.
pub(crate) const BLOCK_PREV_OFFSET: usize = BLOCK_HEADER_SIZE + 4;

/// Byte offset in chunk 0 of the free-list head for a block size.
///
/// A size of `d` deltas maps to offset `d * 4`. The smallest block is
/// two deltas, so offsets 0..8 are never touched by the table and the
/// version field fits in front of it.
pub(crate) fn free_table_offset(blocksize: usize) -> usize {
    (blocksize / BLOCK_SIZE_DELTA) * 4
}

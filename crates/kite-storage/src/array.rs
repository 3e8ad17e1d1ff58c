//! Growable record-pointer arrays stored inside the database.
//!
//! A record array is a variable-length sequence of record pointers
//! whose whole state lives in the database: there is no in-process
//! array object, only a byte address. Insertions append at the end and
//! hand back an index; removals swap the last element into the hole,
//! so indices stay contiguous but order is not preserved past the
//! first removal.
//!
//! Array header layout, embedded in the enclosing record:
//! ```text
//! +--------------------------+ 0
//! | growable block ptr (4)   |  null while everything fits inline
//! +--------------------------+ 4
//! | inline slot [0] (4)      |
//! | ...                      |
//! | inline slot [n-1] (4)    |
//! +--------------------------+ 4 + n*4
//! ```
//!
//! The first `inline_size` elements live in the header itself, so small
//! arrays cost no allocation at all. While there is no growable block,
//! the size is not stored anywhere; it is the position of the first
//! null slot among the inline records. That is why null is a reserved
//! value: `add` rejects it.
//!
//! Growable block layout:
//! ```text
//! +--------------------------+ 0
//! | array size (4)           |  element count, inline slots included
//! +--------------------------+ 4
//! | allocated size (4)       |  slot capacity of the growable region
//! +--------------------------+ 8
//! | slot [inline_size] (4)   |
//! | ...                      |
//! +--------------------------+ 8 + allocated*4
//! ```
//!
//! When `allocated size` exceeds [`RecordArray::max_growable_block_size`]
//! the block is a metablock instead: its slots hold pointers to child
//! blocks of exactly that many elements each, and `allocated size` is a
//! multiple of it. Child blocks keep their own header fields unused;
//! the metablock's are authoritative.
//!
//! Additions and removals run in constant amortized time. The growable
//! region grows to the next power of two, clamps at the largest
//! single-block size, then grows a metablock child at a time; it
//! shrinks along the same curve once usage falls to a quarter of the
//! allocation, with one element of slack so an add/remove pair at a
//! boundary does not oscillate.

use crate::constants::BLOCK_HEADER_SIZE;
use crate::database::Database;
use kite_common::{Addr, KiteError, Result, CHUNK_SIZE, PTR_SIZE};

/// Bytes in the array header before the inline slots.
const ARRAY_HEADER_BYTES: usize = PTR_SIZE;

/// Byte offset of the element count in a growable block.
const ARRAY_SIZE_OFFSET: usize = 0;

/// Byte offset of the slot capacity in a growable block.
const ALLOCATED_SIZE_OFFSET: usize = 4;

/// Bytes in a growable block before its slots.
const GROWABLE_BLOCK_HEADER_BYTES: usize = 8;

/// Largest number of slots a single growable block can hold.
const MAX_GROWABLE_SIZE: usize =
    (CHUNK_SIZE - BLOCK_HEADER_SIZE - GROWABLE_BLOCK_HEADER_BYTES) / PTR_SIZE;

/// A growable array of record pointers, identified by a database address.
///
/// The handle itself carries only the inline slot count; every
/// operation takes the database and the array's address explicitly.
/// The same `inline_size` must be used for an address over its whole
/// lifetime. An array comes into existence when the enclosing record
/// zero-fills [`RecordArray::record_size`] bytes at its address, and
/// must be torn down with [`RecordArray::destruct`] before that record
/// is freed.
#[derive(Debug, Clone, Copy)]
pub struct RecordArray {
    /// Number of element slots embedded in the array header.
    inline_size: usize,
}

impl RecordArray {
    /// Creates a handle for arrays with the given number of inline slots.
    pub const fn new(inline_size: usize) -> Self {
        Self { inline_size }
    }

    /// Returns the header size in bytes for the enclosing record layout.
    pub fn record_size(&self) -> usize {
        ARRAY_HEADER_BYTES + PTR_SIZE * self.inline_size
    }

    /// Returns the largest slot count a single growable block can hold.
    pub fn max_growable_block_size() -> usize {
        MAX_GROWABLE_SIZE
    }

    /// Returns the number of elements in the array.
    pub fn size(&self, db: &Database, address: Addr) -> Result<usize> {
        let growable = db.get_rec_ptr(address)?;
        if growable.is_null() {
            // No growable block: the size is the position of the first
            // null pointer among the inline records.
            let slots = address.offset(ARRAY_HEADER_BYTES);
            for index in 0..self.inline_size {
                if db.get_rec_ptr(slots.offset(index * PTR_SIZE))?.is_null() {
                    return Ok(index);
                }
            }
            return Ok(self.inline_size);
        }
        Ok(db.get_int(growable.offset(ARRAY_SIZE_OFFSET))? as usize)
    }

    /// Returns true if the array holds no elements.
    pub fn is_empty(&self, db: &Database, address: Addr) -> Result<bool> {
        let growable = db.get_rec_ptr(address)?;
        if growable.is_null() {
            if self.inline_size == 0 {
                return Ok(true);
            }
            return Ok(db.get_rec_ptr(address.offset(ARRAY_HEADER_BYTES))?.is_null());
        }
        Ok(db.get_int(growable.offset(ARRAY_SIZE_OFFSET))? == 0)
    }

    /// Returns the number of elements the array can hold without growing.
    pub fn capacity(&self, db: &Database, address: Addr) -> Result<usize> {
        let growable = db.get_rec_ptr(address)?;
        if growable.is_null() {
            return Ok(self.inline_size);
        }
        let allocated = db.get_int(growable.offset(ALLOCATED_SIZE_OFFSET))? as usize;
        Ok(self.inline_size + allocated)
    }

    /// Returns the element at the given index.
    ///
    /// The caller is responsible for `index < size`; a read at
    /// `index == size` yields the null address.
    pub fn get(&self, db: &Database, address: Addr, index: usize) -> Result<Addr> {
        let slot = self.slot_address(db, address, index)?;
        if slot.is_null() {
            // The append position of a full inline region has no slot
            // to read yet.
            return Ok(Addr::NULL);
        }
        db.get_rec_ptr(slot)
    }

    /// Appends a value and returns its index.
    ///
    /// The index stays valid until the element is removed, but removals
    /// of other elements may move the last element into their place;
    /// callers tracking indices must apply the value returned by
    /// [`RecordArray::remove`].
    pub fn add(&self, db: &Database, address: Addr, value: Addr) -> Result<usize> {
        if value.is_null() {
            return Err(KiteError::NullRecordPointer);
        }

        let insertion_index = self.size(db, address)?;
        let new_size = insertion_index + 1;

        self.ensure_capacity(db, address, new_size)?;
        let slot = self.slot_address(db, address, insertion_index)?;
        db.put_rec_ptr(slot, value)?;
        self.set_size(db, address, new_size)?;
        Ok(insertion_index)
    }

    /// Removes the element at the given index.
    ///
    /// If the element was not last, the last element is swapped into
    /// its place and its value is returned so external indices can be
    /// updated; otherwise the null address is returned.
    pub fn remove(&self, db: &Database, address: Addr, index: usize) -> Result<Addr> {
        let current_size = self.size(db, address)?;
        if index >= current_size {
            return Err(KiteError::IndexOutOfBounds {
                index,
                size: current_size,
            });
        }
        let last_index = current_size - 1;

        let removed_slot = self.slot_address(db, address, index)?;
        let moved = if index == last_index {
            db.put_rec_ptr(removed_slot, Addr::NULL)?;
            Addr::NULL
        } else {
            let last_slot = self.slot_address(db, address, last_index)?;
            let last_value = db.get_rec_ptr(last_slot)?;

            db.put_rec_ptr(removed_slot, last_value)?;
            db.put_rec_ptr(last_slot, Addr::NULL)?;
            last_value
        };

        self.set_size(db, address, current_size - 1)?;
        self.repack_if_necessary(db, address, current_size)?;
        Ok(moved)
    }

    /// Grows the growable region until the array can hold `desired`
    /// elements.
    pub fn ensure_capacity(&self, db: &Database, address: Addr, desired: usize) -> Result<()> {
        let needed = desired.saturating_sub(self.inline_size);
        let growable = db.get_rec_ptr(address)?;
        let current = if growable.is_null() {
            0
        } else {
            db.get_int(growable.offset(ALLOCATED_SIZE_OFFSET))? as usize
        };

        // The growable region is already large enough.
        if needed <= current {
            return Ok(());
        }

        let target = self.growable_region_size_for(desired);
        if target > MAX_GROWABLE_SIZE {
            let mut metablock = growable;

            if current <= MAX_GROWABLE_SIZE {
                // Not using a metablock yet: turn the current block into
                // a full first child, then install a metablock over it.
                let current_size = self.size(db, address)?;
                let first_child = self.resize_block(db, address, MAX_GROWABLE_SIZE)?;

                metablock = db.malloc(Self::block_bytes(MAX_GROWABLE_SIZE))?;
                db.put_int(metablock.offset(ARRAY_SIZE_OFFSET), current_size as u32)?;
                db.put_int(
                    metablock.offset(ALLOCATED_SIZE_OFFSET),
                    MAX_GROWABLE_SIZE as u32,
                )?;
                db.put_rec_ptr(metablock.offset(GROWABLE_BLOCK_HEADER_BYTES), first_child)?;
                db.put_rec_ptr(address, metablock)?;
            }

            debug_assert_eq!(target % MAX_GROWABLE_SIZE, 0);
            let required_blocks = target / MAX_GROWABLE_SIZE;
            let current_allocated =
                db.get_int(metablock.offset(ALLOCATED_SIZE_OFFSET))? as usize;
            debug_assert_eq!(current_allocated % MAX_GROWABLE_SIZE, 0);
            let current_blocks = current_allocated / MAX_GROWABLE_SIZE;

            for next_block in current_blocks..required_blocks {
                let child = db.malloc(Self::block_bytes(MAX_GROWABLE_SIZE))?;
                db.put_rec_ptr(
                    metablock.offset(GROWABLE_BLOCK_HEADER_BYTES + next_block * PTR_SIZE),
                    child,
                )?;
            }

            db.put_int(metablock.offset(ALLOCATED_SIZE_OFFSET), target as u32)?;
        } else {
            let new_block = self.resize_block(db, address, target)?;
            db.put_rec_ptr(address, new_block)?;
        }
        Ok(())
    }

    /// Frees every growable and child block. Inline slots are left as
    /// they are; the header itself belongs to the enclosing record.
    pub fn destruct(&self, db: &Database, address: Addr) -> Result<()> {
        self.repack_if_necessary(db, address, 0)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Resolves a logical index to the address of its slot.
    ///
    /// Indices up to and including the current size are addressable;
    /// the slot at `size` is the next insertion point. When that slot
    /// is the append position of a full inline region, no storage
    /// exists for it yet and the null address stands in for it.
    fn slot_address(&self, db: &Database, address: Addr, index: usize) -> Result<Addr> {
        if index < self.inline_size {
            return Ok(address.offset(ARRAY_HEADER_BYTES + index * PTR_SIZE));
        }

        let size = self.size(db, address)?;
        if index > size {
            return Err(KiteError::IndexOutOfBounds { index, size });
        }

        let growable = db.get_rec_ptr(address)?;
        if growable.is_null() {
            // Only reachable with index == size == inline_size: every
            // element sits inline and the append slot has not been
            // allocated. Mutators always materialize the growable
            // block before resolving this index.
            return Ok(Addr::NULL);
        }

        let allocated = db.get_int(growable.offset(ALLOCATED_SIZE_OFFSET))? as usize;
        let mut relative = index - self.inline_size;
        let mut slots = growable.offset(GROWABLE_BLOCK_HEADER_BYTES);

        if allocated > MAX_GROWABLE_SIZE {
            // Metablock: hop through the child-block pointer.
            let block = relative / MAX_GROWABLE_SIZE;
            relative %= MAX_GROWABLE_SIZE;
            let child = db.get_rec_ptr(slots.offset(block * PTR_SIZE))?;
            slots = child.offset(GROWABLE_BLOCK_HEADER_BYTES);
        }

        Ok(slots.offset(relative * PTR_SIZE))
    }

    /// Records the element count. Without a growable block the size is
    /// implicit in the inline slots, so there is nothing to store.
    fn set_size(&self, db: &Database, address: Addr, size: usize) -> Result<()> {
        let growable = db.get_rec_ptr(address)?;
        if growable.is_null() {
            return Ok(());
        }
        db.put_int(growable.offset(ARRAY_SIZE_OFFSET), size as u32)
    }

    /// Replaces the growable block with one of `new_size` slots,
    /// carrying the elements over. Must not be called while a metablock
    /// is installed. Returns the new block's address; a `new_size` of
    /// zero frees the block and returns null.
    fn resize_block(&self, db: &Database, address: Addr, new_size: usize) -> Result<Addr> {
        let old_block = db.get_rec_ptr(address)?;

        if new_size == 0 {
            if !old_block.is_null() {
                db.free(old_block)?;
            }
            return Ok(Addr::NULL);
        }

        if !old_block.is_null() {
            let old_allocated = db.get_int(old_block.offset(ALLOCATED_SIZE_OFFSET))? as usize;
            if old_allocated == new_size {
                return Ok(old_block);
            }
        }

        let array_size = self.size(db, address)?;
        let carried = array_size.saturating_sub(self.inline_size).min(new_size);
        let new_block = db.malloc(Self::block_bytes(new_size))?;

        if !old_block.is_null() {
            db.memcpy(
                new_block.offset(GROWABLE_BLOCK_HEADER_BYTES),
                old_block.offset(GROWABLE_BLOCK_HEADER_BYTES),
                carried * PTR_SIZE,
            )?;
            db.free(old_block)?;
        }

        db.put_int(new_block.offset(ARRAY_SIZE_OFFSET), array_size as u32)?;
        db.put_int(new_block.offset(ALLOCATED_SIZE_OFFSET), new_size as u32)?;
        Ok(new_block)
    }

    /// Shrinks the growable region if the array has fallen far enough
    /// below its allocation. `old_size` is the element count before the
    /// removal that triggered the check.
    fn repack_if_necessary(&self, db: &Database, address: Addr, old_size: usize) -> Result<()> {
        let growable = db.get_rec_ptr(address)?;
        if growable.is_null() {
            return Ok(());
        }

        let desired_growable = old_size.saturating_sub(self.inline_size);
        let mut current_growable = db.get_int(growable.offset(ALLOCATED_SIZE_OFFSET))? as usize;
        let new_growable = self.growable_region_size_for(old_size);

        if new_growable >= current_growable {
            return Ok(());
        }

        if current_growable > MAX_GROWABLE_SIZE {
            // Currently a metablock.
            let desired_blocks =
                (new_growable + MAX_GROWABLE_SIZE - 1) / MAX_GROWABLE_SIZE;
            let current_blocks = current_growable / MAX_GROWABLE_SIZE;

            // Only give memory back once two whole trailing children sit
            // idle, or the array has shrunk to fit half a single block;
            // the one-element slack keeps the region about double the
            // used size after the shrink.
            let needs_repacking = current_blocks - desired_blocks > 1
                || new_growable <= MAX_GROWABLE_SIZE / 2 + 1;
            if !needs_repacking {
                return Ok(());
            }

            let child_slots = growable.offset(GROWABLE_BLOCK_HEADER_BYTES);
            for block in (desired_blocks..current_blocks).rev() {
                let slot = child_slots.offset(block * PTR_SIZE);
                let child = db.get_rec_ptr(slot)?;
                db.free(child)?;
                db.put_rec_ptr(slot, Addr::NULL)?;
            }

            if new_growable > MAX_GROWABLE_SIZE {
                // Still a metablock, just a narrower one.
                db.put_int(growable.offset(ALLOCATED_SIZE_OFFSET), new_growable as u32)?;
                return Ok(());
            }

            // Demote: the first child takes over as the growable block.
            let first_child = db.get_rec_ptr(child_slots)?;
            let stored_size = db.get_int(growable.offset(ARRAY_SIZE_OFFSET))? as usize;
            db.free(growable)?;
            db.put_rec_ptr(address, first_child)?;

            if !first_child.is_null() {
                current_growable = MAX_GROWABLE_SIZE;
                db.put_int(first_child.offset(ARRAY_SIZE_OFFSET), stored_size as u32)?;
                db.put_int(
                    first_child.offset(ALLOCATED_SIZE_OFFSET),
                    MAX_GROWABLE_SIZE as u32,
                )?;
            }
            // Fall through: the surviving block may shrink further.
        }

        // A plain block is only resized once usage drops to a quarter of
        // the allocation, one element of slack included.
        if desired_growable <= current_growable / 4 + 1 {
            let new_block = self.resize_block(db, address, new_growable)?;
            db.put_rec_ptr(address, new_block)?;
        }
        Ok(())
    }

    /// Returns the slot count to allocate for an array of the given size.
    ///
    /// The next power of two, floored at the inline slot count (arrays
    /// given many inline slots are the ones expected to grow large, so
    /// they start with larger blocks), clamped to the single-block
    /// maximum, and beyond it the smallest multiple of the maximum that
    /// covers the need.
    fn growable_region_size_for(&self, array_size: usize) -> usize {
        let needed = array_size.saturating_sub(self.inline_size);
        if needed == 0 {
            return 0;
        }

        let next = needed.max(self.inline_size).next_power_of_two();
        if next > MAX_GROWABLE_SIZE {
            if needed <= MAX_GROWABLE_SIZE {
                return MAX_GROWABLE_SIZE;
            }
            return round_up_to_multiple(MAX_GROWABLE_SIZE, needed);
        }
        next
    }

    /// Returns the allocation size in bytes for a block of `size` slots.
    fn block_bytes(size: usize) -> usize {
        size * PTR_SIZE + GROWABLE_BLOCK_HEADER_BYTES
    }
}

/// Rounds a value up to the nearest multiple of another value.
fn round_up_to_multiple(unit: usize, value: usize) -> usize {
    ((value + unit - 1) / unit) * unit
}

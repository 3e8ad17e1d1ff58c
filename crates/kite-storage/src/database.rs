//! Chunked database file with a bucketed block allocator.
//!
//! The database is a flat byte space carved into 4 KB chunks. Chunk 0
//! is the header; every other chunk is covered edge to edge by
//! allocator blocks, each of which is either live or threaded onto a
//! free list for its size.
//!
//! Header chunk layout:
//! ```text
//! +----------------------+ 0
//! | format version (4)   |
//! +----------------------+ 4
//! | (unused)             |
//! +----------------------+ 8
//! | free-list heads (4   |
//! | bytes per bucket,    |
//! | bucket d at d*4)     |
//! +----------------------+ 2052
//! ```
//!
//! Block layout:
//! ```text
//! +----------------------+ 0
//! | size tag: i16        |  positive = free, negative = allocated
//! +----------------------+ 2
//! | next free ptr (4)    |  free blocks only
//! +----------------------+ 6
//! | prev free ptr (4)    |  free blocks only
//! +----------------------+ 10
//! | ...                  |
//! +----------------------+ blocksize
//! ```
//!
//! `malloc` returns the address just past the size tag; blocks never
//! span chunks, so a single allocation is capped at one chunk.

use crate::chunk::Chunk;
use crate::constants::{
    free_table_offset, BLOCK_HEADER_SIZE, BLOCK_NEXT_OFFSET, BLOCK_PREV_OFFSET, BLOCK_SIZE_DELTA,
    FORMAT_VERSION, MAX_BLOCK_DELTAS, MAX_MALLOC_SIZE, MIN_BLOCK_DELTAS,
};
use kite_common::{Addr, DatabaseConfig, KiteError, Result, CHUNK_SIZE};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Byte offset of the format version in chunk 0.
const VERSION_OFFSET: usize = 0;

/// Number of chunks addressable with 4-byte record pointers.
const ADDRESS_SPACE_CHUNKS: usize = (u32::MAX as usize + 1) / CHUNK_SIZE;

/// A byte-addressable chunked database.
///
/// All accessors bounds-check and take `&self`; the chunk table sits
/// behind a read-write lock so readers can share. Callers serialize
/// mutations — the database does not arbitrate between two concurrent
/// writers of the same region.
pub struct Database {
    /// In-memory chunk table. Index 0 is the header chunk.
    chunks: RwLock<Vec<Chunk>>,
    /// Backing file, if any.
    file: Option<Mutex<File>>,
    /// Configuration.
    config: DatabaseConfig,
    /// Live block bytes, size tags included.
    allocated: AtomicU64,
}

impl Database {
    /// Creates an in-memory database with no backing file.
    pub fn in_memory(config: DatabaseConfig) -> Self {
        Self {
            chunks: RwLock::new(Self::bootstrap()),
            file: None,
            config: Self::clamp(config),
            allocated: AtomicU64::new(0),
        }
    }

    /// Opens a database file, creating it if it does not exist.
    ///
    /// An existing file must be a whole number of chunks long and carry
    /// the current format version.
    pub fn open(path: &Path, config: DatabaseConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let chunks = if file_size == 0 {
            Self::bootstrap()
        } else {
            if file_size % CHUNK_SIZE as u64 != 0 {
                return Err(KiteError::Corrupted {
                    reason: format!("file length {} is not a whole number of chunks", file_size),
                });
            }
            let num_chunks = (file_size / CHUNK_SIZE as u64) as usize;
            let mut chunks = Vec::with_capacity(num_chunks);
            let mut buf = [0u8; CHUNK_SIZE];
            file.seek(SeekFrom::Start(0))?;
            for _ in 0..num_chunks {
                file.read_exact(&mut buf)?;
                chunks.push(Chunk::from_bytes(&buf));
            }
            let version = chunks[0].get_u32(VERSION_OFFSET);
            if version != FORMAT_VERSION {
                return Err(KiteError::VersionMismatch {
                    expected: FORMAT_VERSION,
                    actual: version,
                });
            }
            chunks
        };

        let allocated = Self::live_bytes(&chunks)?;
        Ok(Self {
            chunks: RwLock::new(chunks),
            file: Some(Mutex::new(file)),
            config: Self::clamp(config),
            allocated: AtomicU64::new(allocated),
        })
    }

    /// Writes every chunk back to the file. No-op for in-memory databases.
    pub fn flush(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let chunks = self.chunks.read();
        let mut file = file.lock();
        file.seek(SeekFrom::Start(0))?;
        for chunk in chunks.iter() {
            file.write_all(chunk.as_slice())?;
        }
        if self.config.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Returns the number of chunks in the database.
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Returns the number of live block bytes, size tags included.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocates a zero-filled region of at least `bytes` bytes and
    /// returns its address.
    pub fn malloc(&self, bytes: usize) -> Result<Addr> {
        if bytes > MAX_MALLOC_SIZE {
            return Err(KiteError::AllocationTooLarge {
                requested: bytes,
                max: MAX_MALLOC_SIZE,
            });
        }
        let need_deltas = ((bytes + BLOCK_HEADER_SIZE + BLOCK_SIZE_DELTA - 1) / BLOCK_SIZE_DELTA)
            .max(MIN_BLOCK_DELTAS);

        let mut chunks = self.chunks.write();

        // Smallest non-empty bucket that fits.
        let mut block = 0u64;
        let mut use_deltas = need_deltas;
        while use_deltas <= MAX_BLOCK_DELTAS {
            block = read_u32(&chunks, free_table_offset(use_deltas * BLOCK_SIZE_DELTA) as u64)?
                as u64;
            if block != 0 {
                break;
            }
            use_deltas += 1;
        }

        if block == 0 {
            block = self.new_chunk(&mut chunks)?;
            use_deltas = MAX_BLOCK_DELTAS;
        } else {
            remove_free_block(&mut chunks, block, use_deltas * BLOCK_SIZE_DELTA)?;
        }

        // Return the tail of an oversized block to its bucket.
        let unused_deltas = use_deltas - need_deltas;
        if unused_deltas >= MIN_BLOCK_DELTAS {
            add_free_block(
                &mut chunks,
                block + (need_deltas * BLOCK_SIZE_DELTA) as u64,
                unused_deltas * BLOCK_SIZE_DELTA,
            )?;
            use_deltas = need_deltas;
        }

        let blocksize = use_deltas * BLOCK_SIZE_DELTA;
        write_i16(&mut chunks, block, -(blocksize as i16))?;
        zero_bytes(
            &mut chunks,
            block + BLOCK_HEADER_SIZE as u64,
            blocksize - BLOCK_HEADER_SIZE,
        )?;

        self.allocated.fetch_add(blocksize as u64, Ordering::Relaxed);
        Ok(Addr(block + BLOCK_HEADER_SIZE as u64))
    }

    /// Returns a previously allocated region to its free list.
    pub fn free(&self, addr: Addr) -> Result<()> {
        if addr.0 < BLOCK_HEADER_SIZE as u64 {
            return Err(KiteError::AddressOutOfBounds { address: addr.0 });
        }
        let block = addr.0 - BLOCK_HEADER_SIZE as u64;

        let mut chunks = self.chunks.write();
        let tag = read_i16(&chunks, block)?;
        if tag >= 0 {
            return Err(KiteError::Corrupted {
                reason: format!("free of {} with non-allocated size tag {}", addr, tag),
            });
        }
        let blocksize = -(tag as i64) as usize;
        add_free_block(&mut chunks, block, blocksize)?;

        self.allocated.fetch_sub(blocksize as u64, Ordering::Relaxed);
        Ok(())
    }

    // =========================================================================
    // Byte accessors
    // =========================================================================

    /// Reads the 4-byte int at the given address.
    pub fn get_int(&self, addr: Addr) -> Result<u32> {
        read_u32(&self.chunks.read(), addr.0)
    }

    /// Writes a 4-byte int at the given address.
    pub fn put_int(&self, addr: Addr, value: u32) -> Result<()> {
        write_u32(&mut self.chunks.write(), addr.0, value)
    }

    /// Reads the 2-byte signed int at the given address.
    pub fn get_short(&self, addr: Addr) -> Result<i16> {
        read_i16(&self.chunks.read(), addr.0)
    }

    /// Writes a 2-byte signed int at the given address.
    pub fn put_short(&self, addr: Addr, value: i16) -> Result<()> {
        write_i16(&mut self.chunks.write(), addr.0, value)
    }

    /// Reads the record pointer stored at the given address.
    pub fn get_rec_ptr(&self, addr: Addr) -> Result<Addr> {
        Ok(Addr(read_u32(&self.chunks.read(), addr.0)? as u64))
    }

    /// Stores a record pointer at the given address.
    pub fn put_rec_ptr(&self, addr: Addr, value: Addr) -> Result<()> {
        if value.0 > u32::MAX as u64 {
            return Err(KiteError::AddressOutOfBounds { address: value.0 });
        }
        write_u32(&mut self.chunks.write(), addr.0, value.0 as u32)
    }

    /// Copies `len` bytes from `src` to `dest`. The ranges may overlap.
    pub fn memcpy(&self, dest: Addr, src: Addr, len: usize) -> Result<()> {
        let mut chunks = self.chunks.write();
        let buf = read_bytes(&chunks, src.0, len)?;
        write_bytes(&mut chunks, dest.0, &buf)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// A fresh database: just the header chunk carrying the version.
    fn bootstrap() -> Vec<Chunk> {
        let mut header = Chunk::zeroed();
        header.put_u32(VERSION_OFFSET, FORMAT_VERSION);
        vec![header]
    }

    /// Caps the chunk limit at the 4-byte pointer address space.
    fn clamp(mut config: DatabaseConfig) -> DatabaseConfig {
        config.max_chunks = config.max_chunks.min(ADDRESS_SPACE_CHUNKS);
        config
    }

    /// Appends a zeroed chunk and returns its base as a block address.
    fn new_chunk(&self, chunks: &mut Vec<Chunk>) -> Result<u64> {
        let max_chunks = self.config.max_chunks.min(ADDRESS_SPACE_CHUNKS);
        if chunks.len() >= max_chunks {
            return Err(KiteError::DatabaseFull { max_chunks });
        }
        chunks.push(Chunk::zeroed());
        Ok(((chunks.len() - 1) * CHUNK_SIZE) as u64)
    }

    /// Live block bytes in a loaded chunk table: everything outside the
    /// header chunk that is not on a free list.
    fn live_bytes(chunks: &[Chunk]) -> Result<u64> {
        let data_bytes = (chunks.len().saturating_sub(1) * CHUNK_SIZE) as u64;
        let mut free_bytes = 0u64;
        for deltas in MIN_BLOCK_DELTAS..=MAX_BLOCK_DELTAS {
            let blocksize = deltas * BLOCK_SIZE_DELTA;
            let mut block = read_u32(chunks, free_table_offset(blocksize) as u64)? as u64;
            while block != 0 {
                let tag = read_i16(chunks, block)?;
                if tag as usize != blocksize {
                    return Err(KiteError::Corrupted {
                        reason: format!(
                            "free block at {:#x} has size tag {} in the {}-byte list",
                            block, tag, blocksize
                        ),
                    });
                }
                free_bytes += blocksize as u64;
                block = read_u32(chunks, block + BLOCK_NEXT_OFFSET as u64)? as u64;
            }
        }
        Ok(data_bytes - free_bytes)
    }
}

/// Resolves an address to (chunk, offset) for a scalar of `len` bytes.
fn locate(chunks: &[Chunk], addr: u64, len: usize) -> Result<(usize, usize)> {
    let chunk = (addr / CHUNK_SIZE as u64) as usize;
    let offset = (addr % CHUNK_SIZE as u64) as usize;
    if chunk >= chunks.len() || offset + len > CHUNK_SIZE {
        return Err(KiteError::AddressOutOfBounds { address: addr });
    }
    Ok((chunk, offset))
}

fn read_u32(chunks: &[Chunk], addr: u64) -> Result<u32> {
    let (chunk, offset) = locate(chunks, addr, 4)?;
    Ok(chunks[chunk].get_u32(offset))
}

fn write_u32(chunks: &mut [Chunk], addr: u64, value: u32) -> Result<()> {
    let (chunk, offset) = locate(chunks, addr, 4)?;
    chunks[chunk].put_u32(offset, value);
    Ok(())
}

fn read_i16(chunks: &[Chunk], addr: u64) -> Result<i16> {
    let (chunk, offset) = locate(chunks, addr, 2)?;
    Ok(chunks[chunk].get_i16(offset))
}

fn write_i16(chunks: &mut [Chunk], addr: u64, value: i16) -> Result<()> {
    let (chunk, offset) = locate(chunks, addr, 2)?;
    chunks[chunk].put_i16(offset, value);
    Ok(())
}

/// Reads an arbitrary byte range, crossing chunk boundaries as needed.
fn read_bytes(chunks: &[Chunk], addr: u64, len: usize) -> Result<Vec<u8>> {
    check_range(chunks, addr, len)?;
    let mut buf = Vec::with_capacity(len);
    let mut pos = addr;
    let mut remaining = len;
    while remaining > 0 {
        let chunk = (pos / CHUNK_SIZE as u64) as usize;
        let offset = (pos % CHUNK_SIZE as u64) as usize;
        let take = remaining.min(CHUNK_SIZE - offset);
        buf.extend_from_slice(&chunks[chunk].as_slice()[offset..offset + take]);
        pos += take as u64;
        remaining -= take;
    }
    Ok(buf)
}

/// Writes an arbitrary byte range, crossing chunk boundaries as needed.
fn write_bytes(chunks: &mut [Chunk], addr: u64, buf: &[u8]) -> Result<()> {
    check_range(chunks, addr, buf.len())?;
    let mut pos = addr;
    let mut written = 0;
    while written < buf.len() {
        let chunk = (pos / CHUNK_SIZE as u64) as usize;
        let offset = (pos % CHUNK_SIZE as u64) as usize;
        let take = (buf.len() - written).min(CHUNK_SIZE - offset);
        chunks[chunk].as_mut_slice()[offset..offset + take]
            .copy_from_slice(&buf[written..written + take]);
        pos += take as u64;
        written += take;
    }
    Ok(())
}

/// Zero-fills an arbitrary byte range.
fn zero_bytes(chunks: &mut [Chunk], addr: u64, len: usize) -> Result<()> {
    check_range(chunks, addr, len)?;
    let mut pos = addr;
    let mut remaining = len;
    while remaining > 0 {
        let chunk = (pos / CHUNK_SIZE as u64) as usize;
        let offset = (pos % CHUNK_SIZE as u64) as usize;
        let take = remaining.min(CHUNK_SIZE - offset);
        chunks[chunk].zero_range(offset, take);
        pos += take as u64;
        remaining -= take;
    }
    Ok(())
}

fn check_range(chunks: &[Chunk], addr: u64, len: usize) -> Result<()> {
    let total = (chunks.len() * CHUNK_SIZE) as u64;
    if addr + len as u64 > total {
        return Err(KiteError::AddressOutOfBounds { address: addr });
    }
    Ok(())
}

/// Pushes a block onto the free list for its size.
fn add_free_block(chunks: &mut [Chunk], block: u64, blocksize: usize) -> Result<()> {
    let head_addr = free_table_offset(blocksize) as u64;
    let head = read_u32(chunks, head_addr)?;

    write_i16(chunks, block, blocksize as i16)?;
    write_u32(chunks, block + BLOCK_NEXT_OFFSET as u64, head)?;
    write_u32(chunks, block + BLOCK_PREV_OFFSET as u64, 0)?;
    if head != 0 {
        write_u32(chunks, head as u64 + BLOCK_PREV_OFFSET as u64, block as u32)?;
    }
    write_u32(chunks, head_addr, block as u32)
}

/// Unlinks a block from the free list for its size.
fn remove_free_block(chunks: &mut [Chunk], block: u64, blocksize: usize) -> Result<()> {
    let next = read_u32(chunks, block + BLOCK_NEXT_OFFSET as u64)?;
    let prev = read_u32(chunks, block + BLOCK_PREV_OFFSET as u64)?;

    if prev != 0 {
        write_u32(chunks, prev as u64 + BLOCK_NEXT_OFFSET as u64, next)?;
    } else {
        write_u32(chunks, free_table_offset(blocksize) as u64, next)?;
    }
    if next != 0 {
        write_u32(chunks, next as u64 + BLOCK_PREV_OFFSET as u64, prev)?;
    }
    Ok(())
}

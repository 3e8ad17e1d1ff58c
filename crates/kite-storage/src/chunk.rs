//! Fixed-size chunk buffers.

use bytes::BytesMut;
use kite_common::CHUNK_SIZE;

/// One chunk of the database file.
///
/// A chunk is a flat CHUNK_SIZE byte buffer. All multi-byte values are
/// little-endian; scalar accessors take byte offsets within the chunk
/// and never cross into a neighboring chunk.
pub struct Chunk {
    data: BytesMut,
}

impl Chunk {
    /// Creates a new zero-filled chunk.
    pub fn zeroed() -> Self {
        Self {
            data: BytesMut::zeroed(CHUNK_SIZE),
        }
    }

    /// Creates a chunk from raw bytes read off disk.
    ///
    /// The buffer must be exactly CHUNK_SIZE bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), CHUNK_SIZE);
        let mut data = BytesMut::zeroed(CHUNK_SIZE);
        data.copy_from_slice(buf);
        Self { data }
    }

    /// Returns the chunk contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the chunk contents as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reads a 4-byte unsigned int at the given offset.
    #[inline]
    pub fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Writes a 4-byte unsigned int at the given offset.
    #[inline]
    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads a 2-byte signed int at the given offset.
    #[inline]
    pub fn get_i16(&self, offset: usize) -> i16 {
        i16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Writes a 2-byte signed int at the given offset.
    #[inline]
    pub fn put_i16(&mut self, offset: usize, value: i16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Zero-fills `len` bytes starting at the given offset.
    #[inline]
    pub fn zero_range(&mut self, offset: usize, len: usize) {
        self.data[offset..offset + len].fill(0);
    }
}

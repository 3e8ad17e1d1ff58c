//! Database addresses for KiteDB storage.

use serde::{Deserialize, Serialize};

/// Size of a database chunk in bytes (4 KB).
pub const CHUNK_SIZE: usize = 4096;

/// Size of a stored record pointer in bytes.
///
/// Record-pointer slots hold 4-byte little-endian addresses, which caps
/// the database address space at 4 GiB.
pub const PTR_SIZE: usize = 4;

/// A byte address within the database.
///
/// The database is a flat byte space divided into chunks; an address
/// identifies one byte in it. Address 0 is reserved as the null address
/// (chunk 0 is the database header, so no record ever lives there).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Addr(pub u64);

impl Addr {
    /// The reserved null address.
    pub const NULL: Addr = Addr(0);

    /// Returns true if this is the null address.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns the address advanced by the given number of bytes.
    pub fn offset(&self, bytes: usize) -> Addr {
        Addr(self.0 + bytes as u64)
    }

    /// Returns the index of the chunk containing this address.
    pub fn chunk_index(&self) -> usize {
        (self.0 / CHUNK_SIZE as u64) as usize
    }

    /// Returns the byte offset of this address within its chunk.
    pub fn chunk_offset(&self) -> usize {
        (self.0 % CHUNK_SIZE as u64) as usize
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_constant() {
        assert_eq!(CHUNK_SIZE, 4 * 1024);
        assert_eq!(CHUNK_SIZE, 4096);
    }

    #[test]
    fn test_null_address() {
        assert!(Addr::NULL.is_null());
        assert!(!Addr(1).is_null());
        assert_eq!(Addr::default(), Addr::NULL);
    }

    #[test]
    fn test_offset() {
        let addr = Addr(100);
        assert_eq!(addr.offset(0), Addr(100));
        assert_eq!(addr.offset(28), Addr(128));
    }

    #[test]
    fn test_chunk_index_and_offset() {
        assert_eq!(Addr(0).chunk_index(), 0);
        assert_eq!(Addr(0).chunk_offset(), 0);

        let addr = Addr(CHUNK_SIZE as u64);
        assert_eq!(addr.chunk_index(), 1);
        assert_eq!(addr.chunk_offset(), 0);

        let addr = Addr(3 * CHUNK_SIZE as u64 + 17);
        assert_eq!(addr.chunk_index(), 3);
        assert_eq!(addr.chunk_offset(), 17);
    }

    #[test]
    fn test_chunk_roundtrip() {
        let addr = Addr(5 * CHUNK_SIZE as u64 + 1234);
        let rebuilt = addr.chunk_index() as u64 * CHUNK_SIZE as u64 + addr.chunk_offset() as u64;
        assert_eq!(Addr(rebuilt), addr);
    }

    #[test]
    fn test_display() {
        assert_eq!(Addr(0).to_string(), "0x0");
        assert_eq!(Addr(4096).to_string(), "0x1000");
    }

    #[test]
    fn test_ordering() {
        assert!(Addr(1) < Addr(2));
        assert!(Addr(CHUNK_SIZE as u64) > Addr(100));
    }

    #[test]
    fn test_addr_serde_roundtrip() {
        let original = Addr(0xDEAD_BEEF);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: Addr = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_addr_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Addr(1));
        set.insert(Addr(2));
        set.insert(Addr(1));

        assert_eq!(set.len(), 2);
    }
}

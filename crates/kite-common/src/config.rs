//! Configuration structures for KiteDB.

use crate::addr::CHUNK_SIZE;
use serde::{Deserialize, Serialize};

/// Configuration for a database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Enable fsync when flushing chunks to disk.
    pub fsync_enabled: bool,
    /// Maximum number of chunks the database may grow to.
    ///
    /// Record pointers are stored as 4-byte addresses, so the limit can
    /// never exceed the 4 GiB address space.
    pub max_chunks: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            fsync_enabled: true,
            max_chunks: (u32::MAX as usize + 1) / CHUNK_SIZE, // 4 GiB address space
        }
    }
}

impl DatabaseConfig {
    /// Returns the maximum database size in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_chunks as u64 * CHUNK_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::default();
        assert!(config.fsync_enabled);
        assert_eq!(config.max_chunks, 1_048_576);
    }

    #[test]
    fn test_max_size_bytes() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_size_bytes(), 4 * 1024 * 1024 * 1024);

        let config = DatabaseConfig {
            max_chunks: 16,
            ..Default::default()
        };
        assert_eq!(config.max_size_bytes(), 16 * CHUNK_SIZE as u64);
    }

    #[test]
    fn test_database_config_custom() {
        let config = DatabaseConfig {
            fsync_enabled: false,
            max_chunks: 256,
        };
        assert!(!config.fsync_enabled);
        assert_eq!(config.max_chunks, 256);
    }

    #[test]
    fn test_database_config_clone() {
        let config1 = DatabaseConfig::default();
        let config2 = config1.clone();
        assert_eq!(config1.fsync_enabled, config2.fsync_enabled);
        assert_eq!(config1.max_chunks, config2.max_chunks);
    }

    #[test]
    fn test_database_config_serde_roundtrip() {
        let original = DatabaseConfig {
            fsync_enabled: false,
            max_chunks: 512,
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: DatabaseConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
        assert_eq!(original.max_chunks, deserialized.max_chunks);
    }
}

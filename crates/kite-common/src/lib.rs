//! KiteDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all KiteDB components.

pub mod addr;
pub mod config;
pub mod error;

pub use addr::{Addr, CHUNK_SIZE, PTR_SIZE};
pub use config::DatabaseConfig;
pub use error::{KiteError, Result};

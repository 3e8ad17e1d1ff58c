//! Storage engine for KiteDB.
//!
//! This crate provides:
//! - A chunked database file with a bucketed block allocator
//! - Raw byte-level accessors for ints, shorts, and record pointers
//! - Growable record-pointer arrays stored entirely inside the database
//!
//! The database is a flat byte space carved into 4 KB chunks. Chunk 0
//! holds the format version and the allocator's free-block table; all
//! user data lives in blocks allocated from the remaining chunks. A
//! record array occupies a fixed-size header inside some enclosing
//! record plus zero or more allocator blocks, and is addressed purely
//! by its byte address.

mod array;
mod chunk;
mod constants;
mod database;

pub use array::RecordArray;
pub use chunk::Chunk;
pub use constants::{
    BLOCK_HEADER_SIZE, BLOCK_SIZE_DELTA, FORMAT_VERSION, MAX_BLOCK_DELTAS, MAX_MALLOC_SIZE,
    MIN_BLOCK_DELTAS,
};
pub use database::Database;

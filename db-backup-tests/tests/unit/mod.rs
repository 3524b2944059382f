//! Unit tests for db-backup components
//!
//! Each module exercises one building block through the public API.

mod azure;
mod compressors;
mod storage;

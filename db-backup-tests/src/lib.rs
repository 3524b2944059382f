//! Test utilities for db-backup
//!
//! Shared fixtures, a TOML config builder and outcome assertions, plus
//! re-exports of the fakes that live in the main crate.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{manager_with, sample_dump, targets, MemoryBackend, StaticSource};
//!
//! #[test]
//! fn my_test() {
//!     let memory = MemoryBackend::new("memory");
//!     let manager = manager_with(
//!         StaticSource::new(sample_dump()),
//!         vec![Arc::new(memory.clone())],
//!         BackupOptions::default(),
//!     );
//!     let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{OutcomeAssertions, TestContext};

// Re-export types from the main crate for convenience
pub use db_backup::managers::backup::{
    backup_key, BackupJob, BackupManager, BackupOptions, Destination, DestinationStatus,
    JobOutcome, JobState,
};
pub use db_backup::{BackupError, CancellationToken, Stage};

// Re-export fakes from the main crate
pub use db_backup::compressors::mock::{FailingCompressor, SpyCompressor};
pub use db_backup::databases::mock::{SourceFault, StaticSource};
pub use db_backup::storage::mock::{BackendFault, FaultyBackend, MemoryBackend};

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;

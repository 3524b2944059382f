//! db-backup library
//!
//! Dumps a database, compresses the dump and writes it to one or more
//! storage destinations, with pluggable sources, compressors and backends.

pub mod compressors;
pub mod config;
pub mod databases;
pub mod error;
pub mod managers;
pub mod storage;
pub mod utils;

/// Incremental byte stream passed between pipeline stages
pub type ByteStream = Box<dyn std::io::Read + Send>;

// Re-export commonly used types
pub use config::{load_config, Config, ConfigError, Overrides, Settings};
pub use error::{BackupError, Stage};
pub use managers::backup::{
    backup_key, BackupJob, BackupManager, BackupOptions, Destination, JobOutcome, JobState,
};
pub use managers::logging::{init_logging, LogFormat, LogGuard, LoggingConfig};
pub use utils::{CancellationToken, Secret};

//! Error taxonomy for backup jobs
//!
//! Component errors (`SourceError`, `StorageError`, `CompressionError`) are
//! raised by the pluggable backends. The orchestrator lifts them into a
//! `BackupError`, which carries the exit code reported by the binary.

use serde::Serialize;
use std::io;
use std::time::Duration;

/// Errors raised by a database source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to connect to database '{database}': {message}")]
    Connection { database: String, message: String },

    #[error("Database dump failed: {0}")]
    Dump(String),

    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("No database source registered for type '{0}'")]
    UnknownType(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Storage request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read backup stream: {0}")]
    Stream(io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by a compressor
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("No compressor registered under '{0}'")]
    Unknown(String),

    #[error("Corrupt or truncated compressed stream: {0}")]
    Malformed(String),

    #[error("Compression failed: {0}")]
    Io(#[from] io::Error),
}

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pending,
    Dumping,
    Compressing,
    Writing,
    Reading,
    Restoring,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Dumping => "dumping",
            Stage::Compressing => "compressing",
            Stage::Writing => "writing",
            Stage::Reading => "reading",
            Stage::Restoring => "restoring",
        };
        f.write_str(name)
    }
}

/// Job-level error attached to a failed backup, restore or verify run
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Dump error: {0}")]
    Dump(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Storage unavailable for destination '{backend}': {message}")]
    StorageUnavailable { backend: String, message: String },

    #[error("Timed out during {stage}")]
    Timeout { stage: Stage },

    #[error("Job cancelled before {stage}")]
    Cancelled { stage: Stage },

    #[error("Spool error: {0}")]
    Spool(String),
}

impl BackupError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            BackupError::Spool(_) => 1,
            BackupError::Configuration(_) => 2,
            BackupError::Connection(_) => 3,
            BackupError::Dump(_) => 4,
            BackupError::Compression(_) => 5,
            BackupError::StorageUnavailable { .. } => 6,
            BackupError::Timeout { .. } => 7,
            BackupError::Cancelled { .. } => 130,
        }
    }

    /// Short machine-readable kind, used in JSON reports
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Configuration(_) => "configuration",
            BackupError::Connection(_) => "connection",
            BackupError::Dump(_) => "dump",
            BackupError::Compression(_) => "compression",
            BackupError::StorageUnavailable { .. } => "storage_unavailable",
            BackupError::Timeout { .. } => "timeout",
            BackupError::Cancelled { .. } => "cancelled",
            BackupError::Spool(_) => "spool",
        }
    }

    pub(crate) fn from_source(error: SourceError, stage: Stage) -> Self {
        match error {
            SourceError::Connection { .. } => BackupError::Connection(error.to_string()),
            SourceError::Timeout(_) => BackupError::Timeout { stage },
            SourceError::UnknownType(_) => BackupError::Configuration(error.to_string()),
            SourceError::Dump(_) => BackupError::Dump(error.to_string()),
            SourceError::Io(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                BackupError::Timeout { stage }
            }
            SourceError::Io(_) => BackupError::Dump(error.to_string()),
        }
    }

    pub(crate) fn from_storage(error: StorageError, backend: &str, stage: Stage) -> Self {
        match error {
            StorageError::Timeout(_) => BackupError::Timeout { stage },
            StorageError::Stream(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                BackupError::Timeout { stage }
            }
            other => BackupError::StorageUnavailable {
                backend: backend.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl Serialize for BackupError {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("BackupError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl From<crate::config::ConfigError> for BackupError {
    fn from(error: crate::config::ConfigError) -> Self {
        BackupError::Configuration(error.to_string())
    }
}

//! Cooperative cancellation

use db_backup::compressors::CompressorRegistry;
use db_backup::databases::{ConnectionConfig, DatabaseRegistry, DatabaseSource};
use db_backup::error::SourceError;
use db_backup::storage::StorageRegistry;
use db_backup::ByteStream;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use test_utils::*;

/// Source that trips the token while the dump is being opened
struct CancellingSource {
    token: CancellationToken,
}

impl DatabaseSource for CancellingSource {
    fn type_name(&self) -> &'static str {
        "cancelling"
    }

    fn dump(
        &self,
        _config: &ConnectionConfig,
        _timeout: Option<Duration>,
    ) -> Result<ByteStream, SourceError> {
        self.token.cancel();
        Ok(Box::new(Cursor::new(sample_dump())))
    }
}

#[test]
fn test_cancel_before_run_writes_nothing() {
    let source = StaticSource::new(sample_dump());
    let memory = MemoryBackend::new("memory");
    let manager = manager_with(
        source.clone(),
        vec![Arc::new(memory.clone())],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = manager.run(&job, &cancel);

    let failure = outcome.assert_failed_at(Stage::Dumping, None);
    assert!(matches!(failure.error, BackupError::Cancelled { .. }));
    assert_eq!(outcome.exit_code(), 130);
    assert_eq!(outcome.history, vec![JobState::Pending, JobState::Failed]);
    assert_eq!(source.dump_calls(), 0);
    assert_eq!(memory.object_count(), 0);
}

#[test]
fn test_cancel_during_dump_writes_nothing() {
    let cancel = CancellationToken::new();
    let mut databases = DatabaseRegistry::new();
    databases
        .register_source(Arc::new(CancellingSource {
            token: cancel.clone(),
        }))
        .unwrap();
    let mut connection = static_connection();
    connection.db_type = "cancelling".to_string();
    databases.add_connection(SOURCE, connection).unwrap();

    let memory = MemoryBackend::new("memory");
    let mut storage = StorageRegistry::new();
    storage.register(Arc::new(memory.clone())).unwrap();

    let manager = BackupManager::new(
        CompressorRegistry::with_defaults(),
        databases,
        storage,
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();

    let outcome = manager.run(&job, &cancel);

    let failure = outcome.assert_failed_at(Stage::Compressing, None);
    assert!(matches!(
        failure.error,
        BackupError::Cancelled {
            stage: Stage::Compressing
        }
    ));
    assert!(memory.write_attempts().is_empty());
    assert_eq!(memory.object_count(), 0);
}

#[test]
fn test_cancelled_restore_loads_nothing() {
    let source = StaticSource::new(sample_dump());
    let memory = MemoryBackend::new("memory");
    let manager = manager_with(
        source.clone(),
        vec![Arc::new(memory.clone())],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();
    manager.run(&job, &CancellationToken::new()).assert_succeeded();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = manager
        .restore(SOURCE, &job.destinations()[0], &cancel)
        .unwrap_err();

    assert_eq!(error.exit_code(), 130);
    assert!(source.restored().is_empty());
}

//! Stage attribution when the dump or the codec breaks

use db_backup::compressors::{Compressor, CompressorRegistry, GzipCompressor};
use db_backup::databases::DatabaseRegistry;
use db_backup::storage::StorageRegistry;
use std::sync::Arc;
use std::time::Duration;
use test_utils::*;

/// Manager with an explicit compressor set
fn manager_with_compressors(
    source: StaticSource,
    backend: MemoryBackend,
    compressors: Vec<Arc<dyn Compressor>>,
    options: BackupOptions,
) -> BackupManager {
    let mut databases = DatabaseRegistry::new();
    databases.register_source(Arc::new(source)).unwrap();
    databases.add_connection(SOURCE, static_connection()).unwrap();

    let mut storage = StorageRegistry::new();
    storage.register(Arc::new(backend)).unwrap();

    let mut registry = CompressorRegistry::new();
    for compressor in compressors {
        registry.register(compressor).unwrap();
    }
    BackupManager::new(registry, databases, storage, options)
}

#[test]
fn test_connection_failure_skips_compression_and_writes() {
    let spy = SpyCompressor::new(Arc::new(GzipCompressor::default()));
    let memory = MemoryBackend::new("memory");
    let manager = manager_with_compressors(
        StaticSource::new(sample_dump()).with_fault(SourceFault::Connection),
        memory.clone(),
        vec![Arc::new(spy.clone())],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();

    let outcome = manager.run(&job, &CancellationToken::new());

    let failure = outcome.assert_failed_at(Stage::Dumping, None);
    assert!(matches!(failure.error, BackupError::Connection(_)));
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(outcome.history, vec![JobState::Pending, JobState::Dumping, JobState::Failed]);
    assert_eq!(spy.compress_calls(), 0);
    assert!(memory.write_attempts().is_empty());
    outcome.assert_destination(0, DestinationStatus::Skipped);
}

#[test]
fn test_broken_dump_is_a_dump_error() {
    let memory = MemoryBackend::new("memory");
    let manager = manager_with(
        StaticSource::new(sample_dump()).with_fault(SourceFault::DumpAfter(100)),
        vec![Arc::new(memory.clone())],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();

    let outcome = manager.run(&job, &CancellationToken::new());

    let failure = outcome.assert_failed_at(Stage::Dumping, None);
    match failure.error {
        BackupError::Dump(ref message) => assert!(message.contains("1146"), "{}", message),
        ref other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 4);
    assert_eq!(outcome.dump_bytes, 100);
    assert_eq!(memory.object_count(), 0);
}

#[test]
fn test_codec_failure_is_a_compression_error() {
    let memory = MemoryBackend::new("memory");
    let manager = manager_with_compressors(
        StaticSource::new(sample_dump()),
        memory.clone(),
        vec![Arc::new(FailingCompressor { fail_after: 8 })],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "failing", &targets(&["memory"]), 1).unwrap();
    assert!(job.key().ends_with(".sql.fail"));

    let outcome = manager.run(&job, &CancellationToken::new());

    let failure = outcome.assert_failed_at(Stage::Compressing, None);
    assert!(matches!(failure.error, BackupError::Compression(_)));
    assert_eq!(outcome.exit_code(), 5);
    assert!(memory.write_attempts().is_empty());
}

#[test]
fn test_stalled_dump_times_out() {
    let memory = MemoryBackend::new("memory");
    let manager = manager_with(
        StaticSource::new(sample_dump()).with_fault(SourceFault::Stall(Duration::from_millis(5))),
        vec![Arc::new(memory.clone())],
        BackupOptions {
            timeout: Some(Duration::from_millis(50)),
            ..BackupOptions::default()
        },
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();

    let outcome = manager.run(&job, &CancellationToken::new());

    let failure = outcome.assert_failed_at(Stage::Dumping, None);
    assert!(matches!(failure.error, BackupError::Timeout { .. }));
    assert_eq!(outcome.exit_code(), 7);
    assert_eq!(memory.object_count(), 0);
}

#[test]
fn test_unknown_compressor_rejected() {
    let manager = manager_with(
        StaticSource::new(sample_dump()),
        vec![Arc::new(MemoryBackend::new("memory"))],
        BackupOptions::default(),
    );

    let error = manager
        .create_job(SOURCE, "zstd", &targets(&["memory"]), 1)
        .unwrap_err();
    assert_eq!(error.exit_code(), 2);
}

#[test]
fn test_unknown_connection_rejected() {
    let manager = manager_with(
        StaticSource::new(sample_dump()),
        vec![Arc::new(MemoryBackend::new("memory"))],
        BackupOptions::default(),
    );

    assert!(manager
        .create_job("replica", "gzip", &targets(&["memory"]), 1)
        .is_err());
}

#[test]
fn test_failure_serializes_for_json_output() {
    let manager = manager_with(
        StaticSource::new(sample_dump()).with_fault(SourceFault::Connection),
        vec![Arc::new(MemoryBackend::new("memory"))],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["memory"]), 1).unwrap();

    let outcome = manager.run(&job, &CancellationToken::new());
    let json = serde_json::to_value(&outcome).unwrap();

    assert_eq!(json["state"], "failed");
    assert_eq!(json["failure"]["stage"], "dumping");
    assert_eq!(json["failure"]["error"]["kind"], "connection");
    assert!(!json["failure"]["error"]["message"]
        .as_str()
        .unwrap()
        .contains("hunter2"));
}

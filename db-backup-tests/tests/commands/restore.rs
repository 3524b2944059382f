//! Restore and verify of stored objects

use std::sync::Arc;
use test_utils::*;

fn backed_up(ctx: &TestContext, source: &StaticSource, compressor: &str) -> (BackupManager, BackupJob) {
    let manager = manager_with(
        source.clone(),
        vec![Arc::new(ctx.local_backend("local"))],
        BackupOptions::default(),
    );
    let job = manager
        .create_job(SOURCE, compressor, &targets(&["local"]), 1_700_000_000)
        .unwrap();
    manager.run(&job, &CancellationToken::new()).assert_succeeded();
    (manager, job)
}

#[test]
fn test_restore_loads_the_original_dump() {
    let ctx = TestContext::new();
    let source = StaticSource::new(sample_dump());
    let (manager, job) = backed_up(&ctx, &source, "gzip");

    let restored = manager
        .restore(SOURCE, &job.destinations()[0], &CancellationToken::new())
        .unwrap();

    assert_eq!(restored, sample_dump().len() as u64);
    assert_eq!(source.restored(), sample_dump());
}

#[test]
fn test_restore_picks_compressor_from_key() {
    let ctx = TestContext::new();
    let source = StaticSource::new(sample_dump());
    let (manager, job) = backed_up(&ctx, &source, "bzip2");
    assert!(job.key().ends_with(".bz2"));

    manager
        .restore(SOURCE, &job.destinations()[0], &CancellationToken::new())
        .unwrap();
    assert_eq!(source.restored(), sample_dump());
}

#[test]
fn test_verify_reports_sizes() {
    let ctx = TestContext::new();
    let source = StaticSource::new(sample_dump());
    let (manager, job) = backed_up(&ctx, &source, "gzip");

    let report = manager
        .verify(&job.destinations()[0], &CancellationToken::new())
        .unwrap();

    assert_eq!(report.compressor, "gzip");
    assert_eq!(report.decompressed_bytes, sample_dump().len() as u64);
    assert!(report.stored_bytes > 0);
    assert!(report.stored_bytes < report.decompressed_bytes);
    assert_eq!(ctx.stored_files("local"), vec!["shop-1700000000-backup.sql.gz"]);
}

#[test]
fn test_missing_object_is_a_storage_error() {
    let ctx = TestContext::new();
    let source = StaticSource::new(sample_dump());
    let (manager, _) = backed_up(&ctx, &source, "gzip");
    let missing = Destination::new("local", "shop-1-backup.sql.gz");

    let error = manager
        .verify(&missing, &CancellationToken::new())
        .unwrap_err();

    assert!(matches!(error, BackupError::StorageUnavailable { .. }));
    assert_eq!(error.exit_code(), 6);
}

#[test]
fn test_corrupt_object_is_a_compression_error() {
    let ctx = TestContext::new();
    let source = StaticSource::new(sample_dump());
    let (manager, _) = backed_up(&ctx, &source, "gzip");
    ctx.create_file("local/shop-2-backup.sql.gz", "this is not gzip data at all");
    let corrupt = Destination::new("local", "shop-2-backup.sql.gz");

    let error = manager
        .verify(&corrupt, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(error, BackupError::Compression(_)), "{:?}", error);

    let error = manager
        .restore(SOURCE, &corrupt, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(error, BackupError::Compression(_)), "{:?}", error);
}

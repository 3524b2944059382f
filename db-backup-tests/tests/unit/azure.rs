//! Storage account credentials and the Azure backend

use db_backup::config::ConfigError;
use db_backup::error::StorageError;
use db_backup::storage::azure::{block_size_for, max_object_size, DEFAULT_BLOCK_SIZE, MAX_BLOCKS};
use db_backup::storage::{AzureBlobBackend, AzureCredentials, StorageBackend};
use rstest::rstest;
use std::sync::Arc;
use test_utils::*;

fn backend() -> AzureBlobBackend {
    AzureBlobBackend::new(AzureCredentials::new("shopbackups", TEST_ACCOUNT_KEY), "nightly").unwrap()
}

fn unreachable_backend() -> AzureBlobBackend {
    let mut credentials = AzureCredentials::new("shopbackups", TEST_ACCOUNT_KEY);
    credentials.blob_endpoint = Some("http://127.0.0.1:9/shopbackups".into());
    AzureBlobBackend::new(credentials, "nightly").unwrap()
}

#[test]
fn test_blob_url_keeps_prefix_segments() {
    let url = backend().blob_url("weekly/shop-1-backup.sql.gz").unwrap();
    assert_eq!(
        url,
        "https://shopbackups.blob.core.windows.net/nightly/weekly/shop-1-backup.sql.gz"
    );
}

#[rstest]
#[case("")]
#[case("   ")]
#[case("/")]
fn test_empty_keys_rejected(#[case] key: &str) {
    assert!(matches!(
        backend().object_path(key),
        Err(StorageError::InvalidKey { .. })
    ));
}

#[test]
fn test_backend_matches_name_case_insensitively() {
    let backend = backend();
    assert_eq!(backend.type_name(), "azure");
    assert!(backend.handles("Azure"));
    assert!(!backend.handles("local"));
}

#[test]
fn test_block_schedule_stays_under_block_limit() {
    let mut staged = 0u64;
    let mut index = 0;
    while staged < 400 * 1024u64.pow(3) {
        staged += block_size_for(DEFAULT_BLOCK_SIZE, index) as u64;
        index += 1;
    }
    // 400 GiB would need 102,400 fixed 4 MiB blocks
    assert!(index < MAX_BLOCKS);
    assert!(max_object_size(DEFAULT_BLOCK_SIZE) > staged);
}

#[test]
fn test_unreachable_account_fails_the_write_stage() {
    let manager = manager_with(
        StaticSource::new(sample_dump()),
        vec![Arc::new(unreachable_backend())],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, "gzip", &targets(&["azure"]), 1).unwrap();

    let outcome = manager.run(&job, &CancellationToken::new());

    let failure = outcome.assert_failed_at(Stage::Writing, Some(0));
    assert!(matches!(
        failure.error,
        BackupError::StorageUnavailable { .. } | BackupError::Timeout { .. }
    ));
}

#[rstest]
#[case(
    "DefaultEndpointsProtocol=https;AccountName=shopbackups;AccountKey=a2V5;EndpointSuffix=core.windows.net",
    "https://shopbackups.blob.core.windows.net"
)]
#[case(
    "AccountName=devstoreaccount1;AccountKey=a2V5;BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1/",
    "http://127.0.0.1:10000/devstoreaccount1"
)]
#[case(
    "accountname=shopbackups;accountkey=a2V5;endpointsuffix=core.chinacloudapi.cn",
    "https://shopbackups.blob.core.chinacloudapi.cn"
)]
fn test_connection_string_endpoints(#[case] value: &str, #[case] endpoint: &str) {
    let credentials = AzureCredentials::from_connection_string(value).unwrap();
    assert_eq!(credentials.blob_endpoint(), endpoint);
    assert_eq!(credentials.account_key.expose(), "a2V5");
}

#[rstest]
#[case("AccountKey=a2V5", "AccountName")]
#[case("AccountName=shopbackups", "AccountKey")]
#[case("AccountName=shopbackups;AccountKey=", "AccountKey")]
fn test_connection_string_missing_fields(#[case] value: &str, #[case] field: &str) {
    match AzureCredentials::from_connection_string(value) {
        Err(ConfigError::MissingParameter(name)) => assert_eq!(name, field),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_invalid_account_key_rejected() {
    let credentials = AzureCredentials::new("shopbackups", "not base64!");
    assert!(AzureBlobBackend::new(credentials, "nightly").is_err());
}

#[test]
fn test_empty_container_rejected() {
    let credentials = AzureCredentials::new("shopbackups", TEST_ACCOUNT_KEY);
    assert!(matches!(
        AzureBlobBackend::new(credentials, " "),
        Err(ConfigError::MissingParameter(_))
    ));
}

//! From a TOML file to a runnable manager

use db_backup::config::{load_config, ConfigError, Overrides, Settings};
use std::sync::Arc;
use test_utils::*;

#[test]
fn test_minimal_config_runs_a_backup() -> TestResult {
    let (path, dir) = ConfigBuilder::minimal().persist();
    let settings = Settings::resolve(load_config(&path)?, Overrides::default())?;
    assert_eq!(settings.connection.database, DATABASE);
    assert_eq!(settings.compressor, "gzip");
    assert!(settings.azure.is_none());

    // Swap the real database for the static source, keep the configured storage
    let local = db_backup::storage::LocalBackend::new(&settings.local_root);
    let manager = manager_with(
        StaticSource::new(sample_dump()),
        vec![Arc::new(local)],
        BackupOptions::default(),
    );
    let job = manager.create_job(SOURCE, &settings.compressor, &settings.destinations, 42)?;
    manager.run(&job, &CancellationToken::new()).assert_succeeded();

    assert!(dir.path().join("backups/shop-42-backup.sql.gz").is_file());
    Ok(())
}

#[test]
fn test_manager_from_settings_derives_job() -> TestResult {
    let (path, _dir) = ConfigBuilder::minimal()
        .global("compressor", "\"bzip2\"")
        .destination("local", "weekly/")
        .persist();
    let settings = Settings::resolve(load_config(&path)?, Overrides::default())?;

    let manager = BackupManager::from_settings(&settings)?;
    let job = manager.job_from_settings(&settings, 1_700_000_000)?;

    assert_eq!(job.key(), "shop-1700000000-backup.sql.bz2");
    let keys: Vec<&str> = job.destinations().iter().map(|d| d.key()).collect();
    assert_eq!(
        keys,
        vec!["shop-1700000000-backup.sql.bz2", "weekly/shop-1700000000-backup.sql.bz2"]
    );
    assert!(manager.storage().contains("local"));
    assert!(!manager.storage().contains("azure"));
    Ok(())
}

#[test]
fn test_azure_destination_registers_azure_backend() -> TestResult {
    let config = ConfigBuilder::new()
        .database("db.internal", "shop", "backup", "hunter2")
        .azure("shopbackups", "nightly")
        .destination("azure", "")
        .build();
    let settings = Settings::resolve(config, Overrides::default())?;

    let azure = settings.azure.as_ref().expect("azure settings");
    assert_eq!(azure.container, "nightly");
    assert_eq!(azure.block_size, 4 * 1024 * 1024);

    let manager = BackupManager::from_settings(&settings)?;
    assert!(manager.storage().contains("azure"));
    Ok(())
}

#[test]
fn test_missing_parameters_listed_together() {
    let config = ConfigBuilder::new().destination("azure", "").build();

    let error = Settings::resolve(config, Overrides::default()).unwrap_err();

    match error {
        ConfigError::MissingParameter(ref list) => {
            for name in [
                "database host",
                "database name",
                "database user",
                "database password",
                "storage account name",
                "storage account container",
                "storage account key",
            ] {
                assert!(list.contains(name), "{} not in {}", name, list);
            }
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(BackupError::from(error).exit_code(), 2);
}

#[test]
fn test_overrides_fill_missing_values() -> TestResult {
    let config = ConfigBuilder::new().destination("local", "").build();
    let overrides = Overrides {
        database_host: Some("db.internal".into()),
        database_name: Some("shop".into()),
        database_user: Some("backup".into()),
        database_password: Some("hunter2".into()),
        database_port: Some(3307),
        ..Overrides::default()
    };

    let settings = Settings::resolve(config, overrides)?;
    assert_eq!(settings.connection.port, 3307);
    assert_eq!(settings.connection.password.expose(), "hunter2");
    Ok(())
}

#[test]
fn test_unknown_backend_in_file() {
    let config = ConfigBuilder::minimal().destination("s3", "").build();
    assert!(matches!(
        Settings::resolve(config, Overrides::default()),
        Err(ConfigError::UnknownName { .. })
    ));
}

#[test]
fn test_invalid_toml_is_a_parse_error() {
    let ctx = TestContext::new();
    let path = ctx.create_file("broken.toml", "[database\nhost = ");
    assert!(matches!(load_config(&path), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_missing_file_is_a_read_error() {
    let ctx = TestContext::new();
    assert!(matches!(
        load_config(ctx.temp_dir().join("absent.toml")),
        Err(ConfigError::ReadError(_))
    ));
}

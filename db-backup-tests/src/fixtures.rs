//! Test fixtures and sample data

use db_backup::compressors::CompressorRegistry;
use db_backup::config::DestinationConfig;
use db_backup::databases::mock::StaticSource;
use db_backup::databases::{ConnectionConfig, DatabaseRegistry};
use db_backup::managers::backup::{BackupManager, BackupOptions};
use db_backup::storage::{StorageBackend, StorageRegistry};
use flate2::read::GzDecoder;
use std::io::Read;
use std::sync::Arc;

/// Connection name used by `manager_with`
pub const SOURCE: &str = "main";

/// Database name used by `manager_with`
pub const DATABASE: &str = "shop";

/// A base64 account key accepted by the Azure backend
pub const TEST_ACCOUNT_KEY: &str = "dGVzdC1hY2NvdW50LWtleS0xMjM0NTY3ODkw";

/// A small but realistic dump
pub fn sample_dump() -> Vec<u8> {
    let mut dump = String::from(
        "-- MySQL dump 10.13  Distrib 8.0.35\n\
         -- Host: db.internal    Database: shop\n\
         SET NAMES utf8mb4;\n\
         DROP TABLE IF EXISTS `orders`;\n\
         CREATE TABLE `orders` (`id` int NOT NULL, `total` decimal(10,2), PRIMARY KEY (`id`));\n",
    );
    for i in 0..500 {
        dump.push_str(&format!("INSERT INTO `orders` VALUES ({},{}.99);\n", i, i * 3));
    }
    dump.push_str("-- Dump completed\n");
    dump.into_bytes()
}

/// Connection for the static test source
pub fn static_connection() -> ConnectionConfig {
    let mut config = ConnectionConfig::mysql("db.internal", DATABASE, "backup", "hunter2");
    config.db_type = "static".to_string();
    config
}

/// Manager with the static `source` registered under `SOURCE` and the given
/// backends
pub fn manager_with(
    source: StaticSource,
    backends: Vec<Arc<dyn StorageBackend>>,
    options: BackupOptions,
) -> BackupManager {
    let mut databases = DatabaseRegistry::new();
    databases
        .register_source(Arc::new(source))
        .expect("register static source");
    databases
        .add_connection(SOURCE, static_connection())
        .expect("add connection");

    let mut storage = StorageRegistry::new();
    for backend in backends {
        storage.register(backend).expect("register backend");
    }

    BackupManager::new(CompressorRegistry::with_defaults(), databases, storage, options)
}

/// Destination list for the given backend names
pub fn targets(names: &[&str]) -> Vec<DestinationConfig> {
    names.iter().map(|n| DestinationConfig::new(*n)).collect()
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .expect("valid gzip data");
    out
}

use crate::utils::Secret;
use serde::Deserialize;
use std::path::PathBuf;

/// Root of the optional TOML configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default = "default_destinations")]
    pub destinations: Vec<DestinationConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            database: DatabaseConfig::default(),
            azure: AzureConfig::default(),
            local: LocalConfig::default(),
            destinations: default_destinations(),
        }
    }
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Logging configuration; file logging is off unless a directory is set
    #[serde(default)]
    pub log_directory: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: usize,

    /// Bound on every network call and subprocess, in seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default = "default_true")]
    pub require_all_destinations: bool,
    #[serde(default)]
    pub parallel_writes: bool,

    #[serde(default = "default_compressor")]
    pub compressor: String,

    /// Where the compressed dump is spooled (system temp dir if unset)
    #[serde(default)]
    pub spool_directory: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_directory: None,
            log_level: default_log_level(),
            log_max_files: default_log_max_files(),
            timeout_seconds: None,
            require_all_destinations: true,
            parallel_writes: false,
            compressor: default_compressor(),
            spool_directory: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default = "default_database_type")]
    pub db_type: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<Secret>,
    #[serde(default)]
    pub single_transaction: bool,
    /// CA bundle for TLS connections
    #[serde(default)]
    pub ssl_ca: Option<PathBuf>,
    #[serde(default)]
    pub ignore_tables: Vec<String>,
    #[serde(default)]
    pub extra_params: Vec<String>,
    #[serde(default)]
    pub dump_binary: Option<PathBuf>,
    #[serde(default)]
    pub client_binary: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: default_database_type(),
            host: None,
            port: default_port(),
            name: None,
            user: None,
            password: None,
            single_transaction: false,
            ssl_ca: None,
            ignore_tables: Vec::new(),
            extra_params: Vec::new(),
            dump_binary: None,
            client_binary: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub account_key: Option<Secret>,
    #[serde(default)]
    pub container: Option<String>,
    /// Full connection string; explicit fields take precedence
    #[serde(default)]
    pub connection_string: Option<Secret>,
    #[serde(default = "default_endpoint_suffix")]
    pub endpoint_suffix: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub blob_endpoint: Option<String>,
    #[serde(default = "default_block_size_mb")]
    pub block_size_mb: usize,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            account_name: None,
            account_key: None,
            container: None,
            connection_string: None,
            endpoint_suffix: default_endpoint_suffix(),
            protocol: default_protocol(),
            blob_endpoint: None,
            block_size_mb: default_block_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_root")]
    pub root: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: default_local_root(),
        }
    }
}

/// One write target
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Storage backend type, matched case-insensitively
    pub backend: String,
    /// Prepended to the generated object key
    #[serde(default)]
    pub prefix: String,
}

impl DestinationConfig {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            prefix: String::new(),
        }
    }
}

// Default value functions

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> usize { 10 }
fn default_compressor() -> String { "gzip".to_string() }
fn default_database_type() -> String { "mysql".to_string() }
fn default_port() -> u16 { 3306 }
fn default_endpoint_suffix() -> String { "core.windows.net".to_string() }
fn default_protocol() -> String { "https".to_string() }
fn default_block_size_mb() -> usize { 4 }
fn default_local_root() -> PathBuf { PathBuf::from("/tmp") }
fn default_destinations() -> Vec<DestinationConfig> {
    vec![DestinationConfig::new("azure")]
}

use super::types::*;
use crate::databases::ConnectionConfig;
use crate::storage::AzureCredentials;
use crate::utils::Secret;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Duplicate {kind} '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Values supplied on the command line or through the environment.
/// Every `Some` replaces the corresponding file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub azure_account_name: Option<String>,
    pub azure_container: Option<String>,
    pub azure_account_key: Option<Secret>,
    pub azure_connection_string: Option<Secret>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_name: Option<String>,
    pub database_user: Option<String>,
    pub database_password: Option<Secret>,
    pub single_transaction: Option<bool>,
    pub ssl_ca: Option<PathBuf>,
    pub compressor: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub require_all_destinations: Option<bool>,
    pub parallel_writes: Option<bool>,
    /// Replaces the configured destination list when non-empty
    pub destinations: Vec<String>,
    pub local_root: Option<PathBuf>,
    pub spool_directory: Option<PathBuf>,
    pub log_directory: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Azure account settings after merging
#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub credentials: AzureCredentials,
    pub container: String,
    pub block_size: usize,
}

/// Fully merged and validated settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub connection: ConnectionConfig,
    /// Present only when a destination uses the azure backend
    pub azure: Option<AzureSettings>,
    pub local_root: PathBuf,
    pub destinations: Vec<DestinationConfig>,
    pub compressor: String,
    pub timeout: Option<Duration>,
    pub require_all_destinations: bool,
    pub parallel_writes: bool,
    pub spool_directory: Option<PathBuf>,
    pub log_directory: Option<PathBuf>,
    pub log_level: String,
    pub log_max_files: usize,
}

/// Take a non-blank value or record `name` as missing
fn required(value: Option<String>, name: &str, missing: &mut Vec<String>) -> String {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => v,
        None => {
            missing.push(name.to_string());
            String::new()
        }
    }
}

/// Backend types that settings know how to construct
pub const SUPPORTED_BACKENDS: [&str; 2] = ["azure", "local"];

impl Settings {
    /// Merge the file configuration with overrides and validate the result
    pub fn resolve(config: Config, overrides: Overrides) -> Result<Self> {
        let Config {
            global,
            database,
            azure,
            local,
            destinations,
        } = config;

        let destinations = if overrides.destinations.is_empty() {
            destinations
        } else {
            overrides
                .destinations
                .iter()
                .map(|d| DestinationConfig::new(d.trim()))
                .collect()
        };

        let mut missing = Vec::new();

        let host = required(overrides.database_host.or(database.host), "database host", &mut missing);
        let name = required(overrides.database_name.or(database.name), "database name", &mut missing);
        let user = required(overrides.database_user.or(database.user), "database user", &mut missing);
        let password = overrides.database_password.or(database.password);
        if password.is_none() {
            missing.push("database password".to_string());
        }

        let uses_azure = destinations
            .iter()
            .any(|d| d.backend.trim().eq_ignore_ascii_case("azure"));

        let azure = if uses_azure {
            let connection_string = overrides
                .azure_connection_string
                .or(azure.connection_string)
                .filter(|s| !s.is_empty());
            let base = match connection_string {
                Some(value) => Some(AzureCredentials::from_connection_string(value.expose())?),
                None => None,
            };

            let account_name = overrides
                .azure_account_name
                .or(azure.account_name)
                .or_else(|| base.as_ref().map(|c| c.account_name.clone()));
            let account_key = overrides
                .azure_account_key
                .or(azure.account_key)
                .or_else(|| base.as_ref().map(|c| c.account_key.clone()))
                .filter(|k| !k.is_empty());

            let account_name = required(account_name, "storage account name", &mut missing);
            let container = required(
                overrides.azure_container.or(azure.container),
                "storage account container",
                &mut missing,
            );
            if account_key.is_none() {
                missing.push("storage account key".to_string());
            }

            let mut credentials =
                AzureCredentials::new(account_name, account_key.unwrap_or_default());
            match base {
                Some(base) => {
                    credentials.protocol = base.protocol;
                    credentials.endpoint_suffix = base.endpoint_suffix;
                    credentials.blob_endpoint = base.blob_endpoint;
                }
                None => {
                    credentials.protocol = azure.protocol;
                    credentials.endpoint_suffix = azure.endpoint_suffix;
                }
            }
            if azure.blob_endpoint.is_some() {
                credentials.blob_endpoint = azure.blob_endpoint;
            }

            Some(AzureSettings {
                credentials,
                container,
                block_size: azure.block_size_mb.saturating_mul(1024 * 1024),
            })
        } else {
            None
        };

        if !missing.is_empty() {
            return Err(ConfigError::MissingParameter(missing.join(", ")));
        }

        let connection = ConnectionConfig {
            db_type: database.db_type,
            host,
            port: overrides.database_port.unwrap_or(database.port),
            user,
            password: password.unwrap_or_default(),
            database: name,
            single_transaction: overrides
                .single_transaction
                .unwrap_or(database.single_transaction),
            ssl_ca: overrides.ssl_ca.or(database.ssl_ca),
            ignore_tables: database.ignore_tables,
            extra_params: database.extra_params,
            dump_binary: database.dump_binary,
            client_binary: database.client_binary,
        };

        let settings = Settings {
            connection,
            azure,
            local_root: overrides.local_root.unwrap_or(local.root),
            destinations,
            compressor: overrides.compressor.unwrap_or(global.compressor),
            timeout: overrides
                .timeout_seconds
                .or(global.timeout_seconds)
                .map(Duration::from_secs),
            require_all_destinations: overrides
                .require_all_destinations
                .unwrap_or(global.require_all_destinations),
            parallel_writes: overrides.parallel_writes.unwrap_or(global.parallel_writes),
            spool_directory: overrides.spool_directory.or(global.spool_directory),
            log_directory: overrides.log_directory.or(global.log_directory),
            log_level: overrides.log_level.unwrap_or(global.log_level),
            log_max_files: global.log_max_files,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that are present but unusable
    pub fn validate(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(ConfigError::ValidationError(
                "No destinations defined".to_string(),
            ));
        }

        for destination in &self.destinations {
            let backend = destination.backend.trim();
            if !SUPPORTED_BACKENDS
                .iter()
                .any(|b| b.eq_ignore_ascii_case(backend))
            {
                return Err(ConfigError::UnknownName {
                    kind: "storage backend",
                    name: destination.backend.clone(),
                });
            }
        }

        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationError(
                "Timeout must be at least one second".to_string(),
            ));
        }

        if self.connection.port == 0 {
            return Err(ConfigError::ValidationError(
                "Database port must not be 0".to_string(),
            ));
        }

        if let Some(ref ca) = self.connection.ssl_ca {
            if !ca.exists() {
                return Err(ConfigError::ValidationError(format!(
                    "TLS CA bundle does not exist: {:?}",
                    ca
                )));
            }
        }

        if let Some(ref azure) = self.azure {
            if azure.block_size == 0 {
                return Err(ConfigError::ValidationError(
                    "Azure block size must be at least 1 MiB".to_string(),
                ));
            }
            azure.credentials.validate_key()?;
        }

        if let Some(ref dir) = self.spool_directory {
            if !dir.is_dir() {
                return Err(ConfigError::ValidationError(format!(
                    "Spool directory does not exist: {:?}",
                    dir
                )));
            }
        }

        Ok(())
    }
}

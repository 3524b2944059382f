use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use db_backup::config::{self, ConfigError, Overrides, Settings};
use db_backup::managers::backup::{unix_timestamp, BackupManager, Destination, DEFAULT_CONNECTION};
use db_backup::managers::logging::{init_logging, LogFormat, LoggingConfig};
use db_backup::{BackupError, CancellationToken, JobOutcome, Secret};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

#[derive(Parser)]
#[command(name = "db-backup")]
#[command(about = "Dump a MySQL database, compress it and store it in Azure Blob Storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    params: Params,

    /// Format of the final report
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    output: OutputFormat,

    /// Format of console log lines
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text, global = true)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Connection, storage and job parameters. Each overrides the config file.
#[derive(Args)]
struct Params {
    /// Storage account name
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_NAME", global = true)]
    storage_account_name: Option<String>,

    /// Storage account container
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_CONTAINER", global = true)]
    storage_account_container: Option<String>,

    /// Storage account key
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_KEY", hide_env_values = true, global = true)]
    storage_account_key: Option<String>,

    /// Full storage connection string (explicit account flags take precedence)
    #[arg(long, env = "AZURE_STORAGE_CONNECTION_STRING", hide_env_values = true, global = true)]
    storage_connection_string: Option<String>,

    /// Database host
    #[arg(long, env = "DATABASE_HOST", global = true)]
    database_host: Option<String>,

    /// Database port
    #[arg(long, env = "DATABASE_PORT", global = true)]
    database_port: Option<u16>,

    /// Database name
    #[arg(long, env = "DATABASE_NAME", global = true)]
    database_name: Option<String>,

    /// Database user
    #[arg(long, env = "DATABASE_USER", global = true)]
    database_user: Option<String>,

    /// Database password
    #[arg(long, env = "DATABASE_PASSWORD", hide_env_values = true, global = true)]
    database_password: Option<String>,

    /// Dump inside a single transaction for a consistent snapshot
    #[arg(long, global = true)]
    single_transaction: bool,

    /// CA bundle for TLS connections to the database
    #[arg(long, global = true)]
    ssl_ca: Option<PathBuf>,

    /// Compressor name (gzip, bzip2, null)
    #[arg(long, global = true)]
    compressor: Option<String>,

    /// Timeout in seconds for the dump and each storage call
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Succeed when at least one destination was written
    #[arg(long, global = true)]
    allow_partial: bool,

    /// Write all destinations concurrently
    #[arg(long, global = true)]
    parallel: bool,

    /// Destination backends, comma separated (e.g. azure,local)
    #[arg(long, value_delimiter = ',', global = true)]
    destinations: Vec<String>,

    /// Root directory for the local backend
    #[arg(long, global = true)]
    local_root: Option<PathBuf>,

    /// Directory for the temporary spool file
    #[arg(long, global = true)]
    spool_dir: Option<PathBuf>,

    /// Directory for rotated log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level for the log file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

impl Params {
    fn into_overrides(self) -> Overrides {
        Overrides {
            azure_account_name: self.storage_account_name,
            azure_container: self.storage_account_container,
            azure_account_key: self.storage_account_key.map(Secret::from),
            azure_connection_string: self.storage_connection_string.map(Secret::from),
            database_host: self.database_host,
            database_port: self.database_port,
            database_name: self.database_name,
            database_user: self.database_user,
            database_password: self.database_password.map(Secret::from),
            single_transaction: self.single_transaction.then_some(true),
            ssl_ca: self.ssl_ca,
            compressor: self.compressor,
            timeout_seconds: self.timeout,
            require_all_destinations: self.allow_partial.then_some(false),
            parallel_writes: self.parallel.then_some(true),
            destinations: self.destinations,
            local_root: self.local_root,
            spool_directory: self.spool_dir,
            log_directory: self.log_dir,
            log_level: self.log_level,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Dump, compress and upload the database (default)
    Backup,

    /// Load a stored backup back into the database
    Restore {
        /// Object key of the backup to restore
        #[arg(short, long)]
        key: String,

        /// Backend to read from (defaults to the first configured destination)
        #[arg(short, long)]
        destination: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Read a stored backup and check that it decompresses
    Verify {
        /// Object key of the backup to verify
        #[arg(short, long)]
        key: String,

        /// Backend to read from (defaults to the first configured destination)
        #[arg(short, long)]
        destination: Option<String>,
    },

    /// Validate configuration and parameters without running anything
    Validate,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Map a setup error to the exit code of its failure class
fn exit_code_for(error: &anyhow::Error) -> u8 {
    if let Some(backup_error) = error.downcast_ref::<BackupError>() {
        backup_error.exit_code()
    } else if error.downcast_ref::<ConfigError>().is_some() {
        BackupError::Configuration(String::new()).exit_code()
    } else {
        1
    }
}

fn run(cli: Cli) -> Result<u8> {
    let file_config = match cli.config {
        Some(ref path) => {
            let path = config::expand_tilde(path);
            config::load_config(&path)
                .with_context(|| format!("Failed to load config file {:?}", path))?
        }
        None => config::Config::default(),
    };
    let settings = Settings::resolve(file_config, cli.params.into_overrides())?;

    let log_format = match cli.log_format {
        LogFormatArg::Text => LogFormat::Text,
        LogFormatArg::Json => LogFormat::Json,
    };
    let logging_config = LoggingConfig::from_config(
        settings.log_directory.as_deref(),
        &settings.log_level,
        settings.log_max_files,
        log_format,
    );
    let _log_guard = init_logging(&logging_config)?;

    let command = cli.command.unwrap_or(Commands::Backup);
    if let Commands::Validate = command {
        return handle_validate(&settings, cli.output);
    }

    let manager = BackupManager::from_settings(&settings)?;
    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone())?;

    match command {
        Commands::Backup | Commands::Validate => {
            let job = manager.job_from_settings(&settings, unix_timestamp())?;
            let outcome = manager.run(&job, &cancel);
            print_outcome(&outcome, cli.output)?;
            Ok(outcome.exit_code())
        }

        Commands::Restore {
            key,
            destination,
            yes,
        } => {
            let destination = Destination::new(pick_backend(&settings, destination)?, key);

            if !yes {
                use dialoguer::Confirm;

                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Restore {} into database '{}' on {}? Existing tables will be overwritten",
                        destination, settings.connection.database, settings.connection.host
                    ))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Restore cancelled");
                    return Ok(0);
                }
            }

            let bytes = manager.restore(DEFAULT_CONNECTION, &destination, &cancel)?;
            match cli.output {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "backend": destination.backend(),
                        "key": destination.key(),
                        "database": settings.connection.database,
                        "bytes": bytes,
                    })
                ),
                OutputFormat::Text => println!(
                    "✓ Restored {} ({} bytes) into '{}'",
                    destination, bytes, settings.connection.database
                ),
            }
            Ok(0)
        }

        Commands::Verify { key, destination } => {
            let destination = Destination::new(pick_backend(&settings, destination)?, key);
            let report = manager.verify(&destination, &cancel)?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => println!(
                    "✓ {} is readable: {} bytes stored, {} bytes after {} decompression",
                    destination, report.stored_bytes, report.decompressed_bytes, report.compressor
                ),
            }
            Ok(0)
        }
    }
}

fn handle_validate(settings: &Settings, output: OutputFormat) -> Result<u8> {
    // Building the manager checks backend construction as well
    BackupManager::from_settings(settings)?;

    let destinations: Vec<&str> = settings
        .destinations
        .iter()
        .map(|d| d.backend.as_str())
        .collect();

    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "valid": true,
                "database": settings.connection.database,
                "host": settings.connection.host,
                "compressor": settings.compressor,
                "destinations": destinations,
                "require_all_destinations": settings.require_all_destinations,
            })
        ),
        OutputFormat::Text => {
            println!("✓ Configuration is valid");
            println!(
                "  Database:     {} on {}:{}",
                settings.connection.database, settings.connection.host, settings.connection.port
            );
            println!("  Compressor:   {}", settings.compressor);
            println!("  Destinations: {}", destinations.join(", "));
            if let Some(ref azure) = settings.azure {
                println!(
                    "  Azure:        {}/{}",
                    azure.credentials.blob_endpoint(),
                    azure.container
                );
            }
        }
    }
    Ok(0)
}

fn pick_backend(settings: &Settings, requested: Option<String>) -> Result<String> {
    match requested {
        Some(backend) => Ok(backend),
        None => settings
            .destinations
            .first()
            .map(|d| d.backend.clone())
            .ok_or_else(|| ConfigError::ValidationError("No destinations defined".into()).into()),
    }
}

fn print_outcome(outcome: &JobOutcome, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome.failure {
        None => println!("✓ Backup completed: {}", outcome.key),
        Some(ref failure) => match failure.destination {
            Some(index) => println!(
                "✗ Backup failed while writing destination {}: {}",
                index, failure.error
            ),
            None => println!("✗ Backup failed during {}: {}", failure.stage, failure.error),
        },
    }

    for report in &outcome.destinations {
        let detail = match (&report.bytes, &report.error) {
            (Some(bytes), _) => format!("{} bytes", bytes),
            (None, Some(error)) => error.to_string(),
            (None, None) => String::new(),
        };
        println!(
            "  [{}] {:<8} {:<8} {} {}",
            report.index,
            report.backend,
            format!("{:?}", report.status).to_lowercase(),
            report.key,
            detail
        );
    }
    Ok(())
}

/// Cancel the job on the first Ctrl-C and exit on the second
fn install_interrupt_handler(cancel: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;

    std::thread::Builder::new()
        .name("signal".into())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                warn!("Interrupt received, cancelling at the next stage boundary");
                cancel.cancel();

                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

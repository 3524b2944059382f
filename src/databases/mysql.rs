//! MySQL source backed by `mysqldump` and the `mysql` client

use super::{ConnectionConfig, DatabaseSource};
use crate::error::SourceError;
use crate::utils::command::{find_program, run_with_input, ChildStream, CommandFailure};
use crate::ByteStream;
use std::io::{self, Cursor, Read};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// stderr fragments that mean the server could not be reached or refused us
const CONNECTION_MARKERS: &[&str] = &[
    "Access denied",
    "Can't connect",
    "Unknown MySQL server host",
    "Unknown database",
    "Lost connection to MySQL server at 'reading initial communication packet'",
    "Got error: 1045",
    "Got error: 1049",
    "Got error: 2002",
    "Got error: 2003",
    "Got error: 2005",
];

/// Bytes read before the dump stream is handed to the pipeline
const FIRST_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct MysqlDatabase;

impl MysqlDatabase {
    pub fn new() -> Self {
        Self
    }

    fn connection_args(config: &ConnectionConfig) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", config.host),
            format!("--port={}", config.port),
            format!("--user={}", config.user),
        ];
        if let Some(ref ca) = config.ssl_ca {
            args.push(format!("--ssl-ca={}", ca.display()));
        }
        args
    }

    /// Arguments passed to mysqldump. The password travels in `MYSQL_PWD`.
    pub fn dump_args(config: &ConnectionConfig) -> Vec<String> {
        let mut args = Self::connection_args(config);
        args.push("--routines".to_string());
        if config.single_transaction {
            args.push("--single-transaction".to_string());
        }
        for table in &config.ignore_tables {
            args.push(format!("--ignore-table={}.{}", config.database, table));
        }
        args.extend(config.extra_params.iter().cloned());
        args.push(config.database.clone());
        args
    }

    pub fn restore_args(config: &ConnectionConfig) -> Vec<String> {
        let mut args = Self::connection_args(config);
        args.push(config.database.clone());
        args
    }

    fn command(program: &std::path::Path, args: &[String], config: &ConnectionConfig) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.env("MYSQL_PWD", config.password.expose());
        cmd
    }
}

/// Map a failed mysql/mysqldump invocation onto the source error taxonomy
fn classify(error: io::Error, config: &ConnectionConfig, timeout: Option<Duration>) -> SourceError {
    if error.kind() == io::ErrorKind::TimedOut {
        return SourceError::Timeout(timeout.unwrap_or_default());
    }

    let failure = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<CommandFailure>());

    match failure {
        Some(failure) if CONNECTION_MARKERS.iter().any(|m| failure.stderr.contains(m)) => {
            SourceError::Connection {
                database: config.database.clone(),
                message: failure.stderr.clone(),
            }
        }
        Some(failure) => SourceError::Dump(failure.to_string()),
        None => SourceError::Io(error),
    }
}

/// mysqldump stdout with failures translated into `SourceError`s
struct DumpStream {
    inner: ChildStream,
    config: ConnectionConfig,
    timeout: Option<Duration>,
}

impl Read for DumpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| classify(e, &self.config, self.timeout).into())
    }
}

impl DatabaseSource for MysqlDatabase {
    fn type_name(&self) -> &'static str {
        "mysql"
    }

    fn dump(
        &self,
        config: &ConnectionConfig,
        timeout: Option<Duration>,
    ) -> Result<ByteStream, SourceError> {
        let program = find_program("mysqldump", config.dump_binary.as_deref())?;
        let args = Self::dump_args(config);
        info!(
            "Dumping MySQL database '{}' from {}:{}",
            config.database, config.host, config.port
        );
        debug!("mysqldump arguments: {}", args.join(" "));

        let child = ChildStream::spawn(Self::command(&program, &args, config), timeout)?;
        let mut stream = DumpStream {
            inner: child,
            config: config.clone(),
            timeout,
        };

        // Read eagerly so that refused connections fail here rather than
        // halfway through the compression stage
        let mut head = vec![0u8; FIRST_CHUNK];
        let mut filled = 0;
        while filled < head.len() {
            match stream.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::from_stream_error(e)),
            }
        }
        head.truncate(filled);

        Ok(Box::new(Cursor::new(head).chain(stream)))
    }

    fn restore(
        &self,
        config: &ConnectionConfig,
        mut input: ByteStream,
        timeout: Option<Duration>,
    ) -> Result<(), SourceError> {
        let program = find_program("mysql", config.client_binary.as_deref())?;
        let args = Self::restore_args(config);
        info!(
            "Restoring MySQL database '{}' on {}:{}",
            config.database, config.host, config.port
        );

        run_with_input(Self::command(&program, &args, config), &mut input, timeout)
            .map_err(|e| classify(e, config, timeout))?;
        Ok(())
    }
}

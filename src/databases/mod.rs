//! Database sources producing logical dumps

pub mod mysql;

pub use mysql::MysqlDatabase;

use crate::config::ConfigError;
use crate::error::SourceError;
use crate::utils::Secret;
use crate::ByteStream;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Connection parameters for one database.
///
/// The password is a `Secret`, so the derived `Debug` is safe to log.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Source type used to pick the implementation (e.g. "mysql")
    pub db_type: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub database: String,
    /// Dump inside one transaction for a consistent snapshot
    pub single_transaction: bool,
    /// CA bundle for TLS connections
    pub ssl_ca: Option<PathBuf>,
    pub ignore_tables: Vec<String>,
    pub extra_params: Vec<String>,
    /// Explicit path to the dump program
    pub dump_binary: Option<PathBuf>,
    /// Explicit path to the client program used for restores
    pub client_binary: Option<PathBuf>,
}

impl ConnectionConfig {
    pub fn mysql(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<Secret>,
    ) -> Self {
        Self {
            db_type: "mysql".to_string(),
            host: host.into(),
            port: 3306,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            single_transaction: false,
            ssl_ca: None,
            ignore_tables: Vec::new(),
            extra_params: Vec::new(),
            dump_binary: None,
            client_binary: None,
        }
    }
}

/// Produces a logical dump of a database as a byte stream
pub trait DatabaseSource: Send + Sync {
    /// Declared source type (e.g. "mysql")
    fn type_name(&self) -> &'static str;

    fn handles(&self, db_type: &str) -> bool {
        self.type_name().eq_ignore_ascii_case(db_type.trim())
    }

    /// Open a dump stream.
    ///
    /// Connection problems are reported here, before any byte is returned.
    /// Failures later in the dump surface as read errors on the stream.
    fn dump(
        &self,
        config: &ConnectionConfig,
        timeout: Option<Duration>,
    ) -> Result<ByteStream, SourceError>;

    /// Load a dump back into the database
    fn restore(
        &self,
        _config: &ConnectionConfig,
        _input: ByteStream,
        _timeout: Option<Duration>,
    ) -> Result<(), SourceError> {
        Err(SourceError::Dump(format!(
            "restore is not supported by the {} source",
            self.type_name()
        )))
    }
}

impl From<SourceError> for io::Error {
    fn from(error: SourceError) -> Self {
        let kind = match &error {
            SourceError::Timeout(_) => io::ErrorKind::TimedOut,
            SourceError::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}

impl SourceError {
    /// Recover a `SourceError` carried inside an I/O error from a dump stream
    pub fn from_stream_error(error: io::Error) -> Self {
        let kind = error.kind();
        if error
            .get_ref()
            .map(|inner| inner.is::<SourceError>())
            .unwrap_or(false)
        {
            return match error.into_inner().map(|inner| inner.downcast::<SourceError>()) {
                Some(Ok(source)) => *source,
                Some(Err(other)) => SourceError::Io(io::Error::new(kind, other)),
                None => SourceError::Io(io::Error::from(kind)),
            };
        }
        SourceError::Io(error)
    }
}

/// Named connections and the source implementations that serve them
#[derive(Default, Clone)]
pub struct DatabaseRegistry {
    sources: HashMap<String, Arc<dyn DatabaseSource>>,
    connections: HashMap<String, ConnectionConfig>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .sources
            .insert("mysql".to_string(), Arc::new(MysqlDatabase::new()));
        registry
    }

    pub fn register_source(&mut self, source: Arc<dyn DatabaseSource>) -> Result<(), ConfigError> {
        let name = source.type_name().to_lowercase();
        if self.sources.contains_key(&name) {
            return Err(ConfigError::DuplicateName {
                kind: "database source",
                name,
            });
        }
        self.sources.insert(name, source);
        Ok(())
    }

    pub fn add_connection(
        &mut self,
        name: impl Into<String>,
        config: ConnectionConfig,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.connections.contains_key(&name) {
            return Err(ConfigError::DuplicateName {
                kind: "database connection",
                name,
            });
        }
        self.connections.insert(name, config);
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.get(name)
    }

    /// Resolve a connection name to its config and source implementation
    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<(Arc<dyn DatabaseSource>, &ConnectionConfig), ConfigError> {
        let config = self
            .connections
            .get(name)
            .ok_or_else(|| ConfigError::UnknownName {
                kind: "database connection",
                name: name.to_string(),
            })?;

        let source = self
            .sources
            .get(&config.db_type.trim().to_lowercase())
            .filter(|s| s.handles(&config.db_type))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownName {
                kind: "database source type",
                name: config.db_type.clone(),
            })?;

        Ok((source, config))
    }
}

/// In-memory sources for tests
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// How a `StaticSource` should misbehave
    #[derive(Debug, Clone)]
    pub enum SourceFault {
        /// `dump` fails before returning a stream
        Connection,
        /// The stream fails after this many bytes
        DumpAfter(usize),
        /// The stream stalls on every read for this long
        Stall(Duration),
    }

    /// Source that dumps a fixed byte string and records restores
    #[derive(Clone, Default)]
    pub struct StaticSource {
        data: Vec<u8>,
        fault: Option<SourceFault>,
        dump_calls: Arc<AtomicUsize>,
        restored: Arc<Mutex<Vec<u8>>>,
    }

    impl StaticSource {
        pub fn new(data: impl Into<Vec<u8>>) -> Self {
            Self {
                data: data.into(),
                ..Default::default()
            }
        }

        pub fn with_fault(mut self, fault: SourceFault) -> Self {
            self.fault = Some(fault);
            self
        }

        pub fn dump_calls(&self) -> usize {
            self.dump_calls.load(Ordering::SeqCst)
        }

        pub fn restored(&self) -> Vec<u8> {
            self.restored.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    struct FaultyStream {
        inner: Cursor<Vec<u8>>,
        remaining: usize,
    }

    impl Read for FaultyStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(SourceError::Dump("mysqldump: Got error: 1146: Table doesn't exist".into()).into());
            }
            let limit = buf.len().min(self.remaining);
            let n = self.inner.read(&mut buf[..limit])?;
            self.remaining -= n;
            Ok(n)
        }
    }

    struct StallingStream {
        inner: Cursor<Vec<u8>>,
        delay: Duration,
    }

    impl Read for StallingStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(self.delay);
            let limit = buf.len().min(16);
            self.inner.read(&mut buf[..limit])
        }
    }

    impl DatabaseSource for StaticSource {
        fn type_name(&self) -> &'static str {
            "static"
        }

        fn dump(
            &self,
            config: &ConnectionConfig,
            _timeout: Option<Duration>,
        ) -> Result<ByteStream, SourceError> {
            self.dump_calls.fetch_add(1, Ordering::SeqCst);
            match &self.fault {
                Some(SourceFault::Connection) => Err(SourceError::Connection {
                    database: config.database.clone(),
                    message: format!("Can't connect to MySQL server on '{}'", config.host),
                }),
                Some(SourceFault::DumpAfter(n)) => Ok(Box::new(FaultyStream {
                    inner: Cursor::new(self.data.clone()),
                    remaining: *n,
                })),
                Some(SourceFault::Stall(delay)) => Ok(Box::new(StallingStream {
                    inner: Cursor::new(self.data.clone()),
                    delay: *delay,
                })),
                None => Ok(Box::new(Cursor::new(self.data.clone()))),
            }
        }

        fn restore(
            &self,
            _config: &ConnectionConfig,
            mut input: ByteStream,
            _timeout: Option<Duration>,
        ) -> Result<(), SourceError> {
            let mut data = Vec::new();
            input.read_to_end(&mut data)?;
            if let Ok(mut restored) = self.restored.lock() {
                *restored = data;
            }
            Ok(())
        }
    }
}

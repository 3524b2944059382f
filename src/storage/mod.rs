//! Storage backends for backup artifacts
//!
//! A backend stores and retrieves named byte blobs in one storage
//! technology. Backends are registered under their declared type name and
//! looked up case-insensitively by destinations.

pub mod azure;
pub mod local;

pub use azure::{AzureBlobBackend, AzureCredentials};
pub use local::LocalBackend;

use crate::config::ConfigError;
use crate::error::StorageError;
use crate::ByteStream;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

pub trait StorageBackend: Send + Sync {
    /// Declared backend type (e.g. "local", "azure")
    fn type_name(&self) -> &str;

    /// Case-insensitive match against the declared type
    fn handles(&self, name: &str) -> bool {
        self.type_name().eq_ignore_ascii_case(name.trim())
    }

    /// Store `data` under `key`, replacing any existing object.
    /// Returns the number of bytes stored.
    fn write(
        &self,
        key: &str,
        data: &mut dyn Read,
        timeout: Option<Duration>,
    ) -> Result<u64, StorageError>;

    /// Open a stored object for reading
    fn read(&self, key: &str, timeout: Option<Duration>) -> Result<ByteStream, StorageError>;
}

/// Backends indexed by lowercase type name
#[derive(Default, Clone)]
pub struct StorageRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) -> Result<(), ConfigError> {
        let name = backend.type_name().trim().to_lowercase();
        if self.backends.contains_key(&name) {
            return Err(ConfigError::DuplicateName {
                kind: "storage backend",
                name,
            });
        }
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Look up the backend serving `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageBackend>> {
        self.backends
            .get(&name.trim().to_lowercase())
            .filter(|backend| backend.handles(name))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

/// In-memory and fault-injecting backends for tests
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::{self, Cursor};
    use std::sync::Mutex;

    /// Backend keeping objects in memory
    #[derive(Clone)]
    pub struct MemoryBackend {
        name: String,
        objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
        writes: Arc<Mutex<Vec<String>>>,
    }

    impl MemoryBackend {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                objects: Arc::new(Mutex::new(BTreeMap::new())),
                writes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.lock().ok()?.get(key).cloned()
        }

        pub fn keys(&self) -> Vec<String> {
            self.objects
                .lock()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default()
        }

        pub fn object_count(&self) -> usize {
            self.objects.lock().map(|o| o.len()).unwrap_or(0)
        }

        /// Keys passed to `write`, including failed attempts
        pub fn write_attempts(&self) -> Vec<String> {
            self.writes.lock().map(|w| w.clone()).unwrap_or_default()
        }
    }

    impl StorageBackend for MemoryBackend {
        fn type_name(&self) -> &str {
            &self.name
        }

        fn write(
            &self,
            key: &str,
            data: &mut dyn Read,
            _timeout: Option<Duration>,
        ) -> Result<u64, StorageError> {
            if let Ok(mut writes) = self.writes.lock() {
                writes.push(key.to_string());
            }
            let mut buf = Vec::new();
            data.read_to_end(&mut buf).map_err(StorageError::Stream)?;
            let len = buf.len() as u64;
            self.objects
                .lock()
                .map_err(|_| StorageError::Unavailable("memory backend poisoned".into()))?
                .insert(key.to_string(), buf);
            Ok(len)
        }

        fn read(&self, key: &str, _timeout: Option<Duration>) -> Result<ByteStream, StorageError> {
            self.get(key)
                .map(|data| Box::new(Cursor::new(data)) as ByteStream)
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }
    }

    /// How a `FaultyBackend` fails
    #[derive(Debug, Clone)]
    pub enum BackendFault {
        /// Reject every write up front (e.g. bad credentials)
        Unavailable,
        /// Consume this many bytes, then drop the connection
        DisconnectAfter(usize),
        /// Report a request timeout
        Timeout,
    }

    /// Backend that always fails writes; reads are delegated to memory
    #[derive(Clone)]
    pub struct FaultyBackend {
        inner: MemoryBackend,
        fault: BackendFault,
    }

    impl FaultyBackend {
        pub fn new(name: impl Into<String>, fault: BackendFault) -> Self {
            Self {
                inner: MemoryBackend::new(name),
                fault,
            }
        }

        pub fn write_attempts(&self) -> Vec<String> {
            self.inner.write_attempts()
        }

        pub fn object_count(&self) -> usize {
            self.inner.object_count()
        }
    }

    impl StorageBackend for FaultyBackend {
        fn type_name(&self) -> &str {
            self.inner.type_name()
        }

        fn write(
            &self,
            key: &str,
            data: &mut dyn Read,
            timeout: Option<Duration>,
        ) -> Result<u64, StorageError> {
            if let Ok(mut writes) = self.inner.writes.lock() {
                writes.push(key.to_string());
            }
            match self.fault {
                BackendFault::Unavailable => Err(StorageError::Unavailable(
                    "AuthenticationFailed: server failed to authenticate the request".into(),
                )),
                BackendFault::DisconnectAfter(n) => {
                    let mut buf = vec![0u8; n];
                    let _ = data.read(&mut buf).map_err(StorageError::Stream)?;
                    Err(StorageError::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    )))
                }
                BackendFault::Timeout => Err(StorageError::Timeout(timeout.unwrap_or_default())),
            }
        }

        fn read(&self, key: &str, timeout: Option<Duration>) -> Result<ByteStream, StorageError> {
            self.inner.read(key, timeout)
        }
    }
}

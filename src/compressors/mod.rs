//! Stream compressors
//!
//! A compressor wraps a byte stream in another byte stream; nothing is
//! buffered beyond the codec's internal window, so dumps of any size pass
//! through in constant memory.

pub mod bzip2;
pub mod gzip;
pub mod null;

pub use self::bzip2::Bzip2Compressor;
pub use gzip::GzipCompressor;
pub use null::NullCompressor;

use crate::config::ConfigError;
use crate::error::CompressionError;
use crate::ByteStream;
use std::collections::HashMap;
use std::sync::Arc;

/// A named, streaming codec
pub trait Compressor: Send + Sync {
    /// Unique lowercase name used for lookup (e.g. "gzip")
    fn name(&self) -> &'static str;

    /// File extension appended to compressed object keys, if any
    fn extension(&self) -> Option<&'static str>;

    fn compress(&self, input: ByteStream) -> ByteStream;

    fn decompress(&self, input: ByteStream) -> ByteStream;

    fn handles(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.trim())
    }

    /// Key under which the compressed form of `key` is stored
    fn compressed_key(&self, key: &str) -> String {
        match self.extension() {
            Some(ext) => format!("{}.{}", key, ext),
            None => key.to_string(),
        }
    }
}

/// Compressors indexed by lowercase name
#[derive(Default, Clone)]
pub struct CompressorRegistry {
    compressors: HashMap<String, Arc<dyn Compressor>>,
}

impl CompressorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in compressor
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.compressors.insert("gzip".into(), Arc::new(GzipCompressor::default()));
        registry.compressors.insert("bzip2".into(), Arc::new(Bzip2Compressor::default()));
        registry.compressors.insert("null".into(), Arc::new(NullCompressor));
        registry
    }

    pub fn register(&mut self, compressor: Arc<dyn Compressor>) -> Result<(), ConfigError> {
        let name = compressor.name().to_lowercase();
        if self.compressors.contains_key(&name) {
            return Err(ConfigError::DuplicateName {
                kind: "compressor",
                name,
            });
        }
        self.compressors.insert(name, compressor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Compressor>, CompressionError> {
        self.compressors
            .get(&name.trim().to_lowercase())
            .filter(|c| c.handles(name))
            .cloned()
            .ok_or_else(|| CompressionError::Unknown(name.to_string()))
    }

    /// Compressor whose extension ends `key`, if any.
    /// Keys without a known extension are taken to be uncompressed.
    pub fn for_key(&self, key: &str) -> Option<Arc<dyn Compressor>> {
        let matched = self.compressors.values().find(|c| {
            c.extension()
                .map(|ext| {
                    key.len() > ext.len() + 1
                        && key.ends_with(ext)
                        && key[..key.len() - ext.len()].ends_with('.')
                })
                .unwrap_or(false)
        });
        matched
            .or_else(|| self.compressors.values().find(|c| c.extension().is_none()))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.compressors.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Fault-injecting compressors for tests
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::io::{self, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Compressor whose output stream fails after `fail_after` bytes of input
    pub struct FailingCompressor {
        pub fail_after: usize,
    }

    struct FailingStream {
        inner: ByteStream,
        remaining: usize,
    }

    impl Read for FailingStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "codec state corrupted"));
            }
            let limit = buf.len().min(self.remaining);
            let n = self.inner.read(&mut buf[..limit])?;
            self.remaining -= n;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "codec state corrupted"));
            }
            Ok(n)
        }
    }

    impl Compressor for FailingCompressor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extension(&self) -> Option<&'static str> {
            Some("fail")
        }

        fn compress(&self, input: ByteStream) -> ByteStream {
            Box::new(FailingStream {
                inner: input,
                remaining: self.fail_after,
            })
        }

        fn decompress(&self, input: ByteStream) -> ByteStream {
            input
        }
    }

    /// Delegates to another compressor and counts `compress` calls
    #[derive(Clone)]
    pub struct SpyCompressor {
        inner: Arc<dyn Compressor>,
        calls: Arc<AtomicUsize>,
    }

    impl SpyCompressor {
        pub fn new(inner: Arc<dyn Compressor>) -> Self {
            Self {
                inner,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn compress_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Compressor for SpyCompressor {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn extension(&self) -> Option<&'static str> {
            self.inner.extension()
        }

        fn compress(&self, input: ByteStream) -> ByteStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.compress(input)
        }

        fn decompress(&self, input: ByteStream) -> ByteStream {
            self.inner.decompress(input)
        }
    }
}

//! Filesystem storage backend

use super::StorageBackend;
use crate::error::StorageError;
use crate::ByteStream;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ROOT: &str = "/tmp";

/// Stores objects as files below a root directory.
///
/// Writes go to a uniquely named hidden sibling file which is renamed over
/// the target once the stream is complete, so a failed write never leaves a
/// partial object and concurrent writers never share a temp file.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` below the root, rejecting keys that would escape it
    pub fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if key.trim().is_empty() {
            return Err(invalid("key is empty"));
        }

        let relative = Path::new(key);
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir => return Err(invalid("key must not contain '..'")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("key must be relative"))
                }
            }
        }

        if path == self.root {
            return Err(invalid("key does not name a file"));
        }
        Ok(path)
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

fn copy_stream(data: &mut dyn Read, out: &mut impl Write) -> Result<u64, StorageError> {
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match data.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::Stream(e)),
        };
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    out.flush()?;
    Ok(total)
}

impl StorageBackend for LocalBackend {
    fn type_name(&self) -> &str {
        "local"
    }

    fn write(
        &self,
        key: &str,
        data: &mut dyn Read,
        _timeout: Option<Duration>,
    ) -> Result<u64, StorageError> {
        let path = self.object_path(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Dropping the temp file on any error below removes it
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".partial")
            .tempfile_in(parent)?;

        let written = {
            let mut writer = BufWriter::new(temp.as_file_mut());
            copy_stream(data, &mut writer)?
        };
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| StorageError::Io(e.error))?;

        debug!("Wrote {} to {}", key, path.display());
        Ok(written)
    }

    fn read(&self, key: &str, _timeout: Option<Duration>) -> Result<ByteStream, StorageError> {
        let path = self.object_path(key)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

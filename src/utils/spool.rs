//! Replayable on-disk buffer for compressed backup output
//!
//! The dump is a single-pass stream. It is compressed once into a spool and
//! each destination then reads its own handle, so one failed or slow
//! destination never forces the database to be dumped again.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

pub struct Spool {
    file: NamedTempFile,
    len: u64,
}

impl Spool {
    /// Create an empty spool, in `dir` if given or the system temp directory
    pub fn create(dir: Option<&Path>) -> io::Result<Self> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("db-backup-").suffix(".spool");
            b
        };
        let file = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        debug!("Created spool at {:?}", file.path());
        Ok(Self { file, len: 0 })
    }

    /// Copy `reader` into the spool, returning the number of bytes written.
    /// Read and write failures are reported separately so callers can tell
    /// which side of the pipe broke.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> Result<u64, FillError> {
        let mut writer = BufWriter::new(self.file.as_file_mut());
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FillError::Read(e)),
            };
            writer.write_all(&buf[..n]).map_err(FillError::Write)?;
            total += n as u64;
        }

        writer.flush().map_err(FillError::Write)?;
        drop(writer);
        self.file.as_file().sync_data().map_err(FillError::Write)?;
        self.len = total;
        Ok(total)
    }

    /// Open an independent reader positioned at the start of the spool
    pub fn reader(&self) -> io::Result<BufReader<File>> {
        Ok(BufReader::new(self.file.reopen()?))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[derive(Debug)]
pub enum FillError {
    Read(io::Error),
    Write(io::Error),
}

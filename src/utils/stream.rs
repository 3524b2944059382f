//! Read adapters used by the backup pipeline

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Fails reads with `TimedOut` once the deadline has passed.
///
/// A reader blocked inside the inner `read` is not interrupted; sources that
/// can block indefinitely enforce their own timeout as well.
pub struct DeadlineReader<R> {
    inner: R,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl<R: Read> DeadlineReader<R> {
    pub fn new(inner: R, timeout: Option<Duration>) -> Self {
        Self {
            inner,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
        }
    }
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.timeout) {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("stream exceeded timeout of {:?}", timeout),
                ));
            }
        }
        self.inner.read(buf)
    }
}

/// Records the first error returned by the inner reader.
///
/// The compressor sits between the dump stream and the spool; when a read on
/// the compressed stream fails, the recorded fault tells whether the dump
/// itself broke or the compressor did.
pub struct FaultRecorder<R> {
    inner: R,
    fault: Arc<Mutex<Option<io::Error>>>,
}

impl<R: Read> FaultRecorder<R> {
    pub fn new(inner: R) -> (Self, FaultSlot) {
        let fault = Arc::new(Mutex::new(None));
        (
            Self {
                inner,
                fault: Arc::clone(&fault),
            },
            FaultSlot(fault),
        )
    }
}

impl<R: Read> Read for FaultRecorder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                let echo = io::Error::new(e.kind(), e.to_string());
                if let Ok(mut slot) = self.fault.lock() {
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
                Err(echo)
            }
        }
    }
}

/// Handle on the error captured by a `FaultRecorder`
#[derive(Clone)]
pub struct FaultSlot(Arc<Mutex<Option<io::Error>>>);

impl FaultSlot {
    pub fn take(&self) -> Option<io::Error> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Counts bytes passing through a reader.
///
/// The count stays readable through the returned `ByteCounter` after the
/// reader has been boxed and handed to another stage.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> (Self, ByteCounter) {
        let count = Arc::new(AtomicU64::new(0));
        (
            Self {
                inner,
                count: Arc::clone(&count),
            },
            ByteCounter(count),
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

#[derive(Clone, Debug)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

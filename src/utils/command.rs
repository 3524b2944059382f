//! Utilities for running external programs with streaming I/O and timeouts

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A program exited unsuccessfully or was killed by the watchdog
#[derive(Debug, thiserror::Error)]
#[error("{program} failed (exit code {code:?}, timed out: {timed_out}): {stderr}")]
pub struct CommandFailure {
    pub program: String,
    pub code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
}

/// Locate a program, preferring an explicit override path
pub fn find_program(name: &str, override_path: Option<&Path>) -> io::Result<PathBuf> {
    if let Some(path) = override_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found at {:?}", name, path),
        ));
    }

    which::which(name).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} executable not found in PATH: {}", name, e),
        )
    })
}

/// Kills a child process if it is still running when the timeout expires
struct Watchdog {
    stop: Sender<()>,
    handle: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn start(child: Arc<Mutex<Child>>, timeout: Duration, program: String) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let handle = std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(timeout) {
                warn!("{} exceeded timeout of {:?}, killing it", program, timeout);
                flag.store(true, Ordering::SeqCst);
                if let Ok(mut child) = child.lock() {
                    if let Err(e) = child.kill() {
                        debug!("Failed to kill {}: {}", program, e);
                    }
                }
            }
        });

        Self { stop, handle, fired }
    }

    /// Disarm the watchdog and report whether it fired
    fn disarm(self) -> bool {
        let _ = self.stop.send(());
        let _ = self.handle.join();
        self.fired.load(Ordering::SeqCst)
    }
}

fn drain_stderr(stderr: Option<ChildStderr>) -> Option<JoinHandle<String>> {
    stderr.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut text = String::new();
            let _ = pipe.read_to_string(&mut text);
            text
        })
    })
}

fn spawn_supervised(
    mut cmd: Command,
    program: &str,
    timeout: Option<Duration>,
) -> io::Result<(Arc<Mutex<Child>>, Option<ChildStdout>, Option<JoinHandle<String>>, Option<Watchdog>)> {
    debug!("Spawning {}", program);
    let mut child = cmd.spawn().map_err(|e| {
        io::Error::new(e.kind(), format!("Failed to execute {}: {}", program, e))
    })?;

    let stdout = child.stdout.take();
    let stderr = drain_stderr(child.stderr.take());
    let child = Arc::new(Mutex::new(child));
    let watchdog = timeout.map(|t| Watchdog::start(Arc::clone(&child), t, program.to_string()));

    Ok((child, stdout, stderr, watchdog))
}

fn wait_child(child: &Arc<Mutex<Child>>) -> io::Result<ExitStatus> {
    let mut guard = child
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "child process lock poisoned"))?;
    guard.wait()
}

/// Streaming stdout of a running program.
///
/// End of stream is only reported once the program exited successfully; a
/// non-zero exit surfaces as an error carrying a `CommandFailure`, and a
/// watchdog kill as `TimedOut`.
pub struct ChildStream {
    program: String,
    child: Arc<Mutex<Child>>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    watchdog: Option<Watchdog>,
    finished: bool,
}

impl ChildStream {
    pub fn spawn(mut cmd: Command, timeout: Option<Duration>) -> io::Result<Self> {
        let program = cmd.get_program().to_string_lossy().to_string();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let (child, stdout, stderr, watchdog) = spawn_supervised(cmd, &program, timeout)?;

        Ok(Self {
            program,
            child,
            stdout,
            stderr,
            watchdog,
            finished: false,
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        self.stdout = None;
        let timed_out = self.watchdog.take().map(Watchdog::disarm).unwrap_or(false);
        let status = wait_child(&self.child)?;
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if timed_out {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                CommandFailure {
                    program: self.program.clone(),
                    code: status.code(),
                    stderr,
                    timed_out: true,
                },
            ));
        }

        if !status.success() {
            error!("{} exited with {:?}", self.program, status.code());
            return Err(io::Error::new(
                io::ErrorKind::Other,
                CommandFailure {
                    program: self.program.clone(),
                    code: status.code(),
                    stderr: stderr.trim().to_string(),
                    timed_out: false,
                },
            ));
        }

        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", self.program, stderr.trim());
        }
        Ok(())
    }
}

impl Read for ChildStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf)?,
            None => 0,
        };
        if n == 0 && !buf.is_empty() {
            self.finish()?;
        }
        Ok(n)
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned mid-stream: don't leave the program running
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.disarm();
        }
    }
}

/// Run a program feeding `input` to its stdin, returning its stdout
pub fn run_with_input(
    mut cmd: Command,
    input: &mut dyn Read,
    timeout: Option<Duration>,
) -> io::Result<String> {
    let program = cmd.get_program().to_string_lossy().to_string();
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let (child, stdout, stderr, watchdog) = spawn_supervised(cmd, &program, timeout)?;
    let stdin = child.lock().ok().and_then(|mut c| c.stdin.take());
    let stdout_reader = stdout.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut text = String::new();
            let _ = pipe.read_to_string(&mut text);
            text
        })
    });

    let copy_result = match stdin {
        Some(mut stdin) => io::copy(input, &mut stdin).and_then(|_| stdin.flush()),
        None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin not captured")),
    };

    let timed_out = watchdog.map(Watchdog::disarm).unwrap_or(false);
    let status = wait_child(&child)?;
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    let stdout = stdout_reader.and_then(|h| h.join().ok()).unwrap_or_default();

    if timed_out {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            CommandFailure {
                program,
                code: status.code(),
                stderr,
                timed_out: true,
            },
        ));
    }

    if !status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            CommandFailure {
                program,
                code: status.code(),
                stderr: stderr.trim().to_string(),
                timed_out: false,
            },
        ));
    }

    // The program exited cleanly but stopped reading early
    copy_result?;
    Ok(stdout)
}

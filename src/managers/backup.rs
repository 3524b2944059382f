//! Backup manager - orchestrates backup jobs
//!
//! A job moves through `Pending → Dumping → Compressing → Writing(i)` and
//! ends in `Succeeded` or `Failed`. The dump is compressed once into a
//! spool, and every destination is written from its own handle on that
//! spool. A failing destination never stops the remaining ones, and
//! objects already written are not rolled back.

use crate::compressors::CompressorRegistry;
use crate::config::{ConfigError, DestinationConfig, Settings};
use crate::databases::DatabaseRegistry;
use crate::error::{BackupError, SourceError, Stage, StorageError};
use crate::storage::{AzureBlobBackend, LocalBackend, StorageBackend, StorageRegistry};
use crate::utils::spool::{FillError, Spool};
use crate::utils::stream::{CountingReader, DeadlineReader, FaultRecorder, FaultSlot};
use crate::utils::CancellationToken;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Connection name used for the database configured in `Settings`
pub const DEFAULT_CONNECTION: &str = "database";

/// Object key for a dump of `database` taken at `timestamp`, before the
/// compressor extension is appended
pub fn backup_key(database: &str, timestamp: u64) -> String {
    format!("{}-{}-backup.sql", database, timestamp)
}

/// Current time in whole seconds since the Unix epoch
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One write target: a backend name and the key to store under
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    backend: String,
    key: String,
}

impl Destination {
    pub fn new(backend: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            key: key.into(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Dumping,
    Compressing,
    Writing(usize),
    Succeeded,
    Failed,
}

impl JobState {
    fn stage(&self) -> Stage {
        match self {
            JobState::Pending | JobState::Succeeded | JobState::Failed => Stage::Pending,
            JobState::Dumping => Stage::Dumping,
            JobState::Compressing => Stage::Compressing,
            JobState::Writing(_) => Stage::Writing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => f.write_str("pending"),
            JobState::Dumping => f.write_str("dumping"),
            JobState::Compressing => f.write_str("compressing"),
            JobState::Writing(i) => write!(f, "writing({})", i),
            JobState::Succeeded => f.write_str("succeeded"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

/// Behaviour shared by every job a manager runs
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Bound on the dump and on every storage call
    pub timeout: Option<Duration>,
    /// Fail the job when any destination fails
    pub require_all_destinations: bool,
    /// Write destinations concurrently from the spool
    pub parallel_writes: bool,
    pub spool_directory: Option<PathBuf>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            require_all_destinations: true,
            parallel_writes: false,
            spool_directory: None,
        }
    }
}

/// A validated backup request. Built by `BackupManager::create_job`.
#[derive(Debug, Clone)]
pub struct BackupJob {
    source: String,
    compressor: String,
    key: String,
    timestamp: u64,
    destinations: Vec<Destination>,
}

impl BackupJob {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn compressor(&self) -> &str {
        &self.compressor
    }

    /// Object key shared by all destinations (before any prefix)
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    Pending,
    Written,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationReport {
    pub index: usize,
    pub backend: String,
    pub key: String,
    pub status: DestinationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BackupError>,
}

/// Why a job ended in `Failed`
#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub stage: Stage,
    /// Index of the destination being written, if any
    pub destination: Option<usize>,
    pub error: BackupError,
}

impl JobFailure {
    fn new(stage: Stage, destination: Option<usize>, error: BackupError) -> Self {
        Self {
            stage,
            destination,
            error,
        }
    }
}

/// Result of one job run
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub state: JobState,
    /// Every state entered, in order, ending with the terminal state
    pub history: Vec<JobState>,
    pub key: String,
    /// Uncompressed bytes read from the database
    pub dump_bytes: u64,
    /// Compressed bytes stored per destination
    pub stored_bytes: u64,
    pub destinations: Vec<DestinationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    pub duration_ms: u64,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.state == JobState::Succeeded
    }

    pub fn written(&self) -> impl Iterator<Item = &DestinationReport> {
        self.destinations
            .iter()
            .filter(|d| d.status == DestinationStatus::Written)
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self.failure {
            Some(ref failure) => failure.error.exit_code(),
            None => 0,
        }
    }
}

/// Result of reading back and decompressing a stored object
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub backend: String,
    pub key: String,
    pub compressor: String,
    pub stored_bytes: u64,
    pub decompressed_bytes: u64,
}

/// Mutable bookkeeping for one run
struct JobRun<'a> {
    cancel: &'a CancellationToken,
    history: Vec<JobState>,
    reports: Vec<DestinationReport>,
    dump_bytes: u64,
    stored_bytes: u64,
}

impl<'a> JobRun<'a> {
    fn new(job: &BackupJob, cancel: &'a CancellationToken) -> Self {
        let reports = job
            .destinations
            .iter()
            .enumerate()
            .map(|(index, d)| DestinationReport {
                index,
                backend: d.backend.clone(),
                key: d.key.clone(),
                status: DestinationStatus::Pending,
                bytes: None,
                error: None,
            })
            .collect();

        Self {
            cancel,
            history: vec![JobState::Pending],
            reports,
            dump_bytes: 0,
            stored_bytes: 0,
        }
    }

    /// Transition to `state`, unless the job has been cancelled
    fn enter(&mut self, state: JobState) -> Result<(), JobFailure> {
        if self.cancel.is_cancelled() {
            let destination = match state {
                JobState::Writing(i) => Some(i),
                _ => None,
            };
            warn!("Job cancelled before entering {}", state);
            return Err(JobFailure::new(
                state.stage(),
                destination,
                BackupError::Cancelled { stage: state.stage() },
            ));
        }
        debug!("Job state: {}", state);
        self.history.push(state);
        Ok(())
    }

    fn record(&mut self, index: usize, result: Option<Result<u64, BackupError>>) {
        let report = &mut self.reports[index];
        match result {
            Some(Ok(bytes)) => {
                info!("Wrote {} bytes to '{}' ({})", bytes, report.backend, report.key);
                report.status = DestinationStatus::Written;
                report.bytes = Some(bytes);
            }
            Some(Err(e)) => {
                error!("Failed to write to '{}': {}", report.backend, e);
                report.status = DestinationStatus::Failed;
                report.error = Some(e);
            }
            None => report.status = DestinationStatus::Skipped,
        }
    }

    fn finish(mut self, key: &str, started: Instant, failure: Option<JobFailure>) -> JobOutcome {
        for report in &mut self.reports {
            if report.status == DestinationStatus::Pending {
                report.status = DestinationStatus::Skipped;
            }
        }
        let state = if failure.is_some() {
            JobState::Failed
        } else {
            JobState::Succeeded
        };
        self.history.push(state);

        JobOutcome {
            state,
            history: self.history,
            key: key.to_string(),
            dump_bytes: self.dump_bytes,
            stored_bytes: self.stored_bytes,
            destinations: self.reports,
            failure,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

pub struct BackupManager {
    compressors: CompressorRegistry,
    databases: DatabaseRegistry,
    storage: StorageRegistry,
    options: BackupOptions,
}

impl BackupManager {
    pub fn new(
        compressors: CompressorRegistry,
        databases: DatabaseRegistry,
        storage: StorageRegistry,
        options: BackupOptions,
    ) -> Self {
        Self {
            compressors,
            databases,
            storage,
            options,
        }
    }

    /// Build registries for the database and backends described by `settings`
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut databases = DatabaseRegistry::with_defaults();
        databases.add_connection(DEFAULT_CONNECTION, settings.connection.clone())?;

        let mut storage = StorageRegistry::new();
        storage.register(Arc::new(LocalBackend::new(&settings.local_root)))?;
        if let Some(ref azure) = settings.azure {
            let backend = AzureBlobBackend::new(azure.credentials.clone(), azure.container.clone())?
                .with_block_size(azure.block_size);
            storage.register(Arc::new(backend))?;
        }

        let options = BackupOptions {
            timeout: settings.timeout,
            require_all_destinations: settings.require_all_destinations,
            parallel_writes: settings.parallel_writes,
            spool_directory: settings.spool_directory.clone(),
        };

        Ok(Self::new(
            CompressorRegistry::with_defaults(),
            databases,
            storage,
            options,
        ))
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    /// Validate a request and derive its object keys.
    ///
    /// Every name is resolved here, so an unknown source, compressor or
    /// backend is reported before any stage runs.
    pub fn create_job(
        &self,
        source: &str,
        compressor: &str,
        destinations: &[DestinationConfig],
        timestamp: u64,
    ) -> Result<BackupJob, BackupError> {
        let (_, connection) = self.databases.resolve(source)?;
        let compressor = self
            .compressors
            .get(compressor)
            .map_err(|e| BackupError::Configuration(e.to_string()))?;

        if connection.database.trim().is_empty() {
            return Err(BackupError::Configuration(
                "Database name must not be empty".to_string(),
            ));
        }
        if destinations.is_empty() {
            return Err(BackupError::Configuration(
                "A backup job needs at least one destination".to_string(),
            ));
        }

        let key = compressor.compressed_key(&backup_key(&connection.database, timestamp));

        // Two writers on one (backend, key) pair would race on the same object
        let mut seen = HashSet::new();
        let destinations = destinations
            .iter()
            .map(|d| {
                if !self.storage.contains(&d.backend) {
                    return Err(BackupError::from(ConfigError::UnknownName {
                        kind: "storage backend",
                        name: d.backend.clone(),
                    }));
                }
                let destination =
                    Destination::new(d.backend.trim(), format!("{}{}", d.prefix, key));
                if !seen.insert((destination.backend.to_lowercase(), destination.key.clone())) {
                    return Err(BackupError::Configuration(format!(
                        "Destination {} is listed more than once",
                        destination
                    )));
                }
                Ok(destination)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BackupJob {
            source: source.to_string(),
            compressor: compressor.name().to_string(),
            key,
            timestamp,
            destinations,
        })
    }

    /// Job for the connection and destinations configured in `settings`
    pub fn job_from_settings(
        &self,
        settings: &Settings,
        timestamp: u64,
    ) -> Result<BackupJob, BackupError> {
        self.create_job(
            DEFAULT_CONNECTION,
            &settings.compressor,
            &settings.destinations,
            timestamp,
        )
    }

    /// Run one job to a terminal state
    pub fn run(&self, job: &BackupJob, cancel: &CancellationToken) -> JobOutcome {
        let started = Instant::now();
        info!(
            "Starting backup of '{}' as {} to {} destination(s)",
            job.source,
            job.key,
            job.destinations.len()
        );

        let mut run = JobRun::new(job, cancel);
        let result = self.execute(job, &mut run);
        let outcome = run.finish(&job.key, started, result.err());

        match outcome.failure {
            None => info!(
                "Backup '{}' completed in {:.2}s",
                job.key,
                started.elapsed().as_secs_f64()
            ),
            Some(ref failure) => error!(
                "Backup '{}' failed during {}: {}",
                job.key, failure.stage, failure.error
            ),
        }
        outcome
    }

    fn execute(&self, job: &BackupJob, run: &mut JobRun<'_>) -> Result<(), JobFailure> {
        let pending = |e: BackupError| JobFailure::new(Stage::Pending, None, e);

        let (source, connection) = self
            .databases
            .resolve(&job.source)
            .map_err(|e| pending(e.into()))?;
        let compressor = self
            .compressors
            .get(&job.compressor)
            .map_err(|e| pending(BackupError::Configuration(e.to_string())))?;
        let backends = job
            .destinations
            .iter()
            .map(|d| {
                self.storage.get(d.backend()).ok_or_else(|| {
                    pending(BackupError::from(ConfigError::UnknownName {
                        kind: "storage backend",
                        name: d.backend.clone(),
                    }))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let timeout = self.options.timeout;

        run.enter(JobState::Dumping)?;
        let stream = source.dump(connection, timeout).map_err(|e| {
            JobFailure::new(Stage::Dumping, None, BackupError::from_source(e, Stage::Dumping))
        })?;

        run.enter(JobState::Compressing)?;
        let (counted, dumped) = CountingReader::new(DeadlineReader::new(stream, timeout));
        let (recorded, fault) = FaultRecorder::new(counted);
        let mut compressed = compressor.compress(Box::new(recorded));

        let mut spool = Spool::create(self.options.spool_directory.as_deref()).map_err(|e| {
            JobFailure::new(Stage::Compressing, None, BackupError::Spool(e.to_string()))
        })?;
        let filled = spool.fill(&mut compressed);
        drop(compressed);
        run.dump_bytes = dumped.get();
        match filled {
            Ok(len) => run.stored_bytes = len,
            Err(FillError::Read(e)) => return Err(pipeline_failure(e, &fault)),
            Err(FillError::Write(e)) => {
                return Err(JobFailure::new(
                    Stage::Compressing,
                    None,
                    BackupError::Spool(e.to_string()),
                ))
            }
        }
        info!(
            "Compressed {} bytes of dump into {} bytes with {}",
            run.dump_bytes,
            run.stored_bytes,
            compressor.name()
        );

        if self.options.parallel_writes && job.destinations.len() > 1 {
            self.write_parallel(job, &backends, &spool, run)?;
        } else {
            self.write_sequential(job, &backends, &spool, run)?;
        }

        let failed: Vec<usize> = run
            .reports
            .iter()
            .filter(|r| r.status == DestinationStatus::Failed)
            .map(|r| r.index)
            .collect();
        if failed.is_empty() {
            return Ok(());
        }

        let written = run
            .reports
            .iter()
            .filter(|r| r.status == DestinationStatus::Written)
            .count();
        if self.options.require_all_destinations || written == 0 {
            let first = failed[0];
            let error = run.reports[first].error.clone().unwrap_or_else(|| {
                BackupError::StorageUnavailable {
                    backend: run.reports[first].backend.clone(),
                    message: "write failed".to_string(),
                }
            });
            warn!(
                "Backup failed for {} destination(s); {} written object(s) are kept",
                failed.len(),
                written
            );
            return Err(JobFailure::new(Stage::Writing, Some(first), error));
        }

        warn!(
            "Backup failed for {} of {} destination(s); partial success allowed",
            failed.len(),
            job.destinations.len()
        );
        Ok(())
    }

    fn write_sequential(
        &self,
        job: &BackupJob,
        backends: &[Arc<dyn StorageBackend>],
        spool: &Spool,
        run: &mut JobRun<'_>,
    ) -> Result<(), JobFailure> {
        for (index, (destination, backend)) in job.destinations.iter().zip(backends).enumerate() {
            run.enter(JobState::Writing(index))?;
            info!("Writing to destination {}: {}", index, destination);
            let result = self.write_one(destination, backend.as_ref(), spool);
            run.record(index, Some(result));
        }
        Ok(())
    }

    fn write_parallel(
        &self,
        job: &BackupJob,
        backends: &[Arc<dyn StorageBackend>],
        spool: &Spool,
        run: &mut JobRun<'_>,
    ) -> Result<(), JobFailure> {
        for index in 0..job.destinations.len() {
            run.enter(JobState::Writing(index))?;
        }
        info!("Writing to {} destinations in parallel", job.destinations.len());

        let cancel = run.cancel;
        let results: Vec<Option<Result<u64, BackupError>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = job
                .destinations
                .iter()
                .zip(backends)
                .map(|(destination, backend)| {
                    let handle = scope.spawn(move || {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(self.write_one(destination, backend.as_ref(), spool))
                    });
                    (destination, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(destination, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Some(Err(BackupError::StorageUnavailable {
                            backend: destination.backend.clone(),
                            message: "writer thread panicked".to_string(),
                        }))
                    })
                })
                .collect()
        });

        let mut cancelled_at = None;
        for (index, result) in results.into_iter().enumerate() {
            if result.is_none() && cancelled_at.is_none() {
                cancelled_at = Some(index);
            }
            run.record(index, result);
        }

        match cancelled_at {
            Some(index) => Err(JobFailure::new(
                Stage::Writing,
                Some(index),
                BackupError::Cancelled {
                    stage: Stage::Writing,
                },
            )),
            None => Ok(()),
        }
    }

    fn write_one(
        &self,
        destination: &Destination,
        backend: &dyn StorageBackend,
        spool: &Spool,
    ) -> Result<u64, BackupError> {
        let mut reader = spool
            .reader()
            .map_err(|e| BackupError::Spool(e.to_string()))?;
        backend
            .write(destination.key(), &mut reader, self.options.timeout)
            .map_err(|e| BackupError::from_storage(e, destination.backend(), Stage::Writing))
    }

    /// Resolve a stored object's backend and the compressor matching its key
    fn open_stored(
        &self,
        destination: &Destination,
    ) -> Result<(Arc<dyn StorageBackend>, Arc<dyn crate::compressors::Compressor>), BackupError>
    {
        let backend = self.storage.get(destination.backend()).ok_or_else(|| {
            BackupError::from(ConfigError::UnknownName {
                kind: "storage backend",
                name: destination.backend.clone(),
            })
        })?;
        let compressor = self.compressors.for_key(destination.key()).ok_or_else(|| {
            BackupError::Configuration(format!(
                "No compressor matches object key '{}'",
                destination.key()
            ))
        })?;
        Ok((backend, compressor))
    }

    /// Read an object back, decompress it and load it into `source`
    pub fn restore(
        &self,
        source: &str,
        destination: &Destination,
        cancel: &CancellationToken,
    ) -> Result<u64, BackupError> {
        let (database, connection) = self.databases.resolve(source)?;
        let (backend, compressor) = self.open_stored(destination)?;
        let timeout = self.options.timeout;

        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled {
                stage: Stage::Reading,
            });
        }
        info!("Restoring {} into '{}'", destination, connection.database);

        let stored = backend
            .read(destination.key(), timeout)
            .map_err(|e| BackupError::from_storage(e, destination.backend(), Stage::Reading))?;
        let (recorded, fault) = FaultRecorder::new(stored);
        let (counted, restored) = CountingReader::new(compressor.decompress(Box::new(recorded)));

        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled {
                stage: Stage::Restoring,
            });
        }

        database
            .restore(connection, Box::new(counted), timeout)
            .map_err(|e| match fault.take() {
                Some(read_error) => BackupError::from_storage(
                    StorageError::Stream(read_error),
                    destination.backend(),
                    Stage::Reading,
                ),
                None => match e {
                    SourceError::Io(ref io_error) if is_codec_error(io_error) => {
                        BackupError::Compression(io_error.to_string())
                    }
                    other => BackupError::from_source(other, Stage::Restoring),
                },
            })?;

        info!("Restored {} bytes from {}", restored.get(), destination);
        Ok(restored.get())
    }

    /// Read an object back and decompress it fully without storing it
    pub fn verify(
        &self,
        destination: &Destination,
        cancel: &CancellationToken,
    ) -> Result<VerifyReport, BackupError> {
        let (backend, compressor) = self.open_stored(destination)?;
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled {
                stage: Stage::Reading,
            });
        }

        let timeout = self.options.timeout;
        let stored = backend
            .read(destination.key(), timeout)
            .map_err(|e| BackupError::from_storage(e, destination.backend(), Stage::Reading))?;
        let (counted, stored_bytes) = CountingReader::new(DeadlineReader::new(stored, timeout));
        let (recorded, fault) = FaultRecorder::new(counted);
        let mut decompressed = compressor.decompress(Box::new(recorded));

        let decompressed_bytes = io::copy(&mut decompressed, &mut io::sink()).map_err(|e| {
            match fault.take() {
                Some(read_error) => BackupError::from_storage(
                    StorageError::Stream(read_error),
                    destination.backend(),
                    Stage::Reading,
                ),
                None if e.kind() == io::ErrorKind::TimedOut => BackupError::Timeout {
                    stage: Stage::Reading,
                },
                None => BackupError::Compression(e.to_string()),
            }
        })?;

        let report = VerifyReport {
            backend: destination.backend.clone(),
            key: destination.key.clone(),
            compressor: compressor.name().to_string(),
            stored_bytes: stored_bytes.get(),
            decompressed_bytes,
        };
        info!(
            "Verified {}: {} stored bytes, {} after decompression",
            destination, report.stored_bytes, report.decompressed_bytes
        );
        Ok(report)
    }
}

/// Attribute a failed read of the compressed stream to the dump or the codec
fn pipeline_failure(error: io::Error, fault: &FaultSlot) -> JobFailure {
    match fault.take() {
        Some(source_error) => JobFailure::new(
            Stage::Dumping,
            None,
            BackupError::from_source(SourceError::from_stream_error(source_error), Stage::Dumping),
        ),
        None if error.kind() == io::ErrorKind::TimedOut => JobFailure::new(
            Stage::Compressing,
            None,
            BackupError::Timeout {
                stage: Stage::Compressing,
            },
        ),
        None => JobFailure::new(
            Stage::Compressing,
            None,
            BackupError::Compression(error.to_string()),
        ),
    }
}

fn is_codec_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    )
}

//! Test context and outcome assertions

use db_backup::error::Stage;
use db_backup::managers::backup::{DestinationStatus, JobFailure, JobOutcome, JobState};
use db_backup::storage::LocalBackend;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Owns a temporary directory for one test
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Local backend rooted at `<temp>/<name>`
    pub fn local_backend(&self, name: &str) -> LocalBackend {
        LocalBackend::new(self.create_subdir(name))
    }

    /// Regular files below `<temp>/<name>`, excluding hidden partial files
    pub fn stored_files(&self, name: &str) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.temp_dir.path().join(name), &mut files);
        files.sort();
        files
    }
}

fn collect_files(dir: &Path, out: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if !entry.file_name().to_string_lossy().starts_with('.') {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Assertion helpers for job outcomes
pub trait OutcomeAssertions {
    /// Assert the job succeeded
    fn assert_succeeded(&self);

    /// Assert the job failed at `stage` and return the failure
    fn assert_failed_at(&self, stage: Stage, destination: Option<usize>) -> &JobFailure;

    /// Assert the status of one destination
    fn assert_destination(&self, index: usize, status: DestinationStatus);
}

impl OutcomeAssertions for JobOutcome {
    fn assert_succeeded(&self) {
        assert_eq!(
            self.state,
            JobState::Succeeded,
            "Expected success, got failure: {:?}",
            self.failure
        );
        assert_eq!(self.history.last(), Some(&JobState::Succeeded));
    }

    fn assert_failed_at(&self, stage: Stage, destination: Option<usize>) -> &JobFailure {
        assert_eq!(self.state, JobState::Failed, "Expected failure: {:?}", self);
        assert_eq!(self.history.last(), Some(&JobState::Failed));
        let failure = self.failure.as_ref().expect("failed outcome carries a failure");
        assert_eq!(failure.stage, stage, "Unexpected stage: {:?}", failure);
        assert_eq!(failure.destination, destination, "Unexpected destination: {:?}", failure);
        failure
    }

    fn assert_destination(&self, index: usize, status: DestinationStatus) {
        let report = self
            .destinations
            .get(index)
            .unwrap_or_else(|| panic!("No destination {} in {:?}", index, self.destinations));
        assert_eq!(report.status, status, "Destination {}: {:?}", index, report);
    }
}

//! Result files written under the results directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::analyze::AnalysisSummary;
use crate::execute::ExecutionSummary;
use crate::partition::write_atomic;
use crate::records::source::render_document;
use crate::records::ProfileRecord;
use crate::submit::SubmissionReport;

pub const UPDATED_PROFILES_DIR: &str = "updated_profiles";
pub const EXECUTION_RESULTS_FILE: &str = "execution_results.json";
pub const ANALYSIS_FILE: &str = "analysis.json";
pub const SUBMISSION_RESULTS_FILE: &str = "submission_results.json";

/// Errors that can occur while writing results.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Output path escapes the results directory.
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Writes results into a directory, or only logs them in dry-run mode.
#[derive(Debug, Clone)]
pub struct ResultSink {
    root_dir: PathBuf,
    dry_run: bool,
}

impl ResultSink {
    pub fn new(root_dir: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            root_dir: root_dir.into(),
            dry_run,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Write a profile document to `updated_profiles/<relative>`.
    pub fn write_profiles(&self, relative: &Path, profiles: &[ProfileRecord]) -> SinkResult<PathBuf> {
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(SinkError::InvalidPath(relative.to_path_buf()));
        }
        let path = self.root_dir.join(UPDATED_PROFILES_DIR).join(relative);
        let document = render_document(profiles)?;
        self.write(&path, document.as_bytes())?;
        Ok(path)
    }

    pub fn write_execution_results(&self, summary: &ExecutionSummary) -> SinkResult<PathBuf> {
        self.write_json(EXECUTION_RESULTS_FILE, summary)
    }

    pub fn write_analysis(&self, summary: &AnalysisSummary) -> SinkResult<PathBuf> {
        self.write_json(ANALYSIS_FILE, summary)
    }

    pub fn write_submission_results(&self, report: &SubmissionReport) -> SinkResult<PathBuf> {
        self.write_json(SUBMISSION_RESULTS_FILE, report)
    }

    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> SinkResult<PathBuf> {
        let path = self.root_dir.join(file_name);
        let json = serde_json::to_string_pretty(value)?;
        self.write(&path, json.as_bytes())?;
        Ok(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> SinkResult<()> {
        if self.dry_run {
            tracing::info!(path = %path.display(), bytes = bytes.len(), "dry run: would write");
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, bytes)?;
        tracing::info!(path = %path.display(), "wrote results");
        Ok(())
    }
}

//! Batch payload files.
//!
//! A batch is stored as `{group}_session{S}_batch{B}_input.jsonl` in the
//! results directory, one chat-completion request per line.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::BatchDescriptor;
use crate::budget::TokenCounter;
use crate::records::prompt::render_batch_jsonl;
use crate::records::ProfileRecord;

const INPUT_SUFFIX: &str = "_input.jsonl";

/// Errors raised while writing or loading batch files.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A rendered batch, ready to be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBatch {
    pub file_name: String,
    pub group_key: String,
    pub session_number: u32,
    pub batch_number: u32,
    /// Tokens this batch is expected to occupy in the provider queue
    pub token_count: u64,
    pub record_count: usize,
    /// JSONL payload
    pub content: String,
    /// Where the payload is stored, once written
    pub path: Option<PathBuf>,
}

/// File name for a batch payload.
pub fn batch_file_name(group_key: &str, session_number: u32, batch_number: u32) -> String {
    format!("{group_key}_session{session_number}_batch{batch_number}{INPUT_SUFFIX}")
}

fn file_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?P<group>.+)_session(?P<session>\d+)_batch(?P<batch>\d+)_input\.jsonl$").ok())
        .as_ref()
}

/// Split a batch file name into `(group, session, batch)`.
pub fn parse_batch_file_name(file_name: &str) -> Option<(String, u32, u32)> {
    let caps = file_name_pattern()?.captures(file_name)?;
    let session = caps.name("session")?.as_str().parse().ok()?;
    let batch = caps.name("batch")?.as_str().parse().ok()?;
    Some((caps.name("group")?.as_str().to_string(), session, batch))
}

/// Render a planned batch of profiles.
///
/// The token count carried forward is the partitioner's estimate.
pub fn prepare(
    descriptor: &BatchDescriptor<ProfileRecord>,
    model: &str,
    max_tokens: u32,
) -> Result<PreparedBatch, WriterError> {
    let content = render_batch_jsonl(descriptor.records(), model, max_tokens)?;
    Ok(PreparedBatch {
        file_name: descriptor.file_name(),
        group_key: descriptor.group_key().to_string(),
        session_number: descriptor.session_number(),
        batch_number: descriptor.batch_number(),
        token_count: descriptor.token_count(),
        record_count: descriptor.len(),
        content,
        path: descriptor.payload_path().map(Path::to_path_buf),
    })
}

/// Render and store every batch in `dir`; with `dry_run` nothing is written.
pub fn write_batches(
    dir: &Path,
    descriptors: Vec<BatchDescriptor<ProfileRecord>>,
    model: &str,
    max_tokens: u32,
    dry_run: bool,
) -> Result<Vec<(BatchDescriptor<ProfileRecord>, PreparedBatch)>, WriterError> {
    if !dry_run {
        fs::create_dir_all(dir)?;
    }

    let mut written = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let path = dir.join(descriptor.file_name());
        let descriptor = descriptor.with_payload_path(&path);
        let prepared = prepare(&descriptor, model, max_tokens)?;

        if dry_run {
            tracing::info!(path = %path.display(), records = prepared.record_count, "dry run: would write batch file");
        } else {
            write_atomic(&path, prepared.content.as_bytes())?;
            tracing::debug!(path = %path.display(), tokens = prepared.token_count, "wrote batch file");
        }
        written.push((descriptor, prepared));
    }
    Ok(written)
}

/// Load every batch file in `dir`, ordered by session, group, then batch.
///
/// Token counts are recomputed from the stored payload with `counter`. Files
/// that end in `_input.jsonl` but do not follow the naming scheme sort first,
/// as session 0.
pub fn load_batches(dir: &Path, counter: &dyn TokenCounter) -> Result<Vec<PreparedBatch>, WriterError> {
    let mut batches = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.ends_with(INPUT_SUFFIX) {
            continue;
        }

        let (group_key, session_number, batch_number) = parse_batch_file_name(&file_name)
            .unwrap_or_else(|| (file_name.trim_end_matches(INPUT_SUFFIX).to_string(), 0, 0));
        let content = fs::read_to_string(entry.path())?;
        let record_count = content.lines().filter(|l| !l.trim().is_empty()).count();

        batches.push(PreparedBatch {
            token_count: counter.count(&content),
            file_name,
            group_key,
            session_number,
            batch_number,
            record_count,
            content,
            path: Some(entry.path()),
        });
    }

    batches.sort_by(|a, b| {
        (a.session_number, &a.group_key, a.batch_number, &a.file_name).cmp(&(
            b.session_number,
            &b.group_key,
            b.batch_number,
            &b.file_name,
        ))
    });
    Ok(batches)
}

/// Write via a temp file and rename so readers never see a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{file_name}.tmp"));

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

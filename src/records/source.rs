//! Profile discovery from markdown documents with YAML frontmatter.
//!
//! Each document carries a `profiles:` list in its frontmatter. The group key
//! of a document is the first directory below the profiles root (the
//! platform, e.g. `instagram`); documents directly in the root belong to
//! [`DEFAULT_GROUP`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde_yaml::Value as YamlValue;
use thiserror::Error;

use super::profile::ProfileRecord;

/// Group key for documents that sit directly in the profiles root.
pub const DEFAULT_GROUP: &str = "default";

/// Name of the per-directory index documents used for planning.
pub const INDEX_FILE_NAME: &str = "_index.md";

const FRONTMATTER_FENCE: &str = "---";

/// Errors that abort a scan.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("profiles directory not found: {0}")]
    MissingRoot(PathBuf),

    #[error("document path must be relative to the profiles directory: {0}")]
    OutsideRoot(PathBuf),

    #[error("invalid discovery pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Which documents a scan picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Only `_index.md` files
    IndexFiles,
    /// Every `.md` file
    AllMarkdown,
}

/// Profiles read from one document.
#[derive(Debug, Clone)]
pub struct ProfileDocument {
    /// Path relative to the profiles root
    pub relative_path: PathBuf,
    pub group_key: String,
    pub profiles: Vec<ProfileRecord>,
}

/// A document or record that could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub path: PathBuf,
    /// Position in the `profiles` list, `None` when the whole document failed
    pub index: Option<usize>,
    pub reason: String,
}

/// Result of scanning a profiles tree.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub documents: Vec<ProfileDocument>,
    pub skipped: Vec<SkippedRecord>,
}

impl ScanOutcome {
    pub fn profile_count(&self) -> usize {
        self.documents.iter().map(|d| d.profiles.len()).sum()
    }

    /// Profiles grouped by group key, in key order, document order preserved
    /// within each group.
    pub fn into_groups(self) -> Vec<(String, Vec<ProfileRecord>)> {
        let mut groups: BTreeMap<String, Vec<ProfileRecord>> = BTreeMap::new();
        for doc in self.documents {
            groups.entry(doc.group_key).or_default().extend(doc.profiles);
        }
        groups.into_iter().collect()
    }
}

/// Scan `root` recursively for profile documents.
pub fn scan(root: &Path, discovery: Discovery) -> Result<ScanOutcome, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::MissingRoot(root.to_path_buf()));
    }

    let file_pattern = match discovery {
        Discovery::IndexFiles => INDEX_FILE_NAME,
        Discovery::AllMarkdown => "*.md",
    };
    let pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        file_pattern
    );

    let mut outcome = ScanOutcome::default();
    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(path = %err.path().display(), "skipping unreadable path");
                outcome.skipped.push(SkippedRecord {
                    path: err.path().to_path_buf(),
                    index: None,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        read_document(root, &path, &mut outcome)?;
    }

    tracing::info!(
        root = %root.display(),
        documents = outcome.documents.len(),
        profiles = outcome.profile_count(),
        skipped = outcome.skipped.len(),
        "scanned profiles"
    );
    Ok(outcome)
}

/// Scan a single document relative to `root`.
pub fn scan_file(root: &Path, relative: &Path) -> Result<ScanOutcome, SourceError> {
    if relative.is_absolute() || relative.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(SourceError::OutsideRoot(relative.to_path_buf()));
    }
    let path = root.join(relative);
    if !path.is_file() {
        return Err(SourceError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("profile document not found: {}", path.display()),
        )));
    }
    let mut outcome = ScanOutcome::default();
    read_document(root, &path, &mut outcome)?;
    Ok(outcome)
}

fn read_document(root: &Path, path: &Path, outcome: &mut ScanOutcome) -> Result<(), SourceError> {
    let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    let group_key = group_key_for(&relative_path);

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            skip(outcome, path, None, format!("not UTF-8: {err}"));
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let entries = match parse_document(&text) {
        Ok(entries) => entries,
        Err(reason) => {
            skip(outcome, path, None, reason);
            return Ok(());
        }
    };

    let mut profiles = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match entry {
            Ok(profile) => profiles.push(profile),
            Err(reason) => skip(outcome, path, Some(index), reason),
        }
    }

    outcome.documents.push(ProfileDocument {
        relative_path,
        group_key,
        profiles,
    });
    Ok(())
}

fn skip(outcome: &mut ScanOutcome, path: &Path, index: Option<usize>, reason: String) {
    tracing::warn!(path = %path.display(), ?index, %reason, "skipping malformed profile data");
    outcome.skipped.push(SkippedRecord {
        path: path.to_path_buf(),
        index,
        reason,
    });
}

fn group_key_for(relative: &Path) -> String {
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(first), Some(_)) => first.as_os_str().to_string_lossy().into_owned(),
        _ => DEFAULT_GROUP.to_string(),
    }
}

/// Return the frontmatter block of a markdown document, if it has one.
pub fn split_frontmatter(text: &str) -> Option<&str> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix(FRONTMATTER_FENCE)?
        .strip_prefix("\r\n")
        .or_else(|| text.strip_prefix(FRONTMATTER_FENCE)?.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FRONTMATTER_FENCE {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

/// Parse the `profiles` list of a document.
///
/// The outer error means the document as a whole is unusable; inner errors
/// are per-record.
pub fn parse_document(text: &str) -> Result<Vec<Result<ProfileRecord, String>>, String> {
    let frontmatter = split_frontmatter(text).ok_or_else(|| "missing frontmatter".to_string())?;
    let data: YamlValue =
        serde_yaml::from_str(frontmatter).map_err(|e| format!("invalid frontmatter: {e}"))?;

    let profiles = match data.get("profiles") {
        Some(YamlValue::Sequence(items)) => items,
        Some(_) => return Err("`profiles` is not a list".to_string()),
        None => return Ok(Vec::new()),
    };

    Ok(profiles
        .iter()
        .map(|item| serde_yaml::from_value::<ProfileRecord>(item.clone()).map_err(|e| e.to_string()))
        .collect())
}

/// Render a profiles list as a frontmatter-only markdown document.
pub fn render_document(profiles: &[ProfileRecord]) -> Result<String, serde_yaml::Error> {
    #[derive(serde::Serialize)]
    struct Frontmatter<'a> {
        profiles: &'a [ProfileRecord],
    }

    let yaml = serde_yaml::to_string(&Frontmatter { profiles })?;
    Ok(format!("{FRONTMATTER_FENCE}\n{yaml}{FRONTMATTER_FENCE}\n"))
}

//! Profile records: discovery, frontmatter parsing and request rendering.

mod profile;
pub mod prompt;
pub mod source;

pub use profile::ProfileRecord;
pub use source::{
    scan, scan_file, Discovery, ProfileDocument, ScanOutcome, SkippedRecord, SourceError,
    DEFAULT_GROUP, INDEX_FILE_NAME,
};

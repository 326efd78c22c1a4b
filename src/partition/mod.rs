//! Batch partitioning.
//!
//! Records of each group are cut, in input order, into batches bounded by a
//! per-batch token budget, and batches are numbered into sessions bounded by a
//! session budget. Groups are partitioned independently, each with counters
//! starting at 1.
//!
//! ```
//! use batchpilot::partition::{BatchPartitioner, PartitionConfig};
//!
//! let partitioner = BatchPartitioner::new(PartitionConfig::new(1_000)).unwrap();
//! let batches = partitioner.partition("tiktok", vec![400u64, 400, 400], |t| *t).unwrap();
//!
//! assert_eq!(batches.len(), 2);
//! assert_eq!(batches[1].session_number(), 2);
//! assert_eq!(batches[1].token_count(), 400);
//! ```

mod report;
mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use report::{GroupReport, PartitionReport, SessionReport};
pub(crate) use writer::write_atomic;
pub use writer::{batch_file_name, load_batches, parse_batch_file_name, prepare, write_batches, PreparedBatch, WriterError};

/// Errors raised while partitioning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("invalid budget: {0}")]
    InvalidBudget(String),

    #[error("record {position} of group `{group_key}` needs {tokens} tokens, over the {budget}-token batch budget")]
    RecordExceedsBudget {
        group_key: String,
        position: usize,
        tokens: u64,
        budget: u64,
    },
}

/// What to do with a record that alone exceeds the batch budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Place it in a batch of its own, over budget
    #[default]
    Admit,
    /// Fail the partition
    Reject,
}

/// Budgets for partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Tokens allowed across all batches of one session
    pub session_budget: u64,
    /// Tokens allowed in a single batch; defaults to the session budget
    #[serde(default)]
    pub batch_budget: Option<u64>,
    #[serde(default)]
    pub oversize: OversizePolicy,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self::new(2_000_000)
    }
}

impl PartitionConfig {
    pub fn new(session_budget: u64) -> Self {
        Self {
            session_budget,
            batch_budget: None,
            oversize: OversizePolicy::Admit,
        }
    }

    pub fn with_batch_budget(mut self, tokens: u64) -> Self {
        self.batch_budget = Some(tokens);
        self
    }

    pub fn with_oversize(mut self, policy: OversizePolicy) -> Self {
        self.oversize = policy;
        self
    }

    pub fn effective_batch_budget(&self) -> u64 {
        self.batch_budget.unwrap_or(self.session_budget)
    }

    pub fn validate(&self) -> Result<(), PartitionError> {
        if self.session_budget == 0 {
            return Err(PartitionError::InvalidBudget("session budget must be positive".into()));
        }
        match self.batch_budget {
            Some(0) => Err(PartitionError::InvalidBudget("batch budget must be positive".into())),
            Some(batch) if batch > self.session_budget => Err(PartitionError::InvalidBudget(format!(
                "batch budget {batch} exceeds session budget {}",
                self.session_budget
            ))),
            _ => Ok(()),
        }
    }
}

/// One batch of records, as planned by the partitioner.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDescriptor<R> {
    group_key: String,
    session_number: u32,
    batch_number: u32,
    records: Vec<R>,
    token_count: u64,
    payload_path: Option<PathBuf>,
}

impl<R> BatchDescriptor<R> {
    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn session_number(&self) -> u32 {
        self.session_number
    }

    pub fn batch_number(&self) -> u32 {
        self.batch_number
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of the record estimates in this batch.
    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    pub fn payload_path(&self) -> Option<&Path> {
        self.payload_path.as_deref()
    }

    /// File name the serialized payload is stored under.
    pub fn file_name(&self) -> String {
        batch_file_name(&self.group_key, self.session_number, self.batch_number)
    }

    /// The same batch, pointing at its serialized payload.
    pub fn with_payload_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            payload_path: Some(path.into()),
            ..self
        }
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

/// Running state while partitioning one group.
struct GroupState<R> {
    group_key: String,
    session_number: u32,
    batch_number: u32,
    session_total: u64,
    batch_total: u64,
    records: Vec<R>,
    batches: Vec<BatchDescriptor<R>>,
}

impl<R> GroupState<R> {
    fn new(group_key: &str) -> Self {
        Self {
            group_key: group_key.to_string(),
            session_number: 1,
            batch_number: 1,
            session_total: 0,
            batch_total: 0,
            records: Vec::new(),
            batches: Vec::new(),
        }
    }

    fn flush(&mut self) {
        if self.records.is_empty() {
            return;
        }
        self.batches.push(BatchDescriptor {
            group_key: self.group_key.clone(),
            session_number: self.session_number,
            batch_number: self.batch_number,
            records: std::mem::take(&mut self.records),
            token_count: self.batch_total,
            payload_path: None,
        });
        self.session_total += self.batch_total;
        self.batch_total = 0;
        self.batch_number += 1;
    }

    fn start_session(&mut self) {
        self.session_number += 1;
        self.session_total = 0;
        self.batch_number = 1;
    }
}

/// Splits record sequences into budgeted batches and sessions.
#[derive(Debug, Clone)]
pub struct BatchPartitioner {
    config: PartitionConfig,
}

impl BatchPartitioner {
    pub fn new(config: PartitionConfig) -> Result<Self, PartitionError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Partition the records of a single group.
    pub fn partition<R, F>(
        &self,
        group_key: &str,
        records: impl IntoIterator<Item = R>,
        mut estimate: F,
    ) -> Result<Vec<BatchDescriptor<R>>, PartitionError>
    where
        F: FnMut(&R) -> u64,
    {
        let session_budget = self.config.session_budget;
        let batch_budget = self.config.effective_batch_budget();
        let mut state = GroupState::new(group_key);

        for (position, record) in records.into_iter().enumerate() {
            let tokens = estimate(&record);

            if tokens > batch_budget {
                match self.config.oversize {
                    OversizePolicy::Reject => {
                        return Err(PartitionError::RecordExceedsBudget {
                            group_key: group_key.to_string(),
                            position,
                            tokens,
                            budget: batch_budget,
                        });
                    }
                    OversizePolicy::Admit => {
                        tracing::warn!(
                            group_key,
                            position,
                            tokens,
                            budget = batch_budget,
                            "record exceeds batch budget; placing it in its own batch"
                        );
                    }
                }
            }

            let over_session = state.session_total + state.batch_total + tokens > session_budget;
            let over_batch = state.batch_total + tokens > batch_budget;
            if over_session || over_batch {
                state.flush();
                if state.session_total > 0 && state.session_total + tokens > session_budget {
                    state.start_session();
                }
            }

            state.records.push(record);
            state.batch_total += tokens;
        }
        state.flush();

        tracing::debug!(
            group_key,
            batches = state.batches.len(),
            sessions = state.batches.last().map(|b| b.session_number).unwrap_or(0),
            "partitioned group"
        );
        Ok(state.batches)
    }

    /// Partition several groups, each with independent counters, keeping
    /// group order.
    pub fn partition_groups<R, F>(
        &self,
        groups: impl IntoIterator<Item = (String, Vec<R>)>,
        mut estimate: F,
    ) -> Result<Vec<BatchDescriptor<R>>, PartitionError>
    where
        F: FnMut(&R) -> u64,
    {
        let mut batches = Vec::new();
        for (group_key, records) in groups {
            batches.extend(self.partition(&group_key, records, &mut estimate)?);
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitioner(session: u64) -> BatchPartitioner {
        BatchPartitioner::new(PartitionConfig::new(session)).unwrap()
    }

    /// Records are (id, tokens) pairs.
    fn records(tokens: &[u64]) -> Vec<(usize, u64)> {
        tokens.iter().copied().enumerate().collect()
    }

    fn concat(batches: &[BatchDescriptor<(usize, u64)>]) -> Vec<(usize, u64)> {
        batches.iter().flat_map(|b| b.records().iter().copied()).collect()
    }

    #[test]
    fn test_empty_input() {
        let batches = partitioner(100).partition("g", Vec::<(usize, u64)>::new(), |r| r.1).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_everything_fits_one_batch() {
        let input = records(&[10, 20, 30]);
        let batches = partitioner(100).partition("g", input.clone(), |r| r.1).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].session_number(), 1);
        assert_eq!(batches[0].batch_number(), 1);
        assert_eq!(batches[0].token_count(), 60);
        assert_eq!(concat(&batches), input);
    }

    #[test]
    fn test_concatenation_preserves_order() {
        let input = records(&[30, 50, 10, 70, 5, 5, 90, 40, 40, 40, 1]);
        let batches = partitioner(100).partition("g", input.clone(), |r| r.1).unwrap();
        assert_eq!(concat(&batches), input);
    }

    #[test]
    fn test_token_count_matches_records_and_budget() {
        let input = records(&[30, 50, 10, 70, 5, 5, 90, 40, 40, 40, 1]);
        let batches = partitioner(100).partition("g", input, |r| r.1).unwrap();
        for batch in &batches {
            let sum: u64 = batch.records().iter().map(|r| r.1).sum();
            assert_eq!(sum, batch.token_count());
            assert!(batch.token_count() <= 100);
        }
    }

    #[test]
    fn test_single_tier_opens_session_per_batch() {
        let batches = partitioner(100).partition("g", records(&[60, 60, 60]), |r| r.1).unwrap();
        let numbering: Vec<(u32, u32)> = batches
            .iter()
            .map(|b| (b.session_number(), b.batch_number()))
            .collect();
        assert_eq!(numbering, vec![(1, 1), (2, 1), (3, 1)]);
    }

    #[test]
    fn test_two_tier_batches_within_session() {
        let config = PartitionConfig::new(100).with_batch_budget(40);
        let partitioner = BatchPartitioner::new(config).unwrap();
        let batches = partitioner
            .partition("g", records(&[20, 20, 20, 20, 20, 20, 20]), |r| r.1)
            .unwrap();
        let numbering: Vec<(u32, u32, u64)> = batches
            .iter()
            .map(|b| (b.session_number(), b.batch_number(), b.token_count()))
            .collect();
        // session 1 closes at exactly 100 tokens
        assert_eq!(
            numbering,
            vec![(1, 1, 40), (1, 2, 40), (1, 3, 20), (2, 1, 40)]
        );
    }

    #[test]
    fn test_numbering_monotonic_from_one() {
        let config = PartitionConfig::new(50).with_batch_budget(20);
        let partitioner = BatchPartitioner::new(config).unwrap();
        let input = records(&[7, 13, 5, 19, 2, 8, 11, 3, 17, 9, 4, 6, 15]);
        let batches = partitioner.partition("g", input, |r| r.1).unwrap();

        assert_eq!(batches[0].session_number(), 1);
        assert_eq!(batches[0].batch_number(), 1);
        for pair in batches.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.session_number() == b.session_number() {
                assert_eq!(b.batch_number(), a.batch_number() + 1);
            } else {
                assert_eq!(b.session_number(), a.session_number() + 1);
                assert_eq!(b.batch_number(), 1);
            }
        }
    }

    #[test]
    fn test_sessions_respect_session_budget() {
        let config = PartitionConfig::new(50).with_batch_budget(20);
        let partitioner = BatchPartitioner::new(config).unwrap();
        let input = records(&[7, 13, 5, 19, 2, 8, 11, 3, 17, 9, 4, 6, 15]);
        let batches = partitioner.partition("g", input, |r| r.1).unwrap();

        let last_session = batches.last().unwrap().session_number();
        for session in 1..=last_session {
            let total: u64 = batches
                .iter()
                .filter(|b| b.session_number() == session)
                .map(|b| b.token_count())
                .sum();
            assert!(total <= 50, "session {session} holds {total}");
        }
    }

    #[test]
    fn test_oversized_record_admitted_alone() {
        let batches = partitioner(100).partition("g", records(&[30, 250, 30]), |r| r.1).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1].token_count(), 250);
        assert_eq!(batches[2].token_count(), 30);
    }

    #[test]
    fn test_oversized_first_record_starts_in_session_one() {
        let batches = partitioner(100).partition("g", records(&[250, 10]), |r| r.1).unwrap();
        assert_eq!(batches[0].session_number(), 1);
        assert_eq!(batches[0].batch_number(), 1);
        assert_eq!(batches[1].session_number(), 2);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let config = PartitionConfig::new(100).with_oversize(OversizePolicy::Reject);
        let partitioner = BatchPartitioner::new(config).unwrap();
        let err = partitioner.partition("g", records(&[10, 101]), |r| r.1).unwrap_err();
        assert_eq!(
            err,
            PartitionError::RecordExceedsBudget {
                group_key: "g".into(),
                position: 1,
                tokens: 101,
                budget: 100,
            }
        );
    }

    #[test]
    fn test_invalid_budgets() {
        assert!(BatchPartitioner::new(PartitionConfig::new(0)).is_err());
        assert!(BatchPartitioner::new(PartitionConfig::new(10).with_batch_budget(0)).is_err());
        assert!(BatchPartitioner::new(PartitionConfig::new(10).with_batch_budget(11)).is_err());
    }

    #[test]
    fn test_groups_have_independent_counters() {
        let groups = vec![
            ("instagram".to_string(), records(&[60, 60])),
            ("tiktok".to_string(), records(&[60])),
        ];
        let batches = partitioner(100).partition_groups(groups, |r| r.1).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].group_key(), "instagram");
        assert_eq!(batches[1].session_number(), 2);
        assert_eq!(batches[2].group_key(), "tiktok");
        assert_eq!(batches[2].session_number(), 1);
        assert_eq!(batches[2].batch_number(), 1);
    }

    #[test]
    fn test_2500_profiles_fit_one_session() {
        let input: Vec<u32> = (0..2_500).collect();
        let batches = partitioner(2_000_000).partition("instagram", input.clone(), |_| 300).unwrap();

        let expected_batches = (2_500u64 * 300).div_ceil(2_000_000);
        assert_eq!(batches.len() as u64, expected_batches);
        assert!(batches.iter().all(|b| b.session_number() == 1));
        let last = batches.last().unwrap();
        assert_eq!(last.len(), 2_500);
        assert_eq!(last.token_count(), 750_000);
    }

    #[test]
    fn test_remainder_lands_in_last_batch() {
        let config = PartitionConfig::new(2_000_000).with_batch_budget(100_000);
        let partitioner = BatchPartitioner::new(config).unwrap();
        let input: Vec<u32> = (0..2_500).collect();
        let batches = partitioner.partition("instagram", input, |_| 300).unwrap();

        // 333 records (99,900 tokens) per full batch
        assert_eq!(batches.len() as u64, (2_500u64 * 300).div_ceil(99_900));
        assert_eq!(batches.last().unwrap().len(), 2_500 % 333);
        assert!(batches.iter().all(|b| b.session_number() == 1));
    }

    #[test]
    fn test_file_name_and_payload_path() {
        let batches = partitioner(100).partition("tiktok", records(&[1]), |r| r.1).unwrap();
        let batch = batches.into_iter().next().unwrap();
        assert_eq!(batch.file_name(), "tiktok_session1_batch1_input.jsonl");
        let batch = batch.with_payload_path("/tmp/x.jsonl");
        assert_eq!(batch.payload_path(), Some(Path::new("/tmp/x.jsonl")));
    }
}

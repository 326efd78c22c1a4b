//! Per-group and per-session breakdown of a partition.

use std::collections::BTreeMap;

use serde::Serialize;

use super::BatchDescriptor;
use crate::budget::{format_usd, TokenPrices};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub session_number: u32,
    /// (batch number, records, tokens)
    pub batches: Vec<(u32, usize, u64)>,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub group_key: String,
    pub records: usize,
    pub batches: usize,
    pub tokens: u64,
    pub sessions: Vec<SessionReport>,
}

/// Summary of a partition, for display before anything is submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub groups: Vec<GroupReport>,
}

impl PartitionReport {
    pub fn from_batches<R>(batches: &[BatchDescriptor<R>]) -> Self {
        let mut groups: Vec<GroupReport> = Vec::new();
        for batch in batches {
            let group = match groups.iter_mut().position(|g| g.group_key == batch.group_key()) {
                Some(index) => &mut groups[index],
                None => {
                    groups.push(GroupReport {
                        group_key: batch.group_key().to_string(),
                        records: 0,
                        batches: 0,
                        tokens: 0,
                        sessions: Vec::new(),
                    });
                    let last = groups.len() - 1;
                    &mut groups[last]
                }
            };

            group.records += batch.len();
            group.batches += 1;
            group.tokens += batch.token_count();

            let entry = (batch.batch_number(), batch.len(), batch.token_count());
            match group.sessions.last_mut() {
                Some(session) if session.session_number == batch.session_number() => {
                    session.batches.push(entry);
                    session.tokens += batch.token_count();
                }
                _ => group.sessions.push(SessionReport {
                    session_number: batch.session_number(),
                    batches: vec![entry],
                    tokens: batch.token_count(),
                }),
            }
        }
        Self { groups }
    }

    pub fn total_records(&self) -> usize {
        self.groups.iter().map(|g| g.records).sum()
    }

    pub fn total_batches(&self) -> usize {
        self.groups.iter().map(|g| g.batches).sum()
    }

    pub fn total_sessions(&self) -> usize {
        self.groups.iter().map(|g| g.sessions.len()).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.groups.iter().map(|g| g.tokens).sum()
    }

    /// Sessions per group, keyed by group.
    pub fn sessions_by_group(&self) -> BTreeMap<&str, usize> {
        self.groups
            .iter()
            .map(|g| (g.group_key.as_str(), g.sessions.len()))
            .collect()
    }

    /// Format as a human-readable string. Cost treats every token as input.
    pub fn format(&self, prices: &TokenPrices) -> String {
        let mut output = String::from("## Batch Plan\n");
        for group in &self.groups {
            output.push_str(&format!(
                "\n### {}\n  Records: {}\n  Batches: {}\n  Sessions: {}\n  Tokens: {}\n",
                group.group_key,
                group.records,
                group.batches,
                group.sessions.len(),
                group.tokens
            ));
            for session in &group.sessions {
                output.push_str(&format!(
                    "    Session {}: {} batches, {} tokens\n",
                    session.session_number,
                    session.batches.len(),
                    session.tokens
                ));
                for (batch_number, records, tokens) in &session.batches {
                    output.push_str(&format!(
                        "      Batch {batch_number}: {records} records, {tokens} tokens\n"
                    ));
                }
            }
        }

        output.push_str(&format!(
            "\n**Total**: {} records, {} batches, {} sessions, {} tokens\n",
            self.total_records(),
            self.total_batches(),
            self.total_sessions(),
            self.total_tokens()
        ));
        output.push_str(&format!(
            "**Estimated input cost**: {}\n",
            format_usd(prices.cost(self.total_tokens(), 0))
        ));
        output
    }
}

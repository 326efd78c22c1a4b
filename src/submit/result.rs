//! Submission outcomes.

use serde::{Deserialize, Serialize};

use crate::partition::PreparedBatch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Submitted {
        #[serde(rename = "batchId")]
        batch_id: String,
    },
    Failed {
        reason: String,
    },
}

/// What happened to one prepared batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub file_name: String,
    pub group_key: String,
    pub session_number: u32,
    pub batch_number: u32,
    pub token_count: u64,
    #[serde(flatten)]
    pub outcome: SubmissionOutcome,
}

impl SubmissionResult {
    pub fn submitted(batch: &PreparedBatch, batch_id: impl Into<String>) -> Self {
        Self::for_batch(batch, SubmissionOutcome::Submitted { batch_id: batch_id.into() })
    }

    pub fn failed(batch: &PreparedBatch, reason: impl Into<String>) -> Self {
        Self::for_batch(batch, SubmissionOutcome::Failed { reason: reason.into() })
    }

    fn for_batch(batch: &PreparedBatch, outcome: SubmissionOutcome) -> Self {
        Self {
            file_name: batch.file_name.clone(),
            group_key: batch.group_key.clone(),
            session_number: batch.session_number,
            batch_number: batch.batch_number,
            token_count: batch.token_count,
            outcome,
        }
    }

    pub fn batch_id(&self) -> Option<&str> {
        match &self.outcome {
            SubmissionOutcome::Submitted { batch_id } => Some(batch_id),
            SubmissionOutcome::Failed { .. } => None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.batch_id().is_some()
    }
}

/// Results of a submission run, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    pub results: Vec<SubmissionResult>,
    /// Why the run ended before every batch was attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_early: Option<String>,
}

impl SubmissionReport {
    pub fn submitted_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_submitted()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.submitted_count()
    }

    pub fn submitted_tokens(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.is_submitted())
            .map(|r| r.token_count)
            .sum()
    }

    pub fn format(&self) -> String {
        let mut output = String::from("## Batch Submission Results\n\n");
        for result in &self.results {
            match &result.outcome {
                SubmissionOutcome::Submitted { batch_id } => {
                    output.push_str(&format!("- {}: submitted (batch {batch_id})\n", result.file_name));
                }
                SubmissionOutcome::Failed { reason } => {
                    output.push_str(&format!("- {}: FAILED - {reason}\n", result.file_name));
                }
            }
        }
        output.push_str(&format!(
            "\n**Submitted**: {} ({} tokens)\n**Failed**: {}\n",
            self.submitted_count(),
            self.submitted_tokens(),
            self.failed_count()
        ));
        if let Some(reason) = &self.stopped_early {
            output.push_str(&format!("**Stopped early**: {reason}\n"));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(name: &str, tokens: u64) -> PreparedBatch {
        PreparedBatch {
            file_name: name.to_string(),
            group_key: "tiktok".to_string(),
            session_number: 1,
            batch_number: 1,
            token_count: tokens,
            record_count: 1,
            content: String::new(),
            path: None,
        }
    }

    #[test]
    fn test_report_counts() {
        let report = SubmissionReport {
            results: vec![
                SubmissionResult::submitted(&batch("a", 100), "batch_1"),
                SubmissionResult::failed(&batch("b", 50), "upload rejected"),
                SubmissionResult::submitted(&batch("c", 25), "batch_2"),
            ],
            stopped_early: None,
        };
        assert_eq!(report.submitted_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.submitted_tokens(), 125);
        assert!(report.format().contains("- b: FAILED - upload rejected"));
    }

    #[test]
    fn test_result_json_shape() {
        let json = serde_json::to_value(SubmissionResult::submitted(&batch("a", 100), "batch_1")).unwrap();
        assert_eq!(json["fileName"], "a");
        assert_eq!(json["status"], "submitted");
        assert_eq!(json["batchId"], "batch_1");

        let json = serde_json::to_value(SubmissionResult::failed(&batch("a", 100), "boom")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");
    }
}

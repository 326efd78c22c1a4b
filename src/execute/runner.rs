use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Completion, CompletionBackend, CompletionRequest, ExecuteError};
use crate::budget::{format_usd, TokenCounter, TokenPrices, UsageSummary, UsageTracker};
use crate::limiter::{Admission, UsageWindow};
use crate::records::prompt::description_messages;
use crate::records::{scan, scan_file, Discovery, ProfileDocument, ProfileRecord, ScanOutcome, SourceError};
use crate::sink::ResultSink;

/// Request parameters for direct execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub model: String,
    pub max_completion_tokens: u32,
}

/// Result for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileOutcome {
    pub username: String,
    pub document: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProfileOutcome {
    fn failed(username: &str, document: &Path, error: String) -> Self {
        Self {
            username: username.to_string(),
            document: document.to_path_buf(),
            description: None,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost: 0.0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a run produced, written to `execution_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub profiles: Vec<ProfileOutcome>,
    /// Totals over successful profiles
    #[serde(flatten)]
    pub usage: UsageSummary,
    pub failed_profiles: usize,
    pub documents_written: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_failures: Vec<DocumentWriteFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_early: Option<String>,
}

/// A document whose updated profiles could not be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWriteFailure {
    pub document: PathBuf,
    pub error: String,
}

impl ExecutionSummary {
    pub fn format(&self) -> String {
        let mut output = String::from("## Execution Summary\n\n");
        output.push_str(&format!(
            "**Profiles**: {} described, {} failed\n",
            self.usage.total_records, self.failed_profiles
        ));
        output.push_str(&format!(
            "**Tokens**: {} ({} input, {} output), {} per profile\n",
            self.usage.total_tokens,
            self.usage.total_input_tokens,
            self.usage.total_output_tokens,
            self.usage.average_tokens_per_record
        ));
        output.push_str(&format!("**Cost**: {}\n", format_usd(self.usage.total_cost)));
        output.push_str(&format!("**Documents written**: {}\n", self.documents_written));
        for failure in &self.write_failures {
            output.push_str(&format!(
                "**Not written**: {} ({})\n",
                failure.document.display(),
                failure.error
            ));
        }
        if let Some(reason) = &self.stopped_early {
            output.push_str(&format!("**Stopped early**: {reason}\n"));
        }
        output
    }
}

/// Pick the documents to execute: one sample file, or every markdown
/// document under `root`, optionally only the first `limit`.
pub fn select_documents(
    root: &Path,
    sample: Option<&Path>,
    limit: Option<usize>,
) -> Result<ScanOutcome, SourceError> {
    let mut outcome = match sample {
        Some(relative) => scan_file(root, relative)?,
        None => scan(root, Discovery::AllMarkdown)?,
    };
    if let Some(limit) = limit {
        outcome.documents.truncate(limit);
    }
    Ok(outcome)
}

/// Generates descriptions profile by profile and writes the documents back.
pub struct ProfileExecutor<C: CompletionBackend> {
    backend: C,
    counter: Arc<dyn TokenCounter>,
    tracker: UsageTracker,
    window: UsageWindow,
    sink: ResultSink,
    options: ExecuteOptions,
}

impl<C: CompletionBackend> ProfileExecutor<C> {
    pub fn new(
        backend: C,
        counter: Arc<dyn TokenCounter>,
        prices: TokenPrices,
        window: UsageWindow,
        sink: ResultSink,
        options: ExecuteOptions,
    ) -> Self {
        Self {
            backend,
            counter,
            tracker: UsageTracker::new(prices),
            window,
            sink,
            options,
        }
    }

    pub fn window(&self) -> &UsageWindow {
        &self.window
    }

    /// Tokens a profile is expected to use: the prompt plus the full
    /// completion allowance.
    pub fn estimate(&self, profile: &ProfileRecord) -> u64 {
        self.counter.count_chat(&description_messages(profile)) + u64::from(self.options.max_completion_tokens)
    }

    /// Process `documents` in order.
    ///
    /// Stops before the first profile the daily budget cannot admit. The
    /// document being processed is still written back, with its remaining
    /// profiles unchanged. A document that cannot be written is reported in
    /// the summary and the run moves on. The summary is written last.
    pub async fn run(&mut self, documents: Vec<ProfileDocument>) -> Result<ExecutionSummary, ExecuteError> {
        let mut outcomes = Vec::new();
        let mut stopped_early = None;
        let mut documents_written = 0;
        let mut write_failures = Vec::new();

        for document in documents {
            let relative_path = document.relative_path;
            let mut updated = Vec::with_capacity(document.profiles.len());
            let mut profiles = document.profiles.into_iter();

            while let Some(profile) = profiles.next() {
                let estimate = self.estimate(&profile);
                if let Admission::Stop {
                    tokens_today,
                    estimated,
                    ceiling,
                } = self.window.admit(estimate)
                {
                    let reason = format!(
                        "daily token budget reached: {tokens_today} tokens used today, \
                         {estimated} more would pass the {ceiling:.0}-token ceiling"
                    );
                    tracing::warn!(username = %profile.username, %reason, "stopping execution");
                    stopped_early = Some(reason);
                    updated.push(profile);
                    updated.extend(profiles.by_ref());
                    break;
                }

                let (outcome, record) = self.process(&relative_path, profile, estimate).await;
                outcomes.push(outcome);
                updated.push(record);
            }

            match self.sink.write_profiles(&relative_path, &updated) {
                Ok(_) => documents_written += 1,
                Err(err) => {
                    tracing::warn!(document = %relative_path.display(), error = %err, "failed to write document");
                    write_failures.push(DocumentWriteFailure {
                        document: relative_path,
                        error: err.to_string(),
                    });
                }
            }
            if stopped_early.is_some() {
                break;
            }
        }

        let failed_profiles = outcomes.iter().filter(|o| !o.is_success()).count();
        let summary = ExecutionSummary {
            profiles: outcomes,
            usage: self.tracker.summary(),
            failed_profiles,
            documents_written,
            write_failures,
            stopped_early,
        };
        self.sink.write_execution_results(&summary)?;

        tracing::info!(
            described = summary.usage.total_records,
            failed = summary.failed_profiles,
            tokens = summary.usage.total_tokens,
            "execution complete"
        );
        Ok(summary)
    }

    /// Generate one description. Failures leave the record unchanged.
    async fn process(
        &mut self,
        document: &Path,
        profile: ProfileRecord,
        estimate: u64,
    ) -> (ProfileOutcome, ProfileRecord) {
        let request = CompletionRequest {
            model: self.options.model.clone(),
            messages: description_messages(&profile),
            max_tokens: self.options.max_completion_tokens,
        };

        let (outcome, record, delay) = match self.backend.complete(&request).await {
            Ok(Completion {
                text,
                usage: Some(usage),
            }) => {
                self.window.record(usage.total_tokens);
                let cost = self.tracker.record(usage.to_token_count());
                tracing::info!(
                    username = %profile.username,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    cost,
                    "described profile"
                );
                let outcome = ProfileOutcome {
                    username: profile.username.clone(),
                    document: document.to_path_buf(),
                    description: Some(text.clone()),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    total_tokens: usage.total_tokens,
                    cost,
                    error: None,
                };
                let delay = self.window.pacing_delay(usage.total_tokens);
                (outcome, profile.with_description(&text), delay)
            }
            Ok(Completion { usage: None, .. }) => {
                // unknown usage still counts against the budget
                self.window.record(estimate);
                let err = ExecuteError::MissingUsage {
                    username: profile.username.clone(),
                };
                tracing::warn!(username = %profile.username, error = %err, "discarding completion");
                let outcome = ProfileOutcome::failed(&profile.username, document, err.to_string());
                let delay = self.window.pacing_delay(estimate);
                (outcome, profile, delay)
            }
            Err(err) => {
                let err = ExecuteError::from(err);
                tracing::warn!(username = %profile.username, error = %err, "failed to describe profile");
                let outcome = ProfileOutcome::failed(&profile.username, document, err.to_string());
                let delay = self.window.pacing_delay(0);
                (outcome, profile, delay)
            }
        };

        if delay > Duration::ZERO {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "pacing");
            tokio::time::sleep(delay).await;
        }
        (outcome, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{CostRates, FixedCounter, ParsedUsage};
    use crate::execute::SimulatedBackend;
    use crate::limiter::LimiterConfig;
    use crate::records::source::parse_document;
    use crate::submit::BackendError;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Omits usage on every second call and fails every third.
    #[derive(Default)]
    struct FlakyBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for FlakyBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call % 3 == 0 {
                return Err(BackendError::Api {
                    status: 500,
                    message: "server error".into(),
                });
            }
            Ok(Completion {
                text: "A description.".into(),
                usage: (call % 2 == 1).then(|| ParsedUsage::new(10, 5)),
            })
        }
    }

    fn document(name: &str, count: usize) -> ProfileDocument {
        ProfileDocument {
            relative_path: PathBuf::from(name),
            group_key: "default".into(),
            profiles: (0..count).map(|i| ProfileRecord::new(format!("user{i}"))).collect(),
        }
    }

    fn executor<C: CompletionBackend>(backend: C, sink: ResultSink) -> ProfileExecutor<C> {
        ProfileExecutor::new(
            backend,
            Arc::new(FixedCounter::new(900)),
            CostRates::gpt_4o().normalize().unwrap(),
            UsageWindow::new(&LimiterConfig::default()),
            sink,
            ExecuteOptions {
                model: "gpt-4o".into(),
                max_completion_tokens: 100,
            },
        )
    }

    fn read_profiles(path: &Path) -> Vec<ProfileRecord> {
        parse_document(&fs::read_to_string(path).unwrap())
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_budget_stops_after_85_profiles() {
        let temp_dir = TempDir::new().expect("temp dir");
        let sink = ResultSink::new(temp_dir.path(), false);
        let backend = SimulatedBackend::new(ParsedUsage::new(600, 400));
        let mut executor = executor(backend, sink);

        let summary = executor.run(vec![document("a.md", 60), document("b.md", 40)]).await.unwrap();

        assert_eq!(summary.usage.total_records, 85);
        assert_eq!(summary.usage.total_tokens, 85_000);
        assert!(summary.stopped_early.is_some());
        assert_eq!(summary.documents_written, 2);
        assert_eq!(executor.window().tokens_today(), 85_000);

        let written = read_profiles(&temp_dir.path().join("updated_profiles/b.md"));
        assert_eq!(written.len(), 40);
        let described = written.iter().filter(|p| p.extra.contains_key("description")).count();
        assert_eq!(described, 25);
        assert!(temp_dir.path().join("execution_results.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_records_unchanged() {
        let temp_dir = TempDir::new().expect("temp dir");
        let sink = ResultSink::new(temp_dir.path(), false);
        let mut executor = executor(FlakyBackend::default(), sink);

        let summary = executor.run(vec![document("a.md", 4)]).await.unwrap();

        // call 1 ok, 2 missing usage, 3 error, 4 missing usage
        assert_eq!(summary.usage.total_records, 1);
        assert_eq!(summary.failed_profiles, 3);
        assert_eq!(
            summary.profiles[1].error.as_deref(),
            Some("usage data missing for profile `user1`")
        );
        assert!(summary.profiles[2].error.as_deref().unwrap().contains("server error"));

        let written = read_profiles(&temp_dir.path().join("updated_profiles/a.md"));
        assert_eq!(written.len(), 4);
        assert_eq!(written[0].extra["description"], "A description.");
        assert!(written[1..].iter().all(|p| !p.extra.contains_key("description")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_writes_nothing() {
        let temp_dir = TempDir::new().expect("temp dir");
        let sink = ResultSink::new(temp_dir.path().join("results"), true);
        let mut executor = executor(SimulatedBackend::default(), sink);

        let summary = executor.run(vec![document("a.md", 2)]).await.unwrap();

        assert_eq!(summary.usage.total_records, 2);
        assert_eq!(summary.usage.total_tokens, 140);
        assert!(!temp_dir.path().join("results").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_document_is_reported() {
        let temp_dir = TempDir::new().expect("temp dir");
        let sink = ResultSink::new(temp_dir.path(), false);
        let mut executor = executor(SimulatedBackend::default(), sink);

        let summary = executor
            .run(vec![document("../escape.md", 1), document("b.md", 2)])
            .await
            .unwrap();

        assert_eq!(summary.usage.total_records, 3);
        assert_eq!(summary.documents_written, 1);
        assert_eq!(summary.write_failures.len(), 1);
        assert_eq!(summary.write_failures[0].document, PathBuf::from("../escape.md"));
        assert!(summary.format().contains("**Not written**: ../escape.md"));
        assert!(temp_dir.path().join("updated_profiles/b.md").exists());

        let saved: ExecutionSummary =
            serde_json::from_str(&fs::read_to_string(temp_dir.path().join("execution_results.json")).unwrap())
                .unwrap();
        assert_eq!(saved.write_failures, summary.write_failures);
    }

    #[test]
    fn test_estimate_includes_completion_allowance() {
        let executor = executor(SimulatedBackend::default(), ResultSink::new("unused", true));
        assert_eq!(executor.estimate(&ProfileRecord::new("a")), 1_000);
    }

    #[test]
    fn test_select_documents() {
        let temp_dir = TempDir::new().expect("temp dir");
        let doc = "---\nprofiles:\n  - username: a\n---\n";
        fs::write(temp_dir.path().join("one.md"), doc).unwrap();
        fs::write(temp_dir.path().join("two.md"), doc).unwrap();
        fs::write(temp_dir.path().join("three.md"), doc).unwrap();

        let all = select_documents(temp_dir.path(), None, None).unwrap();
        assert_eq!(all.documents.len(), 3);

        let limited = select_documents(temp_dir.path(), None, Some(2)).unwrap();
        assert_eq!(limited.documents.len(), 2);

        let sample = select_documents(temp_dir.path(), Some(Path::new("two.md")), None).unwrap();
        assert_eq!(sample.documents.len(), 1);
        assert_eq!(sample.documents[0].relative_path, PathBuf::from("two.md"));

        let escaped = select_documents(temp_dir.path(), Some(Path::new("../two.md")), None);
        assert!(matches!(escaped, Err(SourceError::OutsideRoot(_))));
    }
}

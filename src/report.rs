// Run Records
// ReportRun is assembled through ReportRunBuilder and frozen by finish()

use crate::export::Artifact;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What happened to one catalogue query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Fetched { rows: usize, elapsed_ms: u64 },
    Failed { reason: String },
}

impl QueryOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, QueryOutcome::Fetched { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub query: String,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
}

/// What happened to one render target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Succeeded { artifact: Artifact },
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetRecord {
    pub target: String,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

impl TargetRecord {
    pub fn succeeded(target: &str, artifact: Artifact) -> Self {
        Self {
            target: target.to_string(),
            outcome: TargetOutcome::Succeeded { artifact },
        }
    }

    pub fn failed(target: &str, reason: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            outcome: TargetOutcome::Failed { reason: reason.into() },
        }
    }

    pub fn skipped(target: &str, reason: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            outcome: TargetOutcome::Skipped { reason: reason.into() },
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.outcome {
            TargetOutcome::Succeeded { artifact } => Some(artifact),
            _ => None,
        }
    }
}

/// The finalized record of one invocation
#[derive(Debug, Clone, Serialize)]
pub struct ReportRun {
    run_id: Uuid,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
    source: String,
    output_dir: PathBuf,
    queries: Vec<QueryRecord>,
    targets: Vec<TargetRecord>,
    cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<PathBuf>,
}

impl ReportRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Local> {
        self.finished_at
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn queries(&self) -> &[QueryRecord] {
        &self.queries
    }

    pub fn targets(&self) -> &[TargetRecord] {
        &self.targets
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn manifest(&self) -> Option<&Path> {
        self.manifest.as_deref()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TargetRecord> {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::Succeeded { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetRecord> {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TargetRecord> {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::Skipped { .. }))
    }

    pub fn failed_queries(&self) -> impl Iterator<Item = &QueryRecord> {
        self.queries.iter().filter(|q| !q.outcome.is_fetched())
    }

    /// Every query fetched, every target written, nothing cancelled
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled
            && self.failed_queries().next().is_none()
            && self.targets.iter().all(|t| matches!(t.outcome, TargetOutcome::Succeeded { .. }))
    }

    /// One-line outcome summary for logs and the CLI
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} skipped; {}/{} queries fetched{}",
            self.succeeded().count(),
            self.failed().count(),
            self.skipped().count(),
            self.queries.len() - self.failed_queries().count(),
            self.queries.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Accumulates outcomes while a run is in progress
#[derive(Debug)]
pub struct ReportRunBuilder {
    run_id: Uuid,
    started_at: DateTime<Local>,
    source: String,
    output_dir: PathBuf,
    queries: Vec<QueryRecord>,
    targets: Vec<TargetRecord>,
    cancelled: bool,
    manifest: Option<PathBuf>,
}

impl ReportRunBuilder {
    pub fn new(started_at: DateTime<Local>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            source: String::new(),
            output_dir: output_dir.into(),
            queries: Vec::new(),
            targets: Vec::new(),
            cancelled: false,
            manifest: None,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn record_queries(&mut self, records: impl IntoIterator<Item = QueryRecord>) {
        self.queries.extend(records);
    }

    pub fn record_targets(&mut self, records: impl IntoIterator<Item = TargetRecord>) {
        self.targets.extend(records);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn manifest_path(&mut self, path: PathBuf) {
        self.manifest = Some(path);
    }

    /// Freeze the run
    pub fn finish(self) -> ReportRun {
        ReportRun {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Local::now(),
            source: self.source,
            output_dir: self.output_dir,
            queries: self.queries,
            targets: self.targets,
            cancelled: self.cancelled,
            manifest: self.manifest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str) -> Artifact {
        Artifact {
            path: PathBuf::from(format!("/tmp/out/{}", name)),
            bytes: 10,
        }
    }

    #[test]
    fn test_counts_and_summary() {
        let mut builder = ReportRunBuilder::new(Local::now(), "/tmp/out").source("SQLite file demo.db");
        builder.record_queries([
            QueryRecord {
                query: "a".to_string(),
                outcome: QueryOutcome::Fetched { rows: 3, elapsed_ms: 1 },
            },
            QueryRecord {
                query: "b".to_string(),
                outcome: QueryOutcome::Failed { reason: "boom".to_string() },
            },
        ]);
        builder.record_targets([
            TargetRecord::succeeded("chart", artifact("chart.svg")),
            TargetRecord::failed("dashboard", "backend error"),
            TargetRecord::skipped("text", "no inputs"),
        ]);
        let run = builder.finish();

        assert_eq!(run.succeeded().count(), 1);
        assert_eq!(run.failed().count(), 1);
        assert_eq!(run.skipped().count(), 1);
        assert!(!run.is_complete_success());
        assert_eq!(run.summary(), "1 succeeded, 1 failed, 1 skipped; 1/2 queries fetched");
        assert!(run.finished_at() >= run.started_at());
    }

    #[test]
    fn test_complete_success() {
        let mut builder = ReportRunBuilder::new(Local::now(), "/tmp/out");
        builder.record_targets([TargetRecord::succeeded("chart", artifact("chart.svg"))]);
        assert!(builder.finish().is_complete_success());

        let mut cancelled = ReportRunBuilder::new(Local::now(), "/tmp/out");
        cancelled.mark_cancelled();
        assert!(!cancelled.finish().is_complete_success());
    }

    #[test]
    fn test_serialized_shape() {
        let mut builder = ReportRunBuilder::new(Local::now(), "/tmp/out");
        builder.record_targets([
            TargetRecord::succeeded("chart", artifact("chart.svg")),
            TargetRecord::failed("json", "disk full"),
        ]);
        let value = serde_json::to_value(builder.finish()).unwrap();

        assert_eq!(value["targets"][0]["target"], "chart");
        assert_eq!(value["targets"][0]["status"], "succeeded");
        assert_eq!(value["targets"][0]["artifact"]["bytes"], 10);
        assert_eq!(value["targets"][1]["status"], "failed");
        assert_eq!(value["targets"][1]["reason"], "disk full");
        assert_eq!(value["cancelled"], false);
        assert!(value.get("manifest").is_none());
    }
}

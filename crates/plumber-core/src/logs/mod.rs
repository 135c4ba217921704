//! Log lookups for Dataflow jobs, Dataproc clusters, jobs and batches

mod client;
mod filter;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

pub use client::{CloudLoggingClient, LogEntry, LogPage, LogSource, entries, fetch_entries};
#[cfg(test)]
pub(crate) use client::fake;
pub use filter::{
    LOOKBACK_DAYS, ResourceSelector, SEVERITIES, build_filter, build_resource_filter, lookback_clause,
    match_severity,
};

use crate::error::{Error, Result};
use crate::runner::{CommandRunner, CommandSpec};

const NO_ENTRIES: &str = "No log entries found matching the criteria.";

/// Rendered entries plus a report for the conversation
#[derive(Debug, Clone, Serialize)]
pub struct LogReport {
    pub filter: String,
    pub entries: Vec<String>,
    pub report: String,
}

/// Log queries against one project
pub struct LogQueries {
    source: Arc<dyn LogSource>,
    runner: Arc<dyn CommandRunner>,
    project: String,
    clock: fn() -> DateTime<Utc>,
}

impl LogQueries {
    pub fn new(source: Arc<dyn LogSource>, runner: Arc<dyn CommandRunner>, project: impl Into<String>) -> Self {
        Self {
            source,
            runner,
            project: project.into(),
            clock: Utc::now,
        }
    }

    /// Replace the clock used for the lookback window
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    async fn query(&self, filter: String, limit: usize) -> Result<Vec<String>> {
        debug!(project = %self.project, filter = %filter, limit, "Querying Cloud Logging");
        fetch_entries(self.source.as_ref(), &self.project, &filter, limit).await
    }

    async fn by_label(
        &self,
        selector: ResourceSelector,
        value: &str,
        limit: usize,
    ) -> Result<(String, Vec<String>)> {
        if value.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "A {} is needed to look up {} logs",
                selector.label_key, selector.resource_type
            )));
        }
        let filter = selector.filter(value, None, (self.clock)());
        let entries = self.query(filter.clone(), limit).await?;
        Ok((filter, entries))
    }

    /// Logs of a Dataflow job by id
    pub async fn dataflow_job(&self, job_id: &str, limit: usize) -> Result<LogReport> {
        let (filter, entries) = self
            .by_label(ResourceSelector::DATAFLOW_JOB, job_id, limit)
            .await?;
        let report = if entries.is_empty() {
            "No job log entry found with given ID.".to_string()
        } else {
            format!("Fetched log entries of Job ID: {}:\n{}", job_id.trim(), entries.join("\n"))
        };
        Ok(LogReport {
            filter,
            entries,
            report,
        })
    }

    /// Logs of a Dataproc cluster by name
    pub async fn cluster_by_name(&self, cluster_name: &str, limit: usize) -> Result<LogReport> {
        let (filter, entries) = self
            .by_label(ResourceSelector::DATAPROC_CLUSTER_NAME, cluster_name, limit)
            .await?;
        Ok(plain_report(filter, entries, "Fetched log entries:"))
    }

    /// Logs of a Dataproc cluster by UUID
    pub async fn cluster_by_uuid(&self, cluster_uuid: &str, limit: usize) -> Result<LogReport> {
        let (filter, entries) = self
            .by_label(ResourceSelector::DATAPROC_CLUSTER_UUID, cluster_uuid, limit)
            .await?;
        Ok(plain_report(filter, entries, "Fetched log entries:"))
    }

    /// Logs of a Dataproc job or serverless batch.
    ///
    /// Batch logs are looked up first. Without any, the id is treated as a
    /// cluster job and `gcloud dataproc jobs wait` supplies the driver output.
    pub async fn dataproc_job(&self, region: &str, job_id: &str, limit: usize) -> Result<LogReport> {
        let (filter, entries) = self
            .by_label(ResourceSelector::DATAPROC_BATCH, job_id, limit)
            .await?;
        if !entries.is_empty() {
            return Ok(plain_report(filter, entries, "Fetched log entries:"));
        }

        let command = job_wait_command(&self.project, region, job_id.trim());
        info!(job_id = %job_id, "No batch logs, reading job driver output");
        let output = self.runner.run(&command).await?;
        let report = if output.success() {
            format!("Fetched log entries:\n{}\n{}", output.stderr, output.stdout)
        } else {
            NO_ENTRIES.to_string()
        };
        Ok(LogReport {
            filter: command.display(),
            entries: Vec::new(),
            report,
        })
    }

    /// Latest logs for a resource type, optionally narrowed by severity
    pub async fn resource(&self, resource_type: &str, severity: Option<&str>, limit: usize) -> Result<LogReport> {
        if resource_type.trim().is_empty() {
            return Err(Error::InvalidInput("A resource type is needed, e.g. gce_instance".to_string()));
        }
        let filter = build_resource_filter(resource_type, severity, (self.clock)());
        let entries = self.query(filter.clone(), limit).await?;
        Ok(plain_report(filter, entries, "Fetched recent log entries:"))
    }
}

fn plain_report(filter: String, entries: Vec<String>, heading: &str) -> LogReport {
    let report = if entries.is_empty() {
        NO_ENTRIES.to_string()
    } else {
        format!("{}\n{}", heading, entries.join("\n"))
    };
    LogReport {
        filter,
        entries,
        report,
    }
}

/// `gcloud dataproc jobs wait <id> --project <p> --region <r>`
pub fn job_wait_command(project: &str, region: &str, job_id: &str) -> CommandSpec {
    CommandSpec::new("gcloud")
        .args(["dataproc", "jobs", "wait", job_id])
        .args(["--project", project])
        .args(["--region", region])
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::client::fake::{FakeLogSource, page};
    use super::*;
    use crate::runner::{CommandOutput, RecordingRunner};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    fn queries(source: FakeLogSource, runner: Arc<RecordingRunner>) -> LogQueries {
        LogQueries::new(Arc::new(source), runner, "proj").with_clock(fixed_now)
    }

    #[tokio::test]
    async fn test_dataflow_job_logs() {
        let runner = Arc::new(RecordingRunner::new());
        let logs = queries(FakeLogSource::new(vec![page(&["started", "failed"], None)]), runner);
        let report = logs.dataflow_job(" 2024-06-01_00_00_00-42 ", 10).await.unwrap();
        assert_eq!(report.entries.len(), 2);
        assert!(report.report.starts_with("Fetched log entries of Job ID: 2024-06-01_00_00_00-42:"));
        assert!(report.filter.contains("resource.labels.job_id=\"2024-06-01_00_00_00-42\""));
        assert!(report.filter.contains("timestamp >= \"2024-04-01T12:00:00.000000Z\""));
    }

    #[tokio::test]
    async fn test_dataflow_job_without_logs() {
        let logs = queries(FakeLogSource::default(), Arc::new(RecordingRunner::new()));
        let report = logs.dataflow_job("j", 10).await.unwrap();
        assert_eq!(report.report, "No job log entry found with given ID.");
    }

    #[tokio::test]
    async fn test_empty_label_rejected() {
        let logs = queries(FakeLogSource::default(), Arc::new(RecordingRunner::new()));
        let err = logs.cluster_by_name("  ", 10).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_cluster_by_uuid() {
        let logs = queries(
            FakeLogSource::new(vec![page(&["yarn up"], None)]),
            Arc::new(RecordingRunner::new()),
        );
        let report = logs.cluster_by_uuid("0f1e", 10).await.unwrap();
        assert!(report.filter.contains("resource.labels.cluster_uuid=\"0f1e\""));
        assert!(report.report.starts_with("Fetched log entries:\nEntry 1: "));
    }

    #[tokio::test]
    async fn test_dataproc_job_prefers_batch_logs() {
        let runner = Arc::new(RecordingRunner::new());
        let logs = queries(FakeLogSource::new(vec![page(&["driver done"], None)]), runner.clone());
        let report = logs.dataproc_job("us-central1", "batch-7", 10).await.unwrap();
        assert!(report.filter.contains("cloud_dataproc_batch"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dataproc_job_falls_back_to_gcloud() {
        let runner = Arc::new(RecordingRunner::new());
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "state: DONE".to_string(),
            stderr: "Waiting for job output...".to_string(),
        });
        let logs = queries(FakeLogSource::default(), runner.clone());
        let report = logs.dataproc_job("europe-west1", "job-123", 10).await.unwrap();
        assert_eq!(report.report, "Fetched log entries:\nWaiting for job output...\nstate: DONE");
        assert_eq!(
            runner.calls()[0].display(),
            "gcloud dataproc jobs wait job-123 --project proj --region europe-west1"
        );
    }

    #[tokio::test]
    async fn test_dataproc_job_fallback_failure() {
        let runner = Arc::new(RecordingRunner::new());
        runner.push_output(CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "NOT_FOUND".to_string(),
        });
        let logs = queries(FakeLogSource::default(), runner);
        let report = logs.dataproc_job("r", "missing", 10).await.unwrap();
        assert_eq!(report.report, NO_ENTRIES);
    }

    #[tokio::test]
    async fn test_resource_logs_with_severity() {
        let source = FakeLogSource::new(vec![page(&["denied"], None)]);
        let logs = queries(source, Arc::new(RecordingRunner::new()));
        let report = logs.resource("gcs_bucket", Some("only errors"), 5).await.unwrap();
        assert!(report.filter.ends_with("AND severity=ERROR"));
        assert!(report.report.starts_with("Fetched recent log entries:"));
    }
}

//! Dataflow job management over the v1b3 REST API

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gcp::GcpClient;

const DATAFLOW_API: &str = "https://dataflow.googleapis.com/v1b3";

/// Newest jobs shown by a listing
const LIST_LIMIT: usize = 30;

/// A job as returned by `projects.locations.jobs`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataflowJob {
    pub id: String,
    pub name: String,
    pub current_state: String,
    pub location: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub create_time: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListJobsResponse {
    jobs: Vec<DataflowJob>,
    next_page_token: Option<String>,
}

/// One scalar metric of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobMetric {
    pub name: String,
    pub scalar: Option<Value>,
}

/// Job details with its metrics
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    pub job: DataflowJob,
    pub metrics: Vec<JobMetric>,
}

impl JobDetails {
    pub fn report(&self) -> String {
        let job = &self.job;
        let mut report = format!(
            "Job Details:\n  ID: {}\n  Name: {}\n  State: {}\n  Location: {}\n  Type: {}\n  Created: {}\n",
            job.id,
            job.name,
            job.current_state,
            job.location.as_deref().unwrap_or("N/A"),
            job.job_type.as_deref().unwrap_or("N/A"),
            job.create_time,
        );
        report.push_str("\nJob Metrics:\n");
        if self.metrics.is_empty() {
            report.push_str("No metrics available for this job.\n");
        }
        for metric in &self.metrics {
            let value = metric
                .scalar
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "N/A".to_string());
            report.push_str(&format!("- {}: {}\n", metric.name, value));
        }
        report
    }
}

/// Dataflow jobs for one project
#[derive(Debug, Clone)]
pub struct DataflowJobs {
    gcp: GcpClient,
    project: String,
}

impl DataflowJobs {
    pub fn new(gcp: GcpClient, project: impl Into<String>) -> Self {
        Self {
            gcp,
            project: project.into(),
        }
    }

    fn jobs_url(&self, location: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/jobs",
            DATAFLOW_API, self.project, location
        )
    }

    /// Newest jobs first, at most 30.
    ///
    /// `location` defaults to every region (`-`). `status` filters on the
    /// job state suffix, e.g. `running` matches `JOB_STATE_RUNNING`.
    pub async fn list(&self, location: Option<&str>, status: Option<&str>) -> Result<Vec<DataflowJob>> {
        let location = location.filter(|l| !l.trim().is_empty()).unwrap_or("-");
        info!(project = %self.project, location = %location, "Listing Dataflow jobs");

        let url = self.jobs_url(location);
        let mut jobs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", "100".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: Option<ListJobsResponse> = self.gcp.get_json(&url, &query).await?;
            let Some(page) = page else { break };
            jobs.extend(page.jobs);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(filter_and_sort(jobs, status))
    }

    /// Job fields plus its metrics
    pub async fn details(&self, job_id: &str, location: &str) -> Result<JobDetails> {
        let url = format!("{}/{}", self.jobs_url(location), job_id);
        let job: DataflowJob = self.gcp.get_json(&url, &[]).await.map_err(|e| match e {
            Error::NotFound(_) => job_not_found(job_id, location),
            other => other,
        })?;

        let metrics: Value = self
            .gcp
            .get_json(&format!("{}/metrics", url), &[])
            .await?;
        Ok(JobDetails {
            job,
            metrics: parse_metrics(&metrics),
        })
    }

    /// Request cancellation of a running job
    pub async fn cancel(&self, job_id: &str, location: &str) -> Result<()> {
        let url = format!("{}/{}", self.jobs_url(location), job_id);
        info!(job_id = %job_id, location = %location, "Cancelling Dataflow job");
        let body = json!({ "requestedState": "JOB_STATE_CANCELLED" });
        let result: Result<Value> = self.gcp.put_json(&url, &body).await;
        match result {
            Ok(_) => Ok(()),
            Err(Error::NotFound(_)) => Err(job_not_found(job_id, location)),
            Err(Error::ExternalCallFailed { status: 400, message, .. })
                if message.to_lowercase().contains("immutable") =>
            {
                warn!(job_id = %job_id, "Job already terminal");
                Err(Error::ValidationFailed(format!(
                    "Job '{}' in '{}' is already in a terminal state (e.g. DONE, FAILED, CANCELLED) and cannot be cancelled.",
                    job_id, location
                )))
            }
            Err(e) => Err(e),
        }
    }
}

fn job_not_found(job_id: &str, location: &str) -> Error {
    Error::NotFound(format!(
        "Job with ID '{}' in location '{}' (list jobs to find the right location)",
        job_id, location
    ))
}

fn filter_and_sort(jobs: Vec<DataflowJob>, status: Option<&str>) -> Vec<DataflowJob> {
    let wanted = status
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"))
        .map(|s| format!("job_state_{}", s.to_lowercase()));

    let mut jobs: Vec<DataflowJob> = jobs
        .into_iter()
        .filter(|job| {
            wanted
                .as_ref()
                .is_none_or(|w| job.current_state.to_lowercase() == *w)
        })
        .collect();
    // RFC 3339 timestamps sort lexically
    jobs.sort_by(|a, b| b.create_time.cmp(&a.create_time));
    jobs.truncate(LIST_LIMIT);
    jobs
}

fn parse_metrics(response: &Value) -> Vec<JobMetric> {
    response
        .get("metrics")
        .and_then(Value::as_array)
        .map(|metrics| {
            metrics
                .iter()
                .map(|m| JobMetric {
                    name: m
                        .pointer("/name/name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    scalar: m.get("scalar").cloned(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Human-readable listing
pub fn jobs_report(jobs: &[DataflowJob], location: Option<&str>) -> String {
    let scope = match location.filter(|l| !l.trim().is_empty() && *l != "-") {
        Some(l) => format!("in location '{}'", l),
        None => "in all regions".to_string(),
    };
    if jobs.is_empty() {
        return format!("No Dataflow jobs found {}.", scope);
    }
    let mut report = format!("Found {} jobs {}:\n", jobs.len(), scope);
    for job in jobs {
        report.push_str(&format!(
            "- Job Name: {} (ID: {}, State: {})\n",
            job.name, job.id, job.current_state
        ));
    }
    report
}

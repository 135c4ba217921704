//! Dataproc Serverless batches

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::clusters::{dataproc_api, plumber_labels};
use crate::error::{Error, Result};
use crate::gcp::GcpClient;

/// Runtime used when the caller does not pick one
pub const DEFAULT_RUNTIME_VERSION: &str = "1.1";

/// The workload a batch runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchJob {
    PySpark {
        main_python_file_uri: String,
        args: Vec<String>,
    },
    Spark {
        jar_file_uris: Vec<String>,
        main_class: Option<String>,
        args: Vec<String>,
    },
}

impl BatchJob {
    /// Build a job from loosely typed tool arguments
    pub fn from_parts(
        job_type: &str,
        main_python_file_uri: Option<String>,
        jar_file_uris: Vec<String>,
        main_class: Option<String>,
        args: Vec<String>,
    ) -> Result<Self> {
        match job_type.trim().to_lowercase().as_str() {
            "pyspark" => {
                let main_python_file_uri = main_python_file_uri
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| {
                        Error::ValidationFailed("PySpark batches need a main Python file URI".to_string())
                    })?;
                Ok(Self::PySpark {
                    main_python_file_uri,
                    args,
                })
            }
            "spark" => {
                if jar_file_uris.is_empty() && main_class.is_none() {
                    return Err(Error::ValidationFailed(
                        "Spark batches need jar file URIs or a main class".to_string(),
                    ));
                }
                Ok(Self::Spark {
                    jar_file_uris,
                    main_class,
                    args,
                })
            }
            other => Err(Error::InvalidInput(format!(
                "Unknown batch job type '{}'. Use 'pyspark' or 'spark'.",
                other
            ))),
        }
    }
}

/// What to submit as a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpec {
    pub batch_id: String,
    pub job: BatchJob,
    pub properties: BTreeMap<String, String>,
    pub service_account: Option<String>,
    pub subnet_uri: Option<String>,
    pub runtime_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub staging_bucket: Option<String>,
}

impl BatchSpec {
    pub fn new(batch_id: impl Into<String>, job: BatchJob) -> Self {
        Self {
            batch_id: batch_id.into(),
            job,
            properties: BTreeMap::new(),
            service_account: None,
            subnet_uri: None,
            runtime_version: None,
            labels: BTreeMap::new(),
            staging_bucket: None,
        }
    }

    /// Request body for `batches.create`
    pub fn to_body(&self) -> Value {
        let mut labels = plumber_labels();
        labels.extend(self.labels.clone());

        let mut body = json!({
            "labels": labels,
            "runtimeConfig": {
                "version": self
                    .runtime_version
                    .as_deref()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or(DEFAULT_RUNTIME_VERSION),
                "properties": self.properties,
            },
        });

        match &self.job {
            BatchJob::PySpark {
                main_python_file_uri,
                args,
            } => {
                body["pysparkBatch"] = json!({
                    "mainPythonFileUri": main_python_file_uri,
                    "args": args,
                });
            }
            BatchJob::Spark {
                jar_file_uris,
                main_class,
                args,
            } => {
                let mut spark = json!({ "jarFileUris": jar_file_uris, "args": args });
                if let Some(class) = main_class {
                    spark["mainClass"] = Value::String(class.clone());
                }
                body["sparkBatch"] = spark;
            }
        }

        let mut execution = serde_json::Map::new();
        for (key, value) in [
            ("serviceAccount", &self.service_account),
            ("subnetworkUri", &self.subnet_uri),
            ("stagingBucket", &self.staging_bucket),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                execution.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        if !execution.is_empty() {
            body["environmentConfig"] = json!({ "executionConfig": execution });
        }
        body
    }
}

/// A batch as returned by `projects.locations.batches`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Batch {
    /// Full resource name, `projects/../locations/../batches/<id>`
    pub name: String,
    pub uuid: String,
    pub state: String,
    pub state_message: Option<String>,
    pub create_time: String,
    pub labels: BTreeMap<String, String>,
}

impl Batch {
    pub fn batch_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListBatchesResponse {
    batches: Vec<Batch>,
    next_page_token: Option<String>,
}

/// Serverless batches for one project and region
#[derive(Debug, Clone)]
pub struct DataprocBatches {
    gcp: GcpClient,
    project: String,
    region: String,
}

impl DataprocBatches {
    pub fn new(gcp: GcpClient, project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            gcp,
            project: project.into(),
            region: region.into(),
        }
    }

    fn batches_url(&self) -> String {
        format!(
            "{}/projects/{}/locations/{}/batches",
            dataproc_api(&self.region),
            self.project,
            self.region
        )
    }

    fn batch_url(&self, batch_id: &str) -> String {
        format!("{}/{}", self.batches_url(), batch_id)
    }

    fn not_found(&self, batch_id: &str) -> Error {
        Error::NotFound(format!("Batch '{}' in region '{}'", batch_id, self.region))
    }

    /// Submit a batch; it runs asynchronously
    pub async fn create(&self, spec: &BatchSpec) -> Result<()> {
        info!(batch_id = %spec.batch_id, region = %self.region, "Creating Dataproc batch");
        let query = [("batchId", spec.batch_id.clone())];
        let _: Value = self
            .gcp
            .post_json_with_query(&self.batches_url(), &query, &spec.to_body())
            .await?;
        Ok(())
    }

    pub async fn get(&self, batch_id: &str) -> Result<Batch> {
        self.gcp
            .get_json(&self.batch_url(batch_id), &[])
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => self.not_found(batch_id),
                other => other,
            })
    }

    pub async fn list(&self) -> Result<Vec<Batch>> {
        let url = self.batches_url();
        let mut batches = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", "100".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: Option<ListBatchesResponse> = self.gcp.get_json(&url, &query).await?;
            let Some(page) = page else { break };
            batches.extend(page.batches);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(batches)
    }

    /// Batches whose state equals `state`, e.g. `RUNNING` or `succeeded`
    pub async fn list_by_state(&self, state: &str) -> Result<Vec<Batch>> {
        Ok(filter_by_state(self.list().await?, state))
    }

    pub async fn delete(&self, batch_id: &str) -> Result<()> {
        info!(batch_id = %batch_id, region = %self.region, "Deleting Dataproc batch");
        self.gcp
            .delete(&self.batch_url(batch_id))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => self.not_found(batch_id),
                other => other,
            })
    }
}

fn filter_by_state(batches: Vec<Batch>, state: &str) -> Vec<Batch> {
    let state = state.trim();
    batches
        .into_iter()
        .filter(|b| b.state.eq_ignore_ascii_case(state))
        .collect()
}

/// Human-readable listing
pub fn batches_report(batches: &[Batch], region: &str) -> String {
    if batches.is_empty() {
        return format!("No Dataproc batches found in region '{}'.", region);
    }
    let mut report = format!("Found {} batches in region '{}':\n", batches.len(), region);
    for batch in batches {
        report.push_str(&format!(
            "- {} (State: {}, Created: {})\n",
            batch.batch_id(),
            batch.state,
            batch.create_time
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(id: &str, state: &str) -> Batch {
        Batch {
            name: format!("projects/p/locations/us-central1/batches/{}", id),
            state: state.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_from_parts() {
        let job = BatchJob::from_parts("PySpark", Some("gs://b/main.py".into()), vec![], None, vec!["--x".into()]).unwrap();
        assert!(matches!(job, BatchJob::PySpark { .. }));

        let err = BatchJob::from_parts("pyspark", None, vec![], None, vec![]).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));

        let err = BatchJob::from_parts("spark", None, vec![], None, vec![]).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));

        assert!(BatchJob::from_parts("hive", None, vec![], None, vec![]).is_err());
    }

    #[test]
    fn test_pyspark_body_defaults() {
        let spec = BatchSpec::new(
            "daily-1",
            BatchJob::PySpark {
                main_python_file_uri: "gs://b/main.py".to_string(),
                args: vec!["--date=2024-01-01".to_string()],
            },
        );
        let body = spec.to_body();
        assert_eq!(body["runtimeConfig"]["version"], "1.1");
        assert_eq!(body["labels"]["submitted_from"], "plumber");
        assert_eq!(body["pysparkBatch"]["mainPythonFileUri"], "gs://b/main.py");
        assert_eq!(body["pysparkBatch"]["args"][0], "--date=2024-01-01");
        assert!(body.get("sparkBatch").is_none());
        assert!(body.get("environmentConfig").is_none());
    }

    #[test]
    fn test_spark_body_with_environment() {
        let mut spec = BatchSpec::new(
            "spark-1",
            BatchJob::Spark {
                jar_file_uris: vec!["gs://b/app.jar".to_string()],
                main_class: Some("com.example.Main".to_string()),
                args: vec![],
            },
        );
        spec.runtime_version = Some("2.2".to_string());
        spec.service_account = Some("sa@p.iam.gserviceaccount.com".to_string());
        spec.subnet_uri = Some(String::new());
        spec.labels.insert("team".to_string(), "data".to_string());
        spec.properties.insert("spark.executor.cores".to_string(), "4".to_string());

        let body = spec.to_body();
        assert_eq!(body["runtimeConfig"]["version"], "2.2");
        assert_eq!(body["runtimeConfig"]["properties"]["spark.executor.cores"], "4");
        assert_eq!(body["sparkBatch"]["mainClass"], "com.example.Main");
        assert_eq!(body["labels"]["team"], "data");
        assert_eq!(body["labels"]["submitted_from"], "plumber");
        let execution = &body["environmentConfig"]["executionConfig"];
        assert_eq!(execution["serviceAccount"], "sa@p.iam.gserviceaccount.com");
        assert!(execution.get("subnetworkUri").is_none());
    }

    #[test]
    fn test_batch_id_and_state_filter() {
        let batches = vec![batch("a", "RUNNING"), batch("b", "SUCCEEDED"), batch("c", "RUNNING")];
        assert_eq!(batches[0].batch_id(), "a");
        let running = filter_by_state(batches, "running");
        let ids: Vec<_> = running.iter().map(Batch::batch_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_batches_report() {
        assert_eq!(batches_report(&[], "r"), "No Dataproc batches found in region 'r'.");
        let report = batches_report(&[batch("a", "FAILED")], "us-central1");
        assert!(report.contains("- a (State: FAILED"));
    }
}

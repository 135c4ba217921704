//! Dataproc clusters over the v1 REST API

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gcp::GcpClient;

/// Image every Plumber cluster is created with
pub const DEFAULT_IMAGE_VERSION: &str = "2.1-debian11";

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Poll interval for long-running operations
const OPERATION_POLL: Duration = Duration::from_secs(5);

/// Give up waiting on an operation after this long
const OPERATION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Regional Dataproc endpoint
pub fn dataproc_api(region: &str) -> String {
    format!("https://{}-dataproc.googleapis.com/v1", region)
}

/// Labels attached to clusters and batches Plumber creates
pub fn plumber_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("submitted_from".to_string(), "plumber".to_string())])
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskConfig {
    pub boot_disk_size_gb: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceGroup {
    pub num_instances: u32,
    pub machine_type_uri: String,
    pub disk_config: DiskConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterStatus {
    pub state: String,
    pub detail: Option<String>,
    pub state_start_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    pub master_config: InstanceGroup,
    pub worker_config: InstanceGroup,
}

/// A cluster as returned by `projects.regions.clusters`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cluster {
    pub cluster_name: String,
    pub cluster_uuid: String,
    pub status: ClusterStatus,
    pub labels: BTreeMap<String, String>,
    pub config: ClusterConfig,
}

impl Cluster {
    pub fn report(&self) -> String {
        let master = &self.config.master_config;
        let worker = &self.config.worker_config;
        format!(
            "Cluster Details:\n  Name: {}\n  UUID: {}\n  State: {}\n  Detail: {}\n  Master: {} x {} ({} GB boot disk)\n  Workers: {} x {} ({} GB boot disk)\n",
            self.cluster_name,
            self.cluster_uuid,
            self.status.state,
            self.status.detail.as_deref().unwrap_or("N/A"),
            master.num_instances,
            master.machine_type_uri,
            master.disk_config.boot_disk_size_gb,
            worker.num_instances,
            worker.machine_type_uri,
            worker.disk_config.boot_disk_size_gb,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListClustersResponse {
    clusters: Vec<Cluster>,
    next_page_token: Option<String>,
}

/// Long-running operation handle
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Operation {
    name: String,
    done: bool,
    error: Option<Value>,
}

/// What to build when creating a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub cluster_name: String,
    pub master: InstanceGroup,
    pub worker: InstanceGroup,
    pub pip_packages: Vec<String>,
    /// Passed to the init action as `JAR_GCS_PATH` metadata
    pub jar_files_gcs_path: Option<String>,
    pub init_action: Option<String>,
}

impl ClusterSpec {
    /// Request body for `clusters.create`
    pub fn to_body(&self, project: &str) -> Value {
        let mut gce = json!({ "serviceAccountScopes": [CLOUD_PLATFORM_SCOPE] });
        let mut config = json!({
            "masterConfig": self.master,
            "workerConfig": self.worker,
            "softwareConfig": {
                "imageVersion": DEFAULT_IMAGE_VERSION,
                "properties": {},
            },
        });

        if !self.pip_packages.is_empty() {
            config["softwareConfig"]["properties"]["dataproc:pip.packages"] =
                Value::String(self.pip_packages.join(","));
        }
        if let Some(script) = self.init_action.as_deref().filter(|s| !s.trim().is_empty()) {
            config["initializationActions"] = json!([{ "executableFile": script }]);
            if let Some(jars) = self.jar_files_gcs_path.as_deref().filter(|j| !j.trim().is_empty()) {
                gce["metadata"] = json!({ "JAR_GCS_PATH": jars });
            }
        }
        config["gceClusterConfig"] = gce;

        json!({
            "projectId": project,
            "clusterName": self.cluster_name,
            "labels": plumber_labels(),
            "config": config,
        })
    }
}

/// Start/stop action on a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAction {
    Start,
    Stop,
}

impl ClusterAction {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl std::str::FromStr for ClusterAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            _ => Err(Error::InvalidInput("Invalid action. Use 'start' or 'stop'.".to_string())),
        }
    }
}

/// Dataproc clusters for one project and region
#[derive(Debug, Clone)]
pub struct DataprocClusters {
    gcp: GcpClient,
    project: String,
    region: String,
}

impl DataprocClusters {
    pub fn new(gcp: GcpClient, project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            gcp,
            project: project.into(),
            region: region.into(),
        }
    }

    fn clusters_url(&self) -> String {
        format!(
            "{}/projects/{}/regions/{}/clusters",
            dataproc_api(&self.region),
            self.project,
            self.region
        )
    }

    fn cluster_url(&self, name: &str) -> String {
        format!("{}/{}", self.clusters_url(), name)
    }

    fn not_found(&self, name: &str) -> Error {
        Error::NotFound(format!("Cluster '{}' in region '{}'", name, self.region))
    }

    /// Submit a create request. The cluster keeps provisioning after this
    /// returns.
    pub async fn create(&self, spec: &ClusterSpec) -> Result<()> {
        info!(cluster = %spec.cluster_name, region = %self.region, "Creating Dataproc cluster");
        let _: Value = self
            .gcp
            .post_json(&self.clusters_url(), &spec.to_body(&self.project))
            .await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Cluster> {
        self.gcp
            .get_json(&self.cluster_url(name), &[])
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => self.not_found(name),
                other => other,
            })
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        match self.get(name).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self) -> Result<Vec<Cluster>> {
        let url = self.clusters_url();
        let mut clusters = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let query: Vec<(&str, String)> = page_token
                .iter()
                .map(|t| ("pageToken", t.clone()))
                .collect();
            let page: Option<ListClustersResponse> = self.gcp.get_json(&url, &query).await?;
            let Some(page) = page else { break };
            clusters.extend(page.clusters);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(region = %self.region, count = clusters.len(), "Listed Dataproc clusters");
        Ok(clusters)
    }

    /// Start or stop a cluster and wait for the operation
    pub async fn set_running(&self, name: &str, action: ClusterAction) -> Result<()> {
        info!(cluster = %name, action = action.verb(), "Changing Dataproc cluster state");
        let url = format!("{}:{}", self.cluster_url(name), action.verb());
        let operation: Option<Operation> = self
            .gcp
            .post_json(&url, &json!({}))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => self.not_found(name),
                other => other,
            })?;
        self.wait(operation.unwrap_or_default()).await
    }

    /// Resize the worker group. Returns `false` when it already has that
    /// many workers.
    pub async fn resize(&self, name: &str, num_workers: u32) -> Result<bool> {
        let cluster = self.get(name).await?;
        if cluster.config.worker_config.num_instances == num_workers {
            return Ok(false);
        }
        info!(cluster = %name, workers = num_workers, "Resizing Dataproc cluster");
        let body = json!({ "config": { "workerConfig": { "numInstances": num_workers } } });
        let query = [("updateMask", "config.worker_config.num_instances".to_string())];
        let operation: Option<Operation> = self
            .gcp
            .patch_json_with_query(&self.cluster_url(name), &query, &body)
            .await?;
        self.wait(operation.unwrap_or_default()).await?;
        Ok(true)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        info!(cluster = %name, region = %self.region, "Deleting Dataproc cluster");
        let operation: Option<Operation> = self
            .gcp
            .delete_json(&self.cluster_url(name))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => self.not_found(name),
                other => other,
            })?;
        self.wait(operation.unwrap_or_default()).await
    }

    async fn wait(&self, mut operation: Operation) -> Result<()> {
        if operation.name.is_empty() {
            return Ok(());
        }
        let url = format!("{}/{}", dataproc_api(&self.region), operation.name);
        let started = tokio::time::Instant::now();
        while !operation.done {
            if started.elapsed() > OPERATION_TIMEOUT {
                warn!(operation = %operation.name, "Gave up waiting on Dataproc operation");
                return Err(Error::Unexpected(format!(
                    "Operation {} did not finish within {} minutes",
                    operation.name,
                    OPERATION_TIMEOUT.as_secs() / 60
                )));
            }
            tokio::time::sleep(OPERATION_POLL).await;
            operation = self.gcp.get_json(&url, &[]).await?;
        }
        operation_result(&operation)
    }
}

fn operation_result(operation: &Operation) -> Result<()> {
    match &operation.error {
        None => Ok(()),
        Some(error) => Err(Error::external(
            "dataproc",
            error.get("code").and_then(Value::as_u64).unwrap_or(500) as u16,
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("operation failed")
                .to_string(),
        )),
    }
}

/// Human-readable listing
pub fn clusters_report(clusters: &[Cluster], region: &str) -> String {
    if clusters.is_empty() {
        return format!("No Dataproc clusters found in region '{}'.", region);
    }
    let mut report = format!("Found {} clusters in region '{}':\n", clusters.len(), region);
    for cluster in clusters {
        report.push_str(&format!(
            "- {} (State: {}, Workers: {})\n",
            cluster.cluster_name, cluster.status.state, cluster.config.worker_config.num_instances
        ));
    }
    report
}

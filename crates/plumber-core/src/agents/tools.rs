//! Agent tools: the call format, argument access, outcomes and dispatch

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::AgentKind;
use crate::config::{Config, github_token};
use crate::dataflow::{
    BuildRequest, DataflowJobs, PipelineRequest, SubmitRequest, build_and_stage, jobs_report, launch_pipeline,
    locate_main_source, submit_template,
};
use crate::dataproc::{
    BatchJob, BatchSpec, ClusterAction, ClusterSpec, DataprocBatches, DataprocClusters, DiskConfig, InstanceGroup,
    TemplateLanguage, TemplateRunRequest, batches_report, clusters_report, run_template,
    run_template_with_transformation, select_template,
};
use crate::error::{Error, Result};
use crate::gcp::{GcloudTokenProvider, GcpClient, TokenProvider};
use crate::gcs::{GcsPath, StorageClient, buckets_report, objects_report};
use crate::git;
use crate::github::{GitHubClient, RepoRef, download_repository};
use crate::llm::{LanguageModel, LlmClient, strip_code_fences};
use crate::logs::{CloudLoggingClient, LogQueries, LogSource};
use crate::monitoring::{cpu_report, cpu_utilization};
use crate::runner::{CommandRunner, ProcessRunner};
use crate::sttm::{SqlTarget, generate_dbt_model, generate_sql_from_gcs};
use crate::templates::{TemplateCatalog, TemplateParams, UserParams, sync_repo};

/// A tool an agent may call. Arguments ending in `?` are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: &'static [&'static str],
}

const fn tool(name: &'static str, description: &'static str, args: &'static [&'static str]) -> ToolSpec {
    ToolSpec { name, description, args }
}

const DATAFLOW_TOOLS: &[ToolSpec] = &[
    tool("get_dataflow_template", "Find catalog templates for a task", &["task"]),
    tool(
        "submit_dataflow_template",
        "Launch a catalog template with validated parameters",
        &["template_name", "params", "job_name?", "region?", "staging_location?", "custom_template_path?"],
    ),
    tool(
        "customize_and_build_template",
        "Build and stage a template module from the DataflowTemplates repository",
        &["template_name", "template_path", "bucket"],
    ),
    tool(
        "create_pipeline_from_scratch",
        "Run Apache Beam Python code on Dataflow",
        &["job_name", "code", "gcs_path", "pipeline_type?", "args?", "region?"],
    ),
    tool("list_dataflow_jobs", "List recent jobs, newest first", &["location?", "status?"]),
    tool("get_dataflow_job_details", "Show a job and its metrics", &["job_id", "location?"]),
    tool("cancel_dataflow_job", "Cancel a running job", &["job_id", "location?"]),
    tool("generate_beam_sql", "Generate Beam SQL from an STTM in GCS", &["sttm_gcs_path"]),
];

const DATAPROC_TOOLS: &[ToolSpec] = &[
    tool(
        "create_cluster",
        "Create a cluster",
        &[
            "cluster_name",
            "region?",
            "num_workers?",
            "master_machine_type?",
            "worker_machine_type?",
            "boot_disk_size_gb?",
            "pip_packages?",
            "jar_files_gcs_path?",
            "init_action?",
        ],
    ),
    tool("get_cluster", "Show a cluster", &["cluster_name", "region?"]),
    tool("list_clusters", "List clusters in a region", &["region?"]),
    tool("start_cluster", "Start a stopped cluster", &["cluster_name", "region?"]),
    tool("stop_cluster", "Stop a running cluster", &["cluster_name", "region?"]),
    tool("resize_cluster", "Change the number of workers", &["cluster_name", "num_workers", "region?"]),
    tool("delete_cluster", "Delete a cluster", &["cluster_name", "region?"]),
    tool(
        "create_batch",
        "Submit a serverless PySpark or Spark batch",
        &[
            "job_type",
            "batch_id?",
            "main_python_file_uri?",
            "jar_file_uris?",
            "main_class?",
            "args?",
            "properties?",
            "subnet_uri?",
            "runtime_version?",
            "staging_bucket?",
            "region?",
        ],
    ),
    tool("get_batch", "Show the state of a batch", &["batch_id", "region?"]),
    tool("list_batches", "List batches, optionally by state", &["state?", "region?"]),
    tool("delete_batch", "Delete a batch", &["batch_id", "region?"]),
];

const DATAPROC_TEMPLATE_TOOLS: &[ToolSpec] = &[
    tool("get_dataproc_template", "Find the Dataproc template for a task", &["task", "language?"]),
    tool(
        "run_dataproc_template",
        "Run a Dataproc template with validated parameters",
        &[
            "template_name",
            "params",
            "required_params",
            "optional_params?",
            "language?",
            "region?",
            "staging_location?",
            "jars?",
            "subnet?",
            "spark_properties?",
            "transformation_sql?",
            "template_path?",
        ],
    ),
    tool("get_transformation_sql", "Generate Spark SQL from an STTM in GCS", &["sttm_gcs_path"]),
];

const DBT_TOOLS: &[ToolSpec] = &[tool(
    "generate_dbt_model",
    "Generate a dbt model from an STTM and store it in the project's models folder",
    &["sttm_gcs_path"],
)];

const GITHUB_TOOLS: &[ToolSpec] = &[
    tool("authenticate_github", "Check the GitHub token", &[]),
    tool("search_repositories", "Search GitHub repositories", &["query"]),
    tool("list_branches", "List the branches of a repository", &["repository"]),
    tool(
        "download_repository",
        "Clone a branch locally, optionally mirroring it to a bucket",
        &["repository", "branch?", "upload_to_gcs?", "bucket_name?"],
    ),
    tool("initialize_git_repo", "Initialise a local git repository", &["repo_path"]),
    tool("get_git_status", "Show changed and untracked files of a local repository", &["repo_path"]),
    tool("add_files_to_git", "Stage files; all changes when no files are given", &["repo_path", "files?"]),
    tool(
        "commit_changes",
        "Commit the staged files",
        &["repo_path", "message", "author_name?", "author_email?"],
    ),
    tool("list_git_branches", "List the local branches of a repository", &["repo_path"]),
    tool(
        "switch_git_branch",
        "Check out a local branch, optionally creating it",
        &["repo_path", "branch", "create?"],
    ),
    tool("create_bucket", "Create a bucket if missing", &["bucket_name", "location?", "storage_class?"]),
    tool("list_buckets", "List buckets of the project", &[]),
    tool("list_objects", "List objects in a bucket", &["bucket_name", "prefix?"]),
    tool("upload_file", "Upload a local file", &["local_path", "gcs_path"]),
    tool("upload_directory", "Upload a local directory", &["local_path", "bucket_name", "prefix?"]),
    tool("download_object", "Download an object to a local file", &["gcs_path", "local_path?"]),
    tool("delete_objects", "Delete an object or every object under a prefix", &["bucket_name", "object_name?", "prefix?"]),
    tool("delete_bucket", "Delete a bucket", &["bucket_name", "force?"]),
];

const MONITORING_TOOLS: &[ToolSpec] = &[
    tool("get_dataflow_job_logs", "Logs of a Dataflow job", &["job_id", "limit?"]),
    tool("get_cluster_logs_by_name", "Logs of a Dataproc cluster by name", &["cluster_name", "limit?"]),
    tool("get_cluster_logs_by_uuid", "Logs of a Dataproc cluster by UUID", &["cluster_uuid", "limit?"]),
    tool("get_dataproc_job_logs", "Logs of a Dataproc job or batch", &["job_id", "region?", "limit?"]),
    tool(
        "get_resource_logs",
        "Latest logs of a resource type, optionally by severity",
        &["resource_type", "severity?", "limit?"],
    ),
    tool("get_cpu_utilization", "CPU utilisation of VM instances over the last five minutes", &[]),
];

pub(super) fn catalog(agent: AgentKind) -> &'static [ToolSpec] {
    match agent {
        AgentKind::Dataflow => DATAFLOW_TOOLS,
        AgentKind::Dataproc => DATAPROC_TOOLS,
        AgentKind::DataprocTemplate => DATAPROC_TEMPLATE_TOOLS,
        AgentKind::Dbt => DBT_TOOLS,
        AgentKind::GitHub => GITHUB_TOOLS,
        AgentKind::Monitoring => MONITORING_TOOLS,
    }
}

/// A tool call proposed by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { tool: tool.into(), args }
    }

    /// Parse the first JSON object in a model answer, fenced or not.
    /// `None` when the answer holds no tool call.
    pub fn parse(answer: &str) -> Option<Self> {
        let text = strip_code_fences(answer);
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str::<ToolCall>(&text[start..=end])
            .ok()
            .filter(|call| !call.tool.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failed,
}

/// What a tool hands back to the conversation
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub report: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutcome {
    pub fn success(report: impl Into<String>, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).ok().filter(|v| !v.is_null());
        Self {
            status: ToolStatus::Success,
            report: report.into(),
            error_code: None,
            data,
        }
    }

    pub fn failed(error: &Error) -> Self {
        let report = match error.suggestion() {
            Some(suggestion) => format!("{}\n{}", error, suggestion),
            None => error.to_string(),
        };
        Self {
            status: ToolStatus::Failed,
            report,
            error_code: Some(error.code().to_string()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Typed access to loosely typed tool arguments
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(pub &'a Map<String, Value>);

impl<'a> Args<'a> {
    fn missing(key: &str) -> Error {
        Error::ValidationFailed(format!("Missing required argument '{}'", key))
    }

    /// Non-empty string, or `None`
    pub fn opt_str(&self, key: &str) -> Option<&'a str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn str(&self, key: &str) -> Result<&'a str> {
        self.opt_str(key).ok_or_else(|| Self::missing(key))
    }

    /// Numbers given as JSON numbers or numeric strings
    pub fn opt_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| Error::ValidationFailed(format!("'{}' must be a non-negative integer", key))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::ValidationFailed(format!("'{}' must be a non-negative integer", key))),
            Some(_) => Err(Error::ValidationFailed(format!("'{}' must be a non-negative integer", key))),
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
            _ => false,
        }
    }

    /// String list from a JSON array or a comma separated string
    pub fn list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Parameters from a JSON object or a JSON object encoded as a string
    pub fn params(&self, key: &str) -> Result<UserParams> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(UserParams::new()),
            Some(Value::Object(map)) => Ok(UserParams::from_map(map.clone())),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(UserParams::new()),
            Some(Value::String(s)) => UserParams::from_json(s),
            Some(_) => Err(Error::ValidationFailed(format!("'{}' must be a JSON object", key))),
        }
    }

    pub fn map(&self, key: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.params(key)?.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}

/// Clients and settings shared by every tool
pub struct Services {
    pub config: Config,
    pub project: String,
    pub runner: Arc<dyn CommandRunner>,
    pub gcp: GcpClient,
    pub model: Arc<dyn LanguageModel>,
    pub logs: Arc<dyn LogSource>,
    pub github: GitHubClient,
}

impl Services {
    /// Production wiring: subprocesses, gcloud tokens, Vertex AI and Cloud Logging
    pub fn from_config(config: Config) -> Result<Self> {
        let project = config.gcp.resolved_project().ok_or_else(|| {
            Error::ConfigError(
                "No GCP project configured. Set GOOGLE_CLOUD_PROJECT or `plumber config set gcp.project <id>`."
                    .to_string(),
            )
        })?;
        Self::connect(config, project)
    }

    /// Same wiring against an explicit project
    pub fn connect(config: Config, project: impl Into<String>) -> Result<Self> {
        let project = project.into();
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(Duration::from_secs(
            config.runner.command_timeout_secs,
        )));
        let tokens: Arc<dyn TokenProvider> = Arc::new(
            GcloudTokenProvider::new(runner.clone()).impersonating(config.gcp.resolved_service_account()),
        );
        let gcp = GcpClient::new(tokens.clone())?;
        let model = LlmClient::builder()
            .config(config.llm.clone())
            .tokens(tokens)
            .project(project.clone())
            .location(config.gcp.resolved_location())
            .build()?;
        let logs = CloudLoggingClient::new(gcp.clone());
        let github = GitHubClient::new(github_token())?;
        Ok(Self {
            config,
            project,
            runner,
            gcp,
            model: Arc::new(model),
            logs: Arc::new(logs),
            github,
        })
    }

    fn region(&self, args: &Args<'_>) -> String {
        args.opt_str("region")
            .map(str::to_string)
            .unwrap_or_else(|| self.config.gcp.resolved_region())
    }

    /// Dataflow tools name the region `location`
    fn location(&self, args: &Args<'_>) -> String {
        args.opt_str("location")
            .map(str::to_string)
            .unwrap_or_else(|| self.region(args))
    }

    /// `repo_path`, relative paths taken from the workspace directory
    fn local_repo(&self, args: &Args<'_>) -> Result<PathBuf> {
        let path = Path::new(args.str("repo_path")?);
        Ok(if path.is_absolute() { path.to_path_buf() } else { self.workspace().join(path) })
    }

    fn workspace(&self) -> &Path {
        &self.config.templates.workspace_dir
    }

    fn storage(&self) -> StorageClient {
        StorageClient::new(self.gcp.clone(), self.project.clone())
    }

    fn log_queries(&self) -> LogQueries {
        LogQueries::new(self.logs.clone(), self.runner.clone(), self.project.clone())
    }

    fn log_limit(&self, args: &Args<'_>) -> Result<usize> {
        Ok(args
            .opt_u32("limit")?
            .map(|l| l as usize)
            .unwrap_or(self.config.logging.default_limit))
    }
}

#[cfg(test)]
impl Services {
    /// Services over test doubles, with the workspace and catalog under `dir`
    pub(crate) fn fake(
        dir: &Path,
        runner: Arc<dyn CommandRunner>,
        model: Arc<dyn LanguageModel>,
        logs: Arc<dyn LogSource>,
    ) -> Self {
        let mut config = Config::default();
        config.gcp.project = Some("proj".to_string());
        config.templates.workspace_dir = dir.join("workspace");
        config.templates.dataflow_catalog_path = dir.join("catalog.json");
        let tokens: Arc<dyn TokenProvider> = Arc::new(crate::gcp::StaticTokenProvider::new("token"));
        Self {
            config,
            project: "proj".to_string(),
            runner,
            gcp: GcpClient::new(tokens).expect("http client"),
            model,
            logs,
            github: GitHubClient::new(None).expect("http client"),
        }
    }
}

/// Run `call` for `agent`. Tools outside the agent's list are refused and
/// every error becomes a failed outcome.
pub async fn dispatch(services: &Services, agent: AgentKind, call: &ToolCall) -> ToolOutcome {
    if !agent.has_tool(&call.tool) {
        warn!(agent = %agent, tool = %call.tool, "Tool not available to agent");
        return ToolOutcome::failed(&Error::ValidationFailed(format!(
            "Tool '{}' is not available to {}",
            call.tool, agent
        )));
    }
    info!(agent = %agent, tool = %call.tool, "Running tool");
    match run(services, &call.tool, Args(&call.args)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(tool = %call.tool, error = %e, "Tool failed");
            ToolOutcome::failed(&e)
        }
    }
}

async fn run(s: &Services, tool: &str, args: Args<'_>) -> Result<ToolOutcome> {
    match tool {
        "get_dataflow_template" => get_dataflow_template(s, args).await,
        "submit_dataflow_template" => submit_dataflow_template(s, args).await,
        "customize_and_build_template" => customize_and_build_template(s, args).await,
        "create_pipeline_from_scratch" => create_pipeline(s, args).await,
        "list_dataflow_jobs" => {
            let location = args.opt_str("location");
            let jobs = DataflowJobs::new(s.gcp.clone(), s.project.clone())
                .list(location, args.opt_str("status"))
                .await?;
            Ok(ToolOutcome::success(jobs_report(&jobs, location), &jobs))
        }
        "get_dataflow_job_details" => {
            let details = DataflowJobs::new(s.gcp.clone(), s.project.clone())
                .details(args.str("job_id")?, &s.location(&args))
                .await?;
            Ok(ToolOutcome::success(details.report(), &details))
        }
        "cancel_dataflow_job" => {
            let job_id = args.str("job_id")?;
            DataflowJobs::new(s.gcp.clone(), s.project.clone())
                .cancel(job_id, &s.location(&args))
                .await?;
            Ok(ToolOutcome::success(format!("Cancellation requested for job {}", job_id), ()))
        }
        "generate_beam_sql" => sql_from_sttm(s, args, SqlTarget::BeamSql).await,

        "create_cluster" => create_cluster(s, args).await,
        "get_cluster" => {
            let cluster = clusters(s, &args).get(args.str("cluster_name")?).await?;
            Ok(ToolOutcome::success(cluster.report(), &cluster))
        }
        "list_clusters" => {
            let region = s.region(&args);
            let clusters = clusters(s, &args).list().await?;
            Ok(ToolOutcome::success(clusters_report(&clusters, &region), &clusters))
        }
        "start_cluster" | "stop_cluster" => {
            let name = args.str("cluster_name")?;
            let action = if tool == "start_cluster" { ClusterAction::Start } else { ClusterAction::Stop };
            clusters(s, &args).set_running(name, action).await?;
            let verb = if action == ClusterAction::Start { "started" } else { "stopped" };
            Ok(ToolOutcome::success(format!("Cluster '{}' {}", name, verb), ()))
        }
        "resize_cluster" => {
            let name = args.str("cluster_name")?;
            let workers = args.opt_u32("num_workers")?.ok_or_else(|| Args::missing("num_workers"))?;
            let changed = clusters(s, &args).resize(name, workers).await?;
            let report = if changed {
                format!("Cluster '{}' resized to {} workers", name, workers)
            } else {
                format!("Cluster '{}' already has {} workers", name, workers)
            };
            Ok(ToolOutcome::success(report, ()))
        }
        "delete_cluster" => {
            let name = args.str("cluster_name")?;
            clusters(s, &args).delete(name).await?;
            Ok(ToolOutcome::success(format!("Cluster '{}' deleted", name), ()))
        }
        "create_batch" => create_batch(s, args).await,
        "get_batch" => {
            let batch = batches(s, &args).get(args.str("batch_id")?).await?;
            let mut report = format!("Batch '{}' is {}", batch.batch_id(), batch.state);
            if let Some(message) = &batch.state_message {
                report.push_str(&format!(": {}", message));
            }
            Ok(ToolOutcome::success(report, &batch))
        }
        "list_batches" => {
            let region = s.region(&args);
            let client = batches(s, &args);
            let batches = match args.opt_str("state") {
                Some(state) => client.list_by_state(state).await?,
                None => client.list().await?,
            };
            Ok(ToolOutcome::success(batches_report(&batches, &region), &batches))
        }
        "delete_batch" => {
            let batch_id = args.str("batch_id")?;
            batches(s, &args).delete(batch_id).await?;
            Ok(ToolOutcome::success(format!("Batch '{}' deleted", batch_id), ()))
        }

        "get_dataproc_template" => get_dataproc_template(s, args).await,
        "run_dataproc_template" => run_dataproc_template(s, args).await,
        "get_transformation_sql" => sql_from_sttm(s, args, SqlTarget::Transformation).await,

        "generate_dbt_model" => {
            let model = generate_dbt_model(&s.storage(), s.model.as_ref(), args.str("sttm_gcs_path")?).await?;
            Ok(ToolOutcome::success(
                format!("dbt model written to {}\n\n{}", model.output_path, model.sql),
                &model,
            ))
        }

        "authenticate_github" => {
            let login = s.github.authenticate().await?;
            Ok(ToolOutcome::success(format!("Authenticated as {}", login), &login))
        }
        "search_repositories" => {
            let results = s.github.search_repositories(args.str("query")?).await?;
            let mut report = format!("Found {} repositories", results.len());
            for name in &results {
                report.push_str(&format!("\n- {}", name));
            }
            Ok(ToolOutcome::success(report, &results))
        }
        "list_branches" => {
            let repo: RepoRef = args.str("repository")?.parse()?;
            let branches = s.github.list_branches(&repo).await?;
            Ok(ToolOutcome::success(
                format!("Branches of {}: {}", repo, branches.join(", ")),
                &branches,
            ))
        }
        "download_repository" => download(s, args).await,
        "initialize_git_repo" => {
            let path = s.local_repo(&args)?;
            let created = on_blocking_pool(move || git::init(&path)).await?;
            let report = if created.created_new {
                format!("Initialised git repository at {}", created.path.display())
            } else {
                format!("{} is already a git repository", created.path.display())
            };
            Ok(ToolOutcome::success(report, &created))
        }
        "get_git_status" => {
            let path = s.local_repo(&args)?;
            let status = on_blocking_pool(move || git::status(&path)).await?;
            Ok(ToolOutcome::success(status.report(), &status))
        }
        "add_files_to_git" => {
            let path = s.local_repo(&args)?;
            let files = args.list("files");
            let staged = on_blocking_pool(move || git::add(&path, &files)).await?;
            Ok(ToolOutcome::success(format!("Staged changes; index holds {} files", staged), staged))
        }
        "commit_changes" => {
            let path = s.local_repo(&args)?;
            let message = args.str("message")?.to_string();
            let author = match (args.opt_str("author_name"), args.opt_str("author_email")) {
                (Some(name), Some(email)) => Some((name.to_string(), email.to_string())),
                _ => None,
            };
            let commit = on_blocking_pool(move || {
                git::commit(&path, &message, author.as_ref().map(|(n, e)| (n.as_str(), e.as_str())))
            })
            .await?;
            let short = commit.id.get(..8).unwrap_or(&commit.id);
            Ok(ToolOutcome::success(format!("Committed {}: {}", short, commit.message), &commit))
        }
        "list_git_branches" => {
            let path = s.local_repo(&args)?;
            let branches = on_blocking_pool(move || git::branches(&path)).await?;
            Ok(ToolOutcome::success(git::branches_report(&branches), &branches))
        }
        "switch_git_branch" => {
            let path = s.local_repo(&args)?;
            let branch = args.str("branch")?.to_string();
            let create = args.flag("create");
            let name = on_blocking_pool(move || git::switch_branch(&path, &branch, create)).await?;
            Ok(ToolOutcome::success(format!("Switched to branch {}", name), &name))
        }
        "create_bucket" => {
            let name = args.str("bucket_name")?;
            let creation = s
                .storage()
                .create_bucket(
                    name,
                    args.opt_str("location").unwrap_or("us-central1"),
                    args.opt_str("storage_class").unwrap_or("STANDARD"),
                )
                .await?;
            let report = if creation.created_new {
                format!("Bucket '{}' created", name)
            } else {
                format!("Bucket '{}' already exists", name)
            };
            Ok(ToolOutcome::success(report, &creation))
        }
        "list_buckets" => {
            let buckets = s.storage().list_buckets().await?;
            Ok(ToolOutcome::success(buckets_report(&buckets), &buckets))
        }
        "list_objects" => {
            let bucket = args.str("bucket_name")?;
            let objects = s.storage().list_objects(bucket, args.opt_str("prefix")).await?;
            Ok(ToolOutcome::success(objects_report(bucket, &objects), &objects))
        }
        "upload_file" => {
            let local = PathBuf::from(args.str("local_path")?);
            let target: GcsPath = args.str("gcs_path")?.parse()?;
            s.storage().upload_file(&local, &target).await?;
            Ok(ToolOutcome::success(format!("Uploaded {} to {}", local.display(), target), ()))
        }
        "upload_directory" => {
            let local = PathBuf::from(args.str("local_path")?);
            let bucket = args.str("bucket_name")?;
            let upload = s
                .storage()
                .upload_directory(&local, bucket, args.opt_str("prefix").unwrap_or_default())
                .await?;
            let report = format!(
                "Uploaded {} files to gs://{} ({} failed)",
                upload.uploaded.len(),
                bucket,
                upload.failed.len()
            );
            Ok(ToolOutcome::success(report, &upload))
        }
        "download_object" => {
            let source: GcsPath = args.str("gcs_path")?.parse()?;
            let local = match args.opt_str("local_path") {
                Some(path) => PathBuf::from(path),
                None => s.workspace().join("downloads").join(source.file_name()),
            };
            s.storage().download(&source, &local).await?;
            Ok(ToolOutcome::success(
                format!("Downloaded {} to {}", source, local.display()),
                local.display().to_string(),
            ))
        }
        "delete_objects" => delete_objects(s, args).await,
        "delete_bucket" => {
            let name = args.str("bucket_name")?;
            let deleted = s.storage().delete_bucket(name, args.flag("force")).await?;
            Ok(ToolOutcome::success(
                format!("Bucket '{}' deleted ({} objects removed)", name, deleted),
                (),
            ))
        }

        "get_dataflow_job_logs" => {
            let report = s
                .log_queries()
                .dataflow_job(args.str("job_id")?, s.log_limit(&args)?)
                .await?;
            Ok(ToolOutcome::success(report.report.clone(), &report))
        }
        "get_cluster_logs_by_name" => {
            let report = s
                .log_queries()
                .cluster_by_name(args.str("cluster_name")?, s.log_limit(&args)?)
                .await?;
            Ok(ToolOutcome::success(report.report.clone(), &report))
        }
        "get_cluster_logs_by_uuid" => {
            let report = s
                .log_queries()
                .cluster_by_uuid(args.str("cluster_uuid")?, s.log_limit(&args)?)
                .await?;
            Ok(ToolOutcome::success(report.report.clone(), &report))
        }
        "get_dataproc_job_logs" => {
            let report = s
                .log_queries()
                .dataproc_job(&s.region(&args), args.str("job_id")?, s.log_limit(&args)?)
                .await?;
            Ok(ToolOutcome::success(report.report.clone(), &report))
        }
        "get_resource_logs" => {
            let report = s
                .log_queries()
                .resource(args.str("resource_type")?, args.opt_str("severity"), s.log_limit(&args)?)
                .await?;
            Ok(ToolOutcome::success(report.report.clone(), &report))
        }
        "get_cpu_utilization" => {
            let instances = cpu_utilization(&s.gcp, &s.project).await?;
            Ok(ToolOutcome::success(cpu_report(&instances), &instances))
        }

        other => Err(Error::Unexpected(format!("Tool '{}' has no implementation", other))),
    }
}

fn clusters(s: &Services, args: &Args<'_>) -> DataprocClusters {
    DataprocClusters::new(s.gcp.clone(), s.project.clone(), s.region(args))
}

fn batches(s: &Services, args: &Args<'_>) -> DataprocBatches {
    DataprocBatches::new(s.gcp.clone(), s.project.clone(), s.region(args))
}

async fn get_dataflow_template(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let task = args.str("task")?;
    let catalog = TemplateCatalog::load(&s.config.templates.dataflow_catalog_path)?;
    let selected = catalog.select(s.model.as_ref(), task).await?;
    if selected.is_empty() {
        return Ok(ToolOutcome::success(
            "No template in the catalog matches the task.",
            &selected,
        ));
    }
    let mut report = format!("Found {} matching templates:", selected.len());
    for template in &selected {
        report.push_str(&format!("\n- {} ({:?})", template.template_name, template.kind));
        if let Some(params) = &template.params {
            report.push_str(&format!("\n  required: {}", params.required.join(", ")));
        }
    }
    Ok(ToolOutcome::success(report, &selected))
}

async fn submit_dataflow_template(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let template_name = args.str("template_name")?;
    let catalog = TemplateCatalog::load(&s.config.templates.dataflow_catalog_path)?;
    let descriptor = catalog.find(template_name)?;
    let params = args.params("params")?;
    let region = s.region(&args);
    let staging = args
        .opt_str("staging_location")
        .map(str::to_string)
        .or_else(|| s.config.gcp.staging_location.clone());
    let request = SubmitRequest {
        job_name: args.opt_str("job_name").unwrap_or(template_name),
        project: &s.project,
        region: &region,
        staging_location: staging.as_deref(),
        descriptor,
        params: &params,
        custom_path: args.opt_str("custom_template_path"),
    };
    let outcome = submit_template(s.runner.as_ref(), &request).await?;
    let report = format!(
        "Job '{}' submitted with template '{}'\n{}",
        outcome.job_name, descriptor.template_name, outcome.stdout
    );
    Ok(ToolOutcome::success(report.trim_end(), &outcome))
}

async fn on_blocking_pool<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Unexpected(format!("blocking task failed: {}", e)))?
}

/// A module path inside the checkout; `..` and absolute paths are refused
fn module_path(template_path: &str) -> Result<PathBuf> {
    let path = Path::new(template_path.trim_matches('/'));
    let inside = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if path.as_os_str().is_empty() || !inside {
        return Err(Error::InvalidInput(format!(
            "Template path '{}' must be a module path inside the templates repository",
            template_path
        )));
    }
    Ok(path.to_path_buf())
}

async fn customize_and_build_template(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let template_name = args.str("template_name")?;
    let template_path = args.str("template_path")?;
    let bucket = args.str("bucket")?;
    let module = module_path(template_path)?;

    let repo = sync_repo(&s.config.templates.dataflow_repo_url, s.workspace(), "main").await?;
    let module_dir = repo.join(module);
    let source = locate_main_source(s.model.as_ref(), &module_dir, template_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Java source for template '{}'", template_name)))?;
    info!(source = %source.display(), "Building template");

    let request = BuildRequest {
        project: s.project.clone(),
        bucket: bucket.to_string(),
        template_name: template_name.to_string(),
        module_dir,
    };
    let staged = build_and_stage(s.runner.as_ref(), &request).await?;
    Ok(ToolOutcome::success(
        format!("Template '{}' was built and staged at {}", staged.template_name, staged.gcs_path),
        &staged,
    ))
}

async fn create_pipeline(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let request = PipelineRequest {
        project: s.project.clone(),
        region: s.region(&args),
        gcs_path: args.str("gcs_path")?.to_string(),
        job_name: args.str("job_name")?.to_string(),
        code: args.str("code")?.to_string(),
        args: args.params("args")?,
        pipeline_type: args.opt_str("pipeline_type").unwrap_or("batch").parse()?,
    };
    let launch = launch_pipeline(s.runner.as_ref(), &request, &s.workspace().join("pipelines")).await?;
    Ok(ToolOutcome::success(
        format!("Pipeline '{}' launched as job {}", launch.job_name, launch.job_id),
        &launch,
    ))
}

async fn sql_from_sttm(s: &Services, args: Args<'_>, target: SqlTarget) -> Result<ToolOutcome> {
    let sql = generate_sql_from_gcs(&s.storage(), s.model.as_ref(), target, args.str("sttm_gcs_path")?).await?;
    Ok(ToolOutcome::success(sql.clone(), &sql))
}

async fn create_cluster(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let name = args.str("cluster_name")?;
    let disk = DiskConfig {
        boot_disk_size_gb: args.opt_u32("boot_disk_size_gb")?.unwrap_or(100),
    };
    let spec = ClusterSpec {
        cluster_name: name.to_string(),
        master: InstanceGroup {
            num_instances: 1,
            machine_type_uri: args.opt_str("master_machine_type").unwrap_or("n1-standard-4").to_string(),
            disk_config: disk.clone(),
        },
        worker: InstanceGroup {
            num_instances: args.opt_u32("num_workers")?.unwrap_or(2),
            machine_type_uri: args.opt_str("worker_machine_type").unwrap_or("n1-standard-4").to_string(),
            disk_config: disk,
        },
        pip_packages: args.list("pip_packages"),
        jar_files_gcs_path: args.opt_str("jar_files_gcs_path").map(str::to_string),
        init_action: args.opt_str("init_action").map(str::to_string),
    };
    let client = clusters(s, &args);
    client.create(&spec).await?;
    let cluster = client.get(name).await?;
    Ok(ToolOutcome::success(
        format!("Cluster '{}' created\n{}", name, cluster.report()),
        &cluster,
    ))
}

async fn create_batch(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let job = BatchJob::from_parts(
        args.str("job_type")?,
        args.opt_str("main_python_file_uri").map(str::to_string),
        args.list("jar_file_uris"),
        args.opt_str("main_class").map(str::to_string),
        args.list("args"),
    )?;
    let batch_id = args
        .opt_str("batch_id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("plumber-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    let mut spec = BatchSpec::new(batch_id.clone(), job);
    spec.properties = args.map("properties")?;
    spec.service_account = s.config.gcp.resolved_service_account();
    spec.subnet_uri = args.opt_str("subnet_uri").map(str::to_string);
    spec.runtime_version = args.opt_str("runtime_version").map(str::to_string);
    spec.staging_bucket = args.opt_str("staging_bucket").map(str::to_string);

    batches(s, &args).create(&spec).await?;
    Ok(ToolOutcome::success(format!("Batch '{}' submitted", batch_id), &batch_id))
}

fn language(args: &Args<'_>) -> Result<TemplateLanguage> {
    args.opt_str("language").unwrap_or("python").parse()
}

async fn get_dataproc_template(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let task = args.str("task")?;
    let language = language(&args)?;
    let repo = sync_repo(&s.config.templates.dataproc_repo_url, s.workspace(), "main").await?;
    match select_template(s.model.as_ref(), &repo, language, task).await? {
        Some(template) => {
            let report = format!(
                "Template '{}' ({})\nrequired: {}\noptional: {}",
                template.template_name,
                language,
                template.params.required.join(", "),
                template.params.optional.join(", ")
            );
            Ok(ToolOutcome::success(report, &template))
        }
        None => Ok(ToolOutcome::success(
            format!("No {} Dataproc template matches the task.", language),
            (),
        )),
    }
}

async fn run_dataproc_template(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let template_name = args.str("template_name")?;
    let language = language(&args)?;
    let declared = TemplateParams::new(args.list("required_params"), args.list("optional_params"));
    let params = args.params("params")?;
    let region = s.region(&args);
    let staging = args
        .opt_str("staging_location")
        .map(str::to_string)
        .or_else(|| s.config.gcp.staging_location.clone())
        .ok_or_else(|| {
            Error::ValidationFailed(
                "A staging location is needed. Pass staging_location or set gcp.staging_location.".to_string(),
            )
        })?;
    let service_account = s.config.gcp.resolved_service_account();
    let request = TemplateRunRequest {
        language,
        template_name,
        project: &s.project,
        region: &region,
        staging_location: &staging,
        declared: &declared,
        params: &params,
        jars: args.opt_str("jars"),
        subnet: args.opt_str("subnet"),
        spark_properties: args.opt_str("spark_properties"),
        service_account: service_account.as_deref(),
    };

    let repo = sync_repo(&s.config.templates.dataproc_repo_url, s.workspace(), "main").await?;
    let outcome = match args.opt_str("transformation_sql") {
        Some(sql) => {
            let template_path = PathBuf::from(args.str("template_path")?);
            let template_path = if template_path.is_absolute() {
                template_path
            } else {
                repo.join(template_path)
            };
            run_template_with_transformation(
                s.runner.as_ref(),
                s.model.as_ref(),
                &repo,
                &template_path,
                sql,
                &s.workspace().join("dataproc_runs"),
                &request,
            )
            .await?
        }
        None => run_template(s.runner.as_ref(), &repo, &request).await?,
    };
    Ok(ToolOutcome::success(
        format!("Template '{}' submitted\n{}", outcome.template_name, outcome.stdout).trim_end(),
        &outcome,
    ))
}

async fn download(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let repo: RepoRef = args.str("repository")?.parse()?;
    let branch = args.opt_str("branch").unwrap_or("main");
    let storage = s.storage();
    let upload = args
        .flag("upload_to_gcs")
        .then_some((&storage, args.opt_str("bucket_name")));
    let checkout = download_repository(&repo, branch, &s.workspace().join("github_downloads"), upload).await?;

    let mut report = format!("Cloned {}@{} into {}", checkout.repository, checkout.branch, checkout.path.display());
    if let Some(upload) = &checkout.upload {
        report.push_str(&format!(
            "\nUploaded {} files to gs://{}/{}",
            upload.files_uploaded, upload.bucket, upload.prefix
        ));
    }
    Ok(ToolOutcome::success(report, &checkout))
}

async fn delete_objects(s: &Services, args: Args<'_>) -> Result<ToolOutcome> {
    let bucket = args.str("bucket_name")?;
    match (args.opt_str("object_name"), args.opt_str("prefix")) {
        (Some(object), _) => {
            s.storage().delete_object(bucket, object).await?;
            Ok(ToolOutcome::success(format!("Deleted gs://{}/{}", bucket, object), ()))
        }
        (None, Some(prefix)) => {
            let deleted = s.storage().delete_prefix(bucket, prefix).await?;
            Ok(ToolOutcome::success(
                format!("Deleted {} objects under gs://{}/{}", deleted.len(), bucket, prefix),
                &deleted,
            ))
        }
        (None, None) => Err(Error::ValidationFailed(
            "Give either object_name or prefix to delete".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::ScriptedModel;
    use crate::logs::fake::{FakeLogSource, page};
    use crate::runner::{CommandOutput, RecordingRunner};

    const CATALOG: &str = r#"[{
        "template_name": "GCS_Text_to_BigQuery_Flex",
        "template_gcs_path": "gs://dataflow-templates-us-central1/latest/flex/GCS_Text_to_BigQuery_Flex",
        "params": {"required": ["inputFilePattern", "outputTable"], "optional": ["delimiter"]}
    }]"#;

    fn services(dir: &Path, runner: Arc<RecordingRunner>, logs: FakeLogSource) -> Services {
        Services::fake(dir, runner, Arc::new(ScriptedModel::failing()), Arc::new(logs))
    }

    #[test]
    fn test_parse_tool_call() {
        let call = ToolCall::parse(
            "```json\n{\"tool\": \"list_clusters\", \"args\": {\"region\": \"europe-west1\"}}\n```",
        )
        .unwrap();
        assert_eq!(call.tool, "list_clusters");
        assert_eq!(call.args["region"], "europe-west1");

        let call = ToolCall::parse("Sure: {\"tool\": \"list_buckets\"}").unwrap();
        assert!(call.args.is_empty());

        assert!(ToolCall::parse("Which region should I use?").is_none());
        assert!(ToolCall::parse("{\"args\": {}}").is_none());
    }

    #[test]
    fn test_args_access() {
        let map = json!({
            "name": "  etl  ",
            "blank": " ",
            "workers": "5",
            "disk": 200,
            "force": "true",
            "packages": "pandas, numpy,",
            "jars": ["gs://a.jar", "gs://b.jar"],
            "params": {"limit": 10, "table": "t"},
            "bad": -1,
        });
        let map = map.as_object().unwrap();
        let args = Args(map);
        assert_eq!(args.str("name").unwrap(), "etl");
        assert!(args.str("blank").is_err());
        assert_eq!(args.opt_u32("workers").unwrap(), Some(5));
        assert_eq!(args.opt_u32("disk").unwrap(), Some(200));
        assert!(args.opt_u32("bad").is_err());
        assert_eq!(args.opt_u32("missing").unwrap(), None);
        assert!(args.flag("force"));
        assert!(!args.flag("missing"));
        assert_eq!(args.list("packages"), vec!["pandas", "numpy"]);
        assert_eq!(args.list("jars").len(), 2);
        let params = args.params("params").unwrap();
        assert_eq!(params.get("limit"), Some("10"));
        assert!(args.params("name").is_err());
    }

    #[tokio::test]
    async fn test_dispatch_refuses_foreign_tool() {
        let dir = tempfile::tempdir().unwrap();
        let s = services(dir.path(), Arc::new(RecordingRunner::new()), FakeLogSource::default());
        let call = ToolCall::new("cancel_dataflow_job", json!({"job_id": "j"}));
        let outcome = dispatch(&s, AgentKind::Monitoring, &call).await;
        assert_eq!(outcome.status, ToolStatus::Failed);
        assert_eq!(outcome.error_code.as_deref(), Some("E001"));
        assert!(outcome.report.contains("not available to monitoring_agent"));
    }

    #[tokio::test]
    async fn test_missing_argument_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = services(dir.path(), Arc::new(RecordingRunner::new()), FakeLogSource::default());
        let call = ToolCall::new("get_dataflow_job_logs", json!({}));
        let outcome = dispatch(&s, AgentKind::Monitoring, &call).await;
        assert!(!outcome.is_success());
        assert!(outcome.report.contains("Missing required argument 'job_id'"));
    }

    #[tokio::test]
    async fn test_dataflow_job_logs_tool() {
        let dir = tempfile::tempdir().unwrap();
        let logs = FakeLogSource::new(vec![page(&["worker started"], None)]);
        let s = services(dir.path(), Arc::new(RecordingRunner::new()), logs);
        let call = ToolCall::new("get_dataflow_job_logs", json!({"job_id": "2024-01-01_42", "limit": 5}));
        let outcome = dispatch(&s, AgentKind::Monitoring, &call).await;
        assert!(outcome.is_success(), "{}", outcome.report);
        assert!(outcome.report.starts_with("Fetched log entries of Job ID: 2024-01-01_42:"));
        assert!(outcome.data.is_some());
    }

    #[tokio::test]
    async fn test_submit_dataflow_template_tool() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catalog.json"), CATALOG).unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "id: 2024-06-30_01_02_03-123\n".to_string(),
            stderr: String::new(),
        });
        let s = services(dir.path(), runner.clone(), FakeLogSource::default());
        let call = ToolCall::new(
            "submit_dataflow_template",
            json!({
                "template_name": "GCS_Text_to_BigQuery_Flex",
                "job_name": "Load Orders",
                "params": {"inputFilePattern": "gs://in/*.csv", "outputTable": "proj:ds.orders"}
            }),
        );
        let outcome = dispatch(&s, AgentKind::Dataflow, &call).await;
        assert!(outcome.is_success(), "{}", outcome.report);
        assert!(outcome.report.starts_with("Job 'load-orders' submitted"));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].display().starts_with("gcloud dataflow flex-template run load-orders"));
    }

    #[tokio::test]
    async fn test_submit_with_invalid_params_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catalog.json"), CATALOG).unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let s = services(dir.path(), runner.clone(), FakeLogSource::default());
        let call = ToolCall::new(
            "submit_dataflow_template",
            json!({"template_name": "GCS_Text_to_BigQuery_Flex", "params": {"inputFilePattern": "gs://in"}}),
        );
        let outcome = dispatch(&s, AgentKind::Dataflow, &call).await;
        assert!(!outcome.is_success());
        assert!(outcome.report.contains("parameter validation error"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_objects_needs_target() {
        let dir = tempfile::tempdir().unwrap();
        let s = services(dir.path(), Arc::new(RecordingRunner::new()), FakeLogSource::default());
        let call = ToolCall::new("delete_objects", json!({"bucket_name": "raw"}));
        let outcome = dispatch(&s, AgentKind::GitHub, &call).await;
        assert!(!outcome.is_success());
        assert!(outcome.report.contains("object_name or prefix"));
    }

    #[tokio::test]
    async fn test_run_dataproc_template_needs_staging() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let s = services(dir.path(), runner.clone(), FakeLogSource::default());
        let call = ToolCall::new(
            "run_dataproc_template",
            json!({"template_name": "GCSTOBIGQUERY", "params": {}, "required_params": []}),
        );
        let outcome = dispatch(&s, AgentKind::DataprocTemplate, &call).await;
        assert!(!outcome.is_success());
        assert!(outcome.report.contains("staging location"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_module_path_stays_inside_checkout() {
        assert_eq!(
            module_path("/v2/googlecloud-to-googlecloud/").unwrap(),
            PathBuf::from("v2/googlecloud-to-googlecloud")
        );
        assert!(module_path("../outside").is_err());
        assert!(module_path("v2/../../etc").is_err());
        assert!(module_path("/").is_err());
    }

    #[tokio::test]
    async fn test_build_template_refuses_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let s = services(dir.path(), runner.clone(), FakeLogSource::default());
        let call = ToolCall::new(
            "customize_and_build_template",
            json!({"template_name": "Word_Count", "template_path": "v2/../../..", "bucket": "b"}),
        );
        let outcome = dispatch(&s, AgentKind::Dataflow, &call).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_code.as_deref(), Some("E002"));
        assert!(runner.calls().is_empty());
        assert!(!dir.path().join("workspace").exists());
    }

    #[tokio::test]
    async fn test_local_git_tools() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let s = services(dir.path(), runner.clone(), FakeLogSource::default());
        let run = |tool: &'static str, args: Value| {
            let s = &s;
            async move { dispatch(s, AgentKind::GitHub, &ToolCall::new(tool, args)).await }
        };

        let outcome = run("initialize_git_repo", json!({"repo_path": "etl"})).await;
        assert!(outcome.is_success(), "{}", outcome.report);
        let repo = dir.path().join("workspace/etl");
        std::fs::write(repo.join("job.py"), "print('hi')").unwrap();

        let outcome = run("get_git_status", json!({"repo_path": "etl"})).await;
        assert!(outcome.report.contains("job.py (untracked)"));

        let outcome = run("add_files_to_git", json!({"repo_path": "etl", "files": "job.py"})).await;
        assert!(outcome.is_success(), "{}", outcome.report);
        let outcome = run(
            "commit_changes",
            json!({
                "repo_path": repo.to_string_lossy(),
                "message": "Add job",
                "author_name": "Dev",
                "author_email": "dev@example.com"
            }),
        )
        .await;
        assert!(outcome.is_success(), "{}", outcome.report);
        assert!(outcome.report.ends_with(": Add job"));

        let outcome = run("switch_git_branch", json!({"repo_path": "etl", "branch": "dev", "create": true})).await;
        assert!(outcome.is_success(), "{}", outcome.report);
        let outcome = run("list_git_branches", json!({"repo_path": "etl"})).await;
        assert!(outcome.report.contains("* dev"));

        let outcome = run("switch_git_branch", json!({"repo_path": "etl", "branch": "nope"})).await;
        assert_eq!(outcome.error_code.as_deref(), Some("E100"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ToolOutcome::success("done", ());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, json!({"status": "success", "report": "done"}));

        let failed = ToolOutcome::failed(&Error::NotFound("Cluster 'c'".to_string()));
        assert_eq!(failed.error_code.as_deref(), Some("E100"));
    }
}

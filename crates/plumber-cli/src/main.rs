//! Plumber CLI - data engineering assistant for Google Cloud

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use plumber_core::agents::{AgentKind, AgentReply, Assistant, Services, ToolCall, ToolOutcome, dispatch};
use plumber_core::config::{Config, github_token};
use plumber_core::dataflow::{SubmitRequest, build_submit_command, sanitize, submit_template};
use plumber_core::gcs::sanitize_bucket_name;
use plumber_core::llm::Message;
use plumber_core::logs::{ResourceSelector, build_resource_filter};
use plumber_core::runner::{CommandRunner, CommandSpec, ProcessRunner};
use plumber_core::templates::{TemplateCatalog, UserParams, validate_json};
use serde_json::{Value, json};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "plumber")]
#[command(author, version, about = "Multi-agent data engineering assistant for Google Cloud", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// GCP project, overrides the environment and the config file
    #[arg(long, global = true)]
    project: Option<String>,

    /// GCP region, overrides the environment and the config file
    #[arg(long, global = true)]
    region: Option<String>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the assistant a single question
    Ask {
        /// The request, in plain language
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
        /// Skip routing and ask this agent directly
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// Start an interactive session
    Chat {
        /// Skip routing and talk to this agent only
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// Dataflow templates and jobs
    Dataflow {
        #[command(subcommand)]
        action: DataflowAction,
    },

    /// Dataproc clusters, batches and templates
    Dataproc {
        #[command(subcommand)]
        action: DataprocAction,
    },

    /// Cloud Logging queries
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },

    /// Cloud Monitoring metrics
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },

    /// Cloud Storage buckets and objects
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },

    /// GitHub repositories
    Github {
        #[command(subcommand)]
        action: GithubAction,
    },

    /// Print the sanitized form of a job or bucket name
    Sanitize {
        name: String,
        /// Sanitize as a bucket name instead of a job name
        #[arg(long)]
        bucket: bool,
    },

    /// Validate template parameters against their declaration
    Validate {
        /// Declared parameters, e.g. '{"required": ["a"], "optional": ["b"]}'
        #[arg(long)]
        params: String,
        /// User inputs as a JSON object
        #[arg(long)]
        inputs: String,
    },

    /// Print the Cloud Logging filter for a resource
    Filter {
        kind: FilterKind,
        /// Label value, or the resource type for `resource`
        value: String,
        /// Free text scanned for a severity
        #[arg(short, long)]
        severity: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FilterKind {
    DataflowJob,
    ClusterName,
    ClusterUuid,
    Batch,
    Resource,
}

#[derive(Subcommand)]
enum DataflowAction {
    /// List catalog templates, optionally ranked for a task
    Templates {
        /// Task description
        task: Option<String>,
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
    /// Launch a catalog template
    Submit {
        template: String,
        /// Job name, sanitized before use
        #[arg(short, long)]
        job_name: Option<String>,
        /// Template parameter as key=value, repeatable
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Template parameters as a JSON object
        #[arg(long, conflicts_with = "params")]
        params_json: Option<String>,
        #[arg(long)]
        staging_location: Option<String>,
        /// Previously staged custom template
        #[arg(long)]
        custom_path: Option<String>,
        /// Print the command without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Build and stage a template from the DataflowTemplates repository
    Build {
        template: String,
        /// Module path inside the repository, e.g. v2/googlecloud-to-googlecloud
        #[arg(long)]
        template_path: String,
        /// Bucket name for the staged template
        #[arg(long)]
        bucket: String,
    },
    /// Dataflow jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List recent jobs
    List {
        /// Job state, e.g. running or done
        #[arg(short, long)]
        status: Option<String>,
        /// Location; all locations when omitted
        #[arg(short, long)]
        location: Option<String>,
    },
    /// Show a job and its metrics
    Show { job_id: String },
    /// Cancel a job
    Cancel { job_id: String },
}

#[derive(Subcommand)]
enum DataprocAction {
    /// Dataproc clusters
    Clusters {
        #[command(subcommand)]
        action: ClustersAction,
    },
    /// Dataproc Serverless batches
    Batches {
        #[command(subcommand)]
        action: BatchesAction,
    },
    /// Dataproc templates
    Templates {
        #[command(subcommand)]
        action: DataprocTemplatesAction,
    },
}

#[derive(Subcommand)]
enum ClustersAction {
    List,
    Show {
        name: String,
    },
    Create {
        name: String,
        #[arg(short, long, default_value = "2")]
        workers: u32,
        #[arg(long)]
        master_machine_type: Option<String>,
        #[arg(long)]
        worker_machine_type: Option<String>,
        #[arg(long)]
        boot_disk_size_gb: Option<u32>,
        /// Pip package to install, repeatable
        #[arg(long = "pip-package")]
        pip_packages: Vec<String>,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Resize {
        name: String,
        workers: u32,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum BatchesAction {
    List {
        /// Only batches in this state
        #[arg(short, long)]
        state: Option<String>,
    },
    Show {
        batch_id: String,
    },
    Create {
        /// pyspark or spark
        #[arg(long = "type")]
        job_type: String,
        #[arg(long)]
        batch_id: Option<String>,
        #[arg(long)]
        main_python_file: Option<String>,
        /// Jar URI, repeatable
        #[arg(long = "jar")]
        jars: Vec<String>,
        #[arg(long)]
        main_class: Option<String>,
        /// Job argument, repeatable
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
    },
    Delete {
        batch_id: String,
    },
}

#[derive(Subcommand)]
enum DataprocTemplatesAction {
    /// Run a template from the dataproc-templates repository
    Run {
        template: String,
        #[arg(short, long, default_value = "python")]
        language: String,
        /// Template parameter as key=value, repeatable
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Declared required parameter, repeatable
        #[arg(long)]
        required: Vec<String>,
        /// Declared optional parameter, repeatable
        #[arg(long)]
        optional: Vec<String>,
        #[arg(long)]
        staging_location: Option<String>,
    },
}

#[derive(Subcommand)]
enum LogsAction {
    /// Logs of a Dataflow job
    DataflowJob {
        job_id: String,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Logs of a Dataproc cluster
    Cluster {
        #[arg(long, required_unless_present = "uuid", conflicts_with = "uuid")]
        name: Option<String>,
        #[arg(long)]
        uuid: Option<String>,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Logs of a Dataproc job or batch
    DataprocJob {
        job_id: String,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Latest logs of a resource type
    Resource {
        resource_type: String,
        #[arg(short, long)]
        severity: Option<String>,
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand)]
enum MonitorAction {
    /// CPU utilisation of VM instances over the last five minutes
    Cpu,
}

#[derive(Subcommand)]
enum StorageAction {
    /// List buckets
    Buckets,
    /// List objects in a bucket
    Objects {
        bucket: String,
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Create a bucket if missing
    CreateBucket {
        name: String,
        #[arg(long, default_value = "us-central1")]
        location: String,
        #[arg(long, default_value = "STANDARD")]
        storage_class: String,
    },
    /// Upload a file or directory
    Upload {
        local_path: PathBuf,
        /// gs://bucket/object for a file, gs://bucket[/prefix] for a directory
        destination: String,
    },
    /// Download an object
    Download {
        gcs_path: String,
        #[arg(short, long)]
        to: Option<PathBuf>,
    },
    /// Delete an object or every object under a prefix
    Delete {
        bucket: String,
        #[arg(long, required_unless_present = "prefix", conflicts_with = "prefix")]
        object: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete a bucket
    DeleteBucket {
        name: String,
        /// Delete the objects first
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum GithubAction {
    /// Search repositories
    Search { query: String },
    /// List branches of a repository
    Branches { repository: String },
    /// Clone a branch, optionally mirroring it to a bucket
    Clone {
        repository: String,
        #[arg(short, long, default_value = "main")]
        branch: String,
        /// Upload the checkout to Cloud Storage
        #[arg(long)]
        upload: bool,
        #[arg(long, requires = "upload")]
        bucket: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Settings shared by every command
struct Ctx {
    config: Config,
    format: OutputFormat,
    quiet: bool,
    project: Option<String>,
    region: String,
}

impl Ctx {
    fn require_project(&self) -> anyhow::Result<String> {
        match &self.project {
            Some(project) => Ok(project.clone()),
            None => self.config.gcp.require_project(),
        }
    }

    fn services(&self) -> anyhow::Result<Services> {
        let project = self.require_project()?;
        Services::connect(self.config.clone(), project).context("Failed to set up Google Cloud clients")
    }

    fn print_json(&self, value: &impl serde::Serialize) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Run one agent tool and print its outcome
    async fn run_tool(&self, agent: AgentKind, tool: &str, mut args: Value) -> anyhow::Result<()> {
        if let Value::Object(map) = &mut args {
            map.entry("region").or_insert_with(|| json!(self.region));
            map.retain(|_, v| !v.is_null());
        }
        let services = self.services()?;
        let call = ToolCall::new(tool, args);
        let outcome = dispatch(&services, agent, &call).await;
        self.print_outcome(&outcome)
    }

    fn print_outcome(&self, outcome: &ToolOutcome) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(outcome)?,
            OutputFormat::Text if !self.quiet || !outcome.is_success() => println!("{}", outcome.report),
            OutputFormat::Text => {}
        }
        if outcome.is_success() {
            Ok(())
        } else {
            Err(anyhow!(
                "command failed ({})",
                outcome.error_code.as_deref().unwrap_or("unknown")
            ))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("plumber=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        command,
        format,
        quiet,
        project,
        region,
    } = Cli::parse();

    // Config management works on the raw file, before overrides
    let command = match command {
        Commands::Config { action } => return cmd_config(action, quiet),
        other => other,
    };

    let config = Config::load()?;
    let region = region.unwrap_or_else(|| config.gcp.resolved_region());
    let project = project.or_else(|| config.gcp.resolved_project());
    let ctx = Ctx {
        config,
        format,
        quiet,
        project,
        region,
    };

    match command {
        Commands::Ask { request, agent } => cmd_ask(&ctx, &request.join(" "), agent.as_deref()).await,
        Commands::Chat { agent } => cmd_chat(&ctx, agent.as_deref()).await,
        Commands::Dataflow { action } => cmd_dataflow(&ctx, action).await,
        Commands::Dataproc { action } => cmd_dataproc(&ctx, action).await,
        Commands::Logs { action } => cmd_logs(&ctx, action).await,
        Commands::Monitor { action } => match action {
            MonitorAction::Cpu => ctx.run_tool(AgentKind::Monitoring, "get_cpu_utilization", json!({})).await,
        },
        Commands::Storage { action } => cmd_storage(&ctx, action).await,
        Commands::Github { action } => cmd_github(&ctx, action).await,
        Commands::Sanitize { name, bucket } => cmd_sanitize(&ctx, &name, bucket),
        Commands::Validate { params, inputs } => cmd_validate(&ctx, &params, &inputs),
        Commands::Filter { kind, value, severity } => cmd_filter(&ctx, kind, &value, severity.as_deref()),
        Commands::Doctor => cmd_doctor(&ctx).await,
        Commands::Config { .. } => Ok(()),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn parse_agent(name: Option<&str>) -> anyhow::Result<Option<AgentKind>> {
    name.map(|n| n.parse::<AgentKind>().map_err(anyhow::Error::from))
        .transpose()
}

fn reply_text(ctx: &Ctx, agent: AgentKind, reply: &AgentReply) -> String {
    if ctx.quiet {
        reply.text().to_string()
    } else {
        format!("[{}] {}", agent, reply.text())
    }
}

async fn cmd_ask(ctx: &Ctx, request: &str, agent: Option<&str>) -> anyhow::Result<()> {
    let agent = parse_agent(agent)?;
    let assistant = Assistant::new(Arc::new(ctx.services()?));
    let turn = match agent {
        Some(agent) => assistant.handle_with(agent, request, &[]).await?,
        None => assistant.handle(request, &[]).await?,
    };
    match ctx.format {
        OutputFormat::Json => ctx.print_json(&turn),
        OutputFormat::Text => {
            println!("{}", reply_text(ctx, turn.agent, &turn.reply));
            Ok(())
        }
    }
}

async fn cmd_chat(ctx: &Ctx, agent: Option<&str>) -> anyhow::Result<()> {
    use rustyline::error::ReadlineError;

    let agent = parse_agent(agent)?;
    let assistant = Assistant::new(Arc::new(ctx.services()?));
    let mut editor = rustyline::DefaultEditor::new()?;
    let mut history: Vec<Message> = Vec::new();

    if !ctx.quiet {
        println!("Plumber - data engineering assistant for Google Cloud");
        println!("Project: {}  Region: {}", assistant.services().project, ctx.region);
        println!("Type `exit` or press Ctrl-D to quit.\n");
    }

    loop {
        let line = match editor.readline("plumber> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if matches!(request, "exit" | "quit") {
            break;
        }
        editor.add_history_entry(request)?;

        let result = match agent {
            Some(agent) => assistant.handle_with(agent, request, &history).await,
            None => assistant.handle(request, &history).await,
        };
        match result {
            Ok(turn) => {
                println!("{}\n", reply_text(ctx, turn.agent, &turn.reply));
                history.extend(turn.history_messages(request));
            }
            Err(e) => {
                println!("Error [{}]: {}", e.code(), e);
                if let Some(suggestion) = e.suggestion() {
                    println!("{}", suggestion);
                }
                println!();
            }
        }
    }
    debug!(turns = history.len() / 2, "Chat ended");
    Ok(())
}

fn parse_params(pairs: &[String], json: Option<&str>) -> anyhow::Result<UserParams> {
    Ok(match json {
        Some(json) => UserParams::from_json(json)?,
        None => UserParams::from_pairs(pairs)?,
    })
}

fn params_value(params: &UserParams) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
    )
}

async fn cmd_dataflow(ctx: &Ctx, action: DataflowAction) -> anyhow::Result<()> {
    match action {
        DataflowAction::Templates { task, limit } => {
            let path = &ctx.config.templates.dataflow_catalog_path;
            let catalog = TemplateCatalog::load(path)
                .with_context(|| format!("Failed to load template catalog: {}", path.display()))?;
            let templates: Vec<_> = match task.as_deref() {
                Some(task) => catalog.search(task, limit),
                None => catalog.templates().iter().collect(),
            };
            if ctx.format == OutputFormat::Json {
                return ctx.print_json(&templates);
            }
            if !ctx.quiet {
                println!("Found {} templates:", templates.len());
            }
            for template in templates {
                let required = template
                    .params
                    .as_ref()
                    .map(|p| p.required.join(", "))
                    .unwrap_or_default();
                println!("  {} ({}) required: [{}]", template.template_name, template.kind, required);
            }
            Ok(())
        }
        DataflowAction::Submit {
            template,
            job_name,
            params,
            params_json,
            staging_location,
            custom_path,
            dry_run,
        } => {
            let project = ctx.require_project()?;
            let path = &ctx.config.templates.dataflow_catalog_path;
            let catalog = TemplateCatalog::load(path)
                .with_context(|| format!("Failed to load template catalog: {}", path.display()))?;
            let descriptor = catalog.find(&template)?;
            let params = parse_params(&params, params_json.as_deref())?;
            let staging = staging_location.or_else(|| ctx.config.gcp.staging_location.clone());
            let request = SubmitRequest {
                job_name: job_name.as_deref().unwrap_or(&template),
                project: &project,
                region: &ctx.region,
                staging_location: staging.as_deref(),
                descriptor,
                params: &params,
                custom_path: custom_path.as_deref(),
            };

            if dry_run {
                let plan = build_submit_command(&request)?;
                return match ctx.format {
                    OutputFormat::Json => ctx.print_json(&plan),
                    OutputFormat::Text => {
                        println!("{}", plan.command.display());
                        Ok(())
                    }
                };
            }

            let runner = ProcessRunner::new(Duration::from_secs(ctx.config.runner.command_timeout_secs));
            info!(template = %template, "Submitting Dataflow template");
            let outcome = submit_template(&runner, &request).await?;
            match ctx.format {
                OutputFormat::Json => ctx.print_json(&outcome),
                OutputFormat::Text => {
                    if !ctx.quiet {
                        println!("Job '{}' submitted ({} template)", outcome.job_name, outcome.kind);
                    }
                    print!("{}", outcome.stdout);
                    Ok(())
                }
            }
        }
        DataflowAction::Build {
            template,
            template_path,
            bucket,
        } => {
            ctx.run_tool(
                AgentKind::Dataflow,
                "customize_and_build_template",
                json!({"template_name": template, "template_path": template_path, "bucket": bucket}),
            )
            .await
        }
        DataflowAction::Jobs { action } => match action {
            JobsAction::List { status, location } => {
                ctx.run_tool(
                    AgentKind::Dataflow,
                    "list_dataflow_jobs",
                    json!({"status": status, "location": location}),
                )
                .await
            }
            JobsAction::Show { job_id } => {
                ctx.run_tool(
                    AgentKind::Dataflow,
                    "get_dataflow_job_details",
                    json!({"job_id": job_id, "location": ctx.region}),
                )
                .await
            }
            JobsAction::Cancel { job_id } => {
                ctx.run_tool(
                    AgentKind::Dataflow,
                    "cancel_dataflow_job",
                    json!({"job_id": job_id, "location": ctx.region}),
                )
                .await
            }
        },
    }
}

async fn cmd_dataproc(ctx: &Ctx, action: DataprocAction) -> anyhow::Result<()> {
    let (agent, tool, args) = match action {
        DataprocAction::Clusters { action } => {
            let (tool, args) = match action {
                ClustersAction::List => ("list_clusters", json!({})),
                ClustersAction::Show { name } => ("get_cluster", json!({"cluster_name": name})),
                ClustersAction::Create {
                    name,
                    workers,
                    master_machine_type,
                    worker_machine_type,
                    boot_disk_size_gb,
                    pip_packages,
                } => (
                    "create_cluster",
                    json!({
                        "cluster_name": name,
                        "num_workers": workers,
                        "master_machine_type": master_machine_type,
                        "worker_machine_type": worker_machine_type,
                        "boot_disk_size_gb": boot_disk_size_gb,
                        "pip_packages": pip_packages,
                    }),
                ),
                ClustersAction::Start { name } => ("start_cluster", json!({"cluster_name": name})),
                ClustersAction::Stop { name } => ("stop_cluster", json!({"cluster_name": name})),
                ClustersAction::Resize { name, workers } => {
                    ("resize_cluster", json!({"cluster_name": name, "num_workers": workers}))
                }
                ClustersAction::Delete { name } => ("delete_cluster", json!({"cluster_name": name})),
            };
            (AgentKind::Dataproc, tool, args)
        }
        DataprocAction::Batches { action } => {
            let (tool, args) = match action {
                BatchesAction::List { state } => ("list_batches", json!({"state": state})),
                BatchesAction::Show { batch_id } => ("get_batch", json!({"batch_id": batch_id})),
                BatchesAction::Create {
                    job_type,
                    batch_id,
                    main_python_file,
                    jars,
                    main_class,
                    args,
                } => (
                    "create_batch",
                    json!({
                        "job_type": job_type,
                        "batch_id": batch_id,
                        "main_python_file_uri": main_python_file,
                        "jar_file_uris": jars,
                        "main_class": main_class,
                        "args": args,
                    }),
                ),
                BatchesAction::Delete { batch_id } => ("delete_batch", json!({"batch_id": batch_id})),
            };
            (AgentKind::Dataproc, tool, args)
        }
        DataprocAction::Templates { action } => match action {
            DataprocTemplatesAction::Run {
                template,
                language,
                params,
                required,
                optional,
                staging_location,
            } => {
                let params = UserParams::from_pairs(&params)?;
                (
                    AgentKind::DataprocTemplate,
                    "run_dataproc_template",
                    json!({
                        "template_name": template,
                        "language": language,
                        "params": params_value(&params),
                        "required_params": required,
                        "optional_params": optional,
                        "staging_location": staging_location,
                    }),
                )
            }
        },
    };
    ctx.run_tool(agent, tool, args).await
}

async fn cmd_logs(ctx: &Ctx, action: LogsAction) -> anyhow::Result<()> {
    let (tool, args) = match action {
        LogsAction::DataflowJob { job_id, limit } => {
            ("get_dataflow_job_logs", json!({"job_id": job_id, "limit": limit}))
        }
        LogsAction::Cluster { name, uuid, limit } => match (name, uuid) {
            (Some(name), _) => (
                "get_cluster_logs_by_name",
                json!({"cluster_name": name, "limit": limit}),
            ),
            (None, Some(uuid)) => (
                "get_cluster_logs_by_uuid",
                json!({"cluster_uuid": uuid, "limit": limit}),
            ),
            (None, None) => bail!("Give a cluster --name or --uuid"),
        },
        LogsAction::DataprocJob { job_id, limit } => {
            ("get_dataproc_job_logs", json!({"job_id": job_id, "limit": limit}))
        }
        LogsAction::Resource {
            resource_type,
            severity,
            limit,
        } => (
            "get_resource_logs",
            json!({"resource_type": resource_type, "severity": severity, "limit": limit}),
        ),
    };
    ctx.run_tool(AgentKind::Monitoring, tool, args).await
}

async fn cmd_storage(ctx: &Ctx, action: StorageAction) -> anyhow::Result<()> {
    let (tool, args) = match action {
        StorageAction::Buckets => ("list_buckets", json!({})),
        StorageAction::Objects { bucket, prefix } => {
            ("list_objects", json!({"bucket_name": bucket, "prefix": prefix}))
        }
        StorageAction::CreateBucket {
            name,
            location,
            storage_class,
        } => (
            "create_bucket",
            json!({"bucket_name": name, "location": location, "storage_class": storage_class}),
        ),
        StorageAction::Upload {
            local_path,
            destination,
        } => {
            if local_path.is_dir() {
                let target = destination.trim_start_matches("gs://");
                let (bucket, prefix) = target.split_once('/').unwrap_or((target, ""));
                (
                    "upload_directory",
                    json!({"local_path": local_path, "bucket_name": bucket, "prefix": prefix}),
                )
            } else {
                (
                    "upload_file",
                    json!({"local_path": local_path, "gcs_path": destination}),
                )
            }
        }
        StorageAction::Download { gcs_path, to } => {
            ("download_object", json!({"gcs_path": gcs_path, "local_path": to}))
        }
        StorageAction::Delete {
            bucket,
            object,
            prefix,
        } => (
            "delete_objects",
            json!({"bucket_name": bucket, "object_name": object, "prefix": prefix}),
        ),
        StorageAction::DeleteBucket { name, force } => {
            ("delete_bucket", json!({"bucket_name": name, "force": force}))
        }
    };
    ctx.run_tool(AgentKind::GitHub, tool, args).await
}

async fn cmd_github(ctx: &Ctx, action: GithubAction) -> anyhow::Result<()> {
    let (tool, args) = match action {
        GithubAction::Search { query } => ("search_repositories", json!({"query": query})),
        GithubAction::Branches { repository } => ("list_branches", json!({"repository": repository})),
        GithubAction::Clone {
            repository,
            branch,
            upload,
            bucket,
        } => (
            "download_repository",
            json!({
                "repository": repository,
                "branch": branch,
                "upload_to_gcs": upload,
                "bucket_name": bucket,
            }),
        ),
    };
    ctx.run_tool(AgentKind::GitHub, tool, args).await
}

fn cmd_sanitize(ctx: &Ctx, name: &str, bucket: bool) -> anyhow::Result<()> {
    let sanitized = if bucket {
        sanitize_bucket_name(name)
    } else {
        sanitize(name)
    };
    match ctx.format {
        OutputFormat::Json => ctx.print_json(&json!({"input": name, "sanitized": sanitized})),
        OutputFormat::Text => {
            println!("{}", sanitized);
            Ok(())
        }
    }
}

fn cmd_validate(ctx: &Ctx, params: &str, inputs: &str) -> anyhow::Result<()> {
    let result = validate_json(params, inputs);
    match ctx.format {
        OutputFormat::Json => ctx.print_json(&result)?,
        OutputFormat::Text => println!("{}", result),
    }
    if result.is_success() {
        Ok(())
    } else {
        bail!("parameter validation failed")
    }
}

fn cmd_filter(ctx: &Ctx, kind: FilterKind, value: &str, severity: Option<&str>) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    let selector = match kind {
        FilterKind::DataflowJob => Some(ResourceSelector::DATAFLOW_JOB),
        FilterKind::ClusterName => Some(ResourceSelector::DATAPROC_CLUSTER_NAME),
        FilterKind::ClusterUuid => Some(ResourceSelector::DATAPROC_CLUSTER_UUID),
        FilterKind::Batch => Some(ResourceSelector::DATAPROC_BATCH),
        FilterKind::Resource => None,
    };
    let filter = match selector {
        Some(selector) => selector.filter(value, severity, now),
        None => build_resource_filter(value, severity, now),
    };
    match ctx.format {
        OutputFormat::Json => ctx.print_json(&json!({"filter": filter})),
        OutputFormat::Text => {
            println!("{}", filter);
            Ok(())
        }
    }
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(ctx: &Ctx) -> anyhow::Result<()> {
    let quiet = ctx.quiet;
    if !quiet {
        println!("Plumber Health Check");
        println!("====================");
        println!();
    }

    let mut all_ok = true;

    match ctx.config.validate() {
        Ok(()) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
        }
    }

    match &ctx.project {
        Some(project) => {
            if !quiet {
                println!("[OK] Project: {} (region {})", project, ctx.region);
            }
        }
        None => {
            all_ok = false;
            if !quiet {
                println!("[!!] Project: Not configured");
                println!("     Set GOOGLE_CLOUD_PROJECT or run `plumber config set gcp.project <id>`");
            }
        }
    }

    let runner = ProcessRunner::new(Duration::from_secs(30));
    let gcloud = CommandSpec::new("gcloud").arg("--version");
    match runner.run(&gcloud).await {
        Ok(output) if output.success() => {
            if !quiet {
                let version = output.stdout.lines().next().unwrap_or_default().to_string();
                println!("[OK] gcloud: {}", version);
            }
        }
        _ => {
            all_ok = false;
            if !quiet {
                println!("[!!] gcloud: Not found on PATH");
            }
        }
    }

    if !quiet {
        match github_token() {
            Some(_) => println!("[OK] GitHub token: Configured"),
            None => println!("[--] GitHub token: Not set (GITHUB_TOKEN), GitHub search is rate limited"),
        }
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
        let catalog = &ctx.config.templates.dataflow_catalog_path;
        match TemplateCatalog::load(catalog) {
            Ok(c) => println!("[OK] Template catalog: {} templates", c.len()),
            Err(e) => println!("[--] Template catalog: {} ({})", catalog.display(), e),
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;

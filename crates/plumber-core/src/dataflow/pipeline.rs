//! Running hand-written Python Beam pipelines on Dataflow

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::info;

use super::job_name::sanitize;
use crate::error::{Error, Result};
use crate::runner::{CommandRunner, CommandSpec};
use crate::templates::UserParams;

/// Dataflow job ids look like `2024-05-01_01_02_03-1234567890`
static JOB_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}_\d{2}_\d{2}_\d{2}-\d+").ok());

/// Whether the pipeline terminates on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineType {
    Batch,
    Streaming,
}

impl FromStr for PipelineType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "streaming" => Ok(Self::Streaming),
            other => Err(Error::InvalidInput(format!(
                "Invalid pipeline type '{}'. Choose 'batch' or 'streaming'.",
                other
            ))),
        }
    }
}

/// A pipeline to run
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub project: String,
    pub region: String,
    /// `gs://bucket[/prefix]` for temp and staging files
    pub gcs_path: String,
    pub job_name: String,
    pub code: String,
    pub args: UserParams,
    pub pipeline_type: PipelineType,
}

/// A launched pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineLaunch {
    pub job_name: String,
    pub job_id: String,
    pub output: String,
}

/// Find a Dataflow job id in launcher output
pub fn extract_job_id(output: &str) -> Option<String> {
    JOB_ID
        .as_ref()?
        .find(output)
        .map(|m| m.as_str().to_string())
}

/// `python3 <script> --runner DataflowRunner ...` for a request.
///
/// Caller arguments override the defaults they collide with.
pub fn pipeline_command(request: &PipelineRequest, script: &Path) -> Result<CommandSpec> {
    if request.project.trim().is_empty() || request.region.trim().is_empty() {
        return Err(Error::ValidationFailed(
            "project and region are required".to_string(),
        ));
    }
    if !request.gcs_path.starts_with("gs://") {
        return Err(Error::ValidationFailed(
            "gcs_path must start with 'gs://'".to_string(),
        ));
    }

    let base = request.gcs_path.trim_end_matches('/');
    let mut args = UserParams::new()
        .with("runner", "DataflowRunner")
        .with("project", &request.project)
        .with("region", &request.region)
        .with("job_name", sanitize(&request.job_name))
        .with("temp_location", format!("{}/temp", base))
        .with("staging_location", format!("{}/staging", base))
        .with("labels", r#"{"source": "plumber"}"#);
    if request.pipeline_type == PipelineType::Streaming {
        args.insert("streaming", "true");
    }
    for (key, value) in request.args.iter() {
        args.insert(key, value);
    }

    let mut command = CommandSpec::new("python3").arg(script.display().to_string());
    for (key, value) in args.iter() {
        command = command.arg(format!("--{}", key)).arg(value);
    }
    Ok(command)
}

/// Write the code to a scratch file under `work_dir` and launch it.
///
/// Streaming launchers are stopped once the job id appears; batch
/// launchers run to completion.
pub async fn launch_pipeline(
    runner: &dyn CommandRunner,
    request: &PipelineRequest,
    work_dir: &Path,
) -> Result<PipelineLaunch> {
    tokio::fs::create_dir_all(work_dir).await?;
    let script: PathBuf = work_dir.join(format!("pipeline_{}.py", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&script, &request.code).await?;

    let result = run_script(runner, request, &script).await;
    // Best effort; a leftover scratch file is harmless
    let _ = tokio::fs::remove_file(&script).await;
    result
}

async fn run_script(runner: &dyn CommandRunner, request: &PipelineRequest, script: &Path) -> Result<PipelineLaunch> {
    let command = pipeline_command(request, script)?;
    let job_name = sanitize(&request.job_name);
    info!(job_name = %job_name, pipeline_type = ?request.pipeline_type, "Launching Beam pipeline");

    let output = match (request.pipeline_type, JOB_ID.as_ref()) {
        (PipelineType::Streaming, Some(pattern)) => runner.run_until_match(&command, pattern).await?,
        _ => runner.run(&command).await?,
    };
    let combined = format!("{}{}", output.stdout, output.stderr);
    let output = output.into_result(&command)?;

    let job_id = extract_job_id(&combined).ok_or_else(|| Error::CommandFailed {
        command: command.display(),
        exit_code: output.exit_code,
        stdout: output.stdout.clone(),
        stderr: "Job launched, but no job id was found in the output".to_string(),
    })?;

    Ok(PipelineLaunch {
        job_name,
        job_id,
        output: combined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, RecordingRunner};

    fn request(pipeline_type: PipelineType) -> PipelineRequest {
        PipelineRequest {
            project: "my-proj".to_string(),
            region: "us-central1".to_string(),
            gcs_path: "gs://my-bucket/beam/".to_string(),
            job_name: "Word Count".to_string(),
            code: "import apache_beam as beam\n".to_string(),
            args: UserParams::new().with("input", "gs://in/*.txt").with("region", "europe-west1"),
            pipeline_type,
        }
    }

    #[test]
    fn test_pipeline_type_parse() {
        assert_eq!("Streaming".parse::<PipelineType>().unwrap(), PipelineType::Streaming);
        assert!("micro-batch".parse::<PipelineType>().is_err());
    }

    #[test]
    fn test_pipeline_command() {
        let command = pipeline_command(&request(PipelineType::Streaming), Path::new("/tmp/p.py")).unwrap();
        let args = command.args.join(" ");
        assert!(args.starts_with("/tmp/p.py --runner DataflowRunner --project my-proj"));
        // Caller value overrides the default in place
        assert!(args.contains("--region europe-west1"));
        assert!(args.contains("--job_name word-count"));
        assert!(args.contains("--temp_location gs://my-bucket/beam/temp"));
        assert!(args.contains("--streaming true"));
        assert!(args.ends_with("--input gs://in/*.txt"));
    }

    #[test]
    fn test_pipeline_command_requires_gcs_path() {
        let mut req = request(PipelineType::Batch);
        req.gcs_path = "my-bucket".to_string();
        assert!(matches!(
            pipeline_command(&req, Path::new("p.py")),
            Err(Error::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_extract_job_id() {
        let output = "INFO:root:Job 2024-05-01_01_02_03-1234567890 is in state JOB_STATE_PENDING";
        assert_eq!(extract_job_id(output).as_deref(), Some("2024-05-01_01_02_03-1234567890"));
        assert_eq!(extract_job_id("no id"), None);
    }

    #[tokio::test]
    async fn test_launch_batch_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: "Submitted job: 2024-05-01_01_02_03-99\n".to_string(),
        });
        let launch = launch_pipeline(&runner, &request(PipelineType::Batch), dir.path())
            .await
            .unwrap();
        assert_eq!(launch.job_id, "2024-05-01_01_02_03-99");
        assert_eq!(launch.job_name, "word-count");
        // Scratch script is removed
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_launch_without_job_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let err = launch_pipeline(&runner, &request(PipelineType::Batch), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no job id"));
    }
}

//! Running Google's Dataproc templates from a local checkout
//!
//! The dataproc-templates repository ships Python and Java flavours of the
//! same templates. Everything that differs between them lives in the
//! [`TemplateLanguage`] table below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::llm::{LanguageModel, strip_code_fences};
use crate::runner::{CommandRunner, CommandSpec};
use crate::templates::{TemplateParams, UserParams, find_files, validate, walk_files};

/// Label every template run carries
pub const SUBMITTED_FROM_LABEL: &str = "--labels=submitted_from=plumber";

/// Model answer for "nothing fits"
const NOT_FOUND_ANSWER: &str = "not found";

const EXCLUDED_FILES: &[&str] = &["*Config*", "*config*"];

const PICK_README_PROMPT: &str = r#"You help users find the right Dataproc template.
User request: "{task}"

These README files each document one family of templates:
{files}

Answer with exactly one path from the list whose templates read from the source the user asks about.
Answer with the path only. If none fits, answer: not found"#;

const PICK_TEMPLATE_FILE_PROMPT: &str = r#"You help users find the right {language} Dataproc template.
User request: "{task}"

Candidate template files:
{files}

Answer with exactly one path from the list that moves data from the requested source to the requested target.
Answer with the path only. If none fits, answer: not found"#;

const EXTRACT_TEMPLATE_PROMPT: &str = r#"Read the Dataproc template README below and pick the template that matches the user request.
User request: "{task}"

Return only a JSON object with this shape, no prose:
{"template_name": "<name passed to --template>", "description": "<one line>", "params": {"required": ["..."], "optional": ["..."]}}

README:
{readme}"#;

const ADD_TRANSFORMATION_PROMPT: &str = r#"Below is the source of a Dataproc template. Modify it so that the
loaded input is registered as a temporary view and transformed with the SQL below before it is written.
Keep everything else unchanged. Return only the complete updated source file.

SQL:
{sql}

Template source:
{code}"#;

/// Implementation language of a Dataproc template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateLanguage {
    Python,
    Java,
}

impl TemplateLanguage {
    /// Directory holding `bin/start.sh`, relative to the repository root
    pub fn start_script_dir(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
        }
    }

    /// Where the per-family README files live
    pub fn readme_root(self) -> &'static str {
        match self {
            Self::Python => "python/dataproc_templates",
            Self::Java => "java/src/main/java/com/google/cloud/dataproc/templates",
        }
    }

    /// File name pattern of a template entry point
    pub fn template_file_pattern(self) -> &'static str {
        match self {
            Self::Python => "*_to_*.py",
            Self::Java => "*To*.java",
        }
    }

    /// Arguments for one template parameter
    pub fn param_args(self, key: &str, value: &str) -> Vec<String> {
        match self {
            Self::Python => vec![format!("--{}={}", key, value)],
            Self::Java => vec!["--templateProperty".to_string(), format!("{}={}", key, value)],
        }
    }
}

impl fmt::Display for TemplateLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => write!(f, "Python"),
            Self::Java => write!(f, "Java"),
        }
    }
}

impl FromStr for TemplateLanguage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "java" => Ok(Self::Java),
            other => Err(Error::InvalidInput(format!(
                "Unknown template language '{}'. Use Python or Java.",
                other
            ))),
        }
    }
}

/// A template picked out of the repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataprocTemplate {
    pub template_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: TemplateParams,
    /// Source file of the template inside the checkout
    #[serde(default)]
    pub template_path: PathBuf,
}

/// Everything needed to run one template
#[derive(Debug, Clone)]
pub struct TemplateRunRequest<'a> {
    pub language: TemplateLanguage,
    pub template_name: &'a str,
    pub project: &'a str,
    pub region: &'a str,
    pub staging_location: &'a str,
    pub declared: &'a TemplateParams,
    pub params: &'a UserParams,
    pub jars: Option<&'a str>,
    pub subnet: Option<&'a str>,
    pub spark_properties: Option<&'a str>,
    pub service_account: Option<&'a str>,
}

/// Result of a finished template run
#[derive(Debug, Clone, Serialize)]
pub struct TemplateRunOutcome {
    pub template_name: String,
    pub command: String,
    pub stdout: String,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Value of `OPT_SERVICE_ACCOUNT_NAME` for the start script
pub fn service_account_option(service_account: Option<&str>) -> String {
    match non_empty(service_account) {
        Some(sa) => format!(" --impersonate-service-account={} {}", sa, SUBMITTED_FROM_LABEL),
        None => SUBMITTED_FROM_LABEL.to_string(),
    }
}

/// Validate the parameters and build the `start.sh` invocation rooted at
/// `repo_root`.
pub fn start_script_command(repo_root: &Path, request: &TemplateRunRequest<'_>) -> Result<CommandSpec> {
    validate(request.declared, request.params)
        .into_result()
        .map_err(|e| match e {
            Error::ValidationFailed(comment) => Error::ValidationFailed(format!(
                "Job could not be submitted due to a parameter validation error: {}",
                comment
            )),
            other => other,
        })?;

    let mut command = CommandSpec::new("./bin/start.sh")
        .arg("--")
        .arg(format!("--template={}", request.template_name))
        .current_dir(repo_root.join(request.language.start_script_dir()))
        .env("GCP_PROJECT", request.project)
        .env("REGION", request.region)
        .env("GCS_STAGING_LOCATION", request.staging_location)
        .env(
            "OPT_SERVICE_ACCOUNT_NAME",
            service_account_option(request.service_account),
        );
    for (key, value) in request.params.iter() {
        command = command.args(request.language.param_args(key, value));
    }
    for (name, value) in [
        ("JARS", request.jars),
        ("SUBNET", request.subnet),
        ("SPARK_PROPERTIES", request.spark_properties),
    ] {
        if let Some(value) = non_empty(value) {
            command = command.env(name, value);
        }
    }
    Ok(command)
}

/// Run a template from the checkout at `repo_root`
pub async fn run_template(
    runner: &dyn CommandRunner,
    repo_root: &Path,
    request: &TemplateRunRequest<'_>,
) -> Result<TemplateRunOutcome> {
    let command = start_script_command(repo_root, request)?;
    info!(
        template = %request.template_name,
        language = %request.language,
        region = %request.region,
        "Running Dataproc template"
    );
    let output = runner.run_checked(&command).await?;
    Ok(TemplateRunOutcome {
        template_name: request.template_name.to_string(),
        command: command.display(),
        stdout: output.stdout,
    })
}

/// Run a template after splicing a SQL transformation into its source.
///
/// The checkout is copied under `scratch_dir/<uuid>`, the model rewrites the
/// template file in the copy, and the copy is removed after the run
/// whatever its result.
pub async fn run_template_with_transformation(
    runner: &dyn CommandRunner,
    model: &dyn LanguageModel,
    repo_root: &Path,
    template_path: &Path,
    transformation_sql: &str,
    scratch_dir: &Path,
    request: &TemplateRunRequest<'_>,
) -> Result<TemplateRunOutcome> {
    let relative = template_path
        .strip_prefix(repo_root)
        .map_err(|_| {
            Error::InvalidInput(format!(
                "Template file {} is not inside {}",
                template_path.display(),
                repo_root.display()
            ))
        })?
        .to_path_buf();

    // Fail before copying anything
    start_script_command(repo_root, request)?;

    let run_dir = scratch_dir.join(uuid::Uuid::new_v4().to_string());
    let copy_root = run_dir.join("dataproc_template");
    let result = async {
        let source = repo_root.to_path_buf();
        let dest = copy_root.clone();
        tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
            .await
            .map_err(|e| Error::Unexpected(format!("copy task failed: {}", e)))??;

        let original = tokio::fs::read_to_string(template_path).await?;
        let prompt = ADD_TRANSFORMATION_PROMPT
            .replace("{sql}", transformation_sql)
            .replace("{code}", &original);
        let updated = strip_code_fences(&model.prompt(&prompt).await?);
        tokio::fs::write(copy_root.join(&relative), updated).await?;
        debug!(file = %relative.display(), "Rewrote template with transformation");

        run_template(runner, &copy_root, request).await
    }
    .await;

    if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
        warn!(dir = %run_dir.display(), error = %e, "Could not remove scratch copy");
    }
    result
}

/// Copy the regular files of `source` into `dest`, leaving hidden
/// directories and `target` behind
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for file in walk_files(source)? {
        let relative = file.strip_prefix(source).unwrap_or(&file);
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&file, &target)?;
    }
    Ok(())
}

fn listing(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Take the model's pick, which must be one of `candidates`
fn pick_listed(answer: &str, candidates: &[PathBuf]) -> Option<PathBuf> {
    let answer = answer.replace('\n', "");
    let answer = answer.trim().trim_matches('`');
    if answer.eq_ignore_ascii_case(NOT_FOUND_ANSWER) {
        return None;
    }
    candidates
        .iter()
        .find(|p| p.display().to_string() == answer)
        .cloned()
}

/// Find the template matching a request in the checkout at `repo_root`.
///
/// The model first picks a template family README, then the template file
/// next to it, then reads the README to name the template and its
/// parameters. `None` when no step finds a match.
pub async fn select_template(
    model: &dyn LanguageModel,
    repo_root: &Path,
    language: TemplateLanguage,
    task: &str,
) -> Result<Option<DataprocTemplate>> {
    let readmes = find_files(&repo_root.join(language.readme_root()), &["README.md"], EXCLUDED_FILES)?;
    if readmes.is_empty() {
        return Ok(None);
    }

    let prompt = PICK_README_PROMPT
        .replace("{task}", task)
        .replace("{files}", &listing(&readmes));
    let Some(readme) = pick_listed(&model.prompt(&prompt).await?, &readmes) else {
        debug!(task = %task, "No template family matched");
        return Ok(None);
    };

    let family_dir = readme.parent().unwrap_or(repo_root);
    let candidates = find_files(family_dir, &[language.template_file_pattern()], EXCLUDED_FILES)?;
    let prompt = PICK_TEMPLATE_FILE_PROMPT
        .replace("{language}", &language.to_string())
        .replace("{task}", task)
        .replace("{files}", &listing(&candidates));
    let Some(template_path) = pick_listed(&model.prompt(&prompt).await?, &candidates) else {
        debug!(task = %task, readme = %readme.display(), "No template file matched");
        return Ok(None);
    };

    let readme_content = tokio::fs::read_to_string(&readme).await?;
    let prompt = EXTRACT_TEMPLATE_PROMPT
        .replace("{task}", task)
        .replace("{readme}", &readme_content);
    let answer = model.prompt(&prompt).await?;
    let mut template: DataprocTemplate = serde_json::from_str(&strip_code_fences(&answer))
        .map_err(|e| Error::LLMError(format!("Could not read the template description: {}", e)))?;
    template.template_path = template_path;

    info!(template = %template.template_name, language = %language, "Selected Dataproc template");
    Ok(Some(template))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::runner::{CommandOutput, RecordingRunner};

    fn declared() -> TemplateParams {
        TemplateParams::new(["gcs.bigquery.input.location", "gcs.bigquery.output.table"], ["gcs.bigquery.temp.bucket.name"])
    }

    fn params() -> UserParams {
        UserParams::new()
            .with("gcs.bigquery.input.location", "gs://in/data.csv")
            .with("gcs.bigquery.output.table", "sales")
    }

    fn request<'a>(
        language: TemplateLanguage,
        declared: &'a TemplateParams,
        params: &'a UserParams,
        service_account: Option<&'a str>,
    ) -> TemplateRunRequest<'a> {
        TemplateRunRequest {
            language,
            template_name: "GCSTOBIGQUERY",
            project: "my-proj",
            region: "us-central1",
            staging_location: "gs://staging",
            declared,
            params,
            jars: Some(""),
            subnet: Some("projects/p/regions/r/subnetworks/default"),
            spark_properties: None,
            service_account,
        }
    }

    #[test]
    fn test_language_table() {
        assert_eq!("python".parse::<TemplateLanguage>().unwrap(), TemplateLanguage::Python);
        assert_eq!("Java".parse::<TemplateLanguage>().unwrap(), TemplateLanguage::Java);
        assert!("scala".parse::<TemplateLanguage>().is_err());
        assert_eq!(TemplateLanguage::Python.param_args("a", "b"), vec!["--a=b"]);
        assert_eq!(
            TemplateLanguage::Java.param_args("a", "b"),
            vec!["--templateProperty", "a=b"]
        );
        assert!(matches_template(TemplateLanguage::Python, "gcs_to_bigquery.py"));
        assert!(matches_template(TemplateLanguage::Java, "GCSToBigQuery.java"));
    }

    fn matches_template(language: TemplateLanguage, name: &str) -> bool {
        crate::templates::matches_pattern(name, language.template_file_pattern())
    }

    #[test]
    fn test_service_account_option() {
        assert_eq!(service_account_option(None), "--labels=submitted_from=plumber");
        assert_eq!(service_account_option(Some("  ")), "--labels=submitted_from=plumber");
        assert_eq!(
            service_account_option(Some("sa@p.iam.gserviceaccount.com")),
            " --impersonate-service-account=sa@p.iam.gserviceaccount.com --labels=submitted_from=plumber"
        );
    }

    #[test]
    fn test_python_command() {
        let (declared, params) = (declared(), params());
        let command =
            start_script_command(Path::new("/repos/dataproc-templates"), &request(TemplateLanguage::Python, &declared, &params, None))
                .unwrap();
        assert_eq!(
            command.display(),
            "./bin/start.sh -- --template=GCSTOBIGQUERY --gcs.bigquery.input.location=gs://in/data.csv \
             --gcs.bigquery.output.table=sales"
        );
        assert_eq!(command.cwd.as_deref(), Some(Path::new("/repos/dataproc-templates/python")));
        assert_eq!(command.env.get("GCP_PROJECT").map(String::as_str), Some("my-proj"));
        assert_eq!(command.env.get("GCS_STAGING_LOCATION").map(String::as_str), Some("gs://staging"));
        assert!(command.env.contains_key("SUBNET"));
        // Blank optional settings are not exported
        assert!(!command.env.contains_key("JARS"));
        assert!(!command.env.contains_key("SPARK_PROPERTIES"));
    }

    #[test]
    fn test_java_command() {
        let (declared, params) = (declared(), params());
        let command = start_script_command(
            Path::new("/repos/dt"),
            &request(TemplateLanguage::Java, &declared, &params, Some("sa@p.iam.gserviceaccount.com")),
        )
        .unwrap();
        assert_eq!(command.args[2], "--templateProperty");
        assert_eq!(command.args[3], "gcs.bigquery.input.location=gs://in/data.csv");
        assert_eq!(command.cwd.as_deref(), Some(Path::new("/repos/dt/java")));
        assert!(
            command.env["OPT_SERVICE_ACCOUNT_NAME"].contains("--impersonate-service-account=sa@p.iam.gserviceaccount.com")
        );
    }

    #[test]
    fn test_validation_runs_first() {
        let declared = declared();
        let params = UserParams::new().with("gcs.bigquery.output.table", "sales");
        let err = start_script_command(Path::new("/r"), &request(TemplateLanguage::Python, &declared, &params, None))
            .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
        assert!(err.to_string().contains("Missing required param(s)"));
    }

    #[tokio::test]
    async fn test_run_template_records_command() {
        let runner = RecordingRunner::new();
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "Batch [abc] submitted.".to_string(),
            stderr: String::new(),
        });
        let (declared, params) = (declared(), params());
        let outcome = run_template(&runner, Path::new("/r"), &request(TemplateLanguage::Python, &declared, &params, None))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "Batch [abc] submitted.");
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(runner.calls()[0].program, "./bin/start.sh");
    }

    #[tokio::test]
    async fn test_run_with_transformation_uses_copy_and_cleans_up() {
        let repo = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let template_dir = repo.path().join("python/dataproc_templates/gcs");
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::create_dir_all(repo.path().join(".git")).unwrap();
        let template = template_dir.join("gcs_to_bigquery.py");
        std::fs::write(&template, "df = spark.read.load(path)\n").unwrap();

        let model = ScriptedModel::new(["```python\ndf = spark.sql('SELECT 1')\n```"]);
        let runner = RecordingRunner::new();
        let (declared, params) = (declared(), params());
        run_template_with_transformation(
            &runner,
            &model,
            repo.path(),
            &template,
            "SELECT 1",
            scratch.path(),
            &request(TemplateLanguage::Python, &declared, &params, None),
        )
        .await
        .unwrap();

        let call = &runner.calls()[0];
        let cwd = call.cwd.clone().unwrap();
        assert!(cwd.starts_with(scratch.path()));
        assert!(cwd.ends_with("dataproc_template/python"));
        // Scratch copy is gone and the checkout is untouched
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
        assert_eq!(std::fs::read_to_string(&template).unwrap(), "df = spark.read.load(path)\n");
        assert!(model.prompts()[0][0].content.contains("SELECT 1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_copies_regular_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("repo");
        std::fs::create_dir_all(source.join("python/bin")).unwrap();
        std::fs::create_dir_all(source.join(".git")).unwrap();
        std::fs::write(source.join("python/bin/start.sh"), "#!/bin/sh").unwrap();
        std::fs::write(source.join(".git/HEAD"), "ref").unwrap();
        std::os::unix::fs::symlink(source.join("python"), source.join("py")).unwrap();

        let dest = dir.path().join("copy");
        copy_tree(&source, &dest).unwrap();
        assert!(dest.join("python/bin/start.sh").is_file());
        assert!(!dest.join(".git").exists());
        assert!(!dest.join("py").exists());
    }

    #[test]
    fn test_pick_listed() {
        let candidates = vec![PathBuf::from("/r/a/README.md"), PathBuf::from("/r/b/README.md")];
        assert_eq!(pick_listed("/r/b/README.md\n", &candidates), Some(PathBuf::from("/r/b/README.md")));
        assert_eq!(pick_listed("not found", &candidates), None);
        assert_eq!(pick_listed("/r/c/README.md", &candidates), None);
    }

    #[tokio::test]
    async fn test_select_template() {
        let repo = tempfile::tempdir().unwrap();
        let family = repo.path().join("python/dataproc_templates/gcs");
        std::fs::create_dir_all(&family).unwrap();
        std::fs::write(family.join("README.md"), "# GCS To BigQuery\nTemplate GCSTOBIGQUERY").unwrap();
        std::fs::write(family.join("gcs_to_bigquery.py"), "").unwrap();
        std::fs::write(family.join("gcs_config_to_x.py"), "").unwrap();

        let readme = family.join("README.md").display().to_string();
        let file = family.join("gcs_to_bigquery.py").display().to_string();
        let model = ScriptedModel::new([
            readme.clone(),
            file.clone(),
            r#"{"template_name": "GCSTOBIGQUERY", "params": {"required": ["gcs.bigquery.input.location"]}}"#.to_string(),
        ]);

        let template = select_template(&model, repo.path(), TemplateLanguage::Python, "csv in gcs to bigquery")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(template.template_name, "GCSTOBIGQUERY");
        assert_eq!(template.template_path, PathBuf::from(file));
        assert_eq!(template.params.required, vec!["gcs.bigquery.input.location"]);
        // Config files are never offered
        assert!(!model.prompts()[1][0].content.contains("gcs_config_to_x.py"));
    }

    #[tokio::test]
    async fn test_select_template_not_found() {
        let repo = tempfile::tempdir().unwrap();
        let family = repo.path().join("java/src/main/java/com/google/cloud/dataproc/templates/jdbc");
        std::fs::create_dir_all(&family).unwrap();
        std::fs::write(family.join("README.md"), "").unwrap();

        let model = ScriptedModel::new(["not found"]);
        let found = select_template(&model, repo.path(), TemplateLanguage::Java, "mainframe to excel")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}

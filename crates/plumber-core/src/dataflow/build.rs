//! Building and staging custom Dataflow templates with Maven

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::runner::{CommandRunner, CommandSpec};
use crate::templates::find_files;

/// Lines Maven prints once a template is staged
static STAGED_PATH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Flex Template was staged!\s+(gs://\S+)",
        r"Template staged successfully\. It is available at\s+(gs://\S+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

const PICK_MAIN_SOURCE_PROMPT: &str = r#"You are an expert file system navigator for Google Cloud Dataflow.
Identify the main source file of the Dataflow template "{template_name}" from this list of existing Java files:
{files}

The main file usually has the same name as the template (e.g. MongoDbToBigQuery.java).
Reply with ONLY the full path exactly as listed, or "not_found" if nothing matches."#;

/// A template build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project: String,
    /// Bucket name without `gs://`
    pub bucket: String,
    pub template_name: String,
    /// Maven module directory of the template
    pub module_dir: PathBuf,
}

/// A staged template ready for launching
#[derive(Debug, Clone, Serialize)]
pub struct StagedTemplate {
    pub template_name: String,
    pub gcs_path: String,
}

/// `mvn clean package -PtemplatesStage ...` for a template module
pub fn build_command(request: &BuildRequest) -> CommandSpec {
    CommandSpec::new("mvn")
        .args(["clean", "package", "-PtemplatesStage", "-DskipTests"])
        .arg(format!("-DprojectId={}", request.project))
        .arg(format!("-DbucketName={}", request.bucket.trim_start_matches("gs://")))
        .arg("-DstagePrefix=templates")
        .arg(format!("-DtemplateName={}", request.template_name))
        .arg("-Dlabels=plumber")
        .arg("-f")
        .arg(request.module_dir.display().to_string())
}

/// Find the staged `gs://` path in Maven output
pub fn extract_staged_path(output: &str) -> Option<String> {
    STAGED_PATH_PATTERNS
        .iter()
        .find_map(|re| re.captures(output))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Build the template module and stage it to GCS
pub async fn build_and_stage(runner: &dyn CommandRunner, request: &BuildRequest) -> Result<StagedTemplate> {
    if !request.module_dir.is_dir() {
        return Err(Error::NotFound(format!(
            "Template module directory {}",
            request.module_dir.display()
        )));
    }

    let command = build_command(request);
    info!(template = %request.template_name, module = %request.module_dir.display(), "Building template with Maven");
    let output = runner.run_checked(&command).await?;

    let combined = format!("{}\n{}", output.stdout, output.stderr);
    match extract_staged_path(&combined) {
        Some(gcs_path) => {
            info!(template = %request.template_name, gcs_path = %gcs_path, "Template staged");
            Ok(StagedTemplate {
                template_name: request.template_name.clone(),
                gcs_path,
            })
        }
        None => Err(Error::CommandFailed {
            command: command.display(),
            exit_code: 0,
            stdout: output.stdout,
            stderr: "Build succeeded, but the staged template path was not found in the output."
                .to_string(),
        }),
    }
}

/// Locate the main Java source of a template inside its module.
///
/// A single candidate is returned directly; otherwise the model picks one
/// from the real file list and its answer must name a listed file.
pub async fn locate_main_source(
    model: &dyn LanguageModel,
    module_dir: &Path,
    template_name: &str,
) -> Result<Option<PathBuf>> {
    let candidates = find_files(module_dir, &["*.java"], &[])?;
    match candidates.len() {
        0 => return Ok(None),
        1 => return Ok(candidates.into_iter().next()),
        _ => {}
    }

    let files = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = PICK_MAIN_SOURCE_PROMPT
        .replace("{template_name}", template_name)
        .replace("{files}", &files);
    let answer = model.prompt(&prompt).await?;
    let answer = answer.trim().trim_matches('`');

    let picked = candidates.into_iter().find(|p| p.display().to_string() == answer);
    if picked.is_none() {
        warn!(template = %template_name, answer = %answer, "Model did not pick a listed source file");
    }
    Ok(picked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::runner::{CommandOutput, RecordingRunner};

    fn request(dir: &Path) -> BuildRequest {
        BuildRequest {
            project: "my-proj".to_string(),
            bucket: "gs://my-bucket".to_string(),
            template_name: "mongo-custom".to_string(),
            module_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_build_command() {
        let command = build_command(&request(Path::new("/repo/v2/mongodb-to-googlecloud")));
        assert_eq!(
            command.display(),
            "mvn clean package -PtemplatesStage -DskipTests -DprojectId=my-proj -DbucketName=my-bucket \
             -DstagePrefix=templates -DtemplateName=mongo-custom -Dlabels=plumber -f /repo/v2/mongodb-to-googlecloud"
        );
    }

    #[test]
    fn test_extract_staged_path() {
        let flex = "[INFO] Flex Template was staged! gs://my-bucket/templates/flex/MongoDB_to_BigQuery\n[INFO] BUILD SUCCESS";
        assert_eq!(
            extract_staged_path(flex).as_deref(),
            Some("gs://my-bucket/templates/flex/MongoDB_to_BigQuery")
        );

        let classic = "Template staged successfully. It is available at gs://my-bucket/templates/Word_Count";
        assert_eq!(
            extract_staged_path(classic).as_deref(),
            Some("gs://my-bucket/templates/Word_Count")
        );

        assert_eq!(extract_staged_path("BUILD SUCCESS"), None);
    }

    #[tokio::test]
    async fn test_build_and_stage() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "Flex Template was staged! gs://my-bucket/templates/flex/mongo-custom\n".to_string(),
            stderr: String::new(),
        });
        let staged = build_and_stage(&runner, &request(dir.path())).await.unwrap();
        assert_eq!(staged.gcs_path, "gs://my-bucket/templates/flex/mongo-custom");
        assert_eq!(runner.calls()[0].program, "mvn");
    }

    #[tokio::test]
    async fn test_build_without_staged_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "BUILD SUCCESS".to_string(),
            stderr: String::new(),
        });
        let err = build_and_stage(&runner, &request(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("staged template path was not found"));
    }

    #[tokio::test]
    async fn test_build_missing_module() {
        let runner = RecordingRunner::new();
        let err = build_and_stage(&runner, &request(Path::new("/no/such/module")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_locate_main_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src/main/java");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("MongoDbToBigQuery.java"), "").unwrap();
        std::fs::write(src.join("MongoDbUtils.java"), "").unwrap();

        let expected = src.join("MongoDbToBigQuery.java");
        let model = ScriptedModel::new([expected.display().to_string()]);
        let found = locate_main_source(&model, dir.path(), "MongoDB_to_BigQuery").await.unwrap();
        assert_eq!(found, Some(expected));

        let model = ScriptedModel::new(["/made/up/File.java"]);
        let found = locate_main_source(&model, dir.path(), "MongoDB_to_BigQuery").await.unwrap();
        assert_eq!(found, None);
    }
}

//! Launching Dataflow jobs from templates with `gcloud`

use serde::Serialize;
use tracing::{debug, info};

use super::job_name::sanitize;
use crate::error::{Error, Result};
use crate::runner::{CommandRunner, CommandSpec};
use crate::templates::{TemplateDescriptor, TemplateKind, UserParams, validate};

/// Separator used between `key=value` pairs; commas may appear in values
pub const PARAM_DELIMITER: &str = "###";

/// Label attached to every job Plumber launches
pub const SOURCE_LABEL: &str = "source=plumber";

/// Encode parameters as `^###^k1=v1###k2=v2`, keeping caller order
pub fn encode_parameters(params: &UserParams) -> String {
    let pairs: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("^{d}^{}", pairs.join(PARAM_DELIMITER), d = PARAM_DELIMITER)
}

/// Everything needed to launch one template job
#[derive(Debug, Clone)]
pub struct SubmitRequest<'a> {
    pub job_name: &'a str,
    pub project: &'a str,
    pub region: &'a str,
    /// Required for classic templates
    pub staging_location: Option<&'a str>,
    pub descriptor: &'a TemplateDescriptor,
    pub params: &'a UserParams,
    /// Previously staged custom build; skips parameter validation
    pub custom_path: Option<&'a str>,
}

/// A validated, ready-to-run launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub job_name: String,
    pub kind: TemplateKind,
    pub template_path: String,
    #[serde(serialize_with = "serialize_display")]
    pub command: CommandSpec,
}

fn serialize_display<S: serde::Serializer>(spec: &CommandSpec, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&spec.display())
}

/// Result of a successful submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub job_name: String,
    pub kind: TemplateKind,
    pub command: String,
    pub stdout: String,
}

/// Validate the request and build the `gcloud` invocation.
///
/// Without a custom path the descriptor must carry a GCS path and a
/// `params` block, and the parameters must validate against it.
pub fn build_submit_command(request: &SubmitRequest<'_>) -> Result<LaunchPlan> {
    let descriptor = request.descriptor;
    let custom_path = request.custom_path.map(str::trim).filter(|p| !p.is_empty());

    let (template_path, kind) = match custom_path {
        Some(path) => (path.to_string(), descriptor.kind_for_path(path)),
        None => {
            let path = descriptor
                .template_gcs_path
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| {
                    Error::ValidationFailed(
                        "Job could not be submitted because the \"template_gcs_path\" key was not found."
                            .to_string(),
                    )
                })?;
            let declared = descriptor.params.as_ref().ok_or_else(|| {
                Error::ValidationFailed(
                    "Job could not be submitted because the template definition is missing the \"params\" key."
                        .to_string(),
                )
            })?;
            validate(declared, request.params).into_result().map_err(|e| match e {
                Error::ValidationFailed(comment) => Error::ValidationFailed(format!(
                    "Job could not be submitted due to a parameter validation error: {}",
                    comment
                )),
                other => other,
            })?;
            (path.to_string(), descriptor.kind)
        }
    };

    let job_name = sanitize(request.job_name);
    let base = CommandSpec::new("gcloud").arg("dataflow");
    let command = match kind {
        TemplateKind::Flex => base
            .args(["flex-template", "run", job_name.as_str()])
            .arg(format!("--project={}", request.project))
            .arg(format!("--region={}", request.region))
            .arg(format!("--template-file-gcs-location={}", template_path))
            .args(["--parameters".to_string(), encode_parameters(request.params)])
            .arg(format!("--additional-user-labels={}", SOURCE_LABEL)),
        TemplateKind::Classic => {
            let staging = request
                .staging_location
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    Error::ValidationFailed(
                        "Classic templates need a staging location (gs://bucket/staging)".to_string(),
                    )
                })?;
            base.args(["jobs", "run", job_name.as_str()])
                .arg(format!("--project={}", request.project))
                .arg(format!("--region={}", request.region))
                .arg(format!("--gcs-location={}", template_path))
                .args(["--parameters".to_string(), encode_parameters(request.params)])
                .arg(format!("--staging-location={}", staging))
                .arg(format!("--additional-user-labels={}", SOURCE_LABEL))
        }
    };

    debug!(job_name = %job_name, kind = %kind, "Built launch command");
    Ok(LaunchPlan {
        job_name,
        kind,
        template_path,
        command,
    })
}

/// Build and run the launch command. A non-zero exit fails with the
/// command's stdout and stderr.
pub async fn submit_template(runner: &dyn CommandRunner, request: &SubmitRequest<'_>) -> Result<SubmitOutcome> {
    let plan = build_submit_command(request)?;
    info!(job_name = %plan.job_name, kind = %plan.kind, template = %plan.template_path, "Submitting Dataflow job");

    let output = runner.run_checked(&plan.command).await?;
    Ok(SubmitOutcome {
        job_name: plan.job_name,
        kind: plan.kind,
        command: plan.command.display(),
        stdout: output.stdout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, RecordingRunner};
    use crate::templates::TemplateParams;

    fn descriptor(path: &str) -> TemplateDescriptor {
        TemplateDescriptor::new(
            "Foo",
            Some(path.to_string()),
            Some(TemplateParams::new(["source", "target"], ["mode"])),
        )
    }

    fn params() -> UserParams {
        UserParams::new().with("source", "a,b").with("target", "proj:ds.t")
    }

    fn request<'a>(descriptor: &'a TemplateDescriptor, params: &'a UserParams) -> SubmitRequest<'a> {
        SubmitRequest {
            job_name: "My Job!!",
            project: "my-proj",
            region: "us-central1",
            staging_location: Some("gs://bkt/staging"),
            descriptor,
            params,
            custom_path: None,
        }
    }

    #[test]
    fn test_encode_parameters() {
        assert_eq!(encode_parameters(&params()), "^###^source=a,b###target=proj:ds.t");
        assert_eq!(encode_parameters(&UserParams::new()), "^###^");
    }

    #[test]
    fn test_flex_command_shape() {
        let d = descriptor("gs://bkt/templates/flex/Foo");
        let p = params();
        let plan = build_submit_command(&request(&d, &p)).unwrap();
        assert_eq!(plan.kind, TemplateKind::Flex);
        assert_eq!(plan.job_name, "my-job");
        assert_eq!(
            plan.command.display(),
            "gcloud dataflow flex-template run my-job --project=my-proj --region=us-central1 \
             --template-file-gcs-location=gs://bkt/templates/flex/Foo --parameters \
             \"^###^source=a,b###target=proj:ds.t\" --additional-user-labels=source=plumber"
        );
    }

    #[test]
    fn test_classic_command_shape() {
        let d = descriptor("gs://bkt/templates/classic/Foo");
        let p = params();
        let plan = build_submit_command(&request(&d, &p)).unwrap();
        assert_eq!(plan.kind, TemplateKind::Classic);
        assert_eq!(
            plan.command.args,
            vec![
                "dataflow",
                "jobs",
                "run",
                "my-job",
                "--project=my-proj",
                "--region=us-central1",
                "--gcs-location=gs://bkt/templates/classic/Foo",
                "--parameters",
                "^###^source=a,b###target=proj:ds.t",
                "--staging-location=gs://bkt/staging",
                "--additional-user-labels=source=plumber",
            ]
        );
    }

    #[test]
    fn test_declared_flex_type_wins_over_path() {
        let d = descriptor("gs://bkt/templates/Foo").with_declared_type("FLEX");
        let p = params();
        let plan = build_submit_command(&request(&d, &p)).unwrap();
        assert_eq!(plan.kind, TemplateKind::Flex);
        assert_eq!(plan.command.args[1], "flex-template");
    }

    #[test]
    fn test_validation_failure_blocks_launch() {
        let d = descriptor("gs://bkt/flex/Foo");
        let p = UserParams::new().with("source", "a");
        let err = build_submit_command(&request(&d, &p)).unwrap_err();
        match err {
            Error::ValidationFailed(comment) => {
                assert!(comment.contains("parameter validation error"));
                assert!(comment.contains("target"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_custom_path_skips_validation() {
        let d = descriptor("gs://bkt/classic/Foo");
        let p = UserParams::new().with("anything", "goes");
        let mut req = request(&d, &p);
        req.custom_path = Some("gs://my-bucket/templates/flex/custom-foo");
        let plan = build_submit_command(&req).unwrap();
        assert_eq!(plan.kind, TemplateKind::Flex);
        assert_eq!(plan.template_path, "gs://my-bucket/templates/flex/custom-foo");
    }

    #[test]
    fn test_custom_path_without_flex_segment_is_classic() {
        let d = TemplateDescriptor::new("Foo", None, None);
        let p = UserParams::new();
        let mut req = request(&d, &p);
        req.custom_path = Some("gs://my-bucket/templates/custom-foo");
        let plan = build_submit_command(&req).unwrap();
        assert_eq!(plan.kind, TemplateKind::Classic);
    }

    #[test]
    fn test_missing_path_and_params() {
        let no_path = TemplateDescriptor::new("Foo", None, Some(TemplateParams::default()));
        let p = UserParams::new();
        let err = build_submit_command(&request(&no_path, &p)).unwrap_err();
        assert!(err.to_string().contains("template_gcs_path"));

        let no_params = TemplateDescriptor::new("Foo", Some("gs://bkt/flex/Foo".into()), None);
        let err = build_submit_command(&request(&no_params, &p)).unwrap_err();
        assert!(err.to_string().contains("\"params\""));
    }

    #[test]
    fn test_classic_requires_staging() {
        let d = descriptor("gs://bkt/classic/Foo");
        let p = params();
        let mut req = request(&d, &p);
        req.staging_location = None;
        assert!(matches!(build_submit_command(&req), Err(Error::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_submit_propagates_failure() {
        let runner = RecordingRunner::new();
        runner.push_output(CommandOutput {
            exit_code: 1,
            stdout: "partial".to_string(),
            stderr: "ERROR: (gcloud.dataflow.flex-template.run) PERMISSION_DENIED".to_string(),
        });
        let d = descriptor("gs://bkt/flex/Foo");
        let p = params();
        let err = submit_template(&runner, &request(&d, &p)).await.unwrap_err();
        match err {
            Error::CommandFailed { stdout, stderr, .. } => {
                assert_eq!(stdout, "partial");
                assert!(stderr.contains("PERMISSION_DENIED"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_success() {
        let runner = RecordingRunner::new();
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "job:\n  id: 2024-01-01_00_00_00-123\n".to_string(),
            stderr: String::new(),
        });
        let d = descriptor("gs://bkt/flex/Foo");
        let p = params();
        let outcome = submit_template(&runner, &request(&d, &p)).await.unwrap();
        assert_eq!(outcome.job_name, "my-job");
        assert!(outcome.stdout.contains("2024-01-01"));
        assert_eq!(runner.calls()[0].program, "gcloud");
    }
}

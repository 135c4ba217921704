//! Plumber Core Integration Tests
//!
//! Exercise the offline pieces through the public API only.

use chrono::{TimeZone, Utc};
use plumber_core::{
    Error,
    agents::{AgentKind, ToolCall},
    dataflow::{SubmitRequest, build_submit_command, sanitize},
    github::RepoRef,
    logs::{ResourceSelector, build_resource_filter},
    templates::{TemplateCatalog, TemplateKind, UserParams, validate},
};

const CATALOG: &str = r#"[
  {
    "template_name": "PubSub_to_BigQuery_Flex",
    "template_gcs_path": "gs://dataflow-templates-us-central1/latest/flex/PubSub_to_BigQuery_Flex",
    "params": {"required": ["outputTableSpec"], "optional": ["inputTopic", "inputSubscription"]}
  },
  {
    "template_name": "Cloud_PubSub_to_GCS_Text",
    "type": "classic",
    "template_gcs_path": "gs://dataflow-templates-us-central1/latest/Cloud_PubSub_to_GCS_Text",
    "params": {"required": ["inputTopic", "outputDirectory", "outputFilenamePrefix"]}
  }
]"#;

#[test]
fn test_catalog_to_launch_command() {
    let catalog = TemplateCatalog::from_json(CATALOG).unwrap();
    let descriptor = catalog.find("PubSub_to_BigQuery_Flex").unwrap();
    assert_eq!(descriptor.kind, TemplateKind::Flex);

    let params = UserParams::new()
        .with("outputTableSpec", "proj:ds.events")
        .with("inputTopic", "projects/proj/topics/events");
    assert!(validate(descriptor.params.as_ref().unwrap(), &params).is_success());

    let plan = build_submit_command(&SubmitRequest {
        job_name: "Events -> BQ",
        project: "proj",
        region: "us-central1",
        staging_location: None,
        descriptor,
        params: &params,
        custom_path: None,
    })
    .unwrap();
    assert_eq!(plan.job_name, "events-bq");
    let command = plan.command.display();
    assert!(command.starts_with("gcloud dataflow flex-template run events-bq"));
    assert!(command.contains("^###^outputTableSpec=proj:ds.events###inputTopic=projects/proj/topics/events"));
}

#[test]
fn test_classic_template_with_staging() {
    let catalog = TemplateCatalog::from_json(CATALOG).unwrap();
    let descriptor = catalog.find("Cloud_PubSub_to_GCS_Text").unwrap();
    assert_eq!(descriptor.kind, TemplateKind::Classic);

    let params = UserParams::from_pairs([
        "inputTopic=projects/p/topics/t",
        "outputDirectory=gs://out/",
        "outputFilenamePrefix=events-",
    ])
    .unwrap();
    let plan = build_submit_command(&SubmitRequest {
        job_name: "archive",
        project: "p",
        region: "europe-west1",
        staging_location: Some("gs://stage/tmp"),
        descriptor,
        params: &params,
        custom_path: None,
    })
    .unwrap();
    let command = plan.command.display();
    assert!(command.starts_with("gcloud dataflow jobs run archive"));
    assert!(command.contains("--staging-location=gs://stage/tmp"));
}

#[test]
fn test_unknown_template() {
    let catalog = TemplateCatalog::from_json(CATALOG).unwrap();
    let err = catalog.find("Nope").unwrap_err();
    assert!(matches!(err, Error::TemplateNotFound(_)));
    assert_eq!(err.code(), "E101");
}

#[test]
fn test_sanitizer_properties() {
    for raw in ["", "123 start", "My Job__Name!!", &"x".repeat(100), "--a--"] {
        let once = sanitize(raw);
        assert!(once.len() <= 63, "{}", once);
        assert!(once.starts_with(|c: char| c.is_ascii_lowercase()), "{}", once);
        assert!(!once.ends_with('-'), "{}", once);
        assert_eq!(sanitize(&once), once);
    }
}

#[test]
fn test_log_filters() {
    let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
    let filter = ResourceSelector::DATAPROC_CLUSTER_NAME.filter(" etl ", Some("warnings please"), now);
    assert_eq!(
        filter,
        "resource.type=\"cloud_dataproc_cluster\" AND resource.labels.cluster_name=\"etl\" AND \
         timestamp >= \"2024-04-01T12:00:00.000000Z\" AND severity=WARNING"
    );
    let filter = build_resource_filter("gce_instance", None, now);
    assert!(filter.starts_with("resource.type=\"gce_instance\" AND timestamp >= "));
    assert!(!filter.contains("severity"));
}

#[test]
fn test_agents_and_tool_calls() {
    let call = ToolCall::parse(r#"{"tool": "list_branches", "args": {"repository": "GoogleCloudPlatform/DataflowTemplates"}}"#)
        .unwrap();
    assert!(AgentKind::GitHub.has_tool(&call.tool));
    let repo: RepoRef = call.args["repository"].as_str().unwrap().parse().unwrap();
    assert_eq!(repo.owner, "GoogleCloudPlatform");
    assert_eq!(repo.repo, "DataflowTemplates");
}

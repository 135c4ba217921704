//! Dataproc: clusters, serverless batches and Google's Dataproc templates

mod batches;
mod clusters;
mod templates;

pub use batches::{Batch, BatchJob, BatchSpec, DEFAULT_RUNTIME_VERSION, DataprocBatches, batches_report};
pub use clusters::{
    Cluster, ClusterAction, ClusterConfig, ClusterSpec, ClusterStatus, DEFAULT_IMAGE_VERSION, DataprocClusters, DiskConfig, InstanceGroup,
    clusters_report, dataproc_api, plumber_labels,
};
pub use templates::{
    DataprocTemplate, SUBMITTED_FROM_LABEL, TemplateLanguage, TemplateRunOutcome, TemplateRunRequest,
    run_template, run_template_with_transformation, select_template, service_account_option,
    start_script_command,
};

//! Dataflow: template launches, custom template builds, ad-hoc pipelines
//! and job management

mod build;
mod job_name;
mod jobs;
mod launch;
mod pipeline;

pub use build::{BuildRequest, StagedTemplate, build_and_stage, build_command, extract_staged_path, locate_main_source};
pub use job_name::{MAX_JOB_NAME_LEN, sanitize};
pub use jobs::{DataflowJob, DataflowJobs, JobDetails, JobMetric, jobs_report};
pub use launch::{
    LaunchPlan, PARAM_DELIMITER, SOURCE_LABEL, SubmitOutcome, SubmitRequest, build_submit_command,
    encode_parameters, submit_template,
};
pub use pipeline::{PipelineLaunch, PipelineRequest, PipelineType, extract_job_id, launch_pipeline, pipeline_command};

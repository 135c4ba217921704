//! Cloud Storage: names, paths and the JSON API client

mod client;
mod names;

pub use client::{
    Bucket, BucketCreation, DirectoryUpload, FailedUpload, StorageClient, StorageObject, buckets_report,
    objects_report,
};
pub use names::{
    GcsPath, MAX_BUCKET_NAME_LEN, MIN_BUCKET_NAME_LEN, sanitize_bucket_name, validate_bucket_name,
};

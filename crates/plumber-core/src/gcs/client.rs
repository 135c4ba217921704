//! Cloud Storage JSON API

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use super::names::{GcsPath, validate_bucket_name};
use crate::error::{Error, Result};
use crate::gcp::GcpClient;
use crate::templates::walk_files;

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bucket {
    pub name: String,
    pub location: String,
    pub storage_class: String,
    pub time_created: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageObject {
    pub name: String,
    pub bucket: String,
    /// The API sends sizes as decimal strings
    pub size: String,
    pub content_type: Option<String>,
    pub storage_class: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Listing<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Result of creating a bucket that may already exist
#[derive(Debug, Clone, Serialize)]
pub struct BucketCreation {
    pub bucket: Bucket,
    pub created_new: bool,
}

/// A file that could not be uploaded
#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    pub local_path: PathBuf,
    pub error: String,
}

/// Outcome of a directory upload
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryUpload {
    pub uploaded: Vec<String>,
    pub failed: Vec<FailedUpload>,
}

/// Cloud Storage for one project
#[derive(Debug, Clone)]
pub struct StorageClient {
    gcp: GcpClient,
    project: String,
}

fn bucket_url(bucket: &str) -> Result<Url> {
    let mut url = Url::parse(STORAGE_API).map_err(|e| Error::Unexpected(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| Error::Unexpected("storage URL cannot be a base".to_string()))?
        .extend(["b", bucket]);
    Ok(url)
}

/// Object URL with the name escaped as a single path segment
fn object_url(bucket: &str, object: &str) -> Result<Url> {
    let mut url = bucket_url(bucket)?;
    url.path_segments_mut()
        .map_err(|_| Error::Unexpected("storage URL cannot be a base".to_string()))?
        .extend(["o", object]);
    Ok(url)
}

impl StorageClient {
    pub fn new(gcp: GcpClient, project: impl Into<String>) -> Self {
        Self {
            gcp,
            project: project.into(),
        }
    }

    async fn list_all<T: DeserializeOwned>(&self, url: &str, base_query: Vec<(&str, String)>) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = base_query.clone();
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: Option<Listing<T>> = self.gcp.get_json(url, &query).await?;
            let Some(page) = page else { break };
            items.extend(page.items);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(items)
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let url = format!("{}/b", STORAGE_API);
        self.list_all(&url, vec![("project", self.project.clone())]).await
    }

    pub async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        self.gcp
            .get_json(bucket_url(name)?.as_str(), &[])
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("Bucket '{}'", name)),
                other => other,
            })
    }

    /// Create a bucket unless it already exists
    pub async fn create_bucket(&self, name: &str, location: &str, storage_class: &str) -> Result<BucketCreation> {
        validate_bucket_name(name)?;
        match self.get_bucket(name).await {
            Ok(bucket) => {
                return Ok(BucketCreation {
                    bucket,
                    created_new: false,
                });
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!(bucket = %name, location = %location, "Creating bucket");
        let url = format!("{}/b", STORAGE_API);
        let body = json!({ "name": name, "location": location, "storageClass": storage_class });
        let created: Result<Option<Bucket>> = self
            .gcp
            .post_json_with_query(&url, &[("project", self.project.clone())], &body)
            .await;
        match created {
            Ok(bucket) => Ok(BucketCreation {
                bucket: bucket.unwrap_or_else(|| Bucket {
                    name: name.to_string(),
                    location: location.to_string(),
                    storage_class: storage_class.to_string(),
                    time_created: None,
                }),
                created_new: true,
            }),
            Err(Error::ExternalCallFailed { status: 409, .. }) => Err(Error::ValidationFailed(format!(
                "Bucket name '{}' is already taken by another user",
                name
            ))),
            Err(e) => Err(e),
        }
    }

    /// Delete a bucket. With `force` every object is deleted first.
    /// Returns the number of objects deleted.
    pub async fn delete_bucket(&self, name: &str, force: bool) -> Result<usize> {
        let mut deleted = 0;
        if force {
            for object in self.list_objects(name, None).await? {
                self.delete_object(name, &object.name).await?;
                deleted += 1;
            }
        }
        info!(bucket = %name, force, "Deleting bucket");
        match self.gcp.delete(bucket_url(name)?.as_str()).await {
            Ok(()) => Ok(deleted),
            Err(Error::NotFound(_)) => Err(Error::NotFound(format!("Bucket '{}'", name))),
            Err(Error::ExternalCallFailed { status: 409, .. }) => Err(Error::ValidationFailed(format!(
                "Bucket '{}' is not empty. Delete with force to remove all objects first.",
                name
            ))),
            Err(e) => Err(e),
        }
    }

    pub async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<StorageObject>> {
        let url = format!("{}/o", bucket_url(bucket)?);
        let mut query = Vec::new();
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            query.push(("prefix", prefix.to_string()));
        }
        self.list_all(&url, query).await.map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!("Bucket '{}'", bucket)),
            other => other,
        })
    }

    /// Object content as bytes
    pub async fn read_object(&self, path: &GcsPath) -> Result<Vec<u8>> {
        debug!(path = %path, "Reading object");
        self.gcp
            .get_bytes(object_url(&path.bucket, &path.object)?.as_str(), &[("alt", "media".to_string())])
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("Object '{}'", path)),
                other => other,
            })
    }

    pub async fn download(&self, path: &GcsPath, local_path: &Path) -> Result<()> {
        let bytes = self.read_object(path).await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, bytes).await?;
        info!(path = %path, local = %local_path.display(), "Downloaded object");
        Ok(())
    }

    pub async fn upload_bytes(&self, path: &GcsPath, content_type: &str, bytes: Vec<u8>) -> Result<()> {
        let url = format!("{}/b/{}/o", UPLOAD_API, path.bucket);
        let query = [("uploadType", "media".to_string()), ("name", path.object.clone())];
        self.gcp.post_bytes(&url, &query, content_type, bytes).await?;
        Ok(())
    }

    pub async fn upload_file(&self, local_path: &Path, path: &GcsPath) -> Result<()> {
        let bytes = tokio::fs::read(local_path).await?;
        self.upload_bytes(path, "application/octet-stream", bytes).await
    }

    /// Upload every file under `local_dir` below `prefix`. Failures of
    /// single files are collected, not fatal.
    pub async fn upload_directory(&self, local_dir: &Path, bucket: &str, prefix: &str) -> Result<DirectoryUpload> {
        if !local_dir.is_dir() {
            return Err(Error::NotFound(format!("Directory {}", local_dir.display())));
        }
        let root = local_dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(|e| Error::Unexpected(format!("walk task failed: {}", e)))??;

        let mut outcome = DirectoryUpload::default();
        for file in files {
            let object = object_name(local_dir, &file, prefix);
            let target = GcsPath::new(bucket, object);
            match self.upload_file(&file, &target).await {
                Ok(()) => outcome.uploaded.push(target.to_string()),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Upload failed");
                    outcome.failed.push(FailedUpload {
                        local_path: file,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(bucket = %bucket, uploaded = outcome.uploaded.len(), failed = outcome.failed.len(), "Uploaded directory");
        Ok(outcome)
    }

    pub async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        self.gcp
            .delete(object_url(bucket, object)?.as_str())
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("Object '{}' in bucket '{}'", object, bucket)),
                other => other,
            })
    }

    /// Delete every object under `prefix`; returns their names
    pub async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let objects = self.list_objects(bucket, Some(prefix)).await?;
        if objects.is_empty() {
            return Err(Error::NotFound(format!(
                "Objects with prefix '{}' in bucket '{}'",
                prefix, bucket
            )));
        }
        let mut deleted = Vec::with_capacity(objects.len());
        for object in objects {
            self.delete_object(bucket, &object.name).await?;
            deleted.push(object.name);
        }
        Ok(deleted)
    }
}

/// Object name for `file` under `root`, with `/` separators
fn object_name(root: &Path, file: &Path, prefix: &str) -> String {
    let relative = file
        .strip_prefix(root)
        .unwrap_or(file)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative
    } else {
        format!("{}/{}", prefix, relative)
    }
}

pub fn buckets_report(buckets: &[Bucket]) -> String {
    let mut report = format!("Found {} buckets", buckets.len());
    for bucket in buckets {
        report.push_str(&format!(
            "\n- {} ({}, {})",
            bucket.name, bucket.location, bucket.storage_class
        ));
    }
    report
}

pub fn objects_report(bucket: &str, objects: &[StorageObject]) -> String {
    let mut report = format!("Found {} objects in bucket '{}'", objects.len(), bucket);
    for object in objects {
        report.push_str(&format!("\n- {} ({} bytes)", object.name, object.size));
    }
    report
}

//! Bucket names and `gs://` paths

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

pub const MIN_BUCKET_NAME_LEN: usize = 3;
pub const MAX_BUCKET_NAME_LEN: usize = 63;

static BUCKET_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9\-_]*[a-z0-9]$").ok());

static IPV4: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").ok());

fn matches(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Check a bucket name against the Cloud Storage naming rules
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let fail = |msg: &str| Err(Error::ValidationFailed(msg.to_string()));
    if name.is_empty() {
        return fail("Bucket name cannot be empty");
    }
    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&name.len()) {
        return Err(Error::ValidationFailed(format!(
            "Bucket name must be between {} and {} characters",
            MIN_BUCKET_NAME_LEN, MAX_BUCKET_NAME_LEN
        )));
    }
    if matches(&IPV4, name) {
        return fail("Bucket name cannot be formatted as an IP address");
    }
    if !matches(&BUCKET_NAME, name) {
        return fail("Bucket name can only contain lowercase letters, numbers, hyphens, and underscores");
    }
    if name.contains("google") {
        return fail("Bucket name cannot contain 'google'");
    }
    Ok(())
}

/// Turn free text (usually a repository name) into a usable bucket name
pub fn sanitize_bucket_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    let mut name = name.trim_matches('-').to_string();

    if name.len() < MIN_BUCKET_NAME_LEN {
        name = if name.is_empty() {
            "repo".to_string()
        } else {
            format!("{}-repo", name)
        };
    }
    if name.len() > MAX_BUCKET_NAME_LEN {
        name.truncate(MAX_BUCKET_NAME_LEN);
        name = name.trim_end_matches('-').to_string();
    }
    name
}

/// `gs://bucket/object`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsPath {
    pub bucket: String,
    /// Empty for the bucket itself
    pub object: String,
}

impl GcsPath {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    /// Last path segment of the object
    pub fn file_name(&self) -> &str {
        self.object.rsplit('/').next().unwrap_or_default()
    }

    /// Lowercased extension of the object, if any
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        name.rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

impl FromStr for GcsPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix("gs://")
            .ok_or_else(|| Error::InvalidInput(format!("Invalid GCS path '{}': expected gs://bucket/object", s)))?;
        let (bucket, object) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::InvalidInput(format!("Invalid GCS path '{}': missing bucket", s)));
        }
        Ok(Self::new(bucket, object))
    }
}

impl fmt::Display for GcsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

//! GitHub REST client and repository checkouts

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gcs::{DirectoryUpload, StorageClient, sanitize_bucket_name};
use crate::templates::clone_branch;

const API_BASE_URL: &str = "https://api.github.com";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// `owner/repo`, parsed from either that form or a GitHub URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }

    /// Directory a branch is checked out under
    pub fn checkout_dir_name(&self, branch: &str) -> String {
        format!("{}-{}", self.repo, branch.replace('/', "-"))
    }

    /// Bucket used when uploading a checkout without an explicit bucket
    pub fn default_bucket(&self) -> String {
        sanitize_bucket_name(&format!("{}-github", self.repo))
    }
}

impl FromStr for RepoRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_end_matches('/');
        let path = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
            .or_else(|| trimmed.strip_prefix("git@github.com:"))
            .or_else(|| trimmed.strip_prefix("github.com/"))
            .unwrap_or(trimmed);
        let mut parts = path.split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.trim_end_matches(".git").to_string(),
            }),
            _ => Err(Error::InvalidInput(format!(
                "Invalid repository '{}'. Use 'owner/repo' or a GitHub URL.",
                s
            ))),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchItem {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct Branch {
    name: String,
}

/// A local checkout, optionally mirrored to Cloud Storage
#[derive(Debug, Clone, Serialize)]
pub struct Checkout {
    pub repository: String,
    pub branch: String,
    pub path: PathBuf,
    pub upload: Option<CheckoutUpload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutUpload {
    pub bucket: String,
    pub prefix: String,
    pub files_uploaded: usize,
    pub failed: Vec<String>,
}

/// GitHub REST API client
#[derive(Clone)]
pub struct GitHubClient {
    http_client: HttpClient,
    token: Option<String>,
    base_url: String,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("plumber/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::NetworkError)?;
        Ok(Self {
            http_client,
            token: token.filter(|t| !t.trim().is_empty()),
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Point the client at another API root (GitHub Enterprise)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling GitHub API");
        let mut request = self
            .http_client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(Error::NetworkError)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await.map_err(Error::NetworkError)?);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(url = %url, status = status.as_u16(), "GitHub API call failed");
        Err(map_status(status, body))
    }

    /// Login of the token's owner
    pub async fn authenticate(&self) -> Result<String> {
        if self.token.is_none() {
            return Err(Error::AuthFailed(
                "No GitHub token provided. Set GITHUB_TOKEN.".to_string(),
            ));
        }
        let user: User = self.get("/user", &[]).await?;
        info!(login = %user.login, "Authenticated with GitHub");
        Ok(user.login)
    }

    /// Full names of repositories matching `query`
    pub async fn search_repositories(&self, query: &str) -> Result<Vec<String>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("A search query is needed".to_string()));
        }
        let response: SearchResponse = self
            .get("/search/repositories", &[("q", query.trim())])
            .await?;
        Ok(response.items.into_iter().map(|i| i.full_name).collect())
    }

    pub async fn list_branches(&self, repo: &RepoRef) -> Result<Vec<String>> {
        let path = format!("/repos/{}/{}/branches", repo.owner, repo.repo);
        let branches: Vec<Branch> = self.get(&path, &[]).await.map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!("Repository '{}'", repo)),
            other => other,
        })?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }
}

fn map_status(status: StatusCode, body: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => {
            Error::AuthFailed("Bad credentials. Please check your GitHub token.".to_string())
        }
        StatusCode::NOT_FOUND => Error::NotFound("GitHub resource".to_string()),
        _ => Error::external("github", status.as_u16(), body),
    }
}

/// Clone one branch of `repo` into `download_dir/<repo>-<branch>`,
/// replacing an existing checkout.
pub async fn clone_repository(repo: &RepoRef, branch: &str, download_dir: &Path) -> Result<PathBuf> {
    let url = repo.clone_url();
    let dest = download_dir.join(repo.checkout_dir_name(branch));
    let branch = branch.to_string();
    let target = dest.clone();
    info!(repository = %repo, branch = %branch, path = %dest.display(), "Cloning repository");
    tokio::task::spawn_blocking(move || -> Result<()> {
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::create_dir_all(target.parent().unwrap_or(&target))?;
        clone_branch(&url, &target, &branch).map_err(|e| match e {
            Error::Git(git) if git.code() == git2::ErrorCode::NotFound => {
                Error::NotFound(format!("Repository or branch '{}'", branch))
            }
            other => other,
        })?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Unexpected(format!("git task failed: {}", e)))??;
    Ok(dest)
}

/// Clone a branch and optionally mirror the checkout to a bucket.
///
/// The bucket is created when missing; without a name it defaults to
/// `<repo>-github`.
pub async fn download_repository(
    repo: &RepoRef,
    branch: &str,
    download_dir: &Path,
    storage: Option<(&StorageClient, Option<&str>)>,
) -> Result<Checkout> {
    let path = clone_repository(repo, branch, download_dir).await?;
    let upload = match storage {
        Some((storage, bucket)) => {
            let bucket = bucket
                .map(str::to_string)
                .unwrap_or_else(|| repo.default_bucket());
            let prefix = repo.checkout_dir_name(branch);
            storage.create_bucket(&bucket, "us-central1", "STANDARD").await?;
            let DirectoryUpload { uploaded, failed } =
                storage.upload_directory(&path, &bucket, &prefix).await?;
            Some(CheckoutUpload {
                bucket,
                prefix,
                files_uploaded: uploaded.len(),
                failed: failed.into_iter().map(|f| f.local_path.display().to_string()).collect(),
            })
        }
        None => None,
    };
    Ok(Checkout {
        repository: repo.to_string(),
        branch: branch.to_string(),
        path,
        upload,
    })
}

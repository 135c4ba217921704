//! Local checkouts of the public template repositories

use std::path::{Path, PathBuf};

use git2::{FetchOptions, Repository, build::CheckoutBuilder, build::RepoBuilder};
use glob::Pattern;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};

/// Directory name a repository URL is checked out under
pub fn repo_dir_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".git")
        .to_string()
}

/// Clone `url` into `workspace/<repo>` or fast-forward an existing checkout.
///
/// Runs the blocking git work on the blocking pool.
pub async fn sync_repo(url: &str, workspace: &Path, branch: &str) -> Result<PathBuf> {
    let url = url.to_string();
    let branch = branch.to_string();
    let dest = workspace.join(repo_dir_name(&url));
    tokio::task::spawn_blocking(move || sync_repo_blocking(&url, &dest, &branch))
        .await
        .map_err(|e| Error::Unexpected(format!("git task failed: {}", e)))?
}

fn sync_repo_blocking(url: &str, dest: &Path, branch: &str) -> Result<PathBuf> {
    if dest.join(".git").exists() {
        info!(path = %dest.display(), branch = %branch, "Pulling template repository");
        let repo = Repository::open(dest)?;
        fast_forward(&repo, branch)?;
    } else {
        info!(url = %url, path = %dest.display(), branch = %branch, "Cloning template repository");
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        clone_branch(url, dest, branch)?;
    }
    Ok(dest.to_path_buf())
}

/// Shallow-ish clone of a single branch
pub fn clone_branch(url: &str, dest: &Path, branch: &str) -> Result<Repository> {
    let mut fetch = FetchOptions::new();
    fetch.depth(1);
    let repo = RepoBuilder::new()
        .branch(branch)
        .fetch_options(fetch)
        .clone(url, dest)?;
    Ok(repo)
}

fn fast_forward(repo: &Repository, branch: &str) -> Result<()> {
    let mut remote = repo.find_remote("origin")?;
    remote.fetch(&[branch], None, None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetched = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&fetched])?;

    if analysis.is_up_to_date() {
        debug!(branch = %branch, "Repository already up to date");
        return Ok(());
    }
    if !analysis.is_fast_forward() {
        return Err(Error::Unexpected(format!(
            "local branch '{}' has diverged from origin; remove the checkout and retry",
            branch
        )));
    }

    let refname = format!("refs/heads/{}", branch);
    let mut reference = repo.find_reference(&refname)?;
    reference.set_target(fetched.id(), "plumber: fast-forward")?;
    repo.set_head(&refname)?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
    Ok(())
}

/// Match a file name against a glob pattern (`*_to_*.py`, `README.md`).
/// An invalid pattern matches nothing.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|p| p.matches(name))
}

fn compile(patterns: &[&str]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| Error::InvalidInput(format!("Bad file pattern '{}': {}", p, e))))
        .collect()
}

/// Directories a tree walk never descends into
fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || name == "target"
    }
}

/// Regular files below `root`, without following symlinks and skipping
/// hidden directories and `target`. Results are sorted.
pub(crate) fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| !is_skipped_dir(e)) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Recursively find files whose name matches any include pattern and no
/// exclude pattern. Hidden directories (`.git`) and `target` are skipped.
/// Results are sorted.
pub fn find_files(root: &Path, include: &[&str], exclude: &[&str]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!("Directory {}", root.display())));
    }
    let include = compile(include)?;
    let exclude = compile(exclude)?;

    let found = walk_files(root)?
        .into_iter()
        .filter(|path| {
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            include.iter().any(|p| p.matches(&name)) && !exclude.iter().any(|p| p.matches(&name))
        })
        .collect();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_dir_name() {
        assert_eq!(
            repo_dir_name("https://github.com/GoogleCloudPlatform/DataflowTemplates.git"),
            "DataflowTemplates"
        );
        assert_eq!(
            repo_dir_name("https://github.com/GoogleCloudPlatform/dataproc-templates/"),
            "dataproc-templates"
        );
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("gcs_to_bigquery.py", "*_to_*.py"));
        assert!(!matches_pattern("gcs_bigquery.py", "*_to_*.py"));
        assert!(matches_pattern("GCSToBigQuery.java", "*To*.java"));
        assert!(matches_pattern("GCSToBigQueryConfig.java", "*Config*"));
        assert!(matches_pattern("README.md", "README.md"));
        assert!(!matches_pattern("README.txt", "README.md"));
        assert!(matches_pattern("Main.java", "*.java"));
        assert!(!matches_pattern("a.javax", "*.java"));
        // Prefix and suffix must not overlap
        assert!(!matches_pattern("ab", "ab*b"));
    }

    #[test]
    fn test_find_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("python/gcs")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("python/gcs/gcs_to_bigquery.py"), "").unwrap();
        std::fs::write(root.join("python/gcs/gcs_to_bigquery_config.py"), "").unwrap();
        std::fs::write(root.join("python/gcs/README.md"), "").unwrap();
        std::fs::write(root.join(".git/x_to_y.py"), "").unwrap();

        let files = find_files(root, &["*_to_*.py", "README.md"], &["*config*"]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["README.md", "gcs_to_bigquery.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_files_skips_symlinked_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("real")).unwrap();
        std::fs::write(root.join("real/a.txt"), "a").unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let files = walk_files(root).unwrap();
        assert_eq!(files, vec![root.join("real/a.txt")]);
    }

    #[test]
    fn test_find_files_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_files(dir.path(), &["[oops"], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_find_files_missing_root() {
        let err = find_files(Path::new("/definitely/not/here"), &["*"], &[]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

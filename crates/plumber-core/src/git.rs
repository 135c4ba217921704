//! Local git operations on a working copy

use std::fmt;
use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, IndexAddOption, Repository, Signature, Status, StatusOptions, build::CheckoutBuilder};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

const DEFAULT_AUTHOR_NAME: &str = "Plumber";
const DEFAULT_AUTHOR_EMAIL: &str = "plumber@localhost";

/// Result of [`init`]
#[derive(Debug, Clone, Serialize)]
pub struct RepoInit {
    pub path: PathBuf,
    pub created_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Staged,
    Modified,
    Deleted,
    Untracked,
    Conflicted,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Staged => "staged",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Untracked => "untracked",
            Self::Conflicted => "conflicted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub path: String,
    pub state: FileState,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkingTreeStatus {
    /// `None` on a detached head
    pub branch: Option<String>,
    pub entries: Vec<StatusEntry>,
}

impl WorkingTreeStatus {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn report(&self) -> String {
        let branch = self.branch.as_deref().unwrap_or("(detached)");
        if self.is_clean() {
            return format!("On branch {}, working tree clean", branch);
        }
        let mut report = format!("On branch {}, {} changed paths", branch, self.entries.len());
        for entry in &self.entries {
            report.push_str(&format!("\n- {} ({})", entry.path, entry.state));
        }
        report
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub id: String,
    pub branch: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalBranch {
    pub name: String,
    pub current: bool,
}

pub fn branches_report(branches: &[LocalBranch]) -> String {
    if branches.is_empty() {
        return "No local branches yet; commit first".to_string();
    }
    let mut report = format!("Found {} local branches", branches.len());
    for branch in branches {
        let marker = if branch.current { "* " } else { "  " };
        report.push_str(&format!("\n{}{}", marker, branch.name));
    }
    report
}

fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|e| match e.code() {
        ErrorCode::NotFound => Error::NotFound(format!("Git repository at {}", path.display())),
        _ => Error::Git(e),
    })
}

/// Name of the branch HEAD points at, also for a branch with no commits yet
fn head_branch(repo: &Repository) -> Option<String> {
    match repo.head() {
        Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
        Ok(_) => None,
        Err(_) => repo
            .find_reference("HEAD")
            .ok()
            .and_then(|r| r.symbolic_target().map(|t| t.trim_start_matches("refs/heads/").to_string())),
    }
}

/// Initialise a repository at `path`, creating the directory. An existing
/// repository is left alone.
pub fn init(path: &Path) -> Result<RepoInit> {
    if Repository::open(path).is_ok() {
        debug!(path = %path.display(), "Repository already initialised");
        return Ok(RepoInit { path: path.to_path_buf(), created_new: false });
    }
    std::fs::create_dir_all(path)?;
    Repository::init(path)?;
    info!(path = %path.display(), "Initialised git repository");
    Ok(RepoInit { path: path.to_path_buf(), created_new: true })
}

fn classify(status: Status) -> Option<FileState> {
    if status.is_conflicted() {
        Some(FileState::Conflicted)
    } else if status.is_wt_new() {
        Some(FileState::Untracked)
    } else if status.is_wt_deleted() {
        Some(FileState::Deleted)
    } else if status.is_wt_modified() || status.is_wt_renamed() || status.is_wt_typechange() {
        Some(FileState::Modified)
    } else if status.is_index_new()
        || status.is_index_modified()
        || status.is_index_deleted()
        || status.is_index_renamed()
        || status.is_index_typechange()
    {
        Some(FileState::Staged)
    } else {
        None
    }
}

/// Changed and untracked paths of the working copy, sorted by path
pub fn status(path: &Path) -> Result<WorkingTreeStatus> {
    let repo = open(path)?;
    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);

    let mut entries: Vec<StatusEntry> = repo
        .statuses(Some(&mut options))?
        .iter()
        .filter_map(|entry| {
            let state = classify(entry.status())?;
            Some(StatusEntry { path: entry.path()?.to_string(), state })
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(WorkingTreeStatus { branch: head_branch(&repo), entries })
}

/// Stage paths matching `pathspecs` (all changes when empty), deletions
/// included. Returns the number of index entries afterwards.
pub fn add(path: &Path, pathspecs: &[String]) -> Result<usize> {
    let repo = open(path)?;
    let specs: Vec<&str> = if pathspecs.is_empty() {
        vec!["*"]
    } else {
        pathspecs.iter().map(String::as_str).collect()
    };
    let mut index = repo.index()?;
    index.add_all(specs.iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(specs.iter(), None)?;
    index.write()?;
    debug!(path = %path.display(), specs = ?specs, "Staged files");
    Ok(index.len())
}

/// Commit the index on the current branch.
///
/// The author falls back to the repository's `user.name`/`user.email` and
/// then to a Plumber identity.
pub fn commit(path: &Path, message: &str, author: Option<(&str, &str)>) -> Result<CommitInfo> {
    let message = message.trim();
    if message.is_empty() {
        return Err(Error::InvalidInput("Commit message must not be empty".to_string()));
    }
    let repo = open(path)?;
    let signature = match author {
        Some((name, email)) => Signature::now(name, email)?,
        None => repo
            .signature()
            .or_else(|_| Signature::now(DEFAULT_AUTHOR_NAME, DEFAULT_AUTHOR_EMAIL))?,
    };

    let mut index = repo.index()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    let unchanged = match &parent {
        Some(parent) => parent.tree_id() == tree_id,
        None => index.is_empty(),
    };
    if unchanged {
        return Err(Error::ValidationFailed("Nothing to commit; stage files first".to_string()));
    }

    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    let id = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
    let branch = head_branch(&repo);
    info!(path = %path.display(), commit = %id, branch = ?branch, "Committed changes");
    Ok(CommitInfo { id: id.to_string(), branch, message: message.to_string() })
}

/// Local branches, sorted, with the checked-out one marked
pub fn branches(path: &Path) -> Result<Vec<LocalBranch>> {
    let repo = open(path)?;
    let mut found = Vec::new();
    for branch in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            found.push(LocalBranch { name: name.to_string(), current: branch.is_head() });
        }
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

/// Check out `name`, creating it from HEAD first when `create` is set.
/// Local changes that would be overwritten make the checkout fail.
pub fn switch_branch(path: &Path, name: &str, create: bool) -> Result<String> {
    let repo = open(path)?;
    let exists = match repo.find_branch(name, BranchType::Local) {
        Ok(_) => true,
        Err(e) if e.code() == ErrorCode::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    if !exists {
        if !create {
            return Err(Error::NotFound(format!("Branch '{}'", name)));
        }
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head, false)?;
        info!(branch = %name, "Created branch");
    }

    let refname = format!("refs/heads/{}", name);
    let target = repo.revparse_single(&refname)?;
    repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
    repo.set_head(&refname)?;
    info!(path = %path.display(), branch = %name, "Switched branch");
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path()).unwrap();
        std::fs::write(dir.path().join("README.md"), "# etl\n").unwrap();
        add(dir.path(), &[]).unwrap();
        commit(dir.path(), "Initial commit", Some(("Dev", "dev@example.com"))).unwrap();
        dir
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project");
        assert!(init(&path).unwrap().created_new);
        assert!(!init(&path).unwrap().created_new);
        assert!(path.join(".git").is_dir());
    }

    #[test]
    fn test_status_add_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models/orders.sql"), "select 1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let before = status(dir.path()).unwrap();
        assert_eq!(before.entries.len(), 2);
        assert!(before.entries.iter().all(|e| e.state == FileState::Untracked));

        add(dir.path(), &["models/*".to_string()]).unwrap();
        let staged = status(dir.path()).unwrap();
        let states: Vec<_> = staged.entries.iter().map(|e| (e.path.as_str(), e.state)).collect();
        assert_eq!(
            states,
            vec![("models/orders.sql", FileState::Staged), ("notes.txt", FileState::Untracked)]
        );

        let info = commit(dir.path(), "Add orders model", Some(("Dev", "dev@example.com"))).unwrap();
        assert_eq!(info.id.len(), 40);
        assert_eq!(info.message, "Add orders model");
        let after = status(dir.path()).unwrap();
        assert_eq!(after.entries.len(), 1);
        assert!(after.report().contains("notes.txt (untracked)"));
    }

    #[test]
    fn test_commit_without_changes_fails() {
        let dir = committed_repo();
        let err = commit(dir.path(), "again", None).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
        let err = commit(dir.path(), "  ", None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_modified_and_deleted_files() {
        let dir = committed_repo();
        std::fs::write(dir.path().join("README.md"), "# changed\n").unwrap();
        assert_eq!(status(dir.path()).unwrap().entries[0].state, FileState::Modified);

        std::fs::remove_file(dir.path().join("README.md")).unwrap();
        assert_eq!(status(dir.path()).unwrap().entries[0].state, FileState::Deleted);

        add(dir.path(), &[]).unwrap();
        assert_eq!(status(dir.path()).unwrap().entries[0].state, FileState::Staged);
        commit(dir.path(), "Remove readme", None).unwrap();
        assert!(status(dir.path()).unwrap().is_clean());
    }

    #[test]
    fn test_branches_and_switch() {
        let dir = committed_repo();
        let start = branches(dir.path()).unwrap();
        assert_eq!(start.len(), 1);
        assert!(start[0].current);

        switch_branch(dir.path(), "feature/orders", true).unwrap();
        let listed = branches(dir.path()).unwrap();
        assert_eq!(listed.len(), 2);
        let current: Vec<_> = listed.iter().filter(|b| b.current).map(|b| b.name.as_str()).collect();
        assert_eq!(current, vec!["feature/orders"]);
        assert_eq!(status(dir.path()).unwrap().branch.as_deref(), Some("feature/orders"));

        switch_branch(dir.path(), &start[0].name, false).unwrap();
        assert!(branches_report(&branches(dir.path()).unwrap()).contains(&format!("* {}", start[0].name)));

        let err = switch_branch(dir.path(), "missing", false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_open_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        let err = status(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

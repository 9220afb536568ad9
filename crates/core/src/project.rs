//! Project identity: deterministic project ids derived from filesystem and
//! version-control metadata, plus git helpers used by the orchestrator.
//!
//! The rules guarantee that the same repository produces the same id across
//! working-tree relocations (the id hashes the normalized remote URL), while
//! unrelated directories that share a name stay distinct.

use crate::types::ProjectType;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolved identity for a project root.
#[derive(Debug, Clone)]
pub struct ProjectIdentity {
    pub project_id: String,
    pub project_name: String,
    pub project_type: ProjectType,
    pub remote_url: Option<String>,
}

/// Derive `(project_id, name, type, remote_url)` for a root path.
///
/// Priority: explicit override (sanitized, used verbatim), then git remote
/// (`<dir>_<first8(sha256(url))>`), then a local git repo (`<dir>`), then a
/// plain directory (`<dir>_<first8(sha256(abs_path))>`).
pub fn identify_project(path: &Path, explicit_id: Option<&str>) -> ProjectIdentity {
    if let Some(explicit) = explicit_id {
        let git_root = find_git_root(path);
        let remote_url = git_root.as_deref().and_then(remote_url);
        let project_type =
            if git_root.is_some() { ProjectType::Git } else { ProjectType::NonGit };
        return ProjectIdentity {
            project_id: sanitize_project_id(explicit),
            project_name: explicit.to_string(),
            project_type,
            remote_url,
        };
    }

    if let Some(git_root) = find_git_root(path) {
        let repo_name = git_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());

        if let Some(url) = remote_url(&git_root) {
            let url_hash = &hash_string(&url)[..8];
            return ProjectIdentity {
                project_id: format!("{}_{}", sanitize_project_id(&repo_name), url_hash),
                project_name: repo_name,
                project_type: ProjectType::Git,
                remote_url: Some(url),
            };
        }

        // Local repo without a remote: name alone is the best stable key.
        return ProjectIdentity {
            project_id: sanitize_project_id(&repo_name),
            project_name: repo_name,
            project_type: ProjectType::Git,
            remote_url: None,
        };
    }

    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let dir_name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let path_hash = &hash_string(&resolved.to_string_lossy())[..8];

    ProjectIdentity {
        project_id: format!("{}_{}", sanitize_project_id(&dir_name), path_hash),
        project_name: dir_name,
        project_type: ProjectType::NonGit,
        remote_url: None,
    }
}

/// Sanitize an id into a valid collection-name token: lowercase, only
/// `[a-z0-9_-]`, no leading digit, never empty.
pub fn sanitize_project_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c.to_ascii_lowercase());
            last_was_underscore = false;
        } else if !last_was_underscore {
            // Any disallowed character becomes an underscore; runs collapse.
            out.push('_');
            last_was_underscore = true;
        }
    }

    let trimmed = out.trim_matches('_');
    let mut result = if trimmed.is_empty() { "project".to_string() } else { trimmed.to_string() };
    if result.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        result.insert(0, 'p');
    }
    result
}

/// Normalize a git remote URL: strip a trailing `.git`, convert
/// `user@host:path` to `host/path`, and drop the `http(s)://` scheme.
pub fn normalize_git_url(url: &str) -> String {
    let url = url.strip_suffix(".git").unwrap_or(url);

    if let Some((user_host, path)) = url.split_once(':') {
        if let Some((_, host)) = user_host.split_once('@') {
            if !user_host.contains('/') {
                return format!("{host}/{path}");
            }
        }
    }

    let url = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://")).unwrap_or(url);
    url.to_string()
}

fn hash_string(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

// ---------------------------------------------------------------------------
// Git helpers (all tolerant of missing or broken repositories)
// ---------------------------------------------------------------------------

/// Walk up from `path` until a `.git` directory exists.
pub fn find_git_root(path: &Path) -> Option<PathBuf> {
    let mut current = path.canonicalize().ok()?;
    loop {
        if current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Normalized `remote.origin.url`, or `None`.
pub fn remote_url(git_root: &Path) -> Option<String> {
    let repo = git2::Repository::open(git_root).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    remote.url().map(normalize_git_url)
}

/// Current HEAD commit hash, or `None`.
pub fn current_commit(git_root: &Path) -> Option<String> {
    let repo = git2::Repository::open(git_root).ok()?;
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

/// Whether the working tree has staged or unstaged changes. Assumes dirty
/// when the repository cannot be inspected.
pub fn has_uncommitted_changes(git_root: &Path) -> bool {
    let Ok(repo) = git2::Repository::open(git_root) else { return true };
    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true);
    let result = match repo.statuses(Some(&mut opts)) {
        Ok(statuses) => !statuses.is_empty(),
        Err(_) => true,
    };
    result
}

/// Files changed between `from_commit` and HEAD (or the working tree when
/// `from_commit` is `None`). Paths are absolute. Empty on any failure.
pub fn changed_files(git_root: &Path, from_commit: Option<&str>) -> Vec<PathBuf> {
    fn inner(git_root: &Path, from_commit: Option<&str>) -> Option<Vec<PathBuf>> {
        let repo = git2::Repository::open(git_root).ok()?;
        let head_tree = repo.head().ok()?.peel_to_commit().ok()?.tree().ok()?;

        let diff = match from_commit {
            Some(rev) => {
                let from_tree =
                    repo.revparse_single(rev).ok()?.peel_to_commit().ok()?.tree().ok()?;
                repo.diff_tree_to_tree(Some(&from_tree), Some(&head_tree), None).ok()?
            }
            None => repo.diff_tree_to_workdir_with_index(Some(&head_tree), None).ok()?,
        };

        let mut files = Vec::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                files.push(git_root.join(path));
            }
        }
        Some(files)
    }

    inner(git_root, from_commit).unwrap_or_default()
}

/// Untracked (not ignored) files in the repository. Empty on any failure.
pub fn untracked_files(git_root: &Path) -> Vec<PathBuf> {
    let Ok(repo) = git2::Repository::open(git_root) else { return Vec::new() };
    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);

    let result = match repo.statuses(Some(&mut opts)) {
        Ok(statuses) => statuses
            .iter()
            .filter(|entry| entry.status().contains(git2::Status::WT_NEW))
            .filter_map(|entry| entry.path().map(|p| git_root.join(p)))
            .collect(),
        Err(_) => {
            debug!(root = %git_root.display(), "Could not read git statuses");
            Vec::new()
        }
    };
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_basic() {
        assert_eq!(sanitize_project_id("My Repo!"), "my_repo");
        assert_eq!(sanitize_project_id("foo--bar"), "foo--bar");
        assert_eq!(sanitize_project_id("a///b"), "a_b");
        assert_eq!(sanitize_project_id("___"), "project");
        assert_eq!(sanitize_project_id(""), "project");
        assert_eq!(sanitize_project_id("9lives"), "p9lives");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for s in ["My Repo!", "9lives", "___", "Foo.Bar-baz", "über-tool", "a b c 1 2 3"] {
            let once = sanitize_project_id(s);
            assert_eq!(sanitize_project_id(&once), once, "not idempotent for {s:?}");
            assert!(
                once == "project"
                    || once
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'),
                "bad output {once:?}"
            );
            assert!(!once.starts_with(|c: char| c.is_ascii_digit()));
        }
    }

    #[test]
    fn url_normalization() {
        assert_eq!(
            normalize_git_url("git@github.com:user/repo.git"),
            "github.com/user/repo"
        );
        assert_eq!(
            normalize_git_url("https://github.com/user/repo.git"),
            "github.com/user/repo"
        );
        assert_eq!(normalize_git_url("https://github.com/user/repo"), "github.com/user/repo");
        assert_eq!(normalize_git_url("http://gitlab.local/x/y"), "gitlab.local/x/y");
    }

    #[test]
    fn non_git_identity_is_path_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("myproject");
        std::fs::create_dir(&project).unwrap();

        let identity = identify_project(&project, None);
        assert_eq!(identity.project_type, ProjectType::NonGit);
        assert!(identity.project_id.starts_with("myproject_"));
        // Deterministic across calls
        assert_eq!(identify_project(&project, None).project_id, identity.project_id);
    }

    #[test]
    fn explicit_id_used_verbatim_after_sanitization() {
        let dir = tempfile::tempdir().unwrap();
        let identity = identify_project(dir.path(), Some("My Frontend"));
        assert_eq!(identity.project_id, "my_frontend");
        assert_eq!(identity.project_name, "My Frontend");
    }

    #[test]
    fn git_helpers_tolerate_plain_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_git_root(dir.path()).is_none());
        assert!(remote_url(dir.path()).is_none());
        assert!(current_commit(dir.path()).is_none());
        assert!(has_uncommitted_changes(dir.path()));
        assert!(changed_files(dir.path(), None).is_empty());
        assert!(untracked_files(dir.path()).is_empty());
    }

    #[test]
    fn untracked_files_in_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("new.py"), "x = 1\n").unwrap();

        let untracked = untracked_files(dir.path());
        assert_eq!(untracked.len(), 1);
        assert!(untracked[0].ends_with("new.py"));
        assert!(has_uncommitted_changes(dir.path()));
        // No commits yet, so there is no HEAD to report.
        assert!(current_commit(dir.path()).is_none());
    }

    #[test]
    fn git_identity_from_remote_url_is_location_independent() {
        // Two clones of the same remote in different directories must share
        // the id component derived from the URL hash.
        let make_repo = |parent: &Path, name: &str| {
            let root = parent.join(name);
            std::fs::create_dir(&root).unwrap();
            let repo = git2::Repository::init(&root).unwrap();
            repo.remote("origin", "git@github.com:user/myrepo.git").unwrap();
            root
        };

        let dir = tempfile::tempdir().unwrap();
        let a = make_repo(dir.path(), "myrepo");
        let b_parent = dir.path().join("elsewhere");
        std::fs::create_dir(&b_parent).unwrap();
        let b = make_repo(&b_parent, "myrepo");

        let id_a = identify_project(&a, None);
        let id_b = identify_project(&b, None);
        assert_eq!(id_a.project_type, ProjectType::Git);
        assert_eq!(id_a.project_id, id_b.project_id);
        assert_eq!(id_a.remote_url.as_deref(), Some("github.com/user/myrepo"));
    }
}

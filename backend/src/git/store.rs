//! Clone-per-operation access to remote repositories
//!
//! Every operation clones the remote into a fresh [`Workspace`], acts on
//! that clone and drops it before returning. Nothing is cached between
//! calls, so concurrent callers never share a working tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::authn::cipher::CredentialCipher;
use crate::errors::BackendError;
use crate::filesys::workspace::Workspace;
use crate::git::command::GitCli;
use crate::git::remote::Remote;
use crate::git::tree;
use crate::models::file_node::FileNode;
use crate::models::repository::{CommitInfo, RepositoryConnection, RepositoryStatus};
use crate::storage::settings::GitSettings;

/// Object name of the empty tree, used as the parent of root commits
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Marker keeping otherwise empty folders in the index
const FOLDER_MARKER: &str = ".gitkeep";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    /// Tip of one branch only
    Shallow,
    /// Complete history
    Full,
}

/// A cloned working tree together with the remote it came from
struct Checkout {
    workspace: Workspace,
    remote: Remote,
}

impl Checkout {
    fn dir(&self) -> &Path {
        self.workspace.path()
    }

    fn join(&self, relative: &str) -> PathBuf {
        self.workspace.join(relative)
    }
}

/// Stateless git content store
pub struct GitContentStore {
    cli: GitCli,
    cipher: Arc<CredentialCipher>,
    workspace_root: PathBuf,
}

impl GitContentStore {
    pub fn new(settings: &GitSettings, cipher: Arc<CredentialCipher>) -> Self {
        Self {
            cli: GitCli::new(settings),
            cipher,
            workspace_root: settings.workspace_root(),
        }
    }

    /// Whether any remote ref ends with `/<branch>`
    pub async fn branch_exists(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
    ) -> Result<bool, BackendError> {
        let remote = Remote::resolve(repo, &self.cipher)?;
        let refs = self
            .cli
            .run(None, &["ls-remote", remote.url()], &remote.redactions())
            .await?;
        let suffix = format!("/{}", branch);
        Ok(refs
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|name| name.ends_with(&suffix)))
    }

    /// Check the remote without cloning
    pub async fn check_connection(&self, repo: &RepositoryConnection) -> RepositoryStatus {
        let result = async {
            let remote = Remote::resolve(repo, &self.cipher)?;
            self.cli
                .run(None, &["ls-remote", "--heads", remote.url()], &remote.redactions())
                .await
        }
        .await;

        match result {
            Ok(_) => RepositoryStatus::Successful,
            Err(e) => {
                warn!("Repository {} is not reachable: {}", repo.name, e);
                RepositoryStatus::Error
            }
        }
    }

    /// Whether a fresh clone of `branch` sits at the commit the remote advertises
    pub async fn head_matches_remote(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
    ) -> Result<bool, BackendError> {
        let checkout = self
            .checkout(repo, Some(branch), Depth::Shallow, "repo-status")
            .await?;
        let local = self.git(&checkout, &["rev-parse", "HEAD"]).await?;
        let refs = self
            .cli
            .run(
                None,
                &["ls-remote", "--heads", checkout.remote.url()],
                &checkout.remote.redactions(),
            )
            .await?;

        let suffix = format!("/{}", branch);
        let advertised = refs.lines().find_map(|line| {
            let mut fields = line.split_whitespace();
            let hash = fields.next()?;
            fields.next()?.ends_with(&suffix).then_some(hash)
        });
        debug!("{}/{}: local {} remote {:?}", repo.name, branch, local.trim(), advertised);
        Ok(advertised == Some(local.trim()))
    }

    /// Branch names on the remote, sorted
    pub async fn list_branches(
        &self,
        repo: &RepositoryConnection,
    ) -> Result<Vec<String>, BackendError> {
        let remote = Remote::resolve(repo, &self.cipher)?;
        let refs = self
            .cli
            .run(None, &["ls-remote", "--heads", remote.url()], &remote.redactions())
            .await?;
        let mut branches: Vec<String> = refs
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .filter_map(|name| name.strip_prefix("refs/heads/"))
            .map(str::to_string)
            .collect();
        branches.sort();
        branches.dedup();
        Ok(branches)
    }

    /// Whether `path` is an existing directory on `branch`
    pub async fn path_exists(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        path: &str,
    ) -> Result<bool, BackendError> {
        let trimmed = path.trim();
        if trimmed.is_empty() || trimmed == "." || trimmed == "/" {
            return Ok(false);
        }
        let path = relative(trimmed)?;
        let checkout = self.checkout(repo, Some(branch), Depth::Shallow, "repo-check").await?;
        Ok(is_dir(&checkout.join(path)).await)
    }

    /// Immediate subfolder names of `base_path`; empty when it is not a directory
    pub async fn list_folders(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        base_path: &str,
    ) -> Result<Vec<String>, BackendError> {
        let base_path = relative(base_path)?;
        let checkout = self.checkout(repo, Some(branch), Depth::Shallow, "repo-list").await?;
        let dir = checkout.join(base_path);
        if !is_dir(&dir).await {
            return Ok(Vec::new());
        }
        Ok(blocking(move || tree::subfolders(&dir)).await?)
    }

    /// Recursive tree below `base_path`, without contents; empty when it is not a directory
    pub async fn list_files(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        base_path: &str,
    ) -> Result<Vec<FileNode>, BackendError> {
        let base_path = relative(base_path)?;
        let checkout = self.checkout(repo, Some(branch), Depth::Shallow, "repo-list").await?;
        let dir = checkout.join(base_path);
        if !is_dir(&dir).await {
            return Ok(Vec::new());
        }
        Ok(blocking(move || tree::children(&dir)).await?)
    }

    /// Read a file or folder for display
    ///
    /// Never fails: a missing path yields a `missing` node and any other
    /// problem an `error` node.
    pub async fn read_entry(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        path: &str,
    ) -> FileNode {
        match self.try_read_entry(repo, branch, path).await {
            Ok(node) => node,
            Err(e) => {
                warn!("Failed to read {} from {}: {}", path, repo.name, e);
                FileNode::error("error", "# Failed to read entry")
            }
        }
    }

    async fn try_read_entry(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        path: &str,
    ) -> Result<FileNode, BackendError> {
        let path = relative(path)?;
        let checkout = self.checkout(repo, Some(branch), Depth::Shallow, "repo-entry").await?;
        let target = checkout.join(path);
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| repo.name.clone());

        let meta = match fs::metadata(&target).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileNode::missing("missing"))
            }
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            let children = blocking(move || tree::children(&target)).await?;
            Ok(FileNode::folder(&name, children))
        } else {
            let content = fs::read_to_string(&target).await?;
            Ok(FileNode::file(&name, Some(content)))
        }
    }

    /// Full text of a file; NotFound if it is missing or a directory
    pub async fn read_file(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        path: &str,
    ) -> Result<String, BackendError> {
        let path = relative(path)?;
        let checkout = self.checkout(repo, Some(branch), Depth::Shallow, "repo-read").await?;
        let target = checkout.join(path);
        match fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => Ok(fs::read_to_string(&target).await?),
            _ => Err(BackendError::NotFound(format!("file '{}'", path))),
        }
    }

    /// Commits touching `path`, newest first
    pub async fn list_commits(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        path: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CommitInfo>, BackendError> {
        let path = relative(path)?;
        let checkout = self.checkout(repo, Some(branch), Depth::Full, "repo-log").await?;

        let skip = format!("--skip={}", offset);
        let max = format!("--max-count={}", limit);
        let mut args = vec![
            "log",
            "--format=%H%x1f%an%x1f%aI%x1f%s",
            skip.as_str(),
            max.as_str(),
        ];
        if !path.is_empty() {
            args.extend(["--", path]);
        }
        let log = self
            .cli
            .run(Some(checkout.dir()), &args, &checkout.remote.redactions())
            .await?;

        Ok(log.lines().filter_map(parse_commit_line).collect())
    }

    /// Write one file, creating intermediate folders, and push a commit
    ///
    /// Returns the new commit, or `None` when the content was unchanged.
    pub async fn push_file(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        folder: &str,
        filename: &str,
        content: &str,
        message: &str,
    ) -> Result<Option<String>, BackendError> {
        let path = join_path(folder, filename);
        self.push_files(repo, branch, &[(path, content.to_string())], message)
            .await
    }

    /// Write several files and push them as a single commit
    pub async fn push_files(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        files: &[(String, String)],
        message: &str,
    ) -> Result<Option<String>, BackendError> {
        for (path, _) in files {
            if relative(path)?.is_empty() {
                return Err(BackendError::InvalidParameter("empty file path".to_string()));
            }
        }

        let checkout = self.checkout(repo, Some(branch), Depth::Full, "repo-push").await?;
        for (path, content) in files {
            let target = checkout.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, content).await?;
        }

        self.git(&checkout, &["add", "-A"]).await?;
        self.commit_and_push(&checkout, branch, message).await
    }

    /// Create a folder tracked through a marker file
    pub async fn create_folder(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        folder: &str,
        message: &str,
    ) -> Result<Option<String>, BackendError> {
        let folder = relative(folder)?;
        if folder.is_empty() {
            return Err(BackendError::InvalidParameter("empty folder path".to_string()));
        }
        let checkout = self.checkout(repo, Some(branch), Depth::Full, "repo-folder").await?;
        let dir = checkout.join(folder);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(FOLDER_MARKER), "").await?;

        self.git(&checkout, &["add", "-A"]).await?;
        self.commit_and_push(&checkout, branch, message).await
    }

    /// Remove a file or folder
    pub async fn delete_path(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        path: &str,
        message: &str,
    ) -> Result<Option<String>, BackendError> {
        let path = relative(path)?;
        if path.is_empty() {
            return Err(BackendError::InvalidParameter(
                "refusing to delete the repository root".to_string(),
            ));
        }
        let checkout = self.checkout(repo, Some(branch), Depth::Full, "repo-delete").await?;
        if fs::symlink_metadata(checkout.join(path)).await.is_err() {
            return Err(BackendError::NotFound(format!("path '{}'", path)));
        }

        self.git(&checkout, &["rm", "-r", "-q", "--", path]).await?;
        self.commit_and_push(&checkout, branch, message).await
    }

    /// Move a file or folder
    pub async fn rename_path(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        old_path: &str,
        new_path: &str,
        message: &str,
    ) -> Result<Option<String>, BackendError> {
        let old_path = relative(old_path)?;
        let new_path = relative(new_path)?;
        if old_path.is_empty() || new_path.is_empty() {
            return Err(BackendError::InvalidParameter("empty path".to_string()));
        }

        let checkout = self.checkout(repo, Some(branch), Depth::Full, "repo-rename").await?;
        let source = checkout.join(old_path);
        let target = checkout.join(new_path);
        if fs::symlink_metadata(&source).await.is_err() {
            return Err(BackendError::NotFound(format!("path '{}'", old_path)));
        }
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(BackendError::InvalidParameter(format!(
                "path '{}' already exists",
                new_path
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&source, &target).await?;

        self.git(&checkout, &["rm", "-r", "-q", "--cached", "--", old_path])
            .await?;
        self.git(&checkout, &["add", "--", new_path]).await?;
        self.commit_and_push(&checkout, branch, message).await
    }

    /// Apply the inverse of `hash` as a new commit
    pub async fn revert_commit(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        hash: &str,
        message: &str,
    ) -> Result<Option<String>, BackendError> {
        let checkout = self.checkout(repo, Some(branch), Depth::Full, "repo-revert").await?;
        let commit = self.resolve_commit(&checkout, hash).await?;

        self.git(&checkout, &["revert", "--no-commit", &commit])
            .await?;
        self.commit_and_push(&checkout, branch, message).await
    }

    /// Revert the tip of `branch` and force-push the result
    ///
    /// With `expected_head`, the revert is refused when the tip is some
    /// other commit. Any failure here is fatal for the caller.
    pub async fn revert_last_commit(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        expected_head: Option<&str>,
    ) -> Result<String, BackendError> {
        let checkout = self
            .checkout(repo, Some(branch), Depth::Full, "repo-revert-last")
            .await?;
        let head = self.git(&checkout, &["rev-parse", "HEAD"]).await?;
        let head = head.trim();
        if let Some(expected) = expected_head {
            if head != expected {
                return Err(BackendError::DeployError(format!(
                    "refusing to revert {}: branch {} moved from {}",
                    head, branch, expected
                )));
            }
        }

        self.git(&checkout, &["revert", "--no-edit", "HEAD"]).await?;
        let reverted = self.git(&checkout, &["rev-parse", "HEAD"]).await?;
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.git(&checkout, &["push", "-q", "--force", "origin", &refspec])
            .await?;

        info!("Reverted {} on {}/{}", head, repo.name, branch);
        Ok(reverted.trim().to_string())
    }

    /// Unified diff of `hash` against its first parent, restricted to `path`
    pub async fn get_commit_diff(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
        hash: &str,
        path: &str,
    ) -> Result<String, BackendError> {
        let path = relative(path)?;
        let checkout = self.checkout(repo, Some(branch), Depth::Full, "repo-diff").await?;
        let commit = self.resolve_commit(&checkout, hash).await?;

        let parents = self
            .git(&checkout, &["rev-list", "--parents", "-n", "1", &commit])
            .await?;
        let parent = parents
            .split_whitespace()
            .nth(1)
            .unwrap_or(EMPTY_TREE)
            .to_string();

        let mut args = vec!["diff", "--no-color", parent.as_str(), commit.as_str()];
        if !path.is_empty() {
            args.extend(["--", path]);
        }
        self.git(&checkout, &args).await
    }

    /// Zip of the working tree at the tip of `branch`
    pub async fn download_archive(
        &self,
        repo: &RepositoryConnection,
        branch: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let checkout = self
            .checkout(repo, Some(branch), Depth::Shallow, "repo-archive")
            .await?;
        self.cli
            .run_bytes(checkout.dir(), &["archive", "--format=zip", "HEAD"])
            .await
    }

    /// Create `name` from the tip of `base` on the remote
    pub async fn create_branch(
        &self,
        repo: &RepositoryConnection,
        name: &str,
        base: &str,
    ) -> Result<(), BackendError> {
        let checkout = self
            .checkout(repo, Some(base), Depth::Shallow, "repo-create-branch")
            .await?;
        let valid = self
            .cli
            .exec(Some(checkout.dir()), &["check-ref-format", "--branch", name], &[])
            .await?;
        if !valid.success || name.starts_with('-') {
            return Err(BackendError::InvalidParameter(format!(
                "invalid branch name '{}'",
                name
            )));
        }

        self.git(&checkout, &["checkout", "-q", "-b", name]).await?;
        let refspec = format!("HEAD:refs/heads/{}", name);
        self.git(&checkout, &["push", "-q", "origin", &refspec]).await?;
        info!("Created branch {} from {} on {}", name, base, repo.name);
        Ok(())
    }

    /// Delete `name` from the remote and return the fallback branch
    ///
    /// The last remaining branch is never deleted.
    pub async fn delete_branch(
        &self,
        repo: &RepositoryConnection,
        name: &str,
    ) -> Result<String, BackendError> {
        let checkout = self
            .checkout(repo, None, Depth::Full, "repo-delete-branch")
            .await?;
        let refs = self
            .git(
                &checkout,
                &["for-each-ref", "--format=%(refname)", "refs/remotes/origin"],
            )
            .await?;
        let branches: Vec<&str> = refs
            .lines()
            .filter_map(|r| r.trim().strip_prefix("refs/remotes/origin/"))
            .filter(|b| *b != "HEAD")
            .collect();

        if !branches.contains(&name) {
            return Err(BackendError::NotFound(format!("branch '{}'", name)));
        }
        let remaining: Vec<&str> = branches.into_iter().filter(|b| *b != name).collect();
        let fallback = fallback_branch(&remaining)?.to_string();

        self.git(&checkout, &["checkout", "-q", &fallback]).await?;
        let local_ref = format!("refs/heads/{}", name);
        let local = self
            .cli
            .exec(
                Some(checkout.dir()),
                &["rev-parse", "--verify", "--quiet", &local_ref],
                &[],
            )
            .await?;
        if local.success {
            self.git(&checkout, &["branch", "-D", name]).await?;
        }

        let refspec = format!(":refs/heads/{}", name);
        self.git(&checkout, &["push", "-q", "origin", &refspec]).await?;
        info!("Deleted branch {} on {}, fallback {}", name, repo.name, fallback);
        Ok(fallback)
    }

    async fn checkout(
        &self,
        repo: &RepositoryConnection,
        branch: Option<&str>,
        depth: Depth,
        prefix: &str,
    ) -> Result<Checkout, BackendError> {
        let remote = Remote::resolve(repo, &self.cipher)?;
        let workspace = Workspace::create(&self.workspace_root, prefix).await?;
        let target = workspace.path().to_string_lossy().to_string();

        let mut args = vec!["clone", "--quiet"];
        if depth == Depth::Shallow {
            args.extend(["--depth", "1"]);
        }
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend(["--", remote.url(), target.as_str()]);

        self.cli.run(None, &args, &remote.redactions()).await?;
        debug!("Cloned {} into {}", repo.name, target);
        Ok(Checkout { workspace, remote })
    }

    async fn git(&self, checkout: &Checkout, args: &[&str]) -> Result<String, BackendError> {
        self.cli
            .run(Some(checkout.dir()), args, &checkout.remote.redactions())
            .await
    }

    /// Full object name of `hash`; CommitNotFound if it does not name a commit
    async fn resolve_commit(&self, checkout: &Checkout, hash: &str) -> Result<String, BackendError> {
        let hash = hash.trim();
        if hash.is_empty() || hash.starts_with('-') {
            return Err(BackendError::CommitNotFound(hash.to_string()));
        }
        let spec = format!("{}^{{commit}}", hash);
        let output = self
            .cli
            .exec(
                Some(checkout.dir()),
                &["rev-parse", "--verify", "--quiet", &spec],
                &[],
            )
            .await?;
        if !output.success {
            return Err(BackendError::CommitNotFound(hash.to_string()));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Commit staged changes and push them; `None` when nothing is staged
    async fn commit_and_push(
        &self,
        checkout: &Checkout,
        branch: &str,
        message: &str,
    ) -> Result<Option<String>, BackendError> {
        let status = self.git(checkout, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            debug!("Nothing to commit on {}", branch);
            return Ok(None);
        }

        self.git(checkout, &["commit", "-q", "-m", message]).await?;
        let hash = self.git(checkout, &["rev-parse", "HEAD"]).await?;
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.git(checkout, &["push", "-q", "origin", &refspec]).await?;
        Ok(Some(hash.trim().to_string()))
    }
}

/// Normalise a repository-relative path, rejecting parent traversal
fn relative(path: &str) -> Result<&str, BackendError> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.split('/').any(|part| part == "..") {
        return Err(BackendError::InvalidParameter(format!(
            "path '{}' escapes the repository",
            path
        )));
    }
    Ok(if trimmed == "." { "" } else { trimmed })
}

fn join_path(folder: &str, filename: &str) -> String {
    let folder = folder.trim().trim_matches('/');
    if folder.is_empty() || folder == "." {
        filename.to_string()
    } else {
        format!("{}/{}", folder, filename)
    }
}

/// Pick the branch to stand on: `main`, then `master`, then the first remaining
fn fallback_branch<'a>(remaining: &[&'a str]) -> Result<&'a str, BackendError> {
    if remaining.is_empty() {
        return Err(BackendError::LastBranch(
            "cannot delete the last branch of a repository".to_string(),
        ));
    }
    Ok(["main", "master"]
        .into_iter()
        .find_map(|preferred| remaining.iter().copied().find(|b| *b == preferred))
        .unwrap_or(remaining[0]))
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.splitn(4, '\u{1f}');
    Some(CommitInfo {
        hash: parts.next()?.to_string(),
        author: parts.next()?.to_string(),
        date: parts.next()?.to_string(),
        message: parts.next().unwrap_or_default().to_string(),
    })
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Internal(e.to_string()))?
        .map_err(BackendError::from)
}

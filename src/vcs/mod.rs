//! Local VCS operations via git subprocesses.
//!
//! Every command runs with a clean git environment (no system or user
//! config) so behavior does not depend on the machine the bot runs on.
//! Commit identity is passed per-command with `-c` flags rather than
//! written into any repository config.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;

use crate::types::CommitHash;

/// Errors from VCS operations.
#[derive(Debug, Error)]
pub enum VcsError {
    /// Git command exited nonzero.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A push was rejected by the remote (typically because the remote
    /// ref advanced concurrently).
    #[error("push rejected: {stderr}")]
    PushRejected { stderr: String },

    /// A merge produced conflicts.
    #[error("merge conflict merging {rev}")]
    MergeConflict { rev: String },

    /// A requested ref does not exist on the remote.
    #[error("ref not found: {refname}")]
    RefNotFound { refname: String },

    /// IO error spawning git or touching the working tree.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    /// Returns true if retrying the operation later could succeed.
    /// Conflicting merges and missing refs need intervention, not time.
    pub fn is_transient(&self) -> bool {
        match self {
            VcsError::CommandFailed { .. } | VcsError::PushRejected { .. } | VcsError::Io(_) => {
                true
            }
            VcsError::MergeConflict { .. } | VcsError::RefNotFound { .. } => false,
        }
    }
}

/// Result type for VCS operations.
pub type VcsResult<T> = Result<T, VcsError>;

/// Identity used when creating commits.
#[derive(Debug, Clone)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        CommitIdentity {
            name: name.into(),
            email: email.into(),
        }
    }
}

fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    // Clean environment: no system/user config, never prompt.
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_CONFIG_SYSTEM", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

fn run(workdir: &Path, args: &[&str]) -> VcsResult<Output> {
    let output = git_command(workdir).args(args).output()?;
    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(VcsError::CommandFailed { command, stderr })
    }
}

fn run_stdout(workdir: &Path, args: &[&str]) -> VcsResult<String> {
    let output = run(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Lists the branch heads of a remote without a local checkout, as
/// `(branch name, head hash)` pairs.
pub fn remote_branches(url: &str) -> VcsResult<Vec<(String, CommitHash)>> {
    let mut cmd = Command::new("git");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_CONFIG_SYSTEM", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    let output = cmd.args(["ls-remote", "--heads", url]).output()?;
    if !output.status.success() {
        return Err(VcsError::CommandFailed {
            command: format!("git ls-remote --heads {}", url),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut branches = Vec::new();
    for line in stdout.lines() {
        if let Some((hash, refname)) = line.split_once('\t') {
            if let Some(name) = refname.strip_prefix("refs/heads/") {
                branches.push((name.to_string(), CommitHash::new(hash)));
            }
        }
    }
    Ok(branches)
}

/// A local git repository checkout.
#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Initializes a fresh repository at `path`.
    pub fn init(path: impl AsRef<Path>) -> VcsResult<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        run(&root, &["init", "--initial-branch=main", "--quiet"])?;
        Ok(Repository { root })
    }

    /// Initializes a bare repository at `path`, usable as a push target.
    pub fn init_bare(path: impl AsRef<Path>) -> VcsResult<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        run(&root, &["init", "--bare", "--initial-branch=main", "--quiet"])?;
        Ok(Repository { root })
    }

    /// Clones `url` into `path`.
    pub fn clone(url: &str, path: impl AsRef<Path>) -> VcsResult<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        run(&root, &["clone", "--quiet", url, "."])?;
        Ok(Repository { root })
    }

    /// Opens an existing repository at `path`, if one is there.
    pub fn open(path: impl AsRef<Path>) -> Option<Self> {
        let root = path.as_ref().to_path_buf();
        if root.join(".git").exists() || root.join("HEAD").exists() {
            Some(Repository { root })
        } else {
            None
        }
    }

    /// Materializes a single remote ref into a fresh local checkout.
    ///
    /// Fails with [`VcsError::RefNotFound`] when the remote exists but the
    /// ref does not; any other failure surfaces as-is.
    pub fn materialize(path: impl AsRef<Path>, url: &str, refname: &str) -> VcsResult<Self> {
        let repo = Repository::init(path)?;
        let hash = repo.fetch(url, refname)?;
        repo.checkout_hard(&hash)?;
        Ok(repo)
    }

    /// The working-tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stages a file (path relative to the repository root).
    pub fn add(&self, relative: &str) -> VcsResult<()> {
        run(&self.root, &["add", "--", relative])?;
        Ok(())
    }

    /// Creates a commit with the given identity and returns its hash.
    pub fn commit(&self, message: &str, identity: &CommitIdentity) -> VcsResult<CommitHash> {
        let name_cfg = format!("user.name={}", identity.name);
        let email_cfg = format!("user.email={}", identity.email);
        run(
            &self.root,
            &[
                "-c",
                &name_cfg,
                "-c",
                &email_cfg,
                "commit",
                "--quiet",
                "--allow-empty",
                "-m",
                message,
            ],
        )?;
        self.head()
    }

    /// The hash the current head points at.
    pub fn head(&self) -> VcsResult<CommitHash> {
        Ok(CommitHash::new(run_stdout(&self.root, &["rev-parse", "HEAD"])?))
    }

    /// Resolves a revision to a hash, if it exists.
    pub fn resolve(&self, rev: &str) -> VcsResult<Option<CommitHash>> {
        let output = git_command(&self.root)
            .args(["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", rev)])
            .output()?;
        if output.status.success() {
            let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(CommitHash::new(hash)))
        } else {
            Ok(None)
        }
    }

    /// Fetches one ref from `url` and returns the fetched head.
    ///
    /// Distinguishes a missing remote ref from other failures so callers
    /// can create the ref on first use.
    pub fn fetch(&self, url: &str, refname: &str) -> VcsResult<CommitHash> {
        let result = run(&self.root, &["fetch", "--quiet", url, refname]);
        if let Err(VcsError::CommandFailed { stderr, .. }) = &result {
            if stderr.contains("couldn't find remote ref") {
                return Err(VcsError::RefNotFound {
                    refname: refname.to_string(),
                });
            }
        }
        result?;
        Ok(CommitHash::new(run_stdout(
            &self.root,
            &["rev-parse", "FETCH_HEAD"],
        )?))
    }

    /// Fetches all branches from origin.
    pub fn fetch_all(&self) -> VcsResult<()> {
        run(&self.root, &["fetch", "--quiet", "--all", "--prune"])?;
        Ok(())
    }

    /// Pushes `hash` to `refname` on the remote at `url`.
    ///
    /// A rejection because the remote advanced concurrently surfaces as
    /// [`VcsError::PushRejected`]; callers with optimistic-concurrency
    /// semantics treat it as a signal to re-fetch and retry.
    pub fn push(&self, hash: &CommitHash, url: &str, refname: &str) -> VcsResult<()> {
        let refspec = format!("{}:refs/heads/{}", hash, refname);
        let result = run(&self.root, &["push", "--quiet", url, &refspec]);
        if let Err(VcsError::CommandFailed { stderr, .. }) = &result {
            if stderr.contains("[rejected]")
                || stderr.contains("non-fast-forward")
                || stderr.contains("fetch first")
                || stderr.contains("failed to push")
            {
                return Err(VcsError::PushRejected {
                    stderr: stderr.clone(),
                });
            }
        }
        result?;
        Ok(())
    }

    /// Hard-resets the working tree onto `hash`.
    pub fn checkout_hard(&self, hash: &CommitHash) -> VcsResult<()> {
        run(&self.root, &["checkout", "--quiet", "--force", hash.as_str()])?;
        run(&self.root, &["reset", "--quiet", "--hard", hash.as_str()])?;
        Ok(())
    }

    /// Checks out a local branch, creating it from `origin/<branch>` when
    /// it does not exist locally yet.
    pub fn checkout_branch(&self, branch: &str) -> VcsResult<()> {
        run(&self.root, &["checkout", "--quiet", branch])?;
        Ok(())
    }

    /// Merges `rev` into the current branch. Conflicts abort the merge
    /// and surface as [`VcsError::MergeConflict`].
    pub fn merge(&self, rev: &str, identity: &CommitIdentity) -> VcsResult<()> {
        let name_cfg = format!("user.name={}", identity.name);
        let email_cfg = format!("user.email={}", identity.email);
        let result = run(
            &self.root,
            &[
                "-c", &name_cfg, "-c", &email_cfg, "merge", "--quiet", "--no-edit", rev,
            ],
        );
        if result.is_err() {
            // Leave the tree clean for the next attempt.
            let _ = run(&self.root, &["merge", "--abort"]);
            return Err(VcsError::MergeConflict {
                rev: rev.to_string(),
            });
        }
        Ok(())
    }

    /// Returns true if `ancestor` is an ancestor of `descendant`.
    pub fn is_ancestor(&self, ancestor: &CommitHash, descendant: &CommitHash) -> VcsResult<bool> {
        let output = git_command(&self.root)
            .args([
                "merge-base",
                "--is-ancestor",
                ancestor.as_str(),
                descendant.as_str(),
            ])
            .output()?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                Err(VcsError::CommandFailed {
                    command: "git merge-base --is-ancestor".to_string(),
                    stderr,
                })
            }
        }
    }
}

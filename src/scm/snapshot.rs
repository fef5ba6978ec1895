//! # Repository snapshot provider
//!
//! Produces a temporary working copy of a pull request's repository with
//! two remotes: `origin` pointing at the fork that holds the pull-request
//! branch and `upstream` pointing at the target repository, with the base
//! branch fetched. The snapshot directory is removed when the value drops.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from the clone/fetch pipeline. Git failures carry the pipeline
/// step and the process exit code.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{step} process exited with code {code}")]
    ProcessExit { step: &'static str, code: i32 },
    #[error("{step} process was terminated by a signal")]
    Terminated { step: &'static str },
    #[error("failed to run git for {step}: {source}")]
    Spawn {
        step: &'static str,
        source: std::io::Error,
    },
    #[error("failed to create snapshot directory: {0}")]
    TempDir(#[from] std::io::Error),
}

/// Parameters for [`RepositorySnapshot::clone_with_remote`].
#[derive(Debug, Clone)]
pub struct CloneRequest {
    /// Clone URL of the repository holding the pull-request branch.
    pub from_link: String,
    /// Clone URL of the target repository.
    pub to_link: String,
    /// Target branch in the upstream repository.
    pub base_branch: String,
    /// Pull-request branch in the origin repository.
    pub pull_request_branch: String,
}

/// A checked-out working copy. Owns its temporary directory; dropping the
/// snapshot removes it.
pub struct RepositorySnapshot {
    dir: TempDir,
}

impl RepositorySnapshot {
    /// Clone the pull-request branch and fetch the upstream base branch
    /// into a fresh temporary directory.
    pub async fn clone_with_remote(request: &CloneRequest) -> Result<Self, SnapshotError> {
        let dir = TempDir::with_prefix("pull-request-")?;
        let workdir = dir.path().to_path_buf();
        let git_dir = workdir.join(".git");

        debug!(
            branch = %request.pull_request_branch,
            directory = %workdir.display(),
            "Creating repository snapshot"
        );

        run_git(
            "clone",
            &[
                "clone",
                "--branch",
                &request.pull_request_branch,
                "--recursive",
                "--single-branch",
                &request.from_link,
                &workdir.to_string_lossy(),
            ],
        )
        .await?;

        run_git(
            "remote add",
            &[
                "--git-dir",
                &git_dir.to_string_lossy(),
                "remote",
                "add",
                "upstream",
                &request.to_link,
            ],
        )
        .await?;

        run_git(
            "fetch",
            &[
                "--git-dir",
                &git_dir.to_string_lossy(),
                "fetch",
                "upstream",
                &request.base_branch,
            ],
        )
        .await?;

        Ok(Self { dir })
    }

    /// Path of the working copy.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the `.git` directory inside the working copy.
    pub fn git_dir(&self) -> PathBuf {
        self.dir.path().join(".git")
    }
}

async fn run_git(step: &'static str, args: &[&str]) -> Result<(), SnapshotError> {
    let status = Command::new("git")
        .args(args)
        .status()
        .await
        .map_err(|source| SnapshotError::Spawn { step, source })?;

    if status.success() {
        return Ok(());
    }

    match status.code() {
        Some(code) => Err(SnapshotError::ProcessExit { step, code }),
        None => Err(SnapshotError::Terminated { step }),
    }
}

//! Local checkouts of remote git repositories.
//!
//! ## Layout
//! ```text
//! {cache}/wf-cache/
//!   {sha256(url)}/
//!     {sha256(revision)}/   <- full clone, revision checked out
//!     .clone-XXXXXX/        <- in-flight clone, renamed into place when done
//! ```
//!
//! A slot directory that exists is complete: clones happen in a sibling
//! staging directory and are renamed into the slot as the last step.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use wfstage_core::Deadline;
use wfstage_core::digest::repo_slot;

use crate::command::{CommandOutput, run_captured};
use crate::error::StageError;

pub struct RepoCache {
    base_dir: PathBuf,
    git_command: String,
    deadline: Deadline,
}

impl RepoCache {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            git_command: "git".into(),
            deadline: Deadline::unbounded(),
        }
    }

    /// Override the git binary.
    pub fn with_git(mut self, git_command: impl Into<String>) -> Self {
        self.git_command = git_command.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn slot_path(&self, url: &str, revision: Option<&str>) -> PathBuf {
        self.base_dir.join(repo_slot(url, revision))
    }

    /// Ensure a checkout of `url` at `revision` exists and return its
    /// directory plus the commit hash actually checked out.
    ///
    /// An existing slot is reused without contacting the remote. An empty
    /// revision means the remote's default branch.
    pub async fn materialize(
        &self,
        url: &str,
        revision: Option<&str>,
    ) -> Result<(PathBuf, String), StageError> {
        let revision = revision.filter(|rev| !rev.is_empty());
        let slot = self.slot_path(url, revision);

        if tokio::fs::try_exists(&slot).await? {
            tracing::info!(url = %url, revision = ?revision, path = %slot.display(), "Repository cache hit");
        } else {
            self.clone_into_slot(url, revision, &slot).await?;
        }

        let head = self
            .git(&["rev-parse", "--verify", "HEAD"], &slot, url, revision)
            .await?;
        let commit = head.stdout.trim().to_string();
        tracing::info!(url = %url, commit = %commit, "Repository ready");
        Ok((slot, commit))
    }

    async fn clone_into_slot(
        &self,
        url: &str,
        revision: Option<&str>,
        slot: &Path,
    ) -> Result<(), StageError> {
        let parent = slot.parent().unwrap_or(&self.base_dir);
        tokio::fs::create_dir_all(parent).await?;

        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)?;
        let work = staging.path();

        tracing::info!(url = %url, revision = ?revision, "Cloning repository");
        let mut args = vec![OsStr::new("clone")];
        if revision.is_some() {
            args.push(OsStr::new("-n"));
        }
        args.push(OsStr::new("--recurse-submodules"));
        args.push(OsStr::new(url));
        args.push(work.as_os_str());
        self.git(args.as_slice(), parent, url, revision).await?;

        if let Some(rev) = revision {
            self.git(&["checkout", rev], work, url, Some(rev)).await?;
        }
        self.git(&["submodule", "update", "--init", "--recursive"], work, url, revision)
            .await?;

        // From here the staging directory must survive its guard.
        let staged = staging.keep();
        let Err(e) = tokio::fs::rename(&staged, slot).await else {
            tracing::info!(url = %url, path = %slot.display(), "Repository cached");
            return Ok(());
        };
        let _ = tokio::fs::remove_dir_all(&staged).await;
        if tokio::fs::try_exists(slot).await.unwrap_or(false) {
            tracing::warn!(
                url = %url,
                error = %e,
                "Another run populated this repository slot first; discarding our clone"
            );
            return Ok(());
        }
        Err(e.into())
    }

    async fn git<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        cwd: &Path,
        url: &str,
        revision: Option<&str>,
    ) -> Result<CommandOutput, StageError> {
        let operation = args
            .first()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut cmd = Command::new(&self.git_command);
        cmd.args(args).current_dir(cwd);
        let output = run_captured(cmd, &format!("git {operation}"), &self.deadline).await?;

        if !output.success() {
            return Err(StageError::Git {
                operation,
                url: url.into(),
                revision: revision.unwrap_or("(default branch)").into(),
                status: output.status_line(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

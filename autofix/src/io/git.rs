//! Git adapter for the publish step.
//!
//! A small, explicit wrapper around `git` subprocess calls. Pushes run in
//! inherit mode so the operator sees remote progress and rejections.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_inherited;

/// Version control operations the publish step needs.
pub trait VersionControl {
    /// Create `branch` at the current HEAD, or reset it there if it exists,
    /// and check it out. The working tree is carried over.
    fn reset_branch(&self, branch: &str) -> Result<()>;

    /// Stage every working tree change and return the staged paths.
    fn stage_all(&self) -> Result<Vec<String>>;

    /// Commit staged changes. `Ok(false)` when there was nothing to commit.
    fn commit(&self, message: &str) -> Result<bool>;

    /// Push `branch` to `remote`, overwriting the remote branch only if it
    /// still points where this clone last saw it.
    fn push_with_lease(&self, remote: &str, branch: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to publish)"));
        }
        Ok(name)
    }

    /// Paths staged for the next commit.
    pub fn staged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--cached", "--name-only", "-z"])?;
        Ok(parse_name_list(&out))
    }

    /// Refresh `refs/remotes/<remote>/<branch>` so the lease compares against
    /// the remote's current tip. A branch the remote does not have yet leaves
    /// the tracking ref absent, which the lease treats as "must not exist".
    fn refresh_tracking_ref(&self, remote: &str, branch: &str) {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        match self.run(&["fetch", "--no-tags", remote, &refspec]) {
            Ok(output) if output.status.success() => {
                debug!(remote, branch, "tracking ref refreshed");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(remote, branch, stderr = %stderr.trim(), "remote branch not fetched");
            }
            Err(err) => warn!(error = %format!("{err:#}"), "fetch before push failed"),
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    #[instrument(skip_all, fields(branch = %branch))]
    fn reset_branch(&self, branch: &str) -> Result<()> {
        let previous = self.current_branch()?;
        debug!(from = %previous, branch, "resetting branch to HEAD");
        self.run_checked(&["checkout", "-B", branch])?;
        Ok(())
    }

    fn stage_all(&self) -> Result<Vec<String>> {
        self.run_checked(&["add", "-A"])?;
        self.staged_paths()
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> Result<bool> {
        if self.staged_paths()?.is_empty() {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    #[instrument(skip_all, fields(remote = %remote, branch = %branch))]
    fn push_with_lease(&self, remote: &str, branch: &str) -> Result<()> {
        self.refresh_tracking_ref(remote, branch);
        info!(remote, branch, "pushing with lease");
        let mut cmd = Command::new("git");
        cmd.args(["push", "--force-with-lease", "--set-upstream", remote, branch])
            .current_dir(&self.workdir);
        run_inherited(cmd).with_context(|| format!("push {branch} to {remote}"))
    }
}

/// Split NUL-separated `--name-only -z` output.
fn parse_name_list(out: &str) -> Vec<String> {
    out.split('\0')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

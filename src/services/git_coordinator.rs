//! Git Coordinator (C2).
//!
//! Every operation is a spawn-and-wait of the real `git` binary; there is
//! no FFI and no libgit2 dependency, so the coordinator stays portable to
//! whatever `git` is on PATH.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};

/// Per-slot outcome of a wave merge.
#[derive(Debug, Clone)]
pub struct SlotMergeOutcome {
    pub slot: u32,
    pub success: bool,
    pub conflicts: Vec<String>,
}

/// Coordinates branch/worktree lifecycle for one sprint against one target
/// source tree. Serializes all git operations against that tree, per
/// `SPEC_FULL.md` §5's shared-resource discipline.
pub struct GitCoordinator {
    git_path: String,
    /// One lock per target tree would be ideal; in this single-process
    /// orchestrator a coordinator instance is scoped to one sprint's
    /// target tree, so a single mutex is sufficient.
    lock: Mutex<()>,
}

impl GitCoordinator {
    pub fn new(git_path: impl Into<String>) -> Self {
        Self { git_path: git_path.into(), lock: Mutex::new(()) }
    }

    fn cmd(&self) -> Command {
        Command::new(&self.git_path)
    }

    pub fn sprint_branch(sprint_id: &str) -> String {
        format!("sprint/{sprint_id}")
    }

    fn slot_branch(sprint_id: &str, slot: u32) -> String {
        format!("sprint/{sprint_id}/{slot}")
    }

    fn worktree_path(target: &Path, slot: u32) -> PathBuf {
        let name = target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "target".to_string());
        target.with_file_name(format!("{name}-worktree-{slot}"))
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> DomainResult<std::process::Output> {
        self.cmd()
            .current_dir(dir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::GitFailed(format!("failed to spawn git {args:?}: {e}")))
    }

    async fn run_ok(&self, dir: &Path, args: &[&str]) -> DomainResult<()> {
        let out = self.run(dir, args).await?;
        if !out.status.success() {
            return Err(DomainError::GitFailed(format!(
                "git {args:?} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            )));
        }
        Ok(())
    }

    async fn branch_exists(&self, dir: &Path, branch: &str) -> bool {
        self.cmd()
            .current_dir(dir)
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Create or check out `sprint/<id>`, then create (or reuse, after
    /// restart) one worktree per developer slot on its own sub-branch.
    #[instrument(skip(self), fields(sprint_id))]
    pub async fn setup_sprint_git(&self, target: &Path, sprint_id: &str, slots: &[u32]) -> DomainResult<Vec<(u32, PathBuf)>> {
        let _guard = self.lock.lock().await;
        let sprint_branch = Self::sprint_branch(sprint_id);

        if self.branch_exists(target, &sprint_branch).await {
            self.run_ok(target, &["checkout", &sprint_branch]).await?;
        } else {
            self.run_ok(target, &["checkout", "-b", &sprint_branch]).await?;
        }

        let mut result = Vec::with_capacity(slots.len());
        for &slot in slots {
            let branch = Self::slot_branch(sprint_id, slot);
            let path = Self::worktree_path(target, slot);

            if path.exists() && path.join(".git").exists() {
                info!(slot, path = %path.display(), "reusing existing worktree after restart");
                result.push((slot, path));
                continue;
            }

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DomainError::GitFailed(format!("failed to create worktree parent: {e}")))?;
            }

            let path_str = path.to_string_lossy().to_string();
            if self.branch_exists(target, &branch).await {
                self.run_ok(target, &["worktree", "add", &path_str, &branch]).await?;
            } else {
                self.run_ok(target, &["worktree", "add", "-b", &branch, &path_str, &sprint_branch]).await?;
            }
            result.push((slot, path));
        }

        Ok(result)
    }

    /// Stage everything in `path` and commit; no-op if the staged diff is
    /// empty.
    pub async fn commit_in_worktree(&self, path: &Path, message: &str) -> DomainResult<bool> {
        self.run_ok(path, &["add", "-A"]).await?;

        let diff = self.run(path, &["diff", "--cached", "--quiet"]).await?;
        if diff.status.success() {
            return Ok(false);
        }

        self.run_ok(path, &["commit", "-m", message]).await?;
        Ok(true)
    }

    /// `git merge-tree` dry run to detect conflicting files without
    /// touching the worktree; falls back to treating any non-empty
    /// conflict-marker output as the file list when paths can't be
    /// parsed out precisely.
    async fn detect_conflicts(&self, dir: &Path, ours: &str, theirs: &str) -> DomainResult<Vec<String>> {
        let out = self.run(dir, &["merge-tree", ours, theirs]).await;
        let stdout = match out {
            Ok(o) => String::from_utf8_lossy(&o.stdout).to_string(),
            Err(_) => return Ok(Vec::new()),
        };

        if !stdout.contains("<<<<<<<") {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for line in stdout.lines() {
            if let Some(path) = line.strip_prefix("+++ b/").or_else(|| line.strip_prefix("--- a/")) {
                let path = path.trim();
                if !path.is_empty() && !files.iter().any(|f: &String| f == path) {
                    files.push(path.to_string());
                }
            }
        }
        Ok(files)
    }

    /// Merge every slot branch into the sprint branch, then rebase every
    /// worktree onto the new sprint-branch head by recreating its slot
    /// branch. Conflicts are reported, not fatal.
    #[instrument(skip(self), fields(sprint_id))]
    pub async fn merge_wave_and_reset(&self, target: &Path, sprint_id: &str, slots: &[(u32, PathBuf)]) -> DomainResult<Vec<SlotMergeOutcome>> {
        let _guard = self.lock.lock().await;
        let sprint_branch = Self::sprint_branch(sprint_id);
        self.run_ok(target, &["checkout", &sprint_branch]).await?;

        let mut outcomes = Vec::with_capacity(slots.len());
        for (slot, _path) in slots {
            let branch = Self::slot_branch(sprint_id, *slot);
            let conflicts = self.detect_conflicts(target, &sprint_branch, &branch).await?;

            if !conflicts.is_empty() {
                warn!(slot, ?conflicts, "merge conflict detected, skipping merge for this slot");
                outcomes.push(SlotMergeOutcome { slot: *slot, success: false, conflicts });
                continue;
            }

            let merge = self.run(target, &["merge", "--no-edit", &branch]).await?;
            if !merge.status.success() {
                let _ = self.run(target, &["merge", "--abort"]).await;
                outcomes.push(SlotMergeOutcome {
                    slot: *slot,
                    success: false,
                    conflicts: vec![String::from_utf8_lossy(&merge.stderr).to_string()],
                });
                continue;
            }
            outcomes.push(SlotMergeOutcome { slot: *slot, success: true, conflicts: Vec::new() });
        }

        for (slot, path) in slots {
            let branch = Self::slot_branch(sprint_id, *slot);
            self.run_ok(path, &["checkout", &sprint_branch]).await?;
            let _ = self.run(target, &["branch", "-D", &branch]).await;
            self.run_ok(target, &["branch", &branch, &sprint_branch]).await?;
            self.run_ok(path, &["checkout", &branch]).await?;
        }

        Ok(outcomes)
    }

    /// One final merge-and-reset, then tear down every worktree and slot
    /// branch, leaving `target` on the sprint branch for tester/reviewer.
    #[instrument(skip(self), fields(sprint_id))]
    pub async fn finalize_implementation(&self, target: &Path, sprint_id: &str, slots: &[(u32, PathBuf)]) -> DomainResult<Vec<SlotMergeOutcome>> {
        let outcomes = self.merge_wave_and_reset(target, sprint_id, slots).await?;

        let _guard = self.lock.lock().await;
        for (slot, path) in slots {
            let path_str = path.to_string_lossy().to_string();
            let _ = self.run(target, &["worktree", "remove", "--force", &path_str]).await;
            let branch = Self::slot_branch(sprint_id, *slot);
            let _ = self.run(target, &["branch", "-D", &branch]).await;
        }
        let _ = self.run(target, &["worktree", "prune"]).await;

        Ok(outcomes)
    }

    pub async fn has_remote(&self, target: &Path) -> bool {
        self.run(target, &["remote"])
            .await
            .map(|o| !String::from_utf8_lossy(&o.stdout).trim().is_empty())
            .unwrap_or(false)
    }

    pub async fn push_branch(&self, target: &Path, sprint_id: &str) -> DomainResult<()> {
        let branch = Self::sprint_branch(sprint_id);
        self.run_ok(target, &["push", "-u", "origin", &branch]).await
    }

    /// The `origin` remote's URL, if one is configured.
    pub async fn remote_url(&self, target: &Path) -> Option<String> {
        let output = self.run(target, &["remote", "get-url", "origin"]).await.ok()?;
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if url.is_empty() {
            None
        } else {
            Some(url)
        }
    }

    pub async fn merge_sprint_to_main(&self, target: &Path, sprint_id: &str, main_branch: &str) -> DomainResult<()> {
        let branch = Self::sprint_branch(sprint_id);
        self.run_ok(target, &["checkout", main_branch]).await?;
        self.run_ok(target, &["merge", "--no-edit", &branch]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_naming_matches_spec() {
        assert_eq!(GitCoordinator::sprint_branch("2026-07-28-foo"), "sprint/2026-07-28-foo");
        assert_eq!(GitCoordinator::slot_branch("2026-07-28-foo", 2), "sprint/2026-07-28-foo/2");
    }

    #[test]
    fn worktree_path_is_sibling_of_target() {
        let target = PathBuf::from("/repos/app");
        let path = GitCoordinator::worktree_path(&target, 1);
        assert_eq!(path, PathBuf::from("/repos/app-worktree-1"));
    }
}

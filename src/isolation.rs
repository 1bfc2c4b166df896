//! Worktree / Overlay Manager — capture a baseline, materialize an isolated
//! workspace per task, and capture the resulting delta as a patch.
//!
//! Grounded on the git-CLI shelling pattern used throughout this crate:
//! every git invocation goes through `Command::new("git")` with explicit
//! `current_dir`, and failures carry the command line plus stderr.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::IsolationMode;
use crate::model::types::{GitOid, TaskId};

/// Bounded depth for the embedded-repository walk in [`capture_delta`].
/// Matches the nested-repo definition used elsewhere in this crate: a
/// directory containing `.git` found within four path components of the
/// workspace root counts as embedded; deeper nesting is not walked.
const NESTED_REPO_WALK_DEPTH: usize = 4;

/// Errors from workspace isolation.
#[derive(Debug)]
pub enum IsolationError {
    GitCommand {
        command: String,
        stderr: String,
    },
    Io(std::io::Error),
    /// The task's isolation was asked for an operation invalid in its
    /// current state (e.g. `capture_delta` before `ensure_isolated`).
    InvalidState {
        task: TaskId,
        expected: &'static str,
        actual: &'static str,
    },
}

impl fmt::Display for IsolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitCommand { command, stderr } => {
                write!(f, "`{command}` failed: {stderr}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidState {
                task,
                expected,
                actual,
            } => write!(
                f,
                "task {task}: isolation in state {actual}, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for IsolationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IsolationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

fn git_stdout_in(dir: &Path, args: &[&str]) -> Result<String, IsolationError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(IsolationError::Io)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(IsolationError::GitCommand {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

fn git_run_in(dir: &Path, args: &[&str]) -> Result<(), IsolationError> {
    git_stdout_in(dir, args).map(|_| ())
}

/// A snapshot of the parent repo's HEAD and uncommitted state, captured
/// once per batch and reapplied into every task's isolated workspace so
/// every sub-agent starts from the same user-visible state.
#[derive(Clone, Debug)]
pub struct Baseline {
    pub head: GitOid,
    /// Unified diff of uncommitted changes (working tree + index vs HEAD),
    /// empty if the parent repo was clean at capture time.
    pub uncommitted_patch: String,
}

/// Snapshot HEAD and any uncommitted changes in `repo_root`.
///
/// # Errors
/// Returns an error if `git rev-parse HEAD` or `git diff HEAD` fail (e.g.
/// `repo_root` is not a git repository, or has no commits yet).
pub fn capture_baseline(repo_root: &Path) -> Result<Baseline, IsolationError> {
    let head_str = git_stdout_in(repo_root, &["rev-parse", "HEAD"])?;
    let head = GitOid::new(head_str.trim()).map_err(|e| IsolationError::GitCommand {
        command: "git rev-parse HEAD".to_owned(),
        stderr: format!("invalid OID: {e}"),
    })?;

    let uncommitted_patch = git_stdout_in(repo_root, &["diff", "HEAD", "--binary"])?;

    Ok(Baseline {
        head,
        uncommitted_patch,
    })
}

/// Lifecycle of one task's isolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationState {
    Uninitialized,
    Prepared,
    Running,
    Captured,
    Cleaned,
}

impl IsolationState {
    const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Prepared => "prepared",
            Self::Running => "running",
            Self::Captured => "captured",
            Self::Cleaned => "cleaned",
        }
    }
}

/// The delta produced by one task's isolated run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    /// Unified diff for the outer workspace, relative to the baseline.
    pub root_patch: String,
    /// One patch per embedded repository found under the workspace,
    /// `(relative_path, patch)`.
    pub nested_patches: Vec<(PathBuf, String)>,
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root_patch.is_empty() && self.nested_patches.is_empty()
    }
}

/// Manages one task's isolated workspace through its
/// uninitialized → prepared → running → captured → cleaned lifecycle.
///
/// Invariants: workspaces for concurrent tasks never alias (each gets its
/// own directory under a caller-supplied unique root); cleanup runs at
/// most once (`clean` is idempotent, tracked via `state`).
pub struct TaskIsolation {
    repo_root: PathBuf,
    task: TaskId,
    workspace_dir: PathBuf,
    mode: IsolationMode,
    state: IsolationState,
}

impl TaskIsolation {
    /// Begin tracking a task's isolation. Does not touch the filesystem;
    /// call [`Self::prepare`] to materialize the workspace.
    #[must_use]
    pub fn new(repo_root: PathBuf, task: TaskId, workspace_dir: PathBuf, mode: IsolationMode) -> Self {
        Self {
            repo_root,
            task,
            workspace_dir,
            mode,
            state: IsolationState::Uninitialized,
        }
    }

    #[must_use]
    pub const fn state(&self) -> IsolationState {
        self.state
    }

    #[must_use]
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_dir
    }

    fn expect_state(&self, expected: IsolationState) -> Result<(), IsolationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(IsolationError::InvalidState {
                task: self.task.clone(),
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    /// Materialize the isolated workspace and apply the baseline so the
    /// sub-agent starts from the same user-visible state as the parent.
    ///
    /// # Errors
    /// Returns an error if workspace creation or baseline application
    /// fails, or if called out of order.
    pub fn prepare(&mut self, baseline: &Baseline) -> Result<(), IsolationError> {
        self.expect_state(IsolationState::Uninitialized)?;
        tracing::debug!(task = %self.task, mode = ?self.mode, head = %baseline.head, "preparing task workspace");

        match self.mode {
            IsolationMode::None => {
                return Err(IsolationError::GitCommand {
                    command: "ensure_isolated".to_owned(),
                    stderr: "isolation mode is none; no workspace to prepare".to_owned(),
                });
            }
            IsolationMode::Worktree => self.prepare_worktree(baseline)?,
            IsolationMode::FuseOverlay => self.prepare_overlay_copy(baseline)?,
        }

        self.state = IsolationState::Prepared;
        Ok(())
    }

    fn prepare_worktree(&self, baseline: &Baseline) -> Result<(), IsolationError> {
        if let Some(parent) = self.workspace_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = self
            .workspace_dir
            .to_str()
            .ok_or_else(|| IsolationError::GitCommand {
                command: "git worktree add".to_owned(),
                stderr: "workspace path is not valid UTF-8".to_owned(),
            })?;

        git_run_in(
            &self.repo_root,
            &["worktree", "add", "--detach", path_str, baseline.head.as_str()],
        )?;

        self.apply_uncommitted(baseline)
    }

    /// Overlay mode materializes a standalone copy of the working tree
    /// rather than a real overlay mount — this crate's dependency stack
    /// carries no FUSE/overlay library, so the upper layer is a plain
    /// directory copy instead of a kernel-level overlay. See DESIGN.md.
    fn prepare_overlay_copy(&self, baseline: &Baseline) -> Result<(), IsolationError> {
        copy_tree(&self.repo_root, &self.workspace_dir)?;
        git_run_in(
            &self.workspace_dir,
            &["checkout", "--detach", baseline.head.as_str()],
        )?;
        self.apply_uncommitted(baseline)
    }

    fn apply_uncommitted(&self, baseline: &Baseline) -> Result<(), IsolationError> {
        if baseline.uncommitted_patch.trim().is_empty() {
            return Ok(());
        }
        apply_patch(&self.workspace_dir, &baseline.uncommitted_patch)
    }

    /// Mark the isolation as actively running the sub-agent.
    ///
    /// # Errors
    /// Returns an error if called out of order (must follow `prepare`).
    pub fn mark_running(&mut self) -> Result<(), IsolationError> {
        self.expect_state(IsolationState::Prepared)?;
        self.state = IsolationState::Running;
        Ok(())
    }

    /// Produce the delta for this workspace relative to `baseline`.
    ///
    /// Pure with respect to the post-run filesystem state: calling it
    /// again before `clean` yields byte-identical patches.
    ///
    /// # Errors
    /// Returns an error if called out of order, or if the underlying
    /// `git diff` invocations fail.
    pub fn capture_delta(&mut self, baseline: &Baseline) -> Result<Delta, IsolationError> {
        self.expect_state(IsolationState::Running)?;

        let root_patch = git_stdout_in(
            &self.workspace_dir,
            &["diff", baseline.head.as_str(), "--binary"],
        )?;

        let nested_patches = self.capture_nested_patches()?;

        self.state = IsolationState::Captured;
        Ok(Delta {
            root_patch,
            nested_patches,
        })
    }

    fn capture_nested_patches(&self) -> Result<Vec<(PathBuf, String)>, IsolationError> {
        let mut out = Vec::new();
        walk_for_nested_repos(&self.workspace_dir, &self.workspace_dir, 0, &mut |rel, abs| {
            let patch = git_stdout_in(abs, &["diff", "HEAD", "--binary"])?;
            if !patch.trim().is_empty() {
                out.push((rel.to_path_buf(), patch));
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Remove the task's workspace directory. Idempotent: safe to call
    /// even if `prepare` never ran or already ran once.
    ///
    /// # Errors
    /// Returns an error only if filesystem removal fails for a reason
    /// other than "already gone".
    pub fn clean(&mut self) -> Result<(), IsolationError> {
        if self.state == IsolationState::Cleaned {
            return Ok(());
        }

        if self.workspace_dir.exists() {
            if self.mode == IsolationMode::Worktree {
                let path_str = self.workspace_dir.to_string_lossy().into_owned();
                let _ = Command::new("git")
                    .args(["worktree", "remove", "--force", &path_str])
                    .current_dir(&self.repo_root)
                    .output();
            }
            if self.workspace_dir.exists() {
                std::fs::remove_dir_all(&self.workspace_dir)?;
            }
        }

        self.state = IsolationState::Cleaned;
        Ok(())
    }
}

impl Drop for TaskIsolation {
    fn drop(&mut self) {
        let _ = self.clean();
    }
}

fn apply_patch(workspace: &Path, patch: &str) -> Result<(), IsolationError> {
    use std::io::Write as _;
    let mut check = Command::new("git")
        .args(["apply", "--check", "--binary", "-"])
        .current_dir(workspace)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()?;
    check
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(patch.as_bytes())?;
    let check_output = check.wait_with_output()?;
    if !check_output.status.success() {
        return Err(IsolationError::GitCommand {
            command: "git apply --check".to_owned(),
            stderr: String::from_utf8_lossy(&check_output.stderr).trim().to_owned(),
        });
    }

    let mut apply = Command::new("git")
        .args(["apply", "--binary", "-"])
        .current_dir(workspace)
        .stdin(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;
    apply
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(patch.as_bytes())?;
    let apply_output = apply.wait_with_output()?;
    if apply_output.status.success() {
        Ok(())
    } else {
        Err(IsolationError::GitCommand {
            command: "git apply".to_owned(),
            stderr: String::from_utf8_lossy(&apply_output.stderr).trim().to_owned(),
        })
    }
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dst_path)?;
        }
    }
    Ok(())
}

/// Walk `dir` (relative to `root`) up to [`NESTED_REPO_WALK_DEPTH`], calling
/// `visit(relative_path, absolute_path)` for every directory containing a
/// `.git` entry other than `root` itself. Does not follow symlinks.
fn walk_for_nested_repos(
    root: &Path,
    dir: &Path,
    depth: usize,
    visit: &mut dyn FnMut(&Path, &Path) -> Result<(), IsolationError>,
) -> Result<(), IsolationError> {
    if depth > NESTED_REPO_WALK_DEPTH {
        return Ok(());
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_symlink() || !file_type.is_dir() {
            continue;
        }

        if path != root && path.join(".git").exists() {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            visit(rel, &path)?;
            continue;
        }

        walk_for_nested_repos(root, &path, depth + 1, visit)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let out = Command::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(out.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&out.stderr));
    }

    fn init_repo() -> (TempDir, GitOid) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        git(root, &["init"]);
        git(root, &["config", "user.name", "Test"]);
        git(root, &["config", "user.email", "test@example.com"]);
        git(root, &["config", "commit.gpgsign", "false"]);
        std::fs::write(root.join("file.txt"), "hello\n").unwrap();
        git(root, &["add", "file.txt"]);
        git(root, &["commit", "-m", "init"]);
        let head = git_stdout_in(root, &["rev-parse", "HEAD"]).unwrap();
        (dir, GitOid::new(head.trim()).unwrap())
    }

    #[test]
    fn capture_baseline_reads_clean_head() {
        let (dir, head) = init_repo();
        let baseline = capture_baseline(dir.path()).unwrap();
        assert_eq!(baseline.head, head);
        assert!(baseline.uncommitted_patch.is_empty());
    }

    #[test]
    fn capture_baseline_captures_uncommitted_changes() {
        let (dir, _head) = init_repo();
        std::fs::write(dir.path().join("file.txt"), "changed\n").unwrap();
        let baseline = capture_baseline(dir.path()).unwrap();
        assert!(baseline.uncommitted_patch.contains("changed"));
    }

    #[test]
    fn worktree_lifecycle_happy_path() {
        let (dir, _head) = init_repo();
        let baseline = capture_baseline(dir.path()).unwrap();
        let task = TaskId::new("t1").unwrap();
        let ws_dir = dir.path().join("ws").join("t1");

        let mut iso = TaskIsolation::new(
            dir.path().to_path_buf(),
            task,
            ws_dir.clone(),
            IsolationMode::Worktree,
        );

        iso.prepare(&baseline).unwrap();
        assert_eq!(iso.state(), IsolationState::Prepared);
        assert!(ws_dir.join("file.txt").exists());

        iso.mark_running().unwrap();
        std::fs::write(ws_dir.join("file.txt"), "agent edit\n").unwrap();

        let delta = iso.capture_delta(&baseline).unwrap();
        assert!(delta.root_patch.contains("agent edit"));
        assert_eq!(iso.state(), IsolationState::Captured);

        iso.clean().unwrap();
        assert_eq!(iso.state(), IsolationState::Cleaned);
        assert!(!ws_dir.exists());
    }

    #[test]
    fn baseline_reapplies_parent_uncommitted_edit() {
        let (dir, _head) = init_repo();
        std::fs::write(dir.path().join("file.txt"), "parent edit\n").unwrap();
        let baseline = capture_baseline(dir.path()).unwrap();

        let task = TaskId::new("t2").unwrap();
        let ws_dir = dir.path().join("ws").join("t2");
        let mut iso = TaskIsolation::new(
            dir.path().to_path_buf(),
            task,
            ws_dir.clone(),
            IsolationMode::Worktree,
        );
        iso.prepare(&baseline).unwrap();

        let content = std::fs::read_to_string(ws_dir.join("file.txt")).unwrap();
        assert_eq!(content, "parent edit\n");
    }

    #[test]
    fn capture_delta_out_of_order_is_rejected() {
        let (dir, _head) = init_repo();
        let baseline = capture_baseline(dir.path()).unwrap();
        let task = TaskId::new("t3").unwrap();
        let ws_dir = dir.path().join("ws").join("t3");
        let mut iso = TaskIsolation::new(dir.path().to_path_buf(), task, ws_dir, IsolationMode::Worktree);

        let err = iso.capture_delta(&baseline).unwrap_err();
        assert!(matches!(err, IsolationError::InvalidState { .. }));
    }

    #[test]
    fn clean_is_idempotent() {
        let (dir, _head) = init_repo();
        let task = TaskId::new("t4").unwrap();
        let ws_dir = dir.path().join("ws").join("t4");
        let mut iso = TaskIsolation::new(dir.path().to_path_buf(), task, ws_dir, IsolationMode::Worktree);
        iso.clean().unwrap();
        iso.clean().unwrap();
        assert_eq!(iso.state(), IsolationState::Cleaned);
    }

    #[test]
    fn capture_delta_is_pure_across_repeated_calls() {
        let (dir, _head) = init_repo();
        let baseline = capture_baseline(dir.path()).unwrap();
        let task = TaskId::new("t5").unwrap();
        let ws_dir = dir.path().join("ws").join("t5");
        let mut iso = TaskIsolation::new(dir.path().to_path_buf(), task, ws_dir.clone(), IsolationMode::Worktree);
        iso.prepare(&baseline).unwrap();
        iso.mark_running().unwrap();
        std::fs::write(ws_dir.join("file.txt"), "stable edit\n").unwrap();

        let first = git_stdout_in(&ws_dir, &["diff", baseline.head.as_str(), "--binary"]).unwrap();
        let second = git_stdout_in(&ws_dir, &["diff", baseline.head.as_str(), "--binary"]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn nested_repo_gets_its_own_patch() {
        let (dir, _head) = init_repo();
        let baseline = capture_baseline(dir.path()).unwrap();
        let task = TaskId::new("t6").unwrap();
        let ws_dir = dir.path().join("ws").join("t6");
        let mut iso = TaskIsolation::new(dir.path().to_path_buf(), task, ws_dir.clone(), IsolationMode::Worktree);
        iso.prepare(&baseline).unwrap();
        iso.mark_running().unwrap();

        let nested_dir = ws_dir.join("vendor").join("lib");
        std::fs::create_dir_all(&nested_dir).unwrap();
        git(&nested_dir, &["init"]);
        git(&nested_dir, &["config", "user.name", "Test"]);
        git(&nested_dir, &["config", "user.email", "test@example.com"]);
        git(&nested_dir, &["config", "commit.gpgsign", "false"]);
        std::fs::write(nested_dir.join("a.txt"), "a\n").unwrap();
        git(&nested_dir, &["add", "a.txt"]);
        git(&nested_dir, &["commit", "-m", "nested init"]);
        std::fs::write(nested_dir.join("a.txt"), "a changed\n").unwrap();

        let delta = iso.capture_delta(&baseline).unwrap();
        assert_eq!(delta.nested_patches.len(), 1);
        assert_eq!(delta.nested_patches[0].0, PathBuf::from("vendor/lib"));
        assert!(delta.nested_patches[0].1.contains("a changed"));
    }
}

//! Merge & Reconciliation — combine per-task deltas into one atomic update
//! of the parent workspace, in patch mode or branch mode.

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::MergeMode;
use crate::isolation::Delta;
use crate::model::types::{GitOid, TaskId};
use crate::refs::{self, RefError};

/// Errors from merge reconciliation.
#[derive(Debug)]
pub enum ReconcileError {
    GitCommand { command: String, stderr: String },
    Io(std::io::Error),
    Ref(RefError),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitCommand { command, stderr } => write!(f, "`{command}` failed: {stderr}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Ref(e) => write!(f, "ref update failed: {e}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Ref(e) => Some(e),
            Self::GitCommand { .. } => None,
        }
    }
}

impl From<std::io::Error> for ReconcileError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<RefError> for ReconcileError {
    fn from(e: RefError) -> Self {
        Self::Ref(e)
    }
}

/// One task's contribution to reconciliation: either a patch-mode delta
/// or a branch-mode commit, plus whether the task aborted (aborted tasks
/// contribute nothing).
#[derive(Clone, Debug)]
pub struct TaskContribution {
    pub task_id: TaskId,
    pub description: String,
    pub aborted: bool,
    /// Set when reconciling in patch mode.
    pub delta: Option<Delta>,
    /// Set when reconciling in branch mode: the commit at the tip of
    /// `omp/task/<id>`.
    pub branch_commit: Option<GitOid>,
}

/// Outcome of one reconciliation pass.
#[derive(Clone, Debug, Default)]
pub struct ReconcileResult {
    /// True iff the parent workspace now contains all intended changes
    /// exactly.
    pub applied: bool,
    pub summary: String,
    /// Nested-repo patches applied, `(relative_path, applied)`.
    pub nested_applied: Vec<(PathBuf, bool)>,
    /// In branch mode: branches left behind after a conflict, in the order
    /// they would have merged.
    pub retained_branches: Vec<String>,
}

fn git_stdout_in(dir: &Path, args: &[&str]) -> Result<String, ReconcileError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(ReconcileError::Io)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(ReconcileError::GitCommand {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Reconcile a batch's contributions into `repo_root`, atomically, per
/// the configured merge mode.
///
/// # Errors
/// Returns an error only for conditions that prevent reconciliation from
/// running at all (I/O failure writing the temp patch file, git being
/// unavailable); a failed `git apply`/merge is reported through
/// `ReconcileResult::applied = false`, not an `Err`.
pub fn reconcile(
    repo_root: &Path,
    mode: MergeMode,
    baseline: &GitOid,
    contributions: &[TaskContribution],
) -> Result<ReconcileResult, ReconcileError> {
    tracing::info!(
        mode = ?mode,
        contributions = contributions.len(),
        baseline = %baseline,
        "reconciling task contributions"
    );
    let result = match mode {
        MergeMode::Patch => reconcile_patch(repo_root, contributions),
        MergeMode::Branch => reconcile_branch(repo_root, baseline, contributions),
    };
    if let Ok(outcome) = &result {
        if !outcome.applied {
            tracing::warn!(summary = %outcome.summary, "reconciliation did not apply cleanly");
        }
    }
    result
}

fn reconcile_patch(
    repo_root: &Path,
    contributions: &[TaskContribution],
) -> Result<ReconcileResult, ReconcileError> {
    let mut combined = String::new();
    for contribution in contributions {
        if contribution.aborted {
            continue;
        }
        if let Some(delta) = &contribution.delta {
            if !delta.root_patch.trim().is_empty() {
                combined.push_str(&delta.root_patch);
                if !combined.ends_with('\n') {
                    combined.push('\n');
                }
            }
        }
    }

    let mut root_applied = true;
    let mut summary = String::new();

    if !combined.trim().is_empty() {
        let temp_path = repo_root.join(format!(".delegation-reconcile-{}.patch", std::process::id()));
        let write_result = (|| -> Result<(), ReconcileError> {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(combined.as_bytes())?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        let temp_str = temp_path.to_string_lossy().into_owned();
        let check = git_stdout_in(repo_root, &["apply", "--check", "--binary", &temp_str]);

        if check.is_err() {
            root_applied = false;
            summary = "root patch did not apply cleanly; per-task patches remain on disk".to_string();
            let _ = std::fs::remove_file(&temp_path);
        } else {
            let apply = git_stdout_in(repo_root, &["apply", "--binary", &temp_str]);
            let _ = std::fs::remove_file(&temp_path);
            match apply {
                Ok(_) => summary = "root patch applied".to_string(),
                Err(e) => {
                    root_applied = false;
                    summary = format!("root patch apply failed: {e}");
                }
            }
        }
    } else {
        summary = "no root changes to apply".to_string();
    }

    let mut nested_applied = Vec::new();
    for contribution in contributions {
        if contribution.aborted {
            continue;
        }
        let Some(delta) = &contribution.delta else {
            continue;
        };
        for (rel_path, patch) in &delta.nested_patches {
            let nested_root = repo_root.join(rel_path);
            if !nested_root.exists() {
                nested_applied.push((rel_path.clone(), false));
                continue;
            }
            let ok = apply_nested_patch(&nested_root, patch).is_ok();
            nested_applied.push((rel_path.clone(), ok));
        }
    }

    Ok(ReconcileResult {
        applied: root_applied,
        summary,
        nested_applied,
        retained_branches: Vec::new(),
    })
}

fn apply_nested_patch(nested_root: &Path, patch: &str) -> Result<(), ReconcileError> {
    let mut check = Command::new("git")
        .args(["apply", "--check", "--binary", "-"])
        .current_dir(nested_root)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()?;
    check.stdin.take().expect("stdin piped").write_all(patch.as_bytes())?;
    let check_output = check.wait_with_output()?;
    if !check_output.status.success() {
        return Err(ReconcileError::GitCommand {
            command: "git apply --check (nested)".to_owned(),
            stderr: String::from_utf8_lossy(&check_output.stderr).trim().to_owned(),
        });
    }

    let mut apply = Command::new("git")
        .args(["apply", "--binary", "-"])
        .current_dir(nested_root)
        .stdin(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;
    apply.stdin.take().expect("stdin piped").write_all(patch.as_bytes())?;
    let apply_output = apply.wait_with_output()?;
    if apply_output.status.success() {
        Ok(())
    } else {
        Err(ReconcileError::GitCommand {
            command: "git apply (nested)".to_owned(),
            stderr: String::from_utf8_lossy(&apply_output.stderr).trim().to_owned(),
        })
    }
}

fn reconcile_branch(
    repo_root: &Path,
    baseline: &GitOid,
    contributions: &[TaskContribution],
) -> Result<ReconcileResult, ReconcileError> {
    let mut current = baseline.clone();
    let mut merged_branches = Vec::new();
    let mut retained_branches = Vec::new();
    let mut summary = String::new();
    let mut halted = false;

    for contribution in contributions {
        if contribution.aborted {
            continue;
        }
        let Some(_commit) = &contribution.branch_commit else {
            continue;
        };

        let branch = refs::task_branch_name(contribution.task_id.as_str());

        if halted {
            retained_branches.push(branch);
            continue;
        }

        let merge_message = commit_message(&contribution.task_id, &contribution.description);
        let merge_result = git_stdout_in(
            repo_root,
            &["merge", "--no-ff", "-m", &merge_message, &branch],
        );

        match merge_result {
            Ok(_) => {
                let new_head = git_stdout_in(repo_root, &["rev-parse", "HEAD"])?;
                current = GitOid::new(new_head.trim()).map_err(|e| ReconcileError::GitCommand {
                    command: "git rev-parse HEAD".to_owned(),
                    stderr: format!("invalid OID after merge: {e}"),
                })?;
                merged_branches.push(branch);
            }
            Err(e) => {
                let _ = git_stdout_in(repo_root, &["merge", "--abort"]);
                summary = format!(
                    "merge of {branch} failed (first conflict); branches from this point retained: {e}"
                );
                retained_branches.push(branch);
                halted = true;
            }
        }
    }

    for branch in &merged_branches {
        let task_id_str = branch.trim_start_matches("omp/task/");
        let _ = refs::delete_task_branch(repo_root, task_id_str);
    }
    if !halted {
        summary = format!("merged {} branch(es)", merged_branches.len());
    }

    let _ = current;

    Ok(ReconcileResult {
        applied: !halted,
        summary,
        nested_applied: Vec::new(),
        retained_branches,
    })
}

/// Generate the default synthetic commit message for a branch-mode merge.
/// A configured small-model generator may override this; failures there
/// are non-fatal and fall back here.
#[must_use]
pub fn commit_message(task_id: &TaskId, description: &str) -> String {
    format!("task({task_id}): {description}")
}

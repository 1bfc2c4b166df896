//! Git ref management for task-delegation branches.
//!
//! Provides low-level helpers to read, write, atomically update, and delete
//! git refs. All operations run `git update-ref` (or `git rev-parse`) in
//! the repository root directory.
//!
//! # Branch naming
//!
//! Branch-mode reconciliation (§4.F) commits each task's delta onto its own
//! branch:
//!
//! ```text
//! refs/heads/omp/task/<task_id>
//! ```
//!
//! # Concurrency
//!
//! [`write_ref_cas`] implements optimistic concurrency control. Git's
//! internal ref locking makes the CAS atomic: if the ref's current value
//! does not match the expected old OID, git rejects the update and the
//! function returns [`RefError::CasMismatch`]. Callers should retry on
//! mismatch.

use std::fmt;
use std::path::Path;
use std::process::Command;

use crate::model::types::GitOid;

// ---------------------------------------------------------------------------
// Well-known ref names
// ---------------------------------------------------------------------------

/// Prefix for per-task branch refs created during reconciliation.
pub const TASK_BRANCH_REF_PREFIX: &str = "refs/heads/omp/task/";

/// Build the full ref name for a task's reconciliation branch.
///
/// # Example
/// ```
/// assert_eq!(delegation_core::refs::task_branch_ref("t1"), "refs/heads/omp/task/t1");
/// ```
#[must_use]
pub fn task_branch_ref(task_id: &str) -> String {
    format!("{TASK_BRANCH_REF_PREFIX}{task_id}")
}

/// Build the short branch name (without `refs/heads/`) for `git merge`/`git
/// branch -D` invocations.
///
/// # Example
/// ```
/// assert_eq!(delegation_core::refs::task_branch_name("t1"), "omp/task/t1");
/// ```
#[must_use]
pub fn task_branch_name(task_id: &str) -> String {
    format!("omp/task/{task_id}")
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during ref operations.
#[derive(Debug)]
pub enum RefError {
    /// A git command failed (non-zero exit code).
    GitCommand {
        /// The command that was run (e.g., `"git update-ref ..."`).
        command: String,
        /// Stderr output from git, trimmed.
        stderr: String,
        /// Process exit code, if available.
        exit_code: Option<i32>,
    },
    /// An I/O error spawning git.
    Io(std::io::Error),
    /// Git returned an OID that failed validation.
    InvalidOid {
        /// The ref name that was read.
        ref_name: String,
        /// The raw value returned by git.
        raw_value: String,
    },
    /// CAS failed because the ref's current value differs from `old_oid`.
    ///
    /// The caller should re-read the ref and retry, or bail out.
    CasMismatch {
        /// The ref that could not be updated.
        ref_name: String,
    },
}

impl fmt::Display for RefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitCommand {
                command,
                stderr,
                exit_code,
            } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::Io(e) => write!(f, "I/O error spawning git: {e}"),
            Self::InvalidOid {
                ref_name,
                raw_value,
            } => {
                write!(
                    f,
                    "invalid OID from `{ref_name}`: {raw_value:?} \
                     (expected 40 lowercase hex characters)"
                )
            }
            Self::CasMismatch { ref_name } => {
                write!(
                    f,
                    "CAS failed for `{ref_name}`: ref was modified concurrently — \
                     read the current value and retry"
                )
            }
        }
    }
}

impl std::error::Error for RefError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for RefError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Read a git ref and return its OID, or `None` if it does not exist.
///
/// Runs `git rev-parse <name>` in `root`. Returns `None` if the ref is
/// missing (git exits non-zero with "unknown revision or path").
///
/// # Errors
/// Returns an error if git cannot be spawned, if git fails for a reason
/// other than a missing ref, or if the returned OID is malformed.
pub fn read_ref(root: &Path, name: &str) -> Result<Option<GitOid>, RefError> {
    let output = Command::new("git")
        .args(["rev-parse", name])
        .current_dir(root)
        .output()?;

    if output.status.success() {
        let raw = String::from_utf8_lossy(&output.stdout);
        let oid_str = raw.trim();
        let oid = GitOid::new(oid_str).map_err(|_| RefError::InvalidOid {
            ref_name: name.to_owned(),
            raw_value: oid_str.to_owned(),
        })?;
        return Ok(Some(oid));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr_trimmed = stderr.trim();

    if stderr_trimmed.contains("unknown revision")
        || stderr_trimmed.contains("ambiguous argument")
        || stderr_trimmed.contains("not a valid object")
    {
        return Ok(None);
    }

    Err(RefError::GitCommand {
        command: format!("git rev-parse {name}"),
        stderr: stderr_trimmed.to_owned(),
        exit_code: output.status.code(),
    })
}

/// Write (create or overwrite) a git ref unconditionally.
///
/// For safe concurrent updates, use [`write_ref_cas`] instead.
///
/// # Errors
/// Returns an error if git cannot be spawned or exits non-zero.
pub fn write_ref(root: &Path, name: &str, oid: &GitOid) -> Result<(), RefError> {
    let output = Command::new("git")
        .args(["update-ref", name, oid.as_str()])
        .current_dir(root)
        .output()?;

    if output.status.success() {
        return Ok(());
    }

    Err(RefError::GitCommand {
        command: format!("git update-ref {name} {}", oid.as_str()),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        exit_code: output.status.code(),
    })
}

/// Atomically update a git ref using compare-and-swap (CAS).
///
/// Runs `git update-ref <name> <new_oid> <old_oid>`. The update succeeds
/// only if the ref's current value matches `old_oid`; otherwise this
/// function returns [`RefError::CasMismatch`].
///
/// Pass the zero OID (`0000000000000000000000000000000000000000`) as
/// `old_oid` to succeed only if the ref does not currently exist.
///
/// # Errors
/// - [`RefError::CasMismatch`] — ref was modified concurrently.
/// - [`RefError::GitCommand`] — other git failure.
/// - [`RefError::Io`] — git could not be spawned.
pub fn write_ref_cas(
    root: &Path,
    name: &str,
    old_oid: &GitOid,
    new_oid: &GitOid,
) -> Result<(), RefError> {
    let output = Command::new("git")
        .args(["update-ref", name, new_oid.as_str(), old_oid.as_str()])
        .current_dir(root)
        .output()?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr_trimmed = stderr.trim();

    if stderr_trimmed.contains("cannot lock ref")
        || stderr_trimmed.contains("is at")
        || stderr_trimmed.contains("but expected")
    {
        return Err(RefError::CasMismatch {
            ref_name: name.to_owned(),
        });
    }

    Err(RefError::GitCommand {
        command: format!(
            "git update-ref {name} {} {}",
            new_oid.as_str(),
            old_oid.as_str()
        ),
        stderr: stderr_trimmed.to_owned(),
        exit_code: output.status.code(),
    })
}

/// Delete a git ref.
///
/// Idempotent: if the ref does not exist, git exits successfully (no-op).
///
/// # Errors
/// Returns an error if git cannot be spawned or exits non-zero for a
/// reason other than the ref already being absent.
pub fn delete_ref(root: &Path, name: &str) -> Result<(), RefError> {
    let output = Command::new("git")
        .args(["update-ref", "-d", name])
        .current_dir(root)
        .output()?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr_trimmed = stderr.trim();

    Err(RefError::GitCommand {
        command: format!("git update-ref -d {name}"),
        stderr: stderr_trimmed.to_owned(),
        exit_code: output.status.code(),
    })
}

// ---------------------------------------------------------------------------
// Convenience wrappers for task branches
// ---------------------------------------------------------------------------

/// Create a task's reconciliation branch at `commit`, failing if it already
/// exists (CAS against the zero OID).
///
/// # Errors
/// Returns [`RefError::CasMismatch`] if the branch ref already exists.
pub fn create_task_branch(root: &Path, task_id: &str, commit: &GitOid) -> Result<(), RefError> {
    let zero = GitOid::new(&"0".repeat(40)).expect("zero OID is well-formed");
    write_ref_cas(root, &task_branch_ref(task_id), &zero, commit)
}

/// Delete a task's reconciliation branch, if it exists.
pub fn delete_task_branch(root: &Path, task_id: &str) -> Result<(), RefError> {
    delete_ref(root, &task_branch_ref(task_id))
}

/// Advance a named branch ref (e.g. the parent workspace's branch) via CAS.
///
/// Returns [`RefError::CasMismatch`] if another process advanced the ref
/// first.
pub fn advance_branch(
    root: &Path,
    branch_ref: &str,
    old_oid: &GitOid,
    new_oid: &GitOid,
) -> Result<(), RefError> {
    write_ref_cas(root, branch_ref, old_oid, new_oid)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

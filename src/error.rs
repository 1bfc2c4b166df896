//! Error types for the delegation core.
//!
//! Defines [`DelegationError`], the unified error type for scheduling,
//! isolation, execution, and reconciliation failures. Error messages are
//! agent-friendly: each variant describes what went wrong and, where there
//! is an obvious next step, how to recover.

use std::fmt;
use std::path::PathBuf;

use crate::model::types::{AgentName, TaskId};

// ---------------------------------------------------------------------------
// DelegationError
// ---------------------------------------------------------------------------

/// Unified error type for Task Delegation Core operations.
#[derive(Debug)]
pub enum DelegationError {
    /// The batch contained no tasks.
    EmptyBatch,

    /// Two or more tasks share the same id, ignoring case.
    DuplicateTaskIds {
        /// The colliding ids, in input order.
        ids: Vec<TaskId>,
    },

    /// The requested agent is not registered (or was filtered out as disabled).
    UnknownAgent {
        /// The requested agent name.
        name: AgentName,
    },

    /// The requesting agent is not permitted to spawn the target agent.
    SpawnNotAllowed {
        /// The agent attempting to spawn.
        parent: AgentName,
        /// The agent it attempted to spawn.
        child: AgentName,
    },

    /// The current process is already running as the target agent; spawning
    /// it again would recurse.
    SelfRecursion {
        /// The agent name that is blocked.
        name: AgentName,
    },

    /// Isolation was requested but the isolation mode configured is `none`,
    /// or vice versa.
    IncompatibleIsolationRequest {
        /// Human-readable explanation.
        detail: String,
    },

    /// Capturing a baseline snapshot failed (not a git repo, git unavailable).
    BaselineFailed {
        /// What went wrong.
        detail: String,
    },

    /// Preparing or cleaning up an isolated workspace failed.
    IsolationFailed {
        /// The task whose isolation failed.
        task: TaskId,
        /// What went wrong.
        detail: String,
    },

    /// A sub-agent stopped 3 times in a row without calling `submit_result`.
    SubmitResultCapExceeded {
        /// The task whose sub-agent exceeded the reminder cap.
        task: TaskId,
    },

    /// A git command failed.
    GitError {
        /// The git command that was run (e.g. `"git apply --check"`).
        command: String,
        /// Captured stderr from git.
        stderr: String,
    },

    /// Merge reconciliation could not apply the combined result cleanly.
    MergeFailed {
        /// Human-readable summary (e.g. naming the first conflicting branch).
        detail: String,
    },

    /// A configuration file could not be loaded or parsed.
    ConfigError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// An I/O error occurred during a delegation operation.
    Io(std::io::Error),
}

// ---------------------------------------------------------------------------
// Display — agent-friendly error messages
// ---------------------------------------------------------------------------

impl fmt::Display for DelegationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBatch => {
                write!(
                    f,
                    "task batch is empty.\n  To fix: include at least one task before calling execute."
                )
            }
            Self::DuplicateTaskIds { ids } => {
                write!(f, "Invalid tasks: duplicate task ids detected (case-insensitive): ")?;
                let rendered: Vec<&str> = ids.iter().map(TaskId::as_str).collect();
                write!(f, "{}", rendered.join(", "))?;
                write!(f, "\n  To fix: give each task a unique id.")
            }
            Self::UnknownAgent { name } => {
                write!(
                    f,
                    "agent '{name}' is not registered or has been disabled.\n  To fix: check the agent registry, or enable the agent in settings."
                )
            }
            Self::SpawnNotAllowed { parent, child } => {
                write!(
                    f,
                    "agent '{parent}' is not permitted to spawn '{child}'.\n  To fix: add '{child}' to {parent}'s `spawns` allow-list."
                )
            }
            Self::SelfRecursion { name } => {
                write!(
                    f,
                    "refusing to spawn '{name}': the current process is already running as '{name}'.\n  To fix: target a different agent, or run this batch outside of '{name}'."
                )
            }
            Self::IncompatibleIsolationRequest { detail } => {
                write!(
                    f,
                    "incompatible isolation request: {detail}\n  To fix: align the batch's `isolated` flag with the configured isolation mode."
                )
            }
            Self::BaselineFailed { detail } => {
                write!(
                    f,
                    "could not capture a workspace baseline: {detail}\n  To fix: run from inside a git repository with a readable HEAD."
                )
            }
            Self::IsolationFailed { task, detail } => {
                write!(
                    f,
                    "isolated task execution not initialized for '{task}': {detail}"
                )
            }
            Self::SubmitResultCapExceeded { task } => {
                write!(
                    f,
                    "task '{task}': subagent stopped without submit_result.\n  To fix: the agent's system prompt should explicitly require a submit_result call before stopping."
                )
            }
            Self::GitError { command, stderr } => {
                write!(f, "git command failed: {command}")?;
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                write!(f, "\n  To fix: check git state and retry.")
            }
            Self::MergeFailed { detail } => {
                write!(
                    f,
                    "merge reconciliation did not apply: {detail}\n  To fix: resolve the reported conflict and retry; per-task artifacts remain on disk."
                )
            }
            Self::ConfigError { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {}\n  To fix: edit the config file and correct the issue.",
                    path.display(),
                    detail
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for DelegationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for DelegationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<crate::config::ConfigError> for DelegationError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::ConfigError {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

impl From<crate::refs::RefError> for DelegationError {
    fn from(err: crate::refs::RefError) -> Self {
        Self::GitError {
            command: "git update-ref".to_owned(),
            stderr: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> TaskId {
        TaskId::new(name).unwrap()
    }

    fn agent(name: &str) -> AgentName {
        AgentName::new(name).unwrap()
    }

    #[test]
    fn display_empty_batch() {
        let msg = format!("{}", DelegationError::EmptyBatch);
        assert!(msg.contains("empty"));
    }

    #[test]
    fn display_duplicate_task_ids() {
        let err = DelegationError::DuplicateTaskIds {
            ids: vec![task("a"), task("A")],
        };
        let msg = format!("{err}");
        assert!(msg.contains("duplicate task ids"));
        assert!(msg.contains("a, A"));
    }

    #[test]
    fn display_unknown_agent() {
        let err = DelegationError::UnknownAgent {
            name: agent("ghost"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("ghost"));
        assert!(msg.contains("not registered"));
    }

    #[test]
    fn display_spawn_not_allowed() {
        let err = DelegationError::SpawnNotAllowed {
            parent: agent("planner"),
            child: agent("reviewer"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("planner"));
        assert!(msg.contains("reviewer"));
        assert!(msg.contains("spawns"));
    }

    #[test]
    fn display_self_recursion() {
        let err = DelegationError::SelfRecursion {
            name: agent("planner"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("refusing to spawn"));
    }

    #[test]
    fn display_submit_result_cap_exceeded() {
        let err = DelegationError::SubmitResultCapExceeded { task: task("t1") };
        let msg = format!("{err}");
        assert!(msg.contains("t1"));
        assert!(msg.contains("submit_result"));
    }

    #[test]
    fn display_merge_failed() {
        let err = DelegationError::MergeFailed {
            detail: "branch omp/task/t2 conflicts".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("did not apply"));
        assert!(msg.contains("omp/task/t2"));
    }

    #[test]
    fn display_git_error_with_stderr() {
        let err = DelegationError::GitError {
            command: "git apply --check".to_owned(),
            stderr: "patch does not apply".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("git apply --check"));
        assert!(msg.contains("patch does not apply"));
    }

    #[test]
    fn display_config_error() {
        let err = DelegationError::ConfigError {
            path: PathBuf::from("settings.toml"),
            detail: "unknown field".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("settings.toml"));
        assert!(msg.contains("unknown field"));
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = DelegationError::Io(io_err);
        let msg = format!("{err}");
        assert!(msg.contains("I/O error"));
    }

    #[test]
    fn source_present_for_io() {
        use std::error::Error as _;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = DelegationError::Io(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn source_absent_for_non_io() {
        use std::error::Error as _;
        let err = DelegationError::EmptyBatch;
        assert!(err.source().is_none());
    }

    #[test]
    fn from_config_error() {
        let cfg_err = crate::config::ConfigError {
            path: Some(PathBuf::from("settings.toml")),
            message: "bad toml".to_owned(),
        };
        let err: DelegationError = cfg_err.into();
        match err {
            DelegationError::ConfigError { path, detail } => {
                assert_eq!(path, PathBuf::from("settings.toml"));
                assert_eq!(detail, "bad toml");
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}

//! Task Delegation Core settings (`delegation.toml`).
//!
//! Defines the typed configuration for scheduling, isolation, and merge
//! reconciliation. Missing fields use sensible defaults. Missing file →
//! all defaults (no error).

use std::fmt;
use std::path::Path;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

/// Top-level Task Delegation Core configuration.
///
/// Parsed from `delegation.toml`. Missing fields use sensible defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Scheduler settings (concurrency, recursion guard).
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Workspace isolation settings.
    #[serde(default)]
    pub isolation: IsolationConfig,

    /// Sub-agent executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Merge reconciliation settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Scheduler-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Maximum number of sub-agents run concurrently in one batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// The agent name the current process is running as, if any.
    ///
    /// A batch targeting this agent is rejected to prevent self-recursion.
    /// Set by the host process before calling the scheduler; never read
    /// from the environment by this crate.
    #[serde(default)]
    pub blocked_agent: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            blocked_agent: None,
        }
    }
}

const fn default_max_concurrency() -> usize {
    4
}

// ---------------------------------------------------------------------------
// IsolationConfig
// ---------------------------------------------------------------------------

/// Workspace isolation settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolationConfig {
    /// Which isolation mechanism to use for isolated batches.
    #[serde(default)]
    pub mode: IsolationMode,

    /// Bytes buffered in memory per task's output sink before spilling to a
    /// temp file.
    #[serde(default = "default_spill_threshold")]
    pub spill_threshold_bytes: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            mode: IsolationMode::default(),
            spill_threshold_bytes: default_spill_threshold(),
        }
    }
}

const fn default_spill_threshold() -> usize {
    50 * 1024
}

/// The workspace isolation mechanism.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// No isolation: sub-agents run directly against the parent workspace.
    #[default]
    None,
    /// Git worktree backend.
    Worktree,
    /// Overlay-filesystem backend (Linux only).
    FuseOverlay,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Worktree => write!(f, "worktree"),
            Self::FuseOverlay => write!(f, "fuse-overlay"),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

/// Sub-agent executor settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Maximum number of "you stopped without calling submit_result"
    /// reminders sent before a task is aborted.
    #[serde(default = "default_reminder_cap")]
    pub reminder_cap: u32,

    /// Number of recent tool names retained in a task's Progress Record.
    #[serde(default = "default_recent_tools_capacity")]
    pub recent_tools_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            reminder_cap: default_reminder_cap(),
            recent_tools_capacity: default_recent_tools_capacity(),
        }
    }
}

const fn default_reminder_cap() -> u32 {
    3
}

const fn default_recent_tools_capacity() -> usize {
    10
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge reconciliation settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Patch-concatenation vs. branch-merge reconciliation.
    #[serde(default)]
    pub mode: MergeMode,

    /// Optional model id used to generate branch-mode commit messages.
    /// Falls back to `task(<id>): <description>` when unset or when the
    /// model call fails.
    #[serde(default)]
    pub commit_message_model: Option<String>,
}

/// How per-task deltas are reconciled into the parent workspace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    /// Concatenate unified diffs and `git apply` them.
    #[default]
    Patch,
    /// Merge each task's `omp/task/<id>` branch into the parent ref.
    Branch,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::Branch => write!(f, "branch"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a settings file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse settings from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

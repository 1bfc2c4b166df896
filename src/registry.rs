//! Agent Registry — load and merge agent definitions from bundled, user,
//! and project sources.
//!
//! Agent definitions are front-matter + body files, one per agent,
//! discovered under three roots and merged by name with project beating
//! user beating bundled. Malformed files are skipped, never fatal; the
//! registry collects their errors on a warning channel instead.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Where an agent definition was loaded from. Also the tie-break order on
/// name collision: `Project` beats `User` beats `Bundled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Source {
    Bundled,
    User,
    Project,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bundled => "bundled",
            Self::User => "user",
            Self::Project => "project",
        };
        f.write_str(s)
    }
}

/// Spawn policy: which other agents this agent is permitted to delegate to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpawnPolicy {
    /// `""` — may not spawn any sub-agent.
    None,
    /// `"*"` — may spawn any registered agent.
    Any,
    /// A comma-separated allow-list of agent names.
    Allowed(Vec<String>),
}

impl SpawnPolicy {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::None
        } else if trimmed == "*" {
            Self::Any
        } else {
            Self::Allowed(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect(),
            )
        }
    }

    /// Whether `child` may be spawned under this policy.
    #[must_use]
    pub fn permits(&self, child: &str) -> bool {
        match self {
            Self::None => false,
            Self::Any => true,
            Self::Allowed(names) => names.iter().any(|n| n == child),
        }
    }
}

impl Default for SpawnPolicy {
    fn default() -> Self {
        Self::None
    }
}

/// Front-matter for one agent definition file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FrontMatter {
    name: String,
    description: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    thinking_level: Option<String>,
    #[serde(default)]
    tools: Option<Vec<String>>,
    #[serde(default)]
    spawns: Option<String>,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    blocking: bool,
}

/// A fully resolved agent definition, ready to hand to the executor.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub model: Option<String>,
    pub thinking_level: Option<String>,
    pub tools: Option<Vec<String>>,
    pub spawns: SpawnPolicy,
    pub output_schema: Option<serde_json::Value>,
    pub source: Source,
    pub blocking: bool,
}

/// A file that failed to parse. Loading continues past it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// The merged set of agent definitions available to a run, plus any
/// non-fatal errors encountered while loading.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    agents: BTreeMap<String, AgentDefinition>,
    pub warnings: Vec<LoadError>,
}

impl Registry {
    /// Load and merge agent definitions from bundled, user, and project
    /// directories. Disabled names are filtered out of the result.
    #[must_use]
    pub fn load(
        bundled_dir: Option<&Path>,
        user_dir: Option<&Path>,
        project_dir: Option<&Path>,
        disabled: &[String],
    ) -> Self {
        let mut registry = Self::default();

        for (dir, source) in [
            (bundled_dir, Source::Bundled),
            (user_dir, Source::User),
            (project_dir, Source::Project),
        ] {
            let Some(dir) = dir else { continue };
            registry.load_dir(dir, source);
        }

        registry.agents.retain(|name, _| !disabled.contains(name));
        registry
    }

    fn load_dir(&mut self, dir: &Path, source: Source) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                self.warnings.push(LoadError {
                    path: dir.to_path_buf(),
                    reason: format!("cannot read directory: {err}"),
                });
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            match load_agent_file(&path, source) {
                Ok(def) => {
                    self.agents.insert(def.name.clone(), def);
                }
                Err(reason) => self.warnings.push(LoadError { path, reason }),
            }
        }
    }

    /// Build a registry directly from already-resolved definitions,
    /// bypassing file discovery. Used by other modules' tests that need a
    /// registry without writing agent files to a temp directory.
    #[must_use]
    pub fn from_agents(agents: Vec<AgentDefinition>) -> Self {
        Self {
            agents: agents.into_iter().map(|a| (a.name.clone(), a)).collect(),
            warnings: Vec::new(),
        }
    }

    /// Look up a resolved agent definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.get(name)
    }

    /// All resolved agent names, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Number of resolved agent definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Split a front-matter + body agent file: `---\n<toml>\n---\n<body>`.
fn load_agent_file(path: &Path, source: Source) -> Result<AgentDefinition, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("cannot read file: {e}"))?;

    let rest = raw
        .strip_prefix("---\n")
        .ok_or_else(|| "missing front-matter delimiter".to_string())?;
    let end = rest
        .find("\n---\n")
        .or_else(|| rest.find("\n---"))
        .ok_or_else(|| "unterminated front-matter block".to_string())?;
    let (front, body) = rest.split_at(end);
    let body = body
        .trim_start_matches("\n---\n")
        .trim_start_matches("\n---")
        .trim_start_matches('\n');

    let front: FrontMatter =
        toml::from_str(front).map_err(|e| format!("invalid front-matter: {e}"))?;

    if front.name.trim().is_empty() {
        return Err("agent name must not be empty".to_string());
    }

    Ok(AgentDefinition {
        name: front.name,
        description: front.description,
        system_prompt: body.trim_end().to_string(),
        model: front.model,
        thinking_level: front.thinking_level,
        tools: front.tools,
        spawns: front.spawns.as_deref().map_or_else(SpawnPolicy::default, SpawnPolicy::parse),
        output_schema: front.output,
        source,
        blocking: front.blocking,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_agent(dir: &Path, filename: &str, front_matter: &str, body: &str) {
        let path = dir.join(filename);
        fs::write(path, format!("---\n{front_matter}\n---\n{body}")).unwrap();
    }

    #[test]
    fn spawn_policy_parses_none_any_and_list() {
        assert_eq!(SpawnPolicy::parse(""), SpawnPolicy::None);
        assert_eq!(SpawnPolicy::parse("*"), SpawnPolicy::Any);
        assert_eq!(
            SpawnPolicy::parse("reviewer, tester"),
            SpawnPolicy::Allowed(vec!["reviewer".into(), "tester".into()])
        );
    }

    #[test]
    fn spawn_policy_permits_checks_membership() {
        let policy = SpawnPolicy::Allowed(vec!["reviewer".into()]);
        assert!(policy.permits("reviewer"));
        assert!(!policy.permits("tester"));
        assert!(SpawnPolicy::Any.permits("anything"));
        assert!(!SpawnPolicy::None.permits("anything"));
    }

    #[test]
    fn loads_single_agent_from_one_source() {
        let dir = tempdir().unwrap();
        write_agent(
            dir.path(),
            "reviewer.md",
            "name = \"reviewer\"\ndescription = \"reviews code\"",
            "You are a careful reviewer.",
        );

        let registry = Registry::load(Some(dir.path()), None, None, &[]);
        let def = registry.get("reviewer").expect("agent present");
        assert_eq!(def.description, "reviews code");
        assert_eq!(def.system_prompt, "You are a careful reviewer.");
        assert_eq!(def.source, Source::Bundled);
        assert!(registry.warnings.is_empty());
    }

    #[test]
    fn project_overrides_user_overrides_bundled() {
        let bundled = tempdir().unwrap();
        let user = tempdir().unwrap();
        let project = tempdir().unwrap();

        write_agent(bundled.path(), "a.md", "name = \"a\"\ndescription = \"bundled\"", "b");
        write_agent(user.path(), "a.md", "name = \"a\"\ndescription = \"user\"", "u");
        write_agent(project.path(), "a.md", "name = \"a\"\ndescription = \"project\"", "p");

        let registry = Registry::load(
            Some(bundled.path()),
            Some(user.path()),
            Some(project.path()),
            &[],
        );
        let def = registry.get("a").unwrap();
        assert_eq!(def.description, "project");
        assert_eq!(def.source, Source::Project);
    }

    #[test]
    fn user_overrides_bundled_when_no_project_override() {
        let bundled = tempdir().unwrap();
        let user = tempdir().unwrap();
        write_agent(bundled.path(), "a.md", "name = \"a\"\ndescription = \"bundled\"", "b");
        write_agent(user.path(), "a.md", "name = \"a\"\ndescription = \"user\"", "u");

        let registry = Registry::load(Some(bundled.path()), Some(user.path()), None, &[]);
        assert_eq!(registry.get("a").unwrap().source, Source::User);
    }

    #[test]
    fn malformed_file_is_skipped_and_warned_not_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.md"), "not front matter at all").unwrap();
        write_agent(dir.path(), "ok.md", "name = \"ok\"\ndescription = \"fine\"", "body");

        let registry = Registry::load(Some(dir.path()), None, None, &[]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("ok").is_some());
        assert_eq!(registry.warnings.len(), 1);
        assert!(registry.warnings[0].reason.contains("front-matter"));
    }

    #[test]
    fn disabled_agents_are_filtered_out() {
        let dir = tempdir().unwrap();
        write_agent(dir.path(), "a.md", "name = \"a\"\ndescription = \"a\"", "a");
        write_agent(dir.path(), "b.md", "name = \"b\"\ndescription = \"b\"", "b");

        let registry = Registry::load(Some(dir.path()), None, None, &["a".to_string()]);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }

    #[test]
    fn missing_directory_produces_warning_not_panic() {
        let registry = Registry::load(Some(Path::new("/does/not/exist")), None, None, &[]);
        assert!(registry.is_empty());
        assert_eq!(registry.warnings.len(), 1);
    }

    #[test]
    fn non_markdown_files_are_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "irrelevant").unwrap();
        let registry = Registry::load(Some(dir.path()), None, None, &[]);
        assert!(registry.is_empty());
        assert!(registry.warnings.is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        let dir = tempdir().unwrap();
        write_agent(dir.path(), "blank.md", "name = \"\"\ndescription = \"x\"", "x");
        let registry = Registry::load(Some(dir.path()), None, None, &[]);
        assert!(registry.is_empty());
        assert_eq!(registry.warnings.len(), 1);
    }
}

//! Configuration resolution.
//!
//! Two document shapes are accepted:
//!
//! - **Legacy**: top-level `owner`, `repo`, `token`, `database` for a single repository.
//! - **Multi-project**: a `global` block (default `token`/`database`) and a
//!   `projects` list with optional per-project overrides.
//!
//! Legacy documents are normalized into a one-project multi-project document.
//! Resolution never touches the filesystem; callers supply the raw bytes and a
//! [`ResolveContext`] carrying the working and home directories.

mod detect;

pub use detect::{detect_project, parse_remote_url, DetectedProject};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory under the home directory holding the default database.
pub const DEFAULT_DATA_DIR: &str = ".issue-mirror";

/// File name of the default database.
pub const DEFAULT_DB_FILE: &str = "issues.db";

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Config is missing owner/repo ({0})")]
    MissingRepository(String),

    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No git repository found at or above {0}")]
    NoGitRepository(PathBuf),

    #[error("No 'origin' remote configured in {0}")]
    NoOriginRemote(PathBuf),

    #[error("Could not parse owner/repo from remote URL: {0}")]
    UnparseableRemote(String),

    #[error("No projects configured")]
    NoProjects,

    #[error("Unknown project: {0}")]
    UnknownProject(String),
}

/// Environment used to fill in defaults.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    /// Default for empty project paths.
    pub cwd: PathBuf,

    /// Anchor for the default database location.
    pub home_dir: Option<PathBuf>,
}

impl ResolveContext {
    /// Build a context from the current process environment.
    pub fn current() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            home_dir: directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf()),
        }
    }

    /// The well-known database location, `~/.issue-mirror/issues.db`.
    pub fn default_database(&self) -> PathBuf {
        match &self.home_dir {
            Some(home) => home.join(DEFAULT_DATA_DIR).join(DEFAULT_DB_FILE),
            None => PathBuf::from(DEFAULT_DATA_DIR).join(DEFAULT_DB_FILE),
        }
    }

    /// Expand a leading `~/` against the home directory.
    fn expand(&self, path: &str) -> String {
        match (path.strip_prefix("~/"), &self.home_dir) {
            (Some(rest), Some(home)) => home.join(rest).display().to_string(),
            _ => path.to_string(),
        }
    }
}

/// Global defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub token: String,

    /// `owner/repo` that receives issues of a store written before projects
    /// existed. Empty means such issues stay where they are.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub legacy_project: String,
}

/// One mirrored repository and its overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default)]
    pub path: String,

    /// Empty means "inherit the global token".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    /// Empty means "inherit the global database".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database: String,
}

impl ProjectConfig {
    /// `owner/repo`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Project token if non-empty, else the global token.
    pub fn effective_token<'a>(&'a self, global: &'a GlobalConfig) -> &'a str {
        if self.token.is_empty() {
            &global.token
        } else {
            &self.token
        }
    }

    /// Project database if non-empty, else the global database.
    pub fn effective_database(&self, global: &GlobalConfig) -> PathBuf {
        if self.database.is_empty() {
            PathBuf::from(&global.database)
        } else {
            PathBuf::from(&self.database)
        }
    }

    fn matches(&self, filter: &str) -> bool {
        match filter.split_once('/') {
            Some((owner, repo)) => self.owner == owner && self.repo == repo,
            None => self.repo == filter,
        }
    }
}

/// Legacy single-project document.
#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    owner: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    database: String,
}

/// Normalized multi-project configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// A project with its effective settings applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveProject {
    pub owner: String,
    pub repo: String,
    pub path: PathBuf,
    pub token: String,
    pub database: PathBuf,
}

impl EffectiveProject {
    /// `owner/repo`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl Config {
    /// Parse and normalize a raw configuration document.
    pub fn resolve(raw: &[u8], ctx: &ResolveContext) -> Result<Self, ConfigError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ConfigError::Parse(format!("config is not valid UTF-8: {}", e)))?;

        let multi = serde_yaml::from_str::<Config>(text);

        let config = match multi {
            Ok(config) if is_multi_project(&config, text) => {
                for project in &config.projects {
                    if project.owner.is_empty() || project.repo.is_empty() {
                        return Err(ConfigError::MissingRepository(format!(
                            "project entry '{}'",
                            project.full_name()
                        )));
                    }
                }
                config
            }
            multi => match serde_yaml::from_str::<LegacyConfig>(text) {
                Ok(legacy) => Self::from_legacy(legacy, ctx)?,
                Err(legacy_err) => {
                    let detail = match multi {
                        Err(multi_err) => format!("{}; {}", multi_err, legacy_err),
                        Ok(_) => legacy_err.to_string(),
                    };
                    return Err(ConfigError::Parse(detail));
                }
            },
        };

        Ok(config.normalized(ctx))
    }

    /// Read a configuration file and resolve it.
    pub fn load(path: &Path, ctx: &ResolveContext) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::resolve(&raw, ctx)
    }

    /// Serialize as a multi-project document.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn from_legacy(legacy: LegacyConfig, ctx: &ResolveContext) -> Result<Self, ConfigError> {
        if legacy.owner.is_empty() || legacy.repo.is_empty() {
            return Err(ConfigError::MissingRepository(
                "legacy config requires both `owner` and `repo`".to_string(),
            ));
        }

        Ok(Self {
            global: GlobalConfig {
                database: legacy.database,
                token: legacy.token,
                legacy_project: format!("{}/{}", legacy.owner, legacy.repo),
            },
            projects: vec![ProjectConfig {
                owner: legacy.owner,
                repo: legacy.repo,
                path: ctx.cwd.display().to_string(),
                token: String::new(),
                database: String::new(),
            }],
        })
    }

    fn normalized(mut self, ctx: &ResolveContext) -> Self {
        self.global.database = if self.global.database.is_empty() {
            ctx.default_database().display().to_string()
        } else {
            ctx.expand(&self.global.database)
        };

        for project in &mut self.projects {
            project.path = if project.path.is_empty() {
                ctx.cwd.display().to_string()
            } else {
                ctx.expand(&project.path)
            };
            if !project.database.is_empty() {
                project.database = ctx.expand(&project.database);
            }
        }

        self
    }

    /// Effective settings for one project.
    pub fn effective(&self, project: &ProjectConfig) -> EffectiveProject {
        EffectiveProject {
            owner: project.owner.clone(),
            repo: project.repo.clone(),
            path: PathBuf::from(&project.path),
            token: project.effective_token(&self.global).to_string(),
            database: project.effective_database(&self.global),
        }
    }

    /// Effective settings for every configured project.
    pub fn effective_projects(&self) -> Vec<EffectiveProject> {
        self.projects.iter().map(|p| self.effective(p)).collect()
    }

    /// Whether `project` is the one that receives legacy single-project issues.
    pub fn is_legacy_project(&self, project: &EffectiveProject) -> bool {
        self.global.legacy_project == project.full_name()
    }

    /// Resolve the target project list.
    ///
    /// `filter` is either `owner/repo` or a bare repository name.
    pub fn select_projects(&self, filter: Option<&str>) -> Result<Vec<EffectiveProject>, ConfigError> {
        if self.projects.is_empty() {
            return Err(ConfigError::NoProjects);
        }

        match filter {
            None => Ok(self.effective_projects()),
            Some(filter) => {
                let selected: Vec<_> = self
                    .projects
                    .iter()
                    .filter(|p| p.matches(filter))
                    .map(|p| self.effective(p))
                    .collect();
                if selected.is_empty() {
                    Err(ConfigError::UnknownProject(filter.to_string()))
                } else {
                    Ok(selected)
                }
            }
        }
    }

    /// The project whose path is the longest prefix of `path`.
    pub fn project_for_path(&self, path: &Path) -> Option<EffectiveProject> {
        self.projects
            .iter()
            .filter(|p| !p.path.is_empty() && path.starts_with(&p.path))
            .max_by_key(|p| p.path.len())
            .map(|p| self.effective(p))
    }

    /// Add a project, or replace the entry with the same owner/repo.
    pub fn upsert_project(&mut self, project: ProjectConfig) {
        match self
            .projects
            .iter_mut()
            .find(|p| p.owner == project.owner && p.repo == project.repo)
        {
            Some(existing) => *existing = project,
            None => self.projects.push(project),
        }
    }
}

/// Whether a document should be read as multi-project.
fn is_multi_project(config: &Config, text: &str) -> bool {
    if !config.projects.is_empty() {
        return true;
    }
    if !config.global.database.is_empty() && !config.global.token.is_empty() {
        return true;
    }
    has_section_markers(text)
}

fn has_section_markers(text: &str) -> bool {
    let mut global = false;
    let mut projects = false;
    for line in text.lines() {
        let line = line.trim_end();
        global |= line.starts_with("global:");
        projects |= line.starts_with("projects:");
    }
    global && projects
}

//! Project auto-detection from a git checkout.

use super::ConfigError;
use std::path::{Path, PathBuf};

/// Owner/repo inferred from a checkout's `origin` remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedProject {
    pub owner: String,
    pub repo: String,
    /// Root of the working tree (the directory containing `.git`).
    pub path: PathBuf,
}

/// Walk up from `start` to the nearest `.git` directory and read its origin URL.
///
/// Fails with [`ConfigError::NoGitRepository`] when no `.git` directory exists,
/// [`ConfigError::NoOriginRemote`] when the config has no origin URL, and
/// [`ConfigError::UnparseableRemote`] when the URL is not a recognizable
/// `owner/repo` remote.
pub fn detect_project(start: &Path) -> Result<DetectedProject, ConfigError> {
    let root = start
        .ancestors()
        .find(|dir| dir.join(".git").is_dir())
        .ok_or_else(|| ConfigError::NoGitRepository(start.to_path_buf()))?;

    let config_path = root.join(".git").join("config");
    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;

    let url = origin_url(&contents).ok_or(ConfigError::NoOriginRemote(config_path))?;
    let (owner, repo) =
        parse_remote_url(&url).ok_or_else(|| ConfigError::UnparseableRemote(url.clone()))?;

    Ok(DetectedProject {
        owner,
        repo,
        path: root.to_path_buf(),
    })
}

/// Extract `url` from the `[remote "origin"]` section of a git config.
fn origin_url(contents: &str) -> Option<String> {
    let mut in_origin = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line.replace(' ', "") == "[remote\"origin\"]";
            continue;
        }
        if !in_origin {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "url" {
                return Some(value.trim().to_string());
            }
        }
    }

    None
}

/// Parse `owner` and `repo` from a remote URL.
///
/// Handles `https://host/owner/repo(.git)`, `ssh://git@host[:port]/owner/repo(.git)`,
/// `git://host/owner/repo` and scp-style `git@host:owner/repo(.git)`.
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    let path = if let Some((_, rest)) = url.split_once("://") {
        // Drop the authority (user@host:port)
        rest.split_once('/')?.1
    } else if let Some((authority, path)) = url.split_once(':') {
        if authority.contains('/') {
            return None;
        }
        path
    } else {
        return None;
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }

    let owner = segments[segments.len() - 2];
    let repo = segments[segments.len() - 1];
    Some((owner.to_string(), repo.to_string()))
}

//! Environment-file helpers
//!
//! Every run is configured by an env file passed on the command line. The
//! file is loaded into the process environment with `dotenvy`, then values
//! are read back through the helpers below so that missing or malformed
//! settings surface as [`HarvestError`] variants before any work starts.

use crate::error::{HarvestError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Variable naming the directory that relative paths resolve against.
pub const PROJECT_DIR_VAR: &str = "HARVEST_PROJECT_DIR";

/// Load an env file into the process environment.
///
/// Variables already present in the environment are not overridden.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(HarvestError::MissingInput(path.to_path_buf()));
    }
    dotenvy::from_path(path)?;
    tracing::debug!(env_file = %path.display(), "Loaded environment file");
    Ok(())
}

/// Read a variable, treating an empty value as unset.
pub fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read a variable that must be present.
pub fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| HarvestError::MissingVar(name.to_string()))
}

/// Parse a variable, falling back to `default` when it is unset.
///
/// A value that is present but does not parse is an error rather than a
/// silent fallback.
pub fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| HarvestError::InvalidVar {
            name: name.to_string(),
            value: raw,
        }),
    }
}

/// Split a comma separated variable into trimmed, non-empty items.
pub fn list(name: &str) -> Option<Vec<String>> {
    optional(name).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Directory that relative paths in the env file resolve against.
pub fn project_dir() -> Result<PathBuf> {
    match optional(PROJECT_DIR_VAR) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Ok(std::env::current_dir()?),
    }
}

/// Resolve `value` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, value: &str) -> PathBuf {
    let candidate = Path::new(value);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

/// Return the path if it exists, otherwise a [`HarvestError::MissingInput`].
pub fn require_existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(HarvestError::MissingInput(path))
    }
}

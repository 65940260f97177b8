//! Confinement of handler paths to the allowed root

use omnigate_config::expand_home;
use std::path::{Component, Path, PathBuf};

/// Error type for path validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValidationError {
    pub path: String,
    pub root: String,
}

impl std::fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Path {} is outside allowed root {}", self.path, self.root)
    }
}

impl std::error::Error for PathValidationError {}

/// Validates that a path is within the allowed root.
///
/// Steps:
/// 1. Expand `~/` to the home directory, or join relative paths to the root
/// 2. Fold `.` and `..` lexically
/// 3. Canonicalize the deepest ancestor that exists and re-append the
///    missing components, so a symlink anywhere above the target is resolved
/// 4. Ensure the result starts with the canonical root
///
/// Returns the validated absolute path.
pub async fn confine_path(path: &str, root: &Path) -> Result<PathBuf, PathValidationError> {
    let expanded = if !path.starts_with('/') && !path.starts_with('~') {
        root.join(path)
    } else {
        expand_home(path)
    };

    let normalized_root = normalize(root);
    let resolved_root = resolve(&normalized_root).await;
    let canonical_root = resolved_root.unwrap_or(normalized_root);

    let denied = || PathValidationError {
        path: path.to_string(),
        root: canonical_root.display().to_string(),
    };

    // A dangling symlink fails to canonicalize and is refused
    let absolute = resolve(&normalize(&expanded)).await.map_err(|_| denied())?;

    if !is_path_within_root(&absolute, &canonical_root) {
        return Err(denied());
    }

    Ok(absolute)
}

/// Canonicalize the longest existing prefix of `path` and append the rest.
///
/// `path` must already be free of `..` components.
async fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();
    while tokio::fs::symlink_metadata(existing).await.is_err() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_owned());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = tokio::fs::canonicalize(existing).await?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Check if a path is within the root
fn is_path_within_root(path: &Path, root: &Path) -> bool {
    // Components comparison, so /home/al does not contain /home/alice
    let path_components: Vec<_> = path.components().collect();
    let root_components: Vec<_> = root.components().collect();

    if path_components.len() < root_components.len() {
        return false;
    }

    root_components
        .iter()
        .enumerate()
        .all(|(i, root_comp)| path_components.get(i) == Some(root_comp))
}

/// Fold `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

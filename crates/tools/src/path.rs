//! Path validation for capabilities that touch the local filesystem.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the allowed root")]
    OutsideRoot { path: String },

    #[error("Path traversal detected in '{path}'")]
    Traversal { path: String },

    #[error("Failed to resolve path '{path}': {reason}")]
    Unresolvable { path: String, reason: String },
}

/// Resolve `path` and make sure it stays inside `root` (if one is set).
///
/// Relative paths are resolved against `root`. Any `..` component is
/// rejected outright; symlinks are resolved before the containment check.
pub fn validate_path(path: &str, root: Option<&Path>) -> Result<PathBuf, PathValidationError> {
    let input = Path::new(path);
    if input.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PathValidationError::Traversal { path: path.into() });
    }

    let joined = match root {
        Some(root) if input.is_relative() => root.join(input),
        _ => input.to_path_buf(),
    };

    let resolved = joined
        .canonicalize()
        .map_err(|e| PathValidationError::Unresolvable {
            path: path.into(),
            reason: e.to_string(),
        })?;

    if let Some(root) = root {
        let root = root
            .canonicalize()
            .map_err(|e| PathValidationError::Unresolvable {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;
        if !resolved.starts_with(&root) {
            return Err(PathValidationError::OutsideRoot { path: path.into() });
        }
    }

    Ok(resolved)
}

/// Reduce a requested artifact name to a bare file name.
///
/// Returns `None` for names with directory parts or nothing left.
pub fn artifact_file_name(name: &str) -> Option<&str> {
    let candidate = Path::new(name);
    let mut components = candidate.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) => file.to_str().filter(|f| !f.starts_with('.')),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_resolves_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let resolved = validate_path("notes.txt", Some(dir.path())).unwrap();
        assert!(resolved.ends_with("notes.txt"));
    }

    #[test]
    fn parent_components_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_path("../../etc/passwd", Some(dir.path())).unwrap_err();
        assert!(matches!(err, PathValidationError::Traversal { .. }));
    }

    #[test]
    fn absolute_path_outside_root_rejected() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let file = other.path().join("secret.txt");
        std::fs::write(&file, "x").unwrap();

        let err = validate_path(file.to_str().unwrap(), Some(root.path())).unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideRoot { .. }));
    }

    #[test]
    fn no_root_allows_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_path(file.to_str().unwrap(), None).is_ok());
    }

    #[test]
    fn missing_file_is_unresolvable() {
        let err = validate_path("/definitely/not/here.txt", None).unwrap_err();
        assert!(matches!(err, PathValidationError::Unresolvable { .. }));
    }

    #[test]
    fn artifact_names_must_be_bare() {
        assert_eq!(artifact_file_name("chart.png"), Some("chart.png"));
        assert_eq!(artifact_file_name("dir/chart.png"), None);
        assert_eq!(artifact_file_name("../chart.png"), None);
        assert_eq!(artifact_file_name("/etc/chart.png"), None);
        assert_eq!(artifact_file_name(".hidden"), None);
        assert_eq!(artifact_file_name(""), None);
    }
}

//! Path confinement: reject any target path that resolves outside a base directory.

use std::path::Path;

/// Collapses `.`/`..` components purely lexically (no filesystem access),
/// the way a shell would before ever touching disk.
fn normalize_lexically(path: &Path) -> std::path::PathBuf {
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves `p` to its real path even when some of its trailing components
/// (e.g. a not-yet-created nested directory for a brand new file) don't
/// exist on disk yet: canonicalizes the deepest existing ancestor to resolve
/// symlinks, then lexically re-applies the remaining, not-yet-existing
/// components (with any `..`/`.` already collapsed).
fn resolve_possibly_missing(p: &Path) -> Option<std::path::PathBuf> {
    let normalized = normalize_lexically(p);
    let mut existing = normalized.as_path();
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        let file_name = existing.file_name()?.to_os_string();
        remainder.push(file_name);
        existing = existing.parent()?;
    }

    let mut resolved = existing.canonicalize().ok()?;
    for component in remainder.into_iter().rev() {
        resolved.push(component);
    }
    Some(resolved)
}

/// Resolves `path` to an absolute, `.`/`..`-free form the way Python's
/// `Path.resolve()` does: symlinks are followed for whatever prefix of the
/// path already exists on disk, and any remaining (not-yet-created)
/// components are appended after lexical normalization. Falls back to a
/// purely lexical normalization if nothing on the path's ancestry exists.
pub fn resolve_display_path(path: impl AsRef<Path>) -> std::path::PathBuf {
    resolve_possibly_missing(path.as_ref()).unwrap_or_else(|| normalize_lexically(path.as_ref()))
}

/// Returns true if `path` resolves to a descendant of (or equal to) `base`.
///
/// Both paths are canonicalized before comparison, so `..` components and
/// symlinks cannot be used to escape `base`. A path with components that
/// don't exist yet (a brand new file, possibly under brand new directories)
/// is still resolved correctly by walking up to the nearest existing
/// ancestor. Any failure to resolve either path at all (e.g. `base` itself
/// does not exist) is treated as "not confined" — callers are expected to
/// skip the edit rather than create it.
pub fn is_within_base(path: impl AsRef<Path>, base: impl AsRef<Path>) -> bool {
    let (Some(resolved_path), Some(resolved_base)) =
        (resolve_possibly_missing(path.as_ref()), base.as_ref().canonicalize().ok())
    else {
        return false;
    };

    resolved_path.starts_with(&resolved_base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn accepts_path_inside_base() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let inner = base.join("sub").join("file.py");
        std::fs::create_dir_all(inner.parent().unwrap()).unwrap();
        std::fs::write(&inner, "x").unwrap();
        assert!(is_within_base(&inner, base));
    }

    #[test]
    fn rejects_path_escaping_via_dotdot() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("code");
        std::fs::create_dir_all(&base).unwrap();
        let escape = base.join("..").join("outside.py");
        assert!(!is_within_base(&escape, &base));
    }

    #[test]
    fn accepts_not_yet_existing_file_inside_base() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let target = base.join("new_module.py");
        assert!(is_within_base(&target, base));
    }

    #[test]
    fn accepts_not_yet_existing_nested_directories_inside_base() {
        let dir = tempdir().unwrap();
        let base = dir.path();
        let target = base.join("pkg").join("sub").join("new_module.py");
        assert!(is_within_base(&target, base));
    }

    #[test]
    fn rejects_nested_dotdot_escape_through_missing_directories() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("code");
        std::fs::create_dir_all(&base).unwrap();
        let escape = base.join("pkg").join("..").join("..").join("outside.py");
        assert!(!is_within_base(&escape, &base));
    }

    #[test]
    fn resolve_display_path_normalizes_dotdot_for_new_file() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("code");
        std::fs::create_dir_all(&base).unwrap();
        let messy = base.join("pkg").join("..").join("a.py");
        let resolved = resolve_display_path(&messy);
        assert_eq!(resolved, base.canonicalize().unwrap().join("a.py"));
    }
}

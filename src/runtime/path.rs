//! Lexical path utilities.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
/// A `..` at the root of an absolute path is dropped.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    result.components().next_back(),
                    Some(Component::RootDir | Component::Prefix(_))
                );
                if at_root {
                    continue;
                }
                let ends_with_parent =
                    matches!(result.components().next_back(), Some(Component::ParentDir));
                if ends_with_parent || !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Make `path` absolute against `base` and normalize it.
///
/// Returns `None` for an empty path, which names nothing.
pub fn absolutize(base: &Path, path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    Some(normalize_path(&joined))
}

//! Path normalization helpers.

use std::path::{Component, Path, PathBuf};

/// Lexically clean a path: drop `.` components and fold `..` into the
/// preceding component. Never touches the filesystem.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Normalize a path for comparison.
///
/// The longest existing ancestor is canonicalized (resolving symlinks) and
/// the non-existing remainder is appended lexically, so paths that do not
/// exist yet can still be compared against real ones.
pub fn normalize(path: &Path) -> PathBuf {
    let cleaned = clean(path);
    let mut existing = cleaned.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return cleaned,
        }
    }
}

/// Like [`normalize`], but a symlink at `path` is kept as the link itself:
/// only its parent is resolved.
pub fn normalize_entry(path: &Path) -> PathBuf {
    let cleaned = clean(path);
    let is_link = std::fs::symlink_metadata(&cleaned).is_ok_and(|m| m.file_type().is_symlink());
    match (is_link, cleaned.parent(), cleaned.file_name()) {
        (true, Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            normalize(parent).join(name)
        }
        _ => normalize(&cleaned),
    }
}

/// Whether `child` lies strictly beneath `parent`, component-wise.
pub fn is_strictly_inside(child: &Path, parent: &Path) -> bool {
    child != parent && child.starts_with(parent)
}

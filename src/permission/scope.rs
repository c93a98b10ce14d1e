//! Filesystem scope resolution
//!
//! Candidate paths and the scope root are both reduced to a canonical form
//! before comparison. Symlinks are followed for the longest existing prefix
//! and `.`/`..` are folded lexically only for the part that does not exist
//! yet. A `..` escape and a symlink escape end up outside the scope alike.

use std::path::{Component, Path, PathBuf};

/// Fold `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && path.is_relative() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Resolve `path` to its canonical real form.
///
/// Relative paths are taken relative to `base`. The joined path goes to the
/// OS unchanged, so a `..` after a symlink climbs out of the link target
/// just as opening the file would. When the path does not exist, the
/// deepest existing prefix is canonicalized and only the missing tail is
/// folded lexically. A dangling symlink in the tail is still followed.
pub fn resolve(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    resolve_joined(joined, 0)
}

/// Symlink hops followed through missing targets before giving up
const MAX_LINK_HOPS: usize = 40;

fn resolve_joined(joined: PathBuf, hops: usize) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(&joined) {
        return real;
    }

    let components: Vec<Component<'_>> = joined.components().collect();
    for split in (1..components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        let Ok(mut resolved) = std::fs::canonicalize(&prefix) else {
            continue;
        };
        let tail = &components[split..];
        for (i, component) in tail.iter().enumerate() {
            match component {
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(part) => {
                    resolved.push(part);
                    let is_link = std::fs::symlink_metadata(&resolved)
                        .map(|m| m.file_type().is_symlink())
                        .unwrap_or(false);
                    if is_link && hops < MAX_LINK_HOPS {
                        if let Ok(target) = std::fs::read_link(&resolved) {
                            resolved.pop();
                            let mut next = resolved.join(target);
                            next.extend(tail[i + 1..].iter());
                            return resolve_joined(next, hops + 1);
                        }
                    }
                }
                _ => {}
            }
        }
        return resolved;
    }

    normalize_lexically(&joined)
}

/// Whether `candidate` is `scope` itself or a strict descendant of it.
///
/// Both arguments must already be resolved. Comparison is component-wise,
/// so `/workspace-evil` is not inside `/workspace`.
pub fn is_within(candidate: &Path, scope: &Path) -> bool {
    candidate == scope || candidate.starts_with(scope)
}

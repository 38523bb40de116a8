use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::errors::{Result, SandboxError};

const MAX_SYMLINK_HOPS: usize = 40;

pub fn ensure_absolute_base(base_dir: &Path) -> Result<PathBuf> {
    if base_dir.is_relative() {
        return Err(SandboxError::InvalidOperation(
            "sandbox base directory must be absolute".to_string(),
        ));
    }
    Ok(base_dir.to_path_buf())
}

/// Joins a layout-relative path onto `base_dir`, refusing anything that could
/// leave it lexically.
pub fn resolve(base_dir: &Path, relative: impl AsRef<Path>) -> Result<PathBuf> {
    let relative = relative.as_ref();
    if relative.components().count() == 0 {
        return Err(SandboxError::InvalidOperation(
            "path must not be empty".to_string(),
        ));
    }
    if relative.is_absolute() {
        return Err(SandboxError::OutsideRoot);
    }

    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::CurDir => continue,
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => return Err(SandboxError::PathTraversal),
            Component::RootDir | Component::Prefix(_) => return Err(SandboxError::OutsideRoot),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(SandboxError::InvalidOperation(
            "path must name an entry below the sandbox root".to_string(),
        ));
    }

    let resolved = base_dir.join(clean);
    if !resolved.starts_with(base_dir) {
        return Err(SandboxError::OutsideRoot);
    }
    Ok(resolved)
}

/// Resolves an absolute path the way `realpath -m` does: symlinks on the
/// existing part of the path are followed, `..` pops one level, and
/// components that do not exist yet are appended as written.
pub fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    if path.is_relative() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' is not an absolute path", path.display()),
        ));
    }

    let anchor: PathBuf = path
        .components()
        .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect();
    let mut resolved = anchor.clone();
    let mut pending = Vec::new();
    push_components(&mut pending, path);

    let mut hops = 0usize;
    while let Some(part) = pending.pop() {
        let part = match part {
            Pending::Parent => {
                if resolved != anchor {
                    resolved.pop();
                }
                continue;
            }
            Pending::Normal(part) => part,
        };

        let candidate = resolved.join(&part);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("too many levels of symbolic links at '{}'", candidate.display()),
                    ));
                }
                let target = fs::read_link(&candidate)?;
                if target.is_absolute() {
                    resolved = anchor.clone();
                }
                push_components(&mut pending, &target);
            }
            Ok(_) => resolved = candidate,
            Err(err) if is_missing(&err) => resolved = candidate,
            Err(err) => return Err(err),
        }
    }
    Ok(resolved)
}

/// Component-wise containment: `/x/sandbox2` is not within `/x/sandbox`.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

enum Pending {
    Normal(OsString),
    Parent,
}

// Stored reversed so the next component to visit is at the end.
fn push_components(pending: &mut Vec<Pending>, path: &Path) {
    for component in path.components().rev() {
        match component {
            Component::Normal(part) => pending.push(Pending::Normal(part.to_os_string())),
            Component::ParentDir => pending.push(Pending::Parent),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
}

fn is_missing(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    // ENOTDIR: a path component is a regular file.
    err.raw_os_error() == Some(20)
}

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::errors::{Result, SandboxError};
use crate::path;
use crate::state::SandboxState;

/// Hidden bookkeeping entry written at the root of every sandbox.
pub const MARKER_FILE: &str = ".shellguide_sandbox";
const MARKER_CONTENT: &str = "This directory is managed by the shell tutor.\n";
const DEFAULT_MAX_FILE_SIZE: u64 = 512 * 1024;

/// Declarative sandbox contents: relative path to `None` for an empty
/// directory or `Some(content)` for a file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Layout(BTreeMap<String, Option<String>>);

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, path: impl Into<String>) -> Self {
        self.0.insert(path.into(), None);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.0.insert(path.into(), Some(content.into()));
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0
            .iter()
            .map(|(path, content)| (path.as_str(), content.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for Layout {
    fn from_iter<T: IntoIterator<Item = (String, Option<String>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub root: PathBuf,
    pub max_file_size: u64,
}

impl SandboxConfig {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = path::ensure_absolute_base(root.as_ref())?;
        Ok(Self {
            root,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        })
    }

    /// A root of its own below `base`, for running several sessions side by side.
    pub fn session(base: impl AsRef<Path>) -> Result<Self> {
        let base = path::ensure_absolute_base(base.as_ref())?;
        Self::new(base.join(format!("session-{}", Uuid::new_v4())))
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }
}

/// Owns one sandbox root on disk. Nothing in the crate touches the
/// filesystem outside of it.
#[derive(Clone, Debug)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// The root with symlinks resolved; this is the directory `cd` returns to.
    pub fn resolved_root(&self) -> PathBuf {
        path::canonicalize_lenient(&self.config.root).unwrap_or_else(|_| self.config.root.clone())
    }

    #[instrument(skip(self), fields(root = %self.root().display()))]
    pub fn ensure(&self) -> Result<PathBuf> {
        fs::create_dir_all(self.root())?;
        let marker = self.root().join(MARKER_FILE);
        if !marker.exists() {
            fs::write(marker, MARKER_CONTENT)?;
        }
        Ok(self.resolved_root())
    }

    /// Wipes the root and materializes `layout` in its place.
    #[instrument(skip(self, layout), fields(root = %self.root().display(), entries = layout.len()))]
    pub fn reset(&self, layout: &Layout) -> Result<PathBuf> {
        let planned = self.plan(layout)?;

        self.destroy()?;
        fs::create_dir_all(self.root())?;
        fs::write(self.root().join(MARKER_FILE), MARKER_CONTENT)?;

        for (target, content) in planned {
            match content {
                None => fs::create_dir_all(&target)?,
                Some(content) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, content)?;
                }
            }
        }
        debug!("sandbox materialized");
        Ok(self.resolved_root())
    }

    // Validates every entry before anything on disk is touched.
    fn plan<'a>(&self, layout: &'a Layout) -> Result<Vec<(PathBuf, Option<&'a str>)>> {
        let mut planned = Vec::with_capacity(layout.len());
        for (relative, content) in layout.entries() {
            let target = path::resolve(self.root(), relative)?;
            if target == self.root().join(MARKER_FILE) {
                return Err(SandboxError::InvalidOperation(format!(
                    "layout entry '{relative}' collides with the sandbox marker"
                )));
            }
            if let Some(content) = content {
                let size = content.len() as u64;
                if size > self.config.max_file_size {
                    return Err(SandboxError::FileTooLarge(size));
                }
            }
            planned.push((target, content));
        }
        Ok(planned)
    }

    /// Walks the whole root. Entries that cannot be read are skipped.
    #[instrument(skip(self), fields(root = %self.root().display()))]
    pub fn snapshot(&self) -> SandboxState {
        let root = self.root();
        if !root.is_dir() {
            return SandboxState::empty(root);
        }

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable sandbox entry: {err}");
                    continue;
                }
            };
            let Some(relative) = relative_key(root, entry.path()) else {
                continue;
            };
            if relative == MARKER_FILE {
                continue;
            }
            if entry.path().is_dir() {
                dirs.push(relative);
            } else {
                files.push(relative);
            }
        }
        SandboxState::new(root, files, dirs)
    }

    /// True iff `candidate`, fully resolved, is the root or lies below it.
    pub fn is_inside(&self, candidate: &Path) -> bool {
        let Ok(root) = path::canonicalize_lenient(self.root()) else {
            return false;
        };
        match path::canonicalize_lenient(candidate) {
            Ok(resolved) => path::is_within(&root, &resolved),
            Err(err) => {
                debug!(candidate = %candidate.display(), "unresolvable path: {err}");
                false
            }
        }
    }

    #[instrument(skip(self), fields(root = %self.root().display()))]
    pub fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(self.root()) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SandboxError::Io(err)),
        }
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Point-in-time record of which relative paths exist below a sandbox root.
///
/// Files and directories are disjoint sets; two states are compared by set
/// membership only, file contents are never looked at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SandboxState {
    root: PathBuf,
    files: BTreeSet<String>,
    dirs: BTreeSet<String>,
}

impl SandboxState {
    /// A path listed as both a file and a directory is kept as a directory.
    pub fn new<F, D>(root: impl Into<PathBuf>, files: F, dirs: D) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let dirs: BTreeSet<String> = dirs.into_iter().map(Into::into).collect();
        let files = files
            .into_iter()
            .map(Into::into)
            .filter(|file| !dirs.contains(file))
            .collect();
        Self {
            root: root.into(),
            files,
            dirs,
        }
    }

    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: BTreeSet::new(),
            dirs: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    pub fn dirs(&self) -> &BTreeSet<String> {
        &self.dirs
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.has_file(path) || self.has_dir(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    pub fn diff(&self, after: &SandboxState) -> StateDiff {
        StateDiff {
            created_files: after.files.difference(&self.files).cloned().collect(),
            removed_files: self.files.difference(&after.files).cloned().collect(),
            created_dirs: after.dirs.difference(&self.dirs).cloned().collect(),
            removed_dirs: self.dirs.difference(&after.dirs).cloned().collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StateDiff {
    pub created_files: Vec<String>,
    pub removed_files: Vec<String>,
    pub created_dirs: Vec<String>,
    pub removed_dirs: Vec<String>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.created_files.is_empty()
            && self.removed_files.is_empty()
            && self.created_dirs.is_empty()
            && self.removed_dirs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_files_and_dirs_disjoint() {
        let state = SandboxState::new("/sandbox", ["src", "README.md"], ["src"]);
        assert!(state.has_dir("src"));
        assert!(!state.has_file("src"));
        assert!(state.has_file("README.md"));
    }

    #[test]
    fn diff_reports_both_directions() {
        let before = SandboxState::new("/sandbox", ["app.py", "debug.log"], ["dist"]);
        let after = SandboxState::new("/sandbox", ["app.py", "main.py"], ["dist", "lib"]);
        let diff = before.diff(&after);
        assert_eq!(diff.created_files, vec!["main.py"]);
        assert_eq!(diff.removed_files, vec!["debug.log"]);
        assert_eq!(diff.created_dirs, vec!["lib"]);
        assert!(diff.removed_dirs.is_empty());
        assert!(before.diff(&before).is_empty());
    }
}

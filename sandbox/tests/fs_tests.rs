use std::fs;

use sandbox::{Layout, Sandbox, SandboxConfig, SandboxError, MARKER_FILE};
use tempfile::TempDir;

fn sandbox_in(temp: &TempDir) -> Sandbox {
    Sandbox::new(SandboxConfig::new(temp.path().join("sandbox")).unwrap())
}

fn project_layout() -> Layout {
    Layout::new()
        .with_dir("src")
        .with_file("src/main.py", "print('hello')\n")
        .with_file("README.md", "# demo\n")
        .with_dir("empty")
}

#[test]
fn relative_root_is_rejected() {
    let err = SandboxConfig::new("relative/root").unwrap_err();
    assert!(matches!(err, SandboxError::InvalidOperation(_)));
}

#[test]
fn reset_materializes_layout() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);

    let root = sandbox.reset(&project_layout()).unwrap();
    assert!(root.join(MARKER_FILE).is_file());
    assert_eq!(
        fs::read_to_string(root.join("src/main.py")).unwrap(),
        "print('hello')\n"
    );

    let state = sandbox.snapshot();
    assert!(state.has_file("src/main.py"));
    assert!(state.has_file("README.md"));
    assert!(state.has_dir("src"));
    assert!(state.has_dir("empty"));
    assert!(!state.contains(MARKER_FILE));
}

#[test]
fn reset_replaces_previous_contents() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);

    let root = sandbox.reset(&project_layout()).unwrap();
    fs::write(root.join("stray.txt"), "left over").unwrap();

    sandbox
        .reset(&Layout::new().with_file("only.txt", "one"))
        .unwrap();
    let state = sandbox.snapshot();
    assert_eq!(state.files().iter().collect::<Vec<_>>(), vec!["only.txt"]);
    assert!(state.dirs().is_empty());
}

#[test]
fn empty_layout_leaves_only_the_marker() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);

    let root = sandbox.reset(&Layout::new()).unwrap();
    assert!(root.join(MARKER_FILE).exists());
    assert!(sandbox.snapshot().is_empty());
}

#[test]
fn escaping_layout_fails_before_touching_disk() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);
    sandbox
        .reset(&Layout::new().with_file("keep.txt", "kept"))
        .unwrap();

    let err = sandbox
        .reset(&Layout::new().with_file("../evil.txt", "bad"))
        .unwrap_err();
    assert!(format!("{}", err).contains("path traversal"));
    assert!(!temp.path().join("evil.txt").exists());
    assert!(sandbox.snapshot().has_file("keep.txt"));

    let err = sandbox
        .reset(&Layout::new().with_file("/tmp/evil.txt", "bad"))
        .unwrap_err();
    assert!(matches!(err, SandboxError::OutsideRoot));
}

#[test]
fn oversized_layout_file_is_rejected() {
    let temp = TempDir::new().unwrap();
    let sandbox = Sandbox::new(
        SandboxConfig::new(temp.path().join("sandbox"))
            .unwrap()
            .with_max_file_size(4),
    );

    let err = sandbox
        .reset(&Layout::new().with_file("large.txt", "12345"))
        .unwrap_err();
    assert!(format!("{}", err).contains("file too large"));
}

#[test]
fn marker_collision_is_rejected() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);

    let err = sandbox
        .reset(&Layout::new().with_file(MARKER_FILE, "mine"))
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidOperation(_)));
}

#[test]
fn ensure_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);

    let first = sandbox.ensure().unwrap();
    fs::write(first.join("note.txt"), "x").unwrap();
    let second = sandbox.ensure().unwrap();
    assert_eq!(first, second);
    assert!(second.join("note.txt").exists());
}

#[test]
fn destroy_twice_is_fine() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);
    sandbox.reset(&project_layout()).unwrap();

    sandbox.destroy().unwrap();
    sandbox.destroy().unwrap();
    assert!(!sandbox.root().exists());
    assert!(sandbox.snapshot().is_empty());
}

#[test]
fn is_inside_uses_component_boundaries() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);
    let root = sandbox.reset(&project_layout()).unwrap();

    assert!(sandbox.is_inside(&root));
    assert!(sandbox.is_inside(&root.join("src")));
    assert!(sandbox.is_inside(&root.join("not-yet-created/deeper")));
    assert!(sandbox.is_inside(&root.join("src/../README.md")));

    let sibling = temp.path().join("sandbox-evil");
    fs::create_dir_all(&sibling).unwrap();
    assert!(!sandbox.is_inside(&sibling));
    assert!(!sandbox.is_inside(&root.join("..")));
    assert!(!sandbox.is_inside(&root.join("src/../../sandbox-evil")));
}

#[cfg(unix)]
#[test]
fn symlink_out_of_the_root_is_outside() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);
    let root = sandbox.reset(&Layout::new()).unwrap();

    let outside = temp.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

    assert!(!sandbox.is_inside(&root.join("link")));
    assert!(!sandbox.is_inside(&root.join("link/file.txt")));
}

#[cfg(unix)]
#[test]
fn snapshot_does_not_follow_symlinks() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox_in(&temp);
    let root = sandbox.reset(&Layout::new()).unwrap();

    let outside = temp.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    fs::write(outside.join("secret.txt"), "x").unwrap();
    std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

    let state = sandbox.snapshot();
    assert!(!state.contains("link/secret.txt"));
    assert!(state.files().is_disjoint(state.dirs()));
}

#[test]
fn session_roots_are_distinct() {
    let temp = TempDir::new().unwrap();
    let first = SandboxConfig::session(temp.path()).unwrap();
    let second = SandboxConfig::session(temp.path()).unwrap();
    assert_ne!(first.root, second.root);
    assert!(first.root.starts_with(temp.path()));
}

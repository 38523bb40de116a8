use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use sandbox::{RunConfig, Sandbox, SandboxConfig, SandboxRun};
use tempfile::{tempdir, TempDir};

pub fn temp_workspace() -> Result<TempDir> {
    Ok(tempdir()?)
}

pub fn system_path() -> String {
    env::var("PATH").unwrap_or_else(|_| {
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string()
    })
}

/// A sandbox rooted at `workspace/sandbox`, which does not exist yet.
pub fn sandbox_in(workspace: &Path) -> Result<Sandbox> {
    Ok(Sandbox::new(SandboxConfig::new(workspace.join("sandbox"))?))
}

pub fn runner(timeout: Duration) -> Result<SandboxRun> {
    let config = RunConfig::new(
        timeout,
        64 * 1024,
        [
            ("PATH".to_string(), system_path()),
            ("LANG".to_string(), "C".to_string()),
        ],
    )?;
    Ok(SandboxRun::new(config))
}

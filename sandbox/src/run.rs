use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::errors::{Result, SandboxError};
use crate::filter::{self, Admitted, Invocation, OperatorSet, Rejection};
use crate::fs::Sandbox;
use crate::path;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Clone, Debug)]
pub struct RunConfig {
    timeout: Duration,
    max_output_bytes: usize,
    fixed_env: HashMap<String, String>,
}

impl RunConfig {
    pub fn new(
        timeout: Duration,
        max_output_bytes: usize,
        fixed_env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        if timeout.is_zero() {
            return Err(SandboxError::InvalidOperation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if max_output_bytes == 0 {
            return Err(SandboxError::InvalidOperation(
                "max_output_bytes must be greater than zero".to_string(),
            ));
        }
        let fixed_env = fixed_env
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Ok(Self {
            timeout,
            max_output_bytes,
            fixed_env,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    pub fn fixed_env(&self) -> impl Iterator<Item = (&String, &String)> {
        self.fixed_env.iter()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            fixed_env: HashMap::from([
                ("PATH".to_string(), DEFAULT_PATH.to_string()),
                ("LANG".to_string(), "C".to_string()),
            ]),
        }
    }
}

/// Engine-level failures. These never come from a process's own stderr.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("Path '{0}' resolves outside the sandbox.")]
    OutsideSandbox(String),
    #[error("The working directory is outside the sandbox.")]
    WorkingDirOutside,
    #[error("The current directory no longer exists. Use 'cd' to return to the sandbox root.")]
    WorkingDirMissing,
    #[error("Cannot cd outside the sandbox.")]
    CdOutside,
    #[error("'cd -' is not supported in the sandbox.")]
    CdPrevious,
    #[error("cd: too many arguments")]
    CdTooManyArgs,
    #[error("cd: no such directory: {0}")]
    NoSuchDirectory(String),
    #[error("cd: not a directory: {0}")]
    NotADirectory(String),
    #[error("Command timed out ({}s limit).", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("Command '{0}' not found on this system.")]
    NotFound(String),
    #[error("Command produced more than {limit} bytes on {stream}.")]
    OutputTooLarge { stream: &'static str, limit: usize },
    #[error("Command was terminated by a signal.")]
    TerminatedBySignal,
    #[error("OS error: {0}")]
    Os(#[from] io::Error),
}

impl EngineError {
    pub fn return_code(&self) -> i32 {
        match self {
            EngineError::NotADirectory(_) => 2,
            EngineError::Timeout(_) => 124,
            EngineError::Os(_) => 126,
            EngineError::NotFound(_) => 127,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn engine_error(err: &EngineError) -> Self {
        Self {
            success: false,
            return_code: err.return_code(),
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SandboxRun {
    config: RunConfig,
}

impl SandboxRun {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs `raw` with `cwd` as the simulated working directory and returns
    /// the outcome together with the directory the learner ends up in.
    #[instrument(skip(self, sandbox, cwd, exempt), fields(cwd = %cwd.display()))]
    pub async fn execute(
        &self,
        sandbox: &Sandbox,
        raw: &str,
        cwd: &Path,
        exempt: &OperatorSet,
    ) -> (ExecutionResult, PathBuf) {
        let admitted = match filter::admit(raw, exempt) {
            Ok(admitted) => admitted,
            Err(rejection) => {
                debug!("rejected: {rejection}");
                let err = EngineError::from(rejection);
                return (ExecutionResult::engine_error(&err), cwd.to_path_buf());
            }
        };
        if !sandbox.is_inside(cwd) {
            warn!("working directory escaped the sandbox, returning to root");
            return (
                ExecutionResult::engine_error(&EngineError::WorkingDirOutside),
                sandbox.resolved_root(),
            );
        }

        match admitted {
            Admitted::Single(invocation) => self.run_single(sandbox, &invocation, cwd).await,
            Admitted::Chain(links) => self.run_chain(sandbox, &links, cwd).await,
        }
    }

    // Short-circuits like `&&`: the first failing link ends the chain.
    async fn run_chain(
        &self,
        sandbox: &Sandbox,
        links: &[Invocation],
        cwd: &Path,
    ) -> (ExecutionResult, PathBuf) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut cwd = cwd.to_path_buf();

        for link in links {
            let (result, next) = self.run_single(sandbox, link, &cwd).await;
            cwd = next;
            stdout.push_str(&result.stdout);
            stderr.push_str(&result.stderr);
            if !result.success {
                debug!(program = link.program(), "chain stopped at failing link");
                return (
                    ExecutionResult {
                        success: false,
                        stdout,
                        stderr,
                        return_code: result.return_code,
                        error: result.error,
                    },
                    cwd,
                );
            }
        }

        (
            ExecutionResult {
                success: true,
                stdout,
                stderr,
                return_code: 0,
                error: None,
            },
            cwd,
        )
    }

    async fn run_single(
        &self,
        sandbox: &Sandbox,
        invocation: &Invocation,
        cwd: &Path,
    ) -> (ExecutionResult, PathBuf) {
        let outcome = match invocation.program() {
            "cd" => return change_directory(sandbox, invocation.args(), cwd),
            "pwd" => Ok(print_working_directory(cwd)),
            _ => self.delegate(sandbox, invocation, cwd).await,
        };
        match outcome {
            Ok(result) => (result, cwd.to_path_buf()),
            Err(err) => (ExecutionResult::engine_error(&err), cwd.to_path_buf()),
        }
    }

    async fn delegate(
        &self,
        sandbox: &Sandbox,
        invocation: &Invocation,
        cwd: &Path,
    ) -> std::result::Result<ExecutionResult, EngineError> {
        let program = invocation.program();
        let args = rewrite_arguments(sandbox, program, invocation.args(), cwd)?;
        if !cwd.is_dir() {
            return Err(EngineError::WorkingDirMissing);
        }

        let mut command = Command::new(program);
        command.args(&args);
        command.current_dir(cwd);
        command.kill_on_drop(true);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.env_clear();
        for (key, value) in self.config.fixed_env() {
            command.env(key, value);
        }
        command.env("HOME", sandbox.resolved_root());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(program.to_string()))
            }
            Err(err) => return Err(EngineError::Os(err)),
        };

        let output = match timeout(self.config.timeout(), child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(EngineError::Timeout(self.config.timeout())),
        };

        let limit = self.config.max_output_bytes();
        if output.stdout.len() > limit {
            return Err(EngineError::OutputTooLarge {
                stream: "stdout",
                limit,
            });
        }
        if output.stderr.len() > limit {
            return Err(EngineError::OutputTooLarge {
                stream: "stderr",
                limit,
            });
        }
        let Some(return_code) = output.status.code() else {
            return Err(EngineError::TerminatedBySignal);
        };

        Ok(ExecutionResult {
            success: return_code == 0,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            return_code,
            error: None,
        })
    }
}

fn change_directory(sandbox: &Sandbox, args: &[String], cwd: &Path) -> (ExecutionResult, PathBuf) {
    let fail = |err: EngineError| (ExecutionResult::engine_error(&err), cwd.to_path_buf());

    let target = match args {
        [] => return (ExecutionResult::ok(""), sandbox.resolved_root()),
        [target] => target,
        _ => return fail(EngineError::CdTooManyArgs),
    };
    if target == "-" {
        return fail(EngineError::CdPrevious);
    }

    let Some(resolved) = resolve_inside(sandbox, target, cwd) else {
        return fail(EngineError::CdOutside);
    };
    if !resolved.exists() {
        return fail(EngineError::NoSuchDirectory(target.clone()));
    }
    if !resolved.is_dir() {
        return fail(EngineError::NotADirectory(target.clone()));
    }
    (ExecutionResult::ok(""), resolved)
}

fn print_working_directory(cwd: &Path) -> ExecutionResult {
    let shown = path::canonicalize_lenient(cwd).unwrap_or_else(|_| cwd.to_path_buf());
    ExecutionResult::ok(format!("{}\n", shown.display()))
}

fn resolve_inside(sandbox: &Sandbox, argument: &str, cwd: &Path) -> Option<PathBuf> {
    let resolved = path::canonicalize_lenient(&cwd.join(argument)).ok()?;
    if sandbox.is_inside(&resolved) {
        Some(resolved)
    } else {
        warn!(argument, "path argument escapes the sandbox");
        None
    }
}

/// Rewrites every path operand to an absolute, contained path. Options pass
/// through unchanged, but any path they carry is still checked.
fn rewrite_arguments(
    sandbox: &Sandbox,
    program: &str,
    args: &[String],
    cwd: &Path,
) -> std::result::Result<Vec<String>, EngineError> {
    let mut rewritten = Vec::with_capacity(args.len());
    let mut options_done = false;
    let mut pending: Option<ValueKind> = None;
    let mut operand_index = 0usize;

    for arg in args {
        match pending.take() {
            Some(ValueKind::Plain) => {
                rewritten.push(arg.clone());
                continue;
            }
            Some(ValueKind::Path) => {
                rewritten.push(contained(sandbox, arg, cwd)?);
                continue;
            }
            None => {}
        }
        let is_option = arg.starts_with('-') && !is_removal_mode(program, arg, operand_index);
        if !options_done && is_option {
            if arg == "--" {
                options_done = true;
            } else {
                pending = inspect_option(sandbox, program, arg, cwd)?;
            }
            rewritten.push(arg.clone());
            continue;
        }

        let is_text = is_text_operand(program, operand_index);
        operand_index += 1;
        if is_text {
            rewritten.push(arg.clone());
        } else {
            rewritten.push(contained(sandbox, arg, cwd)?);
        }
    }
    Ok(rewritten)
}

fn contained(
    sandbox: &Sandbox,
    arg: &str,
    cwd: &Path,
) -> std::result::Result<String, EngineError> {
    resolve_inside(sandbox, arg, cwd)
        .map(|resolved| resolved.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::OutsideSandbox(arg.to_string()))
}

/// What an option's value is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValueKind {
    Plain,
    Path,
}

/// Checks any value carried inside `option` and returns the kind of the
/// value held by the next argument, if the option takes one from there.
///
/// Short options are read the way getopt does: `-rt..` is `-r -t ..`, so
/// the value starts after the first option that takes one.
fn inspect_option(
    sandbox: &Sandbox,
    program: &str,
    option: &str,
    cwd: &Path,
) -> std::result::Result<Option<ValueKind>, EngineError> {
    if program == "echo" {
        return Ok(None);
    }
    if program == "find" {
        return Ok(FIND_PLAIN_VALUES
            .contains(&option)
            .then_some(ValueKind::Plain));
    }

    if let Some(long) = option.strip_prefix("--") {
        let (name, value) = match long.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (long, None),
        };
        let kind = long_value_options(program)
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, kind)| *kind);
        return match value {
            Some(value) if kind != Some(ValueKind::Plain) => {
                check_value(sandbox, option, value, cwd).map(|()| None)
            }
            Some(_) => Ok(None),
            None => Ok(kind),
        };
    }

    let cluster = &option[1..];
    let table = short_value_options(program);
    for (at, flag) in cluster.char_indices() {
        let Some(kind) = table
            .iter()
            .find(|(known, _)| *known == flag)
            .map(|(_, kind)| *kind)
        else {
            continue;
        };
        let rest = &cluster[at + flag.len_utf8()..];
        if rest.is_empty() {
            return Ok(Some(kind));
        }
        if kind == ValueKind::Path {
            check_value(sandbox, option, rest, cwd)?;
        }
        return Ok(None);
    }

    // Options this table does not know may still carry a path.
    if cluster.contains('/') || cluster.contains("..") {
        for (at, _) in cluster.char_indices() {
            check_value(sandbox, option, &cluster[at..], cwd)?;
        }
    }
    Ok(None)
}

fn check_value(
    sandbox: &Sandbox,
    option: &str,
    value: &str,
    cwd: &Path,
) -> std::result::Result<(), EngineError> {
    if value.is_empty() || resolve_inside(sandbox, value, cwd).is_some() {
        Ok(())
    } else {
        Err(EngineError::OutsideSandbox(option.to_string()))
    }
}

const FIND_PLAIN_VALUES: [&str; 13] = [
    "-name", "-iname", "-path", "-ipath", "-type", "-maxdepth", "-mindepth", "-size", "-mtime",
    "-mmin", "-perm", "-user", "-group",
];

/// Short options that take a value, per command.
fn short_value_options(program: &str) -> &'static [(char, ValueKind)] {
    use ValueKind::{Path, Plain};
    match program {
        "head" | "tail" => &[('n', Plain), ('c', Plain)],
        "sort" => &[
            ('k', Plain),
            ('t', Plain),
            ('S', Plain),
            ('o', Path),
            ('T', Path),
        ],
        "du" => &[('d', Plain), ('B', Plain), ('X', Path)],
        "mkdir" => &[('m', Plain)],
        "touch" => &[('d', Plain), ('t', Plain), ('r', Path)],
        "stat" => &[('c', Plain)],
        "ls" => &[('I', Plain), ('w', Plain), ('T', Plain)],
        "cp" | "mv" => &[('t', Path), ('S', Plain)],
        _ => &[],
    }
}

/// Long options that take a value, per command, without the leading `--`.
fn long_value_options(program: &str) -> &'static [(&'static str, ValueKind)] {
    use ValueKind::{Path, Plain};
    match program {
        "head" | "tail" => &[("lines", Plain), ("bytes", Plain)],
        "sort" => &[
            ("key", Plain),
            ("field-separator", Plain),
            ("buffer-size", Plain),
            ("output", Path),
            ("temporary-directory", Path),
        ],
        "du" => &[
            ("max-depth", Plain),
            ("block-size", Plain),
            ("exclude", Plain),
            ("exclude-from", Path),
        ],
        "mkdir" => &[("mode", Plain)],
        "touch" => &[("date", Plain), ("reference", Path)],
        "stat" => &[("format", Plain), ("printf", Plain)],
        "ls" => &[
            ("ignore", Plain),
            ("hide", Plain),
            ("width", Plain),
            ("tabsize", Plain),
        ],
        "cp" | "mv" => &[("target-directory", Path), ("suffix", Plain)],
        "chmod" => &[("reference", Path)],
        _ => &[],
    }
}

// `chmod -w file`: a symbolic mode that removes bits looks like an option.
fn is_removal_mode(program: &str, arg: &str, operand_index: usize) -> bool {
    program == "chmod"
        && operand_index == 0
        && arg.len() > 1
        && arg[1..].chars().all(|c| "rwxXst".contains(c))
}

/// Operands that are text rather than paths: everything `echo` prints and
/// the mode given to `chmod`.
fn is_text_operand(program: &str, operand_index: usize) -> bool {
    match program {
        "echo" => true,
        "chmod" => operand_index == 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_option_tables_are_per_command() {
        let value = |program: &str, flag: char| {
            short_value_options(program)
                .iter()
                .find(|(known, _)| *known == flag)
                .map(|(_, kind)| *kind)
        };
        assert_eq!(value("head", 'n'), Some(ValueKind::Plain));
        assert_eq!(value("sort", 'k'), Some(ValueKind::Plain));
        assert_eq!(value("sort", 'o'), Some(ValueKind::Path));
        assert_eq!(value("cp", 't'), Some(ValueKind::Path));
        assert_eq!(value("cp", 'r'), None);
        assert!(FIND_PLAIN_VALUES.contains(&"-name"));
    }

    #[test]
    fn chmod_removal_modes_are_operands() {
        assert!(is_removal_mode("chmod", "-w", 0));
        assert!(is_removal_mode("chmod", "-rwx", 0));
        assert!(!is_removal_mode("chmod", "-R", 0));
        assert!(!is_removal_mode("chmod", "-w", 1));
        assert!(!is_removal_mode("ls", "-x", 0));
    }

    #[test]
    fn text_operands() {
        assert!(is_text_operand("echo", 3));
        assert!(is_text_operand("chmod", 0));
        assert!(!is_text_operand("chmod", 1));
        assert!(!is_text_operand("cat", 0));
    }

    #[test]
    fn return_codes_distinguish_cd_failures() {
        assert_eq!(EngineError::NoSuchDirectory("x".into()).return_code(), 1);
        assert_eq!(EngineError::NotADirectory("x".into()).return_code(), 2);
        assert_eq!(
            EngineError::Timeout(Duration::from_secs(5)).return_code(),
            124
        );
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let message = EngineError::Timeout(Duration::from_secs(5)).to_string();
        assert_eq!(message, "Command timed out (5s limit).");
    }
}

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use sandbox::{
    Attempt, Challenge, Curriculum, ExecutionResult, Feedback, FeedbackKind, Phase, RunConfig,
    Sandbox, SandboxConfig, SandboxRun, StateDiff, Step, TeachSession,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{dispatcher, info, warn};
use tracing_subscriber::prelude::*;

const BUNDLED_CURRICULUM: &str = include_str!("../curriculum.json");

struct TeachConfig {
    root: PathBuf,
    max_file_size: u64,
    timeout: Duration,
    max_output_bytes: usize,
    path: String,
    curriculum: Option<PathBuf>,
    start_lesson: usize,
}

impl TeachConfig {
    fn from_env() -> anyhow::Result<Self> {
        let root = match std::env::var("SANDBOX_ROOT") {
            Ok(value) if !value.trim().is_empty() => absolute(PathBuf::from(value))?,
            _ => default_root()?,
        };
        let max_file_size = std::env::var("SANDBOX_MAX_FILE_SIZE")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(512 * 1024);
        let timeout_ms = std::env::var("SANDBOX_RUN_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(5_000);
        let max_output_bytes = std::env::var("SANDBOX_RUN_MAX_OUTPUT_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|bytes| *bytes > 0)
            .unwrap_or(256 * 1024);
        let path = std::env::var("SANDBOX_RUN_PATH")
            .unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string());
        let curriculum = std::env::var("TEACH_CURRICULUM").ok().map(PathBuf::from);
        let start_lesson = std::env::var("TEACH_START_LESSON")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        Ok(Self {
            root,
            max_file_size,
            timeout: Duration::from_millis(timeout_ms),
            max_output_bytes,
            path,
            curriculum,
            start_lesson,
        })
    }
}

fn default_root() -> anyhow::Result<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => absolute(PathBuf::from(home).join("shellguide_sandbox")),
        _ => absolute(PathBuf::from("data").join("sandbox")),
    }
}

fn absolute(path: PathBuf) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    Ok(cwd.join(path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = TeachConfig::from_env()?;
    let curriculum = load_curriculum(&config)?;
    let sandbox = Sandbox::new(
        SandboxConfig::new(&config.root)?.with_max_file_size(config.max_file_size),
    );
    let runner = SandboxRun::new(RunConfig::new(
        config.timeout,
        config.max_output_bytes,
        [
            ("PATH".to_string(), config.path.clone()),
            ("LANG".to_string(), "C".to_string()),
        ],
    )?);

    info!(root = %config.root.display(), lessons = curriculum.len(), "teach mode starting");
    let mut session = TeachSession::new(sandbox, runner, curriculum, config.start_lesson)?;
    let outcome = drive(&mut session).await;
    if let Err(err) = session.close() {
        warn!("failed to remove sandbox: {err}");
    }
    outcome
}

fn init_tracing() -> anyhow::Result<()> {
    if dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

fn load_curriculum(config: &TeachConfig) -> anyhow::Result<Curriculum> {
    let curriculum = match &config.curriculum {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read curriculum {}", path.display()))?;
            Curriculum::from_json(&raw)
                .with_context(|| format!("invalid curriculum {}", path.display()))?
        }
        None => Curriculum::from_json(BUNDLED_CURRICULUM).context("bundled curriculum")?,
    };
    Ok(curriculum)
}

async fn drive(session: &mut TeachSession) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_lesson_header(session);
    print_challenge(session);
    print_prompt(session);

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            ":quit" | ":q" => break,
            ":cheat" => {
                print_cheat_sheet(session);
                print_prompt(session);
                continue;
            }
            _ => {}
        }

        let current = session.challenge().clone();
        match session.submit(input).await? {
            Step::Ignored => {}
            Step::Attempted(attempt) => print_attempt(session, &current, &attempt),
            Step::LessonStarted { skipped, .. } => {
                for title in skipped {
                    println!("Skipping '{title}': its prerequisite lesson is not complete.");
                }
                print_lesson_header(session);
                print_challenge(session);
            }
            Step::Finished => {
                println!("\nYou finished every lesson. Type :cheat to review what you learned.");
                break;
            }
        }
        if session.phase() == Phase::Finished {
            break;
        }
        print_prompt(session);
    }
    Ok(())
}

fn print_attempt(session: &TeachSession, solved: &Challenge, attempt: &Attempt) {
    print_output(&attempt.result);
    print_changes(&attempt.changes);
    print_feedback(&attempt.feedback);
    if attempt.feedback.passes() {
        for line in solution_lines(solved) {
            println!("    {line}");
        }
    }

    match session.phase() {
        Phase::LessonComplete => {
            let (solved, total) = session.progress();
            println!(
                "\nLesson '{}' complete ({solved}/{total}). Press Enter to continue.",
                session.lesson().title
            );
        }
        Phase::Active if attempt.feedback.passes() => print_challenge(session),
        Phase::Active => println!("Hint: {}", session.challenge().hint),
        Phase::Finished => {}
    }
}

fn print_output(result: &ExecutionResult) {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
        if !result.stdout.ends_with('\n') {
            println!();
        }
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
        if !result.stderr.ends_with('\n') {
            eprintln!();
        }
    }
    if let Some(error) = &result.error {
        println!("{error}");
    }
}

fn print_changes(changes: &StateDiff) {
    let lines = [
        ("created", &changes.created_dirs, "/"),
        ("created", &changes.created_files, ""),
        ("removed", &changes.removed_dirs, "/"),
        ("removed", &changes.removed_files, ""),
    ];
    for (verb, paths, suffix) in lines {
        for path in paths {
            println!("  {verb} {path}{suffix}");
        }
    }
}

fn print_feedback(feedback: &Feedback) {
    let marker = match feedback.kind {
        FeedbackKind::Correct => "+",
        FeedbackKind::Acceptable => "~",
        FeedbackKind::Incorrect => "x",
    };
    println!("[{marker}] {}", feedback.message);
    if let Some(effect) = &feedback.attempted_effect {
        println!("    {effect}");
    }
    if let Some(suggestion) = &feedback.suggestion {
        println!("    {suggestion}");
    }
    if let Some(explanation) = &feedback.explanation {
        println!("    {explanation}");
    }
}

fn print_lesson_header(session: &TeachSession) {
    let lesson = session.lesson();
    println!(
        "\n== Lesson {}/{}: {} ==",
        session.lesson_index() + 1,
        session.curriculum().len(),
        lesson.title
    );
    println!("{}", lesson.description);
}

fn print_challenge(session: &TeachSession) {
    let challenge = session.challenge();
    let (solved, total) = session.progress();
    println!("\nChallenge {}/{total}: {}", solved + 1, challenge.prompt);
    if let Some(teaching) = &challenge.teaching {
        println!("  {teaching}");
    }
}

// Shown only once the challenge is solved, since both give the answer away.
fn solution_lines(challenge: &Challenge) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(expected) = &challenge.expected_display {
        lines.push(format!("Answer: {expected}"));
    }
    if let Some(gui) = &challenge.gui_equivalent {
        lines.push(format!("In a file manager: {gui}"));
    }
    lines
}

fn print_prompt(session: &TeachSession) {
    if session.phase() == Phase::Active {
        print!("{}$ ", session.relative_cwd());
        let _ = std::io::stdout().flush();
    }
}

fn print_cheat_sheet(session: &TeachSession) {
    let sheet = session.cheat_sheet();
    if sheet.is_empty() {
        println!("Your cheat sheet is empty. Solve a challenge to add to it.");
        return;
    }
    for (category, entries) in sheet.by_category() {
        println!("\n{category}");
        for entry in entries {
            println!("  {:<32} {}", entry.command, entry.description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_curriculum_is_valid() {
        let curriculum = Curriculum::from_json(BUNDLED_CURRICULUM).unwrap();
        assert!(curriculum.len() >= 8);
        assert!(curriculum
            .lessons()
            .iter()
            .flat_map(|lesson| &lesson.challenges)
            .all(|challenge| challenge.expected_display.is_some()));
    }

    #[test]
    fn solution_lines_carry_answer_and_file_manager_hint() {
        let curriculum = Curriculum::from_json(BUNDLED_CURRICULUM).unwrap();
        let challenge = curriculum
            .lessons()
            .iter()
            .flat_map(|lesson| &lesson.challenges)
            .find(|challenge| challenge.gui_equivalent.is_some())
            .unwrap();

        let lines = solution_lines(challenge);
        assert_eq!(
            lines[0],
            format!("Answer: {}", challenge.expected_display.as_deref().unwrap())
        );
        assert_eq!(
            lines[1],
            format!(
                "In a file manager: {}",
                challenge.gui_equivalent.as_deref().unwrap()
            )
        );
    }
}

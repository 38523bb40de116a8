use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::challenge::{Challenge, Curriculum, Lesson};
use crate::cheat_sheet::{CheatSheet, CheatSheetEntry};
use crate::errors::{Result, SandboxError};
use crate::fs::Sandbox;
use crate::run::{ExecutionResult, SandboxRun};
use crate::state::StateDiff;
use crate::validate::Feedback;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Active,
    LessonComplete,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    Stay,
    NextChallenge,
    LessonComplete,
}

#[derive(Clone, Debug)]
pub struct Attempt {
    pub result: ExecutionResult,
    pub feedback: Feedback,
    pub changes: StateDiff,
    pub advance: Advance,
}

#[derive(Clone, Debug)]
pub enum Step {
    Ignored,
    Attempted(Attempt),
    /// Holds the index of the lesson now running and the titles of gated
    /// lessons that were passed over on the way.
    LessonStarted { lesson: usize, skipped: Vec<String> },
    Finished,
}

/// Drives one learner through a curriculum against a private sandbox.
pub struct TeachSession {
    sandbox: Sandbox,
    runner: SandboxRun,
    curriculum: Curriculum,
    lesson_index: usize,
    challenge_index: usize,
    cwd: PathBuf,
    hint_revealed: bool,
    phase: Phase,
    completed: HashSet<String>,
    cheat_sheet: CheatSheet,
}

impl TeachSession {
    pub fn new(
        sandbox: Sandbox,
        runner: SandboxRun,
        curriculum: Curriculum,
        start_lesson: usize,
    ) -> Result<Self> {
        if start_lesson >= curriculum.len() {
            return Err(SandboxError::InvalidOperation(format!(
                "start lesson {start_lesson} is out of range (curriculum has {} lessons)",
                curriculum.len()
            )));
        }
        let cwd = sandbox.resolved_root();
        let mut session = Self {
            sandbox,
            runner,
            curriculum,
            lesson_index: start_lesson,
            challenge_index: 0,
            cwd,
            hint_revealed: false,
            phase: Phase::Active,
            completed: HashSet::new(),
            cheat_sheet: CheatSheet::new(),
        };
        session.start_challenge()?;
        Ok(session)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn lesson_index(&self) -> usize {
        self.lesson_index
    }

    pub fn challenge_index(&self) -> usize {
        self.challenge_index
    }

    pub fn lesson(&self) -> &Lesson {
        &self.curriculum.lessons()[self.lesson_index]
    }

    pub fn challenge(&self) -> &Challenge {
        &self.lesson().challenges[self.challenge_index]
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn hint_revealed(&self) -> bool {
        self.hint_revealed
    }

    pub fn cheat_sheet(&self) -> &CheatSheet {
        &self.cheat_sheet
    }

    pub fn is_completed(&self, lesson_id: &str) -> bool {
        self.completed.contains(lesson_id)
    }

    /// `(solved, total)` challenge counts for the current lesson.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.lesson().challenges.len();
        let solved = match self.phase {
            Phase::Active => self.challenge_index,
            Phase::LessonComplete | Phase::Finished => total,
        };
        (solved, total)
    }

    /// Prompt-style location such as `~/shellguide_sandbox/docs`.
    pub fn relative_cwd(&self) -> String {
        let root = self.sandbox.resolved_root();
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.cwd.strip_prefix(&root) {
            Ok(rest) if rest.as_os_str().is_empty() => format!("~/{name}"),
            Ok(rest) => format!("~/{name}/{}", rest.display()),
            Err(_) => self.cwd.display().to_string(),
        }
    }

    #[instrument(skip(self), fields(lesson = self.lesson_index, challenge = self.challenge_index))]
    pub async fn submit(&mut self, raw: &str) -> Result<Step> {
        match self.phase {
            Phase::Finished => Ok(Step::Finished),
            Phase::LessonComplete => self.next_lesson(),
            Phase::Active if raw.trim().is_empty() => Ok(Step::Ignored),
            Phase::Active => self.attempt(raw).await.map(Step::Attempted),
        }
    }

    async fn attempt(&mut self, raw: &str) -> Result<Attempt> {
        let before = self.sandbox.snapshot();
        let exempt = self.challenge().allowed_operators.clone();
        let (result, cwd) = self
            .runner
            .execute(&self.sandbox, raw, &self.cwd, &exempt)
            .await;
        self.cwd = cwd;
        let after = self.sandbox.snapshot();
        let feedback = self.challenge().validate(raw, &before, &after);
        let changes = before.diff(&after);

        if !feedback.passes() {
            debug!("incorrect attempt");
            self.hint_revealed = true;
            return Ok(Attempt {
                result,
                feedback,
                changes,
                advance: Advance::Stay,
            });
        }

        self.record_mastered();
        let advance = self.advance_challenge()?;
        Ok(Attempt {
            result,
            feedback,
            changes,
            advance,
        })
    }

    fn record_mastered(&mut self) {
        let lesson = self.lesson();
        let Some(mastered) = &self.challenge().mastered else {
            return;
        };
        let entry = CheatSheetEntry {
            command: mastered.command.clone(),
            description: mastered.description.clone(),
            lesson_id: lesson.id.clone(),
            category: lesson.title.clone(),
        };
        self.cheat_sheet.add(entry);
    }

    fn advance_challenge(&mut self) -> Result<Advance> {
        if self.challenge_index + 1 < self.lesson().challenges.len() {
            self.challenge_index += 1;
            self.start_challenge()?;
            return Ok(Advance::NextChallenge);
        }
        let lesson_id = self.lesson().id.clone();
        info!(lesson = %lesson_id, "lesson complete");
        self.completed.insert(lesson_id);
        self.phase = Phase::LessonComplete;
        Ok(Advance::LessonComplete)
    }

    /// Moves past a completed lesson, skipping any whose prerequisite has not
    /// been completed in this session.
    pub fn next_lesson(&mut self) -> Result<Step> {
        if self.phase == Phase::Finished {
            return Ok(Step::Finished);
        }
        let mut skipped = Vec::new();
        let mut next = self.lesson_index + 1;
        while let Some(lesson) = self.curriculum.lesson(next) {
            match &lesson.requires {
                Some(required) if !self.completed.contains(required) => {
                    info!(lesson = %lesson.id, requires = %required, "skipping gated lesson");
                    skipped.push(lesson.title.clone());
                    next += 1;
                }
                _ => break,
            }
        }

        if next >= self.curriculum.len() {
            info!("curriculum finished");
            self.phase = Phase::Finished;
            self.sandbox.destroy()?;
            return Ok(Step::Finished);
        }

        self.lesson_index = next;
        self.challenge_index = 0;
        self.start_challenge()?;
        Ok(Step::LessonStarted {
            lesson: next,
            skipped,
        })
    }

    pub fn close(&mut self) -> Result<()> {
        self.phase = Phase::Finished;
        self.sandbox.destroy()
    }

    fn start_challenge(&mut self) -> Result<()> {
        let layout = self.challenge().layout.clone();
        self.cwd = self.sandbox.reset(&layout)?;
        self.hint_revealed = false;
        self.phase = Phase::Active;
        info!(challenge = %self.challenge().id, "challenge started");
        Ok(())
    }
}

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SandboxError};
use crate::filter::{Operator, OperatorSet};
use crate::fs::Layout;
use crate::state::SandboxState;
use crate::validate::{Feedback, Validator};

const MIN_DIFFICULTY: u8 = 1;
const MAX_DIFFICULTY: u8 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteredCommand {
    pub command: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub prompt: String,
    pub hint: String,
    #[serde(default)]
    pub layout: Layout,
    pub validator: Validator,
    #[serde(default)]
    pub teaching: Option<String>,
    #[serde(default)]
    pub expected_display: Option<String>,
    #[serde(default)]
    pub gui_equivalent: Option<String>,
    #[serde(default)]
    pub mastered: Option<MasteredCommand>,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    #[serde(default)]
    pub allowed_operators: OperatorSet,
}

impl Challenge {
    pub fn validate(&self, raw: &str, before: &SandboxState, after: &SandboxState) -> Feedback {
        self.validator.evaluate(raw, before, after)
    }
}

fn default_difficulty() -> u8 {
    MIN_DIFFICULTY
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub description: String,
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub requires: Option<String>,
}

/// The ordered set of lessons a session walks through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curriculum {
    lessons: Vec<Lesson>,
}

impl Curriculum {
    pub fn new(lessons: Vec<Lesson>) -> Result<Self> {
        let curriculum = Self { lessons };
        curriculum.check()?;
        Ok(curriculum)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let curriculum: Curriculum = serde_json::from_str(raw)?;
        curriculum.check()?;
        Ok(curriculum)
    }

    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    pub fn lesson(&self, index: usize) -> Option<&Lesson> {
        self.lessons.get(index)
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    pub fn position(&self, lesson_id: &str) -> Option<usize> {
        self.lessons.iter().position(|lesson| lesson.id == lesson_id)
    }

    fn check(&self) -> Result<()> {
        if self.lessons.is_empty() {
            return Err(invalid("curriculum has no lessons".to_string()));
        }

        let mut lesson_ids = HashSet::new();
        let mut challenge_ids = HashSet::new();
        for lesson in &self.lessons {
            if let Some(required) = &lesson.requires {
                if !lesson_ids.contains(required.as_str()) {
                    return Err(invalid(format!(
                        "lesson '{}' requires '{required}', which is not an earlier lesson",
                        lesson.id
                    )));
                }
            }
            if !lesson_ids.insert(lesson.id.as_str()) {
                return Err(invalid(format!("duplicate lesson id '{}'", lesson.id)));
            }
            if lesson.challenges.is_empty() {
                return Err(invalid(format!("lesson '{}' has no challenges", lesson.id)));
            }

            for challenge in &lesson.challenges {
                if !challenge_ids.insert(challenge.id.as_str()) {
                    return Err(invalid(format!("duplicate challenge id '{}'", challenge.id)));
                }
                if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&challenge.difficulty) {
                    return Err(invalid(format!(
                        "challenge '{}' has difficulty {} outside {MIN_DIFFICULTY}..={MAX_DIFFICULTY}",
                        challenge.id, challenge.difficulty
                    )));
                }
                if let Some(op) = challenge
                    .allowed_operators
                    .iter()
                    .find(|op| **op != Operator::And)
                {
                    return Err(invalid(format!(
                        "challenge '{}' may only allow '&&', not '{op}'",
                        challenge.id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> SandboxError {
    SandboxError::InvalidCurriculum(message)
}

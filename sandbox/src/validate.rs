//! Declarative challenge rules and the verdicts they produce.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::SandboxState;

const CORRECT: &str = "Correct!";
const INCORRECT: &str = "Not quite. Try again!";
const MISTAKE: &str = "Not quite right.";
const NO_EFFECT: &str = "That didn't have the expected effect. Try again!";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Correct,
    Acceptable,
    Incorrect,
}

impl FeedbackKind {
    /// Both correct and acceptable verdicts complete the challenge.
    pub fn passes(self) -> bool {
        !matches!(self, FeedbackKind::Incorrect)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Feedback {
    pub kind: FeedbackKind,
    pub message: String,
    pub explanation: Option<String>,
    pub attempted_effect: Option<String>,
    pub suggestion: Option<String>,
}

impl Feedback {
    fn new(kind: FeedbackKind, message: impl Into<String>, explanation: &str) -> Self {
        Self {
            kind,
            message: message.into(),
            explanation: non_empty(explanation),
            attempted_effect: None,
            suggestion: None,
        }
    }

    pub fn correct(explanation: &str) -> Self {
        Self::new(FeedbackKind::Correct, CORRECT, explanation)
    }

    pub fn acceptable(warning: &str, explanation: &str) -> Self {
        Self::new(FeedbackKind::Acceptable, warning, explanation)
    }

    pub fn incorrect(message: &str) -> Self {
        Self::new(FeedbackKind::Incorrect, message, "")
    }

    pub fn passes(&self) -> bool {
        self.kind.passes()
    }
}

/// What a specific wrong command would actually have done.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mistake {
    pub attempted_effect: String,
    pub suggestion: String,
}

/// Filesystem predicate over the states before and after a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Effect {
    Always,
    FileExists { path: String },
    FileAbsent { path: String },
    DirExists { path: String },
    DirAbsent { path: String },
    FileCreated { path: String },
    DirCreated { path: String },
    FileRemoved { path: String },
    DirRemoved { path: String },
    All { checks: Vec<Effect> },
}

impl Effect {
    pub fn holds(&self, before: &SandboxState, after: &SandboxState) -> bool {
        match self {
            Effect::Always => true,
            Effect::FileExists { path } => after.has_file(path),
            Effect::FileAbsent { path } => !after.has_file(path),
            Effect::DirExists { path } => after.has_dir(path),
            Effect::DirAbsent { path } => !after.has_dir(path),
            Effect::FileCreated { path } => !before.has_file(path) && after.has_file(path),
            Effect::DirCreated { path } => !before.has_dir(path) && after.has_dir(path),
            Effect::FileRemoved { path } => before.has_file(path) && !after.has_file(path),
            Effect::DirRemoved { path } => before.has_dir(path) && !after.has_dir(path),
            Effect::All { checks } => checks.iter().all(|check| check.holds(before, after)),
        }
    }
}

/// One rule per challenge. Text rules compare normalized commands; the
/// effect rule ignores the text and looks only at the sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    Exact {
        expected: String,
        #[serde(default)]
        explanation: String,
    },
    AnyOf {
        accepted: Vec<String>,
        #[serde(default)]
        explanation: String,
    },
    WithWarnings {
        accepted: Vec<String>,
        #[serde(default)]
        warned: BTreeMap<String, String>,
        #[serde(default)]
        explanation: String,
    },
    Effect {
        effect: Effect,
        #[serde(default)]
        explanation: String,
        #[serde(default)]
        success_message: Option<String>,
    },
    StartsWith {
        command: String,
        #[serde(default)]
        explanation: String,
    },
    CommonMistakes {
        accepted: Vec<String>,
        #[serde(default)]
        warned: BTreeMap<String, String>,
        mistakes: BTreeMap<String, Mistake>,
        #[serde(default)]
        explanation: String,
    },
}

impl Validator {
    pub fn evaluate(&self, raw: &str, before: &SandboxState, after: &SandboxState) -> Feedback {
        let command = normalize(raw);
        match self {
            Validator::Exact {
                expected,
                explanation,
            } => {
                if command == normalize(expected) {
                    Feedback::correct(explanation)
                } else {
                    Feedback::incorrect(INCORRECT)
                }
            }
            Validator::AnyOf {
                accepted,
                explanation,
            } => {
                if matches_any(&command, accepted) {
                    Feedback::correct(explanation)
                } else {
                    Feedback::incorrect(INCORRECT)
                }
            }
            Validator::WithWarnings {
                accepted,
                warned,
                explanation,
            } => {
                if matches_any(&command, accepted) {
                    Feedback::correct(explanation)
                } else if let Some(warning) = lookup(&command, warned) {
                    Feedback::acceptable(warning, explanation)
                } else {
                    Feedback::incorrect(INCORRECT)
                }
            }
            Validator::Effect {
                effect,
                explanation,
                success_message,
            } => {
                if effect.holds(before, after) {
                    let message = success_message.as_deref().unwrap_or(CORRECT);
                    Feedback::new(FeedbackKind::Correct, message, explanation)
                } else {
                    Feedback::incorrect(NO_EFFECT)
                }
            }
            Validator::StartsWith {
                command: prefix,
                explanation,
            } => {
                let prefix = normalize(prefix);
                let mut given = command.split(' ');
                let matched =
                    !prefix.is_empty() && prefix.split(' ').all(|token| given.next() == Some(token));
                if matched {
                    Feedback::correct(explanation)
                } else {
                    Feedback::incorrect(INCORRECT)
                }
            }
            Validator::CommonMistakes {
                accepted,
                warned,
                mistakes,
                explanation,
            } => {
                if matches_any(&command, accepted) {
                    Feedback::correct(explanation)
                } else if let Some(warning) = lookup(&command, warned) {
                    Feedback::acceptable(warning, explanation)
                } else if let Some(mistake) = lookup(&command, mistakes) {
                    Feedback {
                        attempted_effect: non_empty(&mistake.attempted_effect),
                        suggestion: non_empty(&mistake.suggestion),
                        ..Feedback::incorrect(MISTAKE)
                    }
                } else {
                    Feedback::incorrect(INCORRECT)
                }
            }
        }
    }
}

/// Canonical form used to compare commands: whitespace collapsed, and for
/// every argument a trailing `/` and a leading `./` removed. For commands
/// that default to the current directory a final lone `.` is dropped, so
/// `ls -l .` and `ls -l` compare equal while `cp a.txt .` keeps its target.
const DEFAULTS_TO_CWD: [&str; 3] = ["ls", "find", "du"];

pub fn normalize(command: &str) -> String {
    let mut tokens = command.split_whitespace();
    let Some(program) = tokens.next() else {
        return String::new();
    };

    let mut normalized = vec![program.to_string()];
    for token in tokens {
        let token = match token.strip_suffix('/') {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => token,
        };
        let token = match token.strip_prefix("./") {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => token,
        };
        normalized.push(token.to_string());
    }
    if DEFAULTS_TO_CWD.contains(&program)
        && normalized.len() > 1
        && normalized.last().map(String::as_str) == Some(".")
    {
        normalized.pop();
    }
    normalized.join(" ")
}

/// True when both commands normalize to the same text.
pub fn equivalent(lhs: &str, rhs: &str) -> bool {
    normalize(lhs) == normalize(rhs)
}

fn matches_any(command: &str, accepted: &[String]) -> bool {
    accepted.iter().any(|candidate| normalize(candidate) == command)
}

fn lookup<'a, V>(command: &str, table: &'a BTreeMap<String, V>) -> Option<&'a V> {
    table
        .iter()
        .find(|(candidate, _)| normalize(candidate) == command)
        .map(|(_, value)| value)
}

fn non_empty(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(files: &[&str], dirs: &[&str]) -> SandboxState {
        SandboxState::new("/sandbox", files.iter().copied(), dirs.iter().copied())
    }

    #[test]
    fn normalization_collapses_and_strips() {
        assert_eq!(normalize("  ls   -l   . "), "ls -l");
        assert_eq!(normalize("ls -l ."), "ls -l");
        assert_eq!(normalize("ls -l"), "ls -l");
        assert_eq!(normalize("cp config.yml ./backup/"), "cp config.yml backup");
        assert_eq!(normalize("cd ./"), "cd .");
        assert_eq!(normalize("find ."), "find");
        assert_eq!(normalize("du -sh ."), "du -sh");
        assert_eq!(normalize("cd /"), "cd /");
        assert_eq!(normalize("find . -name x"), "find . -name x");
        assert!(equivalent("mv  ./a.txt b/", "mv a.txt b"));
    }

    #[test]
    fn copy_targets_keep_the_current_directory() {
        assert_eq!(normalize("cp a.txt ."), "cp a.txt .");
        assert_eq!(normalize("mv ../x ./"), "mv ../x .");
        assert!(!equivalent("cp a.txt .", "cp a.txt"));

        let validator = Validator::Exact {
            expected: "cp a.txt .".to_string(),
            explanation: String::new(),
        };
        let empty = state(&[], &[]);
        assert_eq!(
            validator.evaluate("cp a.txt", &empty, &empty).kind,
            FeedbackKind::Incorrect
        );
    }

    #[test]
    fn any_of_accepts_variants() {
        let validator = Validator::AnyOf {
            accepted: vec!["ls -l".to_string(), "ls -l .".to_string()],
            explanation: String::new(),
        };
        let empty = state(&[], &[]);
        for input in ["ls   -l   .", "ls -l .", "ls -l"] {
            assert_eq!(
                validator.evaluate(input, &empty, &empty).kind,
                FeedbackKind::Correct
            );
        }
        assert_eq!(
            validator.evaluate("ls -a", &empty, &empty).kind,
            FeedbackKind::Incorrect
        );
    }

    #[test]
    fn warnings_are_acceptable() {
        let validator = Validator::WithWarnings {
            accepted: vec!["rm -r old_logs".to_string()],
            warned: BTreeMap::from([(
                "rm -rf old_logs".to_string(),
                "-f silences every prompt.".to_string(),
            )]),
            explanation: "gone".to_string(),
        };
        let empty = state(&[], &[]);
        let feedback = validator.evaluate("rm -rf old_logs/", &empty, &empty);
        assert_eq!(feedback.kind, FeedbackKind::Acceptable);
        assert_eq!(feedback.message, "-f silences every prompt.");
        assert!(feedback.passes());
        assert_eq!(feedback.explanation.as_deref(), Some("gone"));
    }

    #[test]
    fn starts_with_compares_whole_tokens() {
        let validator = Validator::StartsWith {
            command: "find".to_string(),
            explanation: String::new(),
        };
        let empty = state(&[], &[]);
        assert!(validator.evaluate("find . -type f", &empty, &empty).passes());
        assert!(validator.evaluate("find", &empty, &empty).passes());
        assert!(!validator.evaluate("finder .", &empty, &empty).passes());
        assert!(!validator.evaluate("ls find", &empty, &empty).passes());
    }

    #[test]
    fn effect_checks_creation_not_presence() {
        let validator = Validator::Effect {
            effect: Effect::FileCreated {
                path: "index.html".to_string(),
            },
            explanation: String::new(),
            success_message: Some("Created!".to_string()),
        };
        let before = state(&[], &[]);
        let after = state(&["index.html"], &[]);
        let feedback = validator.evaluate("anything at all", &before, &after);
        assert_eq!(feedback.kind, FeedbackKind::Correct);
        assert_eq!(feedback.message, "Created!");
        assert_eq!(
            validator.evaluate("touch index.html", &after, &after).kind,
            FeedbackKind::Incorrect
        );
    }

    #[test]
    fn effect_conjunction() {
        let effect = Effect::All {
            checks: vec![
                Effect::FileExists {
                    path: "config.json".to_string(),
                },
                Effect::FileRemoved {
                    path: "old_config.json".to_string(),
                },
            ],
        };
        let before = state(&["old_config.json"], &[]);
        let renamed = state(&["config.json"], &[]);
        let copied = state(&["config.json", "old_config.json"], &[]);
        assert!(effect.holds(&before, &renamed));
        assert!(!effect.holds(&before, &copied));
    }

    #[test]
    fn common_mistake_carries_suggestion() {
        let validator = Validator::CommonMistakes {
            accepted: vec!["cp -r src dst".to_string()],
            warned: BTreeMap::new(),
            mistakes: BTreeMap::from([(
                "cp src dst".to_string(),
                Mistake {
                    attempted_effect: "cp skips directories without -r.".to_string(),
                    suggestion: "cp -r src dst".to_string(),
                },
            )]),
            explanation: String::new(),
        };
        let with_src = state(&[], &["src"]);
        let feedback = validator.evaluate("cp src dst", &with_src, &with_src);
        assert_eq!(feedback.kind, FeedbackKind::Incorrect);
        assert_eq!(feedback.suggestion.as_deref(), Some("cp -r src dst"));
        assert!(feedback.attempted_effect.is_some());

        let unknown = validator.evaluate("mv src dst", &with_src, &with_src);
        assert_eq!(unknown.kind, FeedbackKind::Incorrect);
        assert!(unknown.suggestion.is_none());
    }

    #[test]
    fn validators_deserialize_from_tagged_json() {
        let validator: Validator = serde_json::from_str(
            r#"{"kind": "effect", "effect": {"check": "dir_created", "path": "css"}}"#,
        )
        .unwrap();
        assert_eq!(
            validator,
            Validator::Effect {
                effect: Effect::DirCreated {
                    path: "css".to_string()
                },
                explanation: String::new(),
                success_message: None,
            }
        );
    }
}

//! Admissibility checks applied to raw learner input before anything runs.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Commands the sandbox will run at all.
pub const ALLOWED_COMMANDS: [&str; 19] = [
    "cat", "cd", "chmod", "cp", "du", "echo", "find", "head", "ls", "mkdir", "mv", "pwd", "rm",
    "rmdir", "sort", "stat", "tail", "touch", "wc",
];

/// Blocked operators, longest spelling first so `||` is reported before `|`.
pub const BLOCKED_OPERATORS: [Operator; 10] = [
    Operator::Or,
    Operator::And,
    Operator::Append,
    Operator::Heredoc,
    Operator::CommandSubstitution,
    Operator::Pipe,
    Operator::Semicolon,
    Operator::RedirectOut,
    Operator::RedirectIn,
    Operator::Backtick,
];

const FORBIDDEN_FIND_ACTIONS: [&str; 4] = ["-exec", "-execdir", "-ok", "-okdir"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "|")]
    Pipe,
    #[serde(rename = ";")]
    Semicolon,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
    #[serde(rename = ">")]
    RedirectOut,
    #[serde(rename = ">>")]
    Append,
    #[serde(rename = "<")]
    RedirectIn,
    #[serde(rename = "<<")]
    Heredoc,
    #[serde(rename = "`")]
    Backtick,
    #[serde(rename = "$(")]
    CommandSubstitution,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::Semicolon => ";",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::RedirectOut => ">",
            Operator::Append => ">>",
            Operator::RedirectIn => "<",
            Operator::Heredoc => "<<",
            Operator::Backtick => "`",
            Operator::CommandSubstitution => "$(",
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operators a challenge exempts from the block list.
pub type OperatorSet = BTreeSet<Operator>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("Empty command.")]
    Empty,
    #[error("Shell operator '{0}' is not allowed. Try a single command.")]
    BlockedOperator(Operator),
    #[error("Shell expansion '{0}' is not supported in the sandbox. Quote it or name the files explicitly.")]
    Expansion(char),
    #[error("Could not parse command: {0}")]
    Unparseable(String),
    #[error("'{command}' is not available in the sandbox. Allowed: {allowed}")]
    CommandNotAllowed { command: String, allowed: String },
    #[error("'{command} {action}' is not available in the sandbox.")]
    ForbiddenAction { command: String, action: String },
}

/// One tokenized, allow-listed command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    tokens: Vec<String>,
}

impl Invocation {
    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admitted {
    Single(Invocation),
    Chain(Vec<Invocation>),
}

impl Admitted {
    pub fn invocations(&self) -> &[Invocation] {
        match self {
            Admitted::Single(invocation) => std::slice::from_ref(invocation),
            Admitted::Chain(links) => links,
        }
    }

    pub fn is_chain(&self) -> bool {
        matches!(self, Admitted::Chain(_))
    }
}

pub fn is_allowed_command(name: &str) -> bool {
    ALLOWED_COMMANDS.contains(&name)
}

/// Decides whether `raw` may run. Either the whole input is admitted or none
/// of it is: every chain link passes every check before the first one runs.
pub fn admit(raw: &str, exempt: &OperatorSet) -> Result<Admitted, Rejection> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Rejection::Empty);
    }
    check_operators(raw, exempt)?;

    if exempt.contains(&Operator::And) && raw.contains(Operator::And.as_str()) {
        let links = raw
            .split(Operator::And.as_str())
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .map(|link| {
                check_operators(link, &OperatorSet::new())?;
                admit_single(link)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if links.is_empty() {
            return Err(Rejection::Empty);
        }
        debug!(links = links.len(), "admitted chained command");
        return Ok(Admitted::Chain(links));
    }

    let invocation = admit_single(raw)?;
    debug!(program = invocation.program(), "admitted command");
    Ok(Admitted::Single(invocation))
}

fn check_operators(raw: &str, exempt: &OperatorSet) -> Result<(), Rejection> {
    match BLOCKED_OPERATORS
        .iter()
        .find(|op| !exempt.contains(*op) && raw.contains(op.as_str()))
    {
        Some(op) => Err(Rejection::BlockedOperator(*op)),
        None => Ok(()),
    }
}

fn admit_single(raw: &str) -> Result<Invocation, Rejection> {
    check_expansions(raw)?;
    let tokens = shell_words::split(raw).map_err(|err| Rejection::Unparseable(err.to_string()))?;
    let Some(program) = tokens.first() else {
        return Err(Rejection::Empty);
    };
    if !is_allowed_command(program) {
        return Err(Rejection::CommandNotAllowed {
            command: program.clone(),
            allowed: ALLOWED_COMMANDS.join(", "),
        });
    }
    if program == "find" {
        if let Some(action) = tokens[1..]
            .iter()
            .find(|token| FORBIDDEN_FIND_ACTIONS.contains(&token.as_str()))
        {
            return Err(Rejection::ForbiddenAction {
                command: program.clone(),
                action: action.clone(),
            });
        }
    }
    Ok(Invocation { tokens })
}

// `$` expands everywhere except inside single quotes; globs only when unquoted.
fn check_expansions(raw: &str) -> Result<(), Rejection> {
    let mut single = false;
    let mut double = false;
    let mut escaped = false;
    for ch in raw.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !single => escaped = true,
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            '$' if !single => return Err(Rejection::Expansion(ch)),
            '*' | '?' if !single && !double => return Err(Rejection::Expansion(ch)),
            _ => {}
        }
    }
    Ok(())
}

//! Sandboxed command execution and challenge validation for the shell tutor.
//!
//! Learner input is admitted by [`filter`], run by [`run::SandboxRun`] inside a
//! throwaway directory managed by [`fs::Sandbox`], and judged by the
//! challenge's [`validate::Validator`] against before/after snapshots.

pub mod challenge;
pub mod cheat_sheet;
pub mod errors;
pub mod filter;
pub mod fs;
pub mod path;
pub mod run;
pub mod session;
pub mod state;
pub mod validate;

pub use challenge::{Challenge, Curriculum, Lesson, MasteredCommand};
pub use cheat_sheet::{CheatSheet, CheatSheetEntry};
pub use errors::{Result, SandboxError};
pub use filter::{Operator, OperatorSet, Rejection};
pub use fs::{Layout, Sandbox, SandboxConfig, MARKER_FILE};
pub use run::{EngineError, ExecutionResult, RunConfig, SandboxRun};
pub use session::{Advance, Attempt, Phase, Step, TeachSession};
pub use state::{SandboxState, StateDiff};
pub use validate::{Effect, Feedback, FeedbackKind, Validator};

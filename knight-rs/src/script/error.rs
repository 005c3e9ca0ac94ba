//! Errors that stop a script run.

use std::fmt;
use std::io;

/// A label referenced by GOTO/IF/CALL that the program never defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedLabel {
    pub label: String,
    pub line_no: usize,
}

/// Why a run ended in [`Status::Errored`](super::interp::Status::Errored).
///
/// Every variant carries the 1-based source line that caused it.
#[derive(Debug)]
pub enum ScriptError {
    /// GOTO, IF or CALL to a label that does not exist.
    UnknownLabel { label: String, line_no: usize },
    /// ENDLOOP with no open LOOP.
    UnmatchedEndloop { line_no: usize },
    /// `LOOP 0` whose body cannot be skipped because no ENDLOOP closes it.
    UnmatchedLoop { line_no: usize },
    /// RETURN with an empty call stack.
    ReturnWithoutCall { line_no: usize },
    /// A device command while no connection is open.
    NotConnected { line_no: usize },
    /// Writing a device command failed; the connection has been closed.
    Transport { line_no: usize, source: io::Error },
    /// The configured step limit was reached.
    StepLimit { line_no: usize, limit: u64 },
    /// Dry run found labels that do not resolve.
    Unresolved(Vec<UnresolvedLabel>),
}

impl ScriptError {
    /// The source line the error points at (the first one, for
    /// [`ScriptError::Unresolved`]).
    pub fn line_no(&self) -> Option<usize> {
        match self {
            ScriptError::UnknownLabel { line_no, .. }
            | ScriptError::UnmatchedEndloop { line_no }
            | ScriptError::UnmatchedLoop { line_no }
            | ScriptError::ReturnWithoutCall { line_no }
            | ScriptError::NotConnected { line_no }
            | ScriptError::Transport { line_no, .. }
            | ScriptError::StepLimit { line_no, .. } => Some(*line_no),
            ScriptError::Unresolved(v) => v.first().map(|u| u.line_no),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::UnknownLabel { label, line_no } => {
                write!(f, "line {line_no}: unknown label {label}")
            }
            ScriptError::UnmatchedEndloop { line_no } => {
                write!(f, "line {line_no}: unmatched ENDLOOP")
            }
            ScriptError::UnmatchedLoop { line_no } => {
                write!(f, "line {line_no}: LOOP has no matching ENDLOOP")
            }
            ScriptError::ReturnWithoutCall { line_no } => {
                write!(f, "line {line_no}: RETURN without CALL")
            }
            ScriptError::NotConnected { line_no } => {
                write!(f, "line {line_no}: not connected")
            }
            ScriptError::Transport { line_no, source } => {
                write!(f, "line {line_no}: send failed: {source}")
            }
            ScriptError::StepLimit { line_no, limit } => {
                write!(f, "line {line_no}: step limit of {limit} reached")
            }
            ScriptError::Unresolved(labels) => {
                write!(f, "unresolved labels:")?;
                for u in labels {
                    write!(f, " {} (line {})", u.label, u.line_no)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

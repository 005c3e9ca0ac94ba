//! The device scripting language.
//!
//! A script is a line-oriented list of commands.  Keywords (`GOTO`, `WAIT`,
//! `SET`, `IF`, `LOOP`/`ENDLOOP`, `CALL`/`RETURN`, `BAUD`, `ECHO`, `STOP`)
//! drive control flow locally; every other line is sent to the device.
//!
//! ```text
//! # blink three times
//! LOOP 3
//!   LED ON
//!   WAIT 500
//!   LED OFF
//!   WAIT 500
//! ENDLOOP
//! ```
//!
//! [`parse`] turns source into a [`Program`]; [`execute`] runs it against a
//! [`ConnectionManager`](crate::connection::ConnectionManager).

pub mod cond;
pub mod error;
pub mod interp;
pub mod parse;
pub mod vars;

pub use cond::Condition;
pub use error::{ScriptError, UnresolvedLabel};
pub use interp::{
    execute, validate, ExecutionContext, ExecutionResult, Interpreter, LoopFrame, Mode, NoGate,
    Status, StepGate, StepReply, Validation, ValidationWarning,
};
pub use parse::{parse, Command, ParseError, ParseWarning, Program, ScriptLine};
pub use vars::VarStore;

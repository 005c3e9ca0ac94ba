//! Script execution engine.
//!
//! The [`Interpreter`] walks a parsed [`Program`] one slot at a time.  Each
//! step either updates the [`ExecutionContext`], prints through the
//! [`Console`], or writes a line through the [`ConnectionManager`].  It never
//! reads from the device; the reader task does that concurrently.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::baud::BaudRate;
use crate::connection::{ConnectionError, ConnectionManager};
use crate::console::Console;
use super::{
    cond::Condition,
    error::{ScriptError, UnresolvedLabel},
    parse::{Command, ParseWarning, Program, ScriptLine},
    vars::VarStore,
};

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    /// STOP, the end of the program, or an operator abort.
    Halted,
    /// A [`ScriptError`] ended the run.
    Errored,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Running => "running",
            Status::Halted => "halted",
            Status::Errored => "errored",
        })
    }
}

/// One open `LOOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFrame {
    /// Slot right after the `LOOP` line.
    pub body_start: usize,
    /// Passes still to run, counting the current one.
    pub remaining: u32,
}

/// Mutable state of one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Next slot to execute; `pc == len` means the program ran off the end.
    pub pc: usize,
    pub variables: VarStore,
    /// Return slots pushed by CALL.
    pub call_stack: Vec<usize>,
    pub loop_stack: Vec<LoopFrame>,
    pub status: Status,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            pc: 0,
            variables: VarStore::new(),
            call_stack: Vec::new(),
            loop_stack: Vec::new(),
            status: Status::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    /// Wait for the operator before every step.
    Step,
    /// Check labels only; nothing runs and the connection is untouched.
    DryRun,
}

/// How a run ended.
#[derive(Debug)]
pub struct ExecutionResult {
    pub status: Status,
    /// Slots executed.
    pub steps: u64,
    pub error: Option<ScriptError>,
    /// Bindings at the end of the run.
    pub variables: VarStore,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Halted
    }
}

// ── Step gate ─────────────────────────────────────────────────────────────────

/// The operator's answer at a step-mode pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReply {
    Continue,
    Abort,
}

/// Source of step-mode acknowledgements.
#[allow(async_fn_in_trait)]
pub trait StepGate {
    /// Block until the operator lets the step at `line` run.
    async fn acknowledge(&mut self, line: &ScriptLine) -> StepReply;
}

/// A gate that always continues, for normal runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGate;

impl StepGate for NoGate {
    async fn acknowledge(&mut self, _line: &ScriptLine) -> StepReply {
        StepReply::Continue
    }
}

/// Operator input lines: Enter (or anything else) continues; `q`, `quit`
/// or `stop` aborts, as does a closed channel.
impl StepGate for mpsc::Receiver<String> {
    async fn acknowledge(&mut self, _line: &ScriptLine) -> StepReply {
        match self.recv().await {
            Some(reply) => parse_reply(&reply),
            None => StepReply::Abort,
        }
    }
}

fn parse_reply(reply: &str) -> StepReply {
    let reply = reply.trim();
    if ["q", "quit", "stop"].iter().any(|w| reply.eq_ignore_ascii_case(w)) {
        StepReply::Abort
    } else {
        StepReply::Continue
    }
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter<'p> {
    program: &'p Program,
    ctx: ExecutionContext,
    console: Console,
    max_steps: Option<u64>,
    steps: u64,
    error: Option<ScriptError>,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program, console: Console) -> Self {
        Self {
            program,
            ctx: ExecutionContext::default(),
            console,
            max_steps: None,
            steps: 0,
            error: None,
        }
    }

    /// Fail the run with [`ScriptError::StepLimit`] after `limit` steps.
    /// `0` means unlimited.
    pub fn with_max_steps(mut self, limit: u64) -> Self {
        self.max_steps = (limit > 0).then_some(limit);
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Run in `mode` and report the outcome.
    pub async fn execute<G: StepGate>(
        self,
        mode: Mode,
        conn: &mut ConnectionManager,
        gate: &mut G,
    ) -> ExecutionResult {
        match mode {
            Mode::Normal => self.run(conn).await,
            Mode::Step => self.run_stepped(conn, gate).await,
            Mode::DryRun => dry_run(self.program, &self.console),
        }
    }

    /// Run until the program halts or errors.
    pub async fn run(mut self, conn: &mut ConnectionManager) -> ExecutionResult {
        while self.step(conn).await == Status::Running {}
        self.finish()
    }

    /// Run, pausing before every step until `gate` answers.
    pub async fn run_stepped<G: StepGate>(
        mut self,
        conn: &mut ConnectionManager,
        gate: &mut G,
    ) -> ExecutionResult {
        let program = self.program;
        while self.ctx.status == Status::Running {
            let Some(line) = program.get(self.ctx.pc) else {
                self.ctx.status = Status::Halted;
                break;
            };
            self.console.notice(format!(
                "[{:>3}] line {}: {}",
                self.ctx.pc, line.line_no, line.original
            ));
            self.console.prompt("step (Enter to run, q to abort)> ");
            if gate.acknowledge(line).await == StepReply::Abort {
                self.console.notice("aborted by operator");
                self.ctx.status = Status::Halted;
                break;
            }
            self.step(conn).await;
        }
        self.finish()
    }

    /// Execute the slot at `pc` and return the new status.
    pub async fn step(&mut self, conn: &mut ConnectionManager) -> Status {
        if self.ctx.status != Status::Running {
            return self.ctx.status;
        }
        let program = self.program;
        let Some(line) = program.get(self.ctx.pc) else {
            self.ctx.status = Status::Halted;
            return self.ctx.status;
        };
        if let Some(limit) = self.max_steps {
            if self.steps >= limit {
                self.fail(ScriptError::StepLimit { line_no: line.line_no, limit });
                return self.ctx.status;
            }
        }

        self.steps += 1;
        tracing::debug!(pc = self.ctx.pc, line = line.line_no, command = ?line.command, "step");
        if let Err(e) = self.exec(line, conn).await {
            self.fail(e);
        } else if self.ctx.status == Status::Running && self.ctx.pc >= program.len() {
            self.ctx.status = Status::Halted;
        }
        self.ctx.status
    }

    async fn exec(
        &mut self,
        line: &ScriptLine,
        conn: &mut ConnectionManager,
    ) -> Result<(), ScriptError> {
        let line_no = line.line_no;
        let next = self.ctx.pc + 1;

        match &line.command {
            Command::Label(_) => self.ctx.pc = next,
            Command::Goto(name) => {
                let target = self.resolve(name, line_no)?;
                self.ctx.pc = target;
            }
            Command::Wait(ms) => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                self.ctx.pc = next;
            }
            Command::Set { name, expr } => {
                let value = self.ctx.variables.set(name, expr);
                tracing::trace!(%name, %value, "set");
                self.ctx.pc = next;
            }
            Command::If { cond, target } => {
                if cond.eval(&self.ctx.variables) {
                    let target = self.resolve(target, line_no)?;
                    self.ctx.pc = target;
                } else {
                    self.ctx.pc = next;
                }
            }
            Command::Loop(0) => {
                let end = find_endloop(self.program, self.ctx.pc)
                    .ok_or(ScriptError::UnmatchedLoop { line_no })?;
                self.ctx.pc = end + 1;
            }
            Command::Loop(n) => {
                self.ctx.loop_stack.push(LoopFrame { body_start: next, remaining: *n });
                self.ctx.pc = next;
            }
            Command::EndLoop => {
                let frame = self
                    .ctx
                    .loop_stack
                    .last_mut()
                    .ok_or(ScriptError::UnmatchedEndloop { line_no })?;
                frame.remaining = frame.remaining.saturating_sub(1);
                if frame.remaining > 0 {
                    self.ctx.pc = frame.body_start;
                } else {
                    self.ctx.loop_stack.pop();
                    self.ctx.pc = next;
                }
            }
            Command::Call(name) => {
                let target = self.resolve(name, line_no)?;
                self.ctx.call_stack.push(next);
                self.ctx.pc = target;
            }
            Command::Return => {
                self.ctx.pc = self
                    .ctx
                    .call_stack
                    .pop()
                    .ok_or(ScriptError::ReturnWithoutCall { line_no })?;
            }
            Command::Baud(text) => {
                match text.parse::<BaudRate>() {
                    Ok(rate) => {
                        conn.set_pending_baud(rate);
                        let note = if conn.is_open() { " (applies on reconnect)" } else { "" };
                        self.console.notice(format!("baud rate set to {rate}{note}"));
                    }
                    Err(e) => self.console.error(format!(
                        "line {line_no}: {e}; keeping {}",
                        conn.pending_baud()
                    )),
                }
                self.ctx.pc = next;
            }
            Command::Echo(text) => {
                self.console.echo(self.ctx.variables.substitute(text));
                self.ctx.pc = next;
            }
            Command::Stop => self.ctx.status = Status::Halted,
            Command::PassThrough(text) => {
                if !conn.is_open() {
                    return Err(ScriptError::NotConnected { line_no });
                }
                conn.write_line(text).await.map_err(|e| match e {
                    ConnectionError::NotConnected => ScriptError::NotConnected { line_no },
                    ConnectionError::Io(source) => ScriptError::Transport { line_no, source },
                    other => ScriptError::Transport {
                        line_no,
                        source: io::Error::other(other.to_string()),
                    },
                })?;
                self.ctx.pc = next;
            }
        }
        Ok(())
    }

    fn resolve(&self, label: &str, line_no: usize) -> Result<usize, ScriptError> {
        self.program.label(label).ok_or_else(|| ScriptError::UnknownLabel {
            label: label.to_owned(),
            line_no,
        })
    }

    fn fail(&mut self, error: ScriptError) {
        tracing::debug!("script error: {error}");
        self.console.error(error.to_string());
        self.ctx.status = Status::Errored;
        self.error = Some(error);
    }

    fn finish(self) -> ExecutionResult {
        ExecutionResult {
            status: self.ctx.status,
            steps: self.steps,
            error: self.error,
            variables: self.ctx.variables,
        }
    }
}

/// Index of the ENDLOOP that closes the LOOP at `loop_at`.
fn find_endloop(program: &Program, loop_at: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, line) in program.lines().iter().enumerate().skip(loop_at + 1) {
        match line.command {
            Command::Loop(_) => depth += 1,
            Command::EndLoop if depth == 0 => return Some(i),
            Command::EndLoop => depth -= 1,
            _ => {}
        }
    }
    None
}

// ── Dry run ───────────────────────────────────────────────────────────────────

/// Something suspicious that does not stop a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// An IF condition that is never true.
    UnsupportedCondition { condition: String, line_no: usize },
    /// A LOOP that no ENDLOOP closes.
    UnclosedLoop { line_no: usize },
    /// An ENDLOOP with no LOOP before it.
    StrayEndloop { line_no: usize },
    DuplicateLabel { label: String, first_line: usize, line_no: usize },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::UnsupportedCondition { condition, line_no } => {
                write!(f, "line {line_no}: unsupported condition {condition:?} is always false")
            }
            ValidationWarning::UnclosedLoop { line_no } => {
                write!(f, "line {line_no}: LOOP without ENDLOOP")
            }
            ValidationWarning::StrayEndloop { line_no } => {
                write!(f, "line {line_no}: ENDLOOP without LOOP")
            }
            ValidationWarning::DuplicateLabel { label, first_line, line_no } => write!(
                f,
                "line {line_no}: label {label} redefined (first defined on line {first_line})"
            ),
        }
    }
}

/// Result of a static check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// Jump targets that name no label, in source order.
    pub unresolved: Vec<UnresolvedLabel>,
    pub warnings: Vec<ValidationWarning>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ScriptError> {
        if self.unresolved.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ScriptError::Unresolved(self.unresolved))
        }
    }
}

/// Check every GOTO/IF/CALL target and the LOOP nesting without running
/// anything.
pub fn validate(program: &Program) -> Validation {
    let mut v = Validation::default();

    for w in &program.warnings {
        let ParseWarning::DuplicateLabel { label, first_line, line } = w;
        v.warnings.push(ValidationWarning::DuplicateLabel {
            label: label.clone(),
            first_line: *first_line,
            line_no: *line,
        });
    }

    let mut open_loops: Vec<usize> = Vec::new();
    for line in program.lines() {
        if let Some(target) = line.command.jump_target() {
            if program.label(target).is_none() {
                v.unresolved.push(UnresolvedLabel {
                    label: target.to_owned(),
                    line_no: line.line_no,
                });
            }
        }
        match &line.command {
            Command::If { cond: Condition::Unsupported(text), .. } => {
                v.warnings.push(ValidationWarning::UnsupportedCondition {
                    condition: text.clone(),
                    line_no: line.line_no,
                });
            }
            Command::Loop(_) => open_loops.push(line.line_no),
            Command::EndLoop => {
                if open_loops.pop().is_none() {
                    v.warnings.push(ValidationWarning::StrayEndloop { line_no: line.line_no });
                }
            }
            _ => {}
        }
    }
    v.warnings.extend(
        open_loops
            .into_iter()
            .map(|line_no| ValidationWarning::UnclosedLoop { line_no }),
    );
    v
}

fn dry_run(program: &Program, console: &Console) -> ExecutionResult {
    let validation = validate(program);
    for w in &validation.warnings {
        console.notice(format!("warning: {w}"));
    }
    let (status, error) = match validation.into_result() {
        Ok(_) => {
            console.notice(format!("{} lines, all labels resolve", program.len()));
            (Status::Halted, None)
        }
        Err(e) => {
            console.error(e.to_string());
            (Status::Errored, Some(e))
        }
    };
    ExecutionResult { status, steps: 0, error, variables: VarStore::new() }
}

/// Run `program` in `mode` with no step limit.
pub async fn execute<G: StepGate>(
    program: &Program,
    mode: Mode,
    conn: &mut ConnectionManager,
    console: &Console,
    gate: &mut G,
) -> ExecutionResult {
    Interpreter::new(program, console.clone())
        .execute(mode, conn, gate)
        .await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

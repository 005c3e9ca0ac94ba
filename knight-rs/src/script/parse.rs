//! Script AST and two-pass parser.
//!
//! A script is a sequence of physical lines.  Blank lines and comments
//! (`#` or `//`) are dropped; every other line becomes one [`ScriptLine`]
//! slot in the [`Program`], classified once into a [`Command`] so the
//! interpreter never re-matches raw text.
//!
//! Label definitions (`10->START`) keep their slot as a no-op
//! [`Command::Label`].  A jump to `START` lands on that slot and falls
//! through to the next one, which keeps indices stable whether or not the
//! label is directly followed by a command.
//!
//! Anything that is not a recognised keyword in its full form is a
//! [`Command::PassThrough`] and is sent to the device verbatim.  `WAIT soon`
//! or `IF N=0 RETURN` are therefore not parse errors.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::cond::Condition;

/// A parsed script command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `10->NAME` — a jump target; does nothing when executed.
    Label(String),
    /// `GOTO NAME`
    Goto(String),
    /// `WAIT ms` — pause the script, not the device reader.
    Wait(u64),
    /// `SET NAME = expr`
    Set { name: String, expr: String },
    /// `IF cond GOTO NAME`
    If { cond: Condition, target: String },
    /// `LOOP n`
    Loop(u32),
    /// `ENDLOOP`
    EndLoop,
    /// `CALL NAME`
    Call(String),
    /// `RETURN`
    Return,
    /// `BAUD rate` — the digits as written; validated when executed.
    Baud(String),
    /// `ECHO text` — print locally after `${VAR}` substitution.
    Echo(String),
    /// `STOP`
    Stop,
    /// Any other line, sent to the device as-is.
    PassThrough(String),
}

impl Command {
    /// The label this command jumps to, if any.
    pub fn jump_target(&self) -> Option<&str> {
        match self {
            Command::Goto(t) | Command::Call(t) | Command::If { target: t, .. } => Some(t),
            _ => None,
        }
    }
}

/// One executable slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// The source text, trimmed.
    pub original: String,
    pub command: Command,
    /// 1-based physical line number in the source.
    pub line_no: usize,
}

/// Something odd but legal found while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// A label was defined more than once; the last definition wins.
    DuplicateLabel { label: String, first_line: usize, line: usize },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::DuplicateLabel { label, first_line, line } => write!(
                f,
                "line {line}: label {label} redefined (previously line {first_line}); \
                 the later definition is used"
            ),
        }
    }
}

/// A script that cannot be represented at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line_no: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line_no, self.message)
    }
}

impl std::error::Error for ParseError {}

/// The parser's output: executable slots plus the resolved label table.
#[derive(Debug, Clone, Default)]
pub struct Program {
    lines: Vec<ScriptLine>,
    /// Upper-cased label name → slot index.
    labels: HashMap<String, usize>,
    pub warnings: Vec<ParseWarning>,
}

impl Program {
    pub fn lines(&self) -> &[ScriptLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScriptLine> {
        self.lines.get(index)
    }

    /// Resolve a label, ignoring case.
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(&name.to_ascii_uppercase()).copied()
    }

    /// Iterate over `(NAME, index)` pairs, in no particular order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

// ── Line patterns ─────────────────────────────────────────────────────────────

macro_rules! pattern {
    ($name:ident, $re:literal) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect($re));
    };
}

pattern!(LABEL, r"^(\d+)->(\w+)$");
pattern!(GOTO, r"(?i)^GOTO\s+(\w+)$");
pattern!(WAIT, r"(?i)^WAIT\s+(\d+)$");
pattern!(SET, r"(?i)^SET\s+(\w+)\s*=\s*(.+)$");
pattern!(IF, r"(?i)^IF\s+(.+)\s+GOTO\s+(\w+)$");
pattern!(LOOP, r"(?i)^LOOP\s+(\d+)$");
pattern!(CALL, r"(?i)^CALL\s+(\w+)$");
pattern!(BAUD, r"(?i)^BAUD\s+(\d+)$");
pattern!(ECHO, r"(?i)^ECHO(?:\s+(.*))?$");

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("//")
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse script source into a [`Program`].
///
/// The first pass assigns slots and records labels; the second checks
/// nothing, because label resolution happens through the table at run time
/// (see [`crate::script::validate`] for the dry-run check).  Only numeric
/// literals that do not fit their type are errors.
pub fn parse(src: &str) -> Result<Program, ParseError> {
    let mut program = Program::default();
    // Label name → line where it was last defined, for duplicate reporting.
    let mut defined_at: HashMap<String, usize> = HashMap::new();

    for (i, raw) in src.lines().enumerate() {
        let line_no = i + 1;
        let text = raw.trim();
        if text.is_empty() || is_comment(text) {
            continue;
        }

        let index = program.lines.len();
        let command = classify(text, line_no)?;

        if let Command::Label(name) = &command {
            let key = name.to_ascii_uppercase();
            if let Some(first_line) = defined_at.insert(key.clone(), line_no) {
                program.warnings.push(ParseWarning::DuplicateLabel {
                    label: key.clone(),
                    first_line,
                    line: line_no,
                });
            }
            program.labels.insert(key, index);
        }

        program.lines.push(ScriptLine {
            original: text.to_owned(),
            command,
            line_no,
        });
    }

    Ok(program)
}

/// Classify one trimmed, non-empty, non-comment line.
fn classify(text: &str, line_no: usize) -> Result<Command, ParseError> {
    if let Some(c) = LABEL.captures(text) {
        return Ok(Command::Label(c[2].to_owned()));
    }

    // Bare keywords first: they have no arguments.
    if text.eq_ignore_ascii_case("ENDLOOP") {
        return Ok(Command::EndLoop);
    }
    if text.eq_ignore_ascii_case("RETURN") {
        return Ok(Command::Return);
    }
    if text.eq_ignore_ascii_case("STOP") {
        return Ok(Command::Stop);
    }

    if let Some(c) = GOTO.captures(text) {
        return Ok(Command::Goto(c[1].to_owned()));
    }
    if let Some(c) = WAIT.captures(text) {
        let ms = c[1].parse().map_err(|_| ParseError {
            line_no,
            message: format!("WAIT duration {} is too large", &c[1]),
        })?;
        return Ok(Command::Wait(ms));
    }
    if let Some(c) = SET.captures(text) {
        return Ok(Command::Set {
            name: c[1].to_owned(),
            expr: c[2].trim_end().to_owned(),
        });
    }
    if let Some(c) = IF.captures(text) {
        return Ok(Command::If {
            cond: Condition::parse(&c[1]),
            target: c[2].to_owned(),
        });
    }
    if let Some(c) = LOOP.captures(text) {
        let n = c[1].parse().map_err(|_| ParseError {
            line_no,
            message: format!("LOOP count {} is too large", &c[1]),
        })?;
        return Ok(Command::Loop(n));
    }
    if let Some(c) = CALL.captures(text) {
        return Ok(Command::Call(c[1].to_owned()));
    }
    if let Some(c) = BAUD.captures(text) {
        return Ok(Command::Baud(c[1].to_owned()));
    }
    if let Some(c) = ECHO.captures(text) {
        let msg = c.get(1).map_or("", |m| m.as_str());
        return Ok(Command::Echo(msg.to_owned()));
    }

    Ok(Command::PassThrough(text.to_owned()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

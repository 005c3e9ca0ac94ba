//! `IF` conditions.
//!
//! Only three forms exist: `TRUE`, `FALSE` and `VAR=value`.  There are no
//! relational operators; `IF X>3 GOTO A` parses as [`Condition::Unsupported`]
//! and is never taken.

use std::fmt;

use super::vars::VarStore;

/// A parsed `IF` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    True,
    False,
    /// `lhs=rhs`.  `lhs` is normally a bare variable name; `rhs` is a
    /// template that is substituted at evaluation time.
    Equals { lhs: String, rhs: String },
    /// Anything else, kept verbatim for diagnostics.
    Unsupported(String),
}

impl Condition {
    /// Classify the text between `IF` and `GOTO`.
    pub fn parse(src: &str) -> Self {
        let src = src.trim();
        if src.eq_ignore_ascii_case("true") {
            return Condition::True;
        }
        if src.eq_ignore_ascii_case("false") {
            return Condition::False;
        }
        match src.split_once('=') {
            Some((lhs, rhs)) if is_operand(lhs) && !rhs.starts_with('=') => Condition::Equals {
                lhs: lhs.trim().to_owned(),
                rhs: rhs.trim().to_owned(),
            },
            _ => Condition::Unsupported(src.to_owned()),
        }
    }

    /// Evaluate against the current bindings.
    ///
    /// For `Equals`, a bare identifier on the left is looked up directly
    /// (unset → empty); a left side containing `${...}` is substituted.  Both
    /// sides are trimmed and compared as text, so `IF N=03` does not match
    /// `N = 3`.
    pub fn eval(&self, vars: &VarStore) -> bool {
        match self {
            Condition::True => true,
            Condition::False | Condition::Unsupported(_) => false,
            Condition::Equals { lhs, rhs } => {
                let left = if is_identifier(lhs) {
                    vars.get(lhs).unwrap_or_default().to_owned()
                } else {
                    vars.substitute(lhs)
                };
                left.trim() == vars.substitute(rhs).trim()
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::True => f.write_str("TRUE"),
            Condition::False => f.write_str("FALSE"),
            Condition::Equals { lhs, rhs } => write!(f, "{lhs}={rhs}"),
            Condition::Unsupported(s) => f.write_str(s),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// The left side of `=`: an identifier or a single `${NAME}` reference,
/// optionally padded with spaces.  Rejects `X!` (from `X!=3`), `X<` etc.
fn is_operand(s: &str) -> bool {
    let s = s.trim();
    if is_identifier(s) {
        return true;
    }
    s.strip_prefix("${")
        .and_then(|r| r.strip_suffix('}'))
        .is_some_and(is_identifier)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

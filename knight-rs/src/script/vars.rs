//! Script variable store and `${NAME}` substitution.
//!
//! Variables are plain strings.  There is no expression language: the only
//! arithmetic is a single `<int>+<int>` or `<int>-<int>` recognised after
//! substitution by [`VarStore::set`], which is enough for counters like
//! `SET COUNT = ${COUNT}+1`.
//!
//! Undefined variables substitute as the empty string and never raise an
//! error.  A typo in a variable name is therefore silent.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// `${NAME}` where NAME is an identifier.  `${}` and an unterminated `${`
/// do not match and are left in the text untouched.
static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("variable reference regex"));

/// Exactly `<integer><op><integer>`, nothing around it.
static BINARY_INT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-]?\d+)([+-])([+-]?\d+)$").expect("arithmetic regex"));

/// Variable bindings for one script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarStore {
    vars: HashMap<String, String>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitute `raw_expr`, fold a trailing integer `+`/`-` if the result
    /// is exactly one, and bind the outcome to `name`.
    ///
    /// Returns the stored value.
    pub fn set(&mut self, name: &str, raw_expr: &str) -> &str {
        let text = self.substitute(raw_expr);
        let text = text.trim();
        let value = eval_binary_int(text).unwrap_or_else(|| text.to_owned());
        self.vars.insert(name.to_owned(), value);
        &self.vars[name]
    }

    /// Bind `name` to `value` verbatim, with no substitution or arithmetic.
    pub fn set_raw(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Replace every `${NAME}` in `text` with its value (or nothing).
    pub fn substitute(&self, text: &str) -> String {
        REFERENCE
            .replace_all(text, |caps: &Captures<'_>| {
                self.get(&caps[1]).unwrap_or_default().to_owned()
            })
            .into_owned()
    }

    /// Get the string value of a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Returns `true` if the variable is set.
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Evaluate `a+b` / `a-b` over `i64`.  `None` if `text` is not of that exact
/// shape or the result overflows.
fn eval_binary_int(text: &str) -> Option<String> {
    let caps = BINARY_INT.captures(text)?;
    let lhs: i64 = caps[1].parse().ok()?;
    let rhs: i64 = caps[3].parse().ok()?;
    let result = match &caps[2] {
        "+" => lhs.checked_add(rhs),
        _ => lhs.checked_sub(rhs),
    }?;
    Some(result.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut vars = VarStore::new();
        vars.set("LED", "ON");
        assert_eq!(vars.get("LED"), Some("ON"));
    }

    #[test]
    fn overwrite() {
        let mut vars = VarStore::new();
        vars.set("x", "old");
        vars.set("x", "new");
        assert_eq!(vars.get("x"), Some("new"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn counter_increments() {
        let mut vars = VarStore::new();
        vars.set("COUNT", "0");
        for _ in 0..3 {
            vars.set("COUNT", "${COUNT}+1");
        }
        assert_eq!(vars.get("COUNT"), Some("3"));
    }

    #[test]
    fn counter_decrements_below_zero() {
        let mut vars = VarStore::new();
        vars.set("T", "1");
        vars.set("T", "${T}-1");
        vars.set("T", "${T}-1");
        assert_eq!(vars.get("T"), Some("-1"));
    }

    #[test]
    fn negative_lhs_plus() {
        let mut vars = VarStore::new();
        assert_eq!(vars.set("x", "-5+2"), "-3");
    }

    #[test]
    fn arithmetic_only_when_whole_text_matches() {
        let mut vars = VarStore::new();
        assert_eq!(vars.set("a", "1 + 2"), "1 + 2");
        assert_eq!(vars.set("b", "v1+2"), "v1+2");
        assert_eq!(vars.set("c", "1+2+3"), "1+2+3");
        assert_eq!(vars.set("d", "\"TEST\""), "\"TEST\"");
    }

    #[test]
    fn overflow_is_stored_verbatim() {
        let mut vars = VarStore::new();
        let max = i64::MAX.to_string();
        let expr = format!("{max}+1");
        assert_eq!(vars.set("big", &expr), expr);
    }

    #[test]
    fn undefined_substitutes_as_empty() {
        let vars = VarStore::new();
        assert_eq!(vars.substitute("Loop ${COUNT}"), "Loop ");
    }

    #[test]
    fn undefined_in_arithmetic_is_not_folded() {
        // "${MISSING}+1" becomes "+1", which is not <int><op><int>.
        let mut vars = VarStore::new();
        assert_eq!(vars.set("n", "${MISSING}+1"), "+1");
    }

    #[test]
    fn substitute_multiple_references() {
        let mut vars = VarStore::new();
        vars.set_raw("A", "1");
        vars.set_raw("B", "two");
        assert_eq!(vars.substitute("${A}-${B}-${A}"), "1-two-1");
    }

    #[test]
    fn malformed_references_left_alone() {
        let mut vars = VarStore::new();
        vars.set_raw("A", "x");
        assert_eq!(vars.substitute("${} ${A ${A"), "${} ${A ${A");
        assert_eq!(vars.substitute("$A {A}"), "$A {A}");
    }

    #[test]
    fn values_are_not_resubstituted() {
        let mut vars = VarStore::new();
        vars.set_raw("A", "${B}");
        vars.set_raw("B", "nope");
        assert_eq!(vars.substitute("${A}"), "${B}");
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut vars = VarStore::new();
        vars.set("count", "1");
        assert_eq!(vars.get("COUNT"), None);
        assert!(vars.contains("count"));
    }

    #[test]
    fn set_trims_surrounding_whitespace() {
        let mut vars = VarStore::new();
        assert_eq!(vars.set("x", "  41+1  "), "42");
    }
}

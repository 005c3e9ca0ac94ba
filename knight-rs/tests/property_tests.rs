use std::path::Path;

use proptest::prelude::*;
use knight::reader::LineFramer;
use knight::script::{parse, validate, Command, VarStore};

/// Parse and check every script shipped in scripts/.
#[test]
fn sample_scripts_parse_and_resolve() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("scripts");

    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap_or_else(|e| panic!("cannot open {}: {e}", dir.display()))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "knt").unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.path());

    assert!(!entries.is_empty(), "no .knt files found in {}", dir.display());

    let mut failures = Vec::new();
    for entry in &entries {
        let path = entry.path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let src = std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
        match parse(&src) {
            Ok(program) => {
                let v = validate(&program);
                if !v.is_ok() || !v.warnings.is_empty() {
                    failures.push(format!("{name}: {:?} {:?}", v.unresolved, v.warnings));
                }
            }
            Err(e) => failures.push(format!("{name}: {e}")),
        }
    }

    if !failures.is_empty() {
        panic!(
            "{}/{} scripts failed:\n  {}",
            failures.len(),
            entries.len(),
            failures.join("\n  ")
        );
    }
}

/// Lines that are neither blank nor comments.
fn code_lines(src: &str) -> usize {
    src.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("//"))
        .count()
}

fn script_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("   ".to_owned()),
        "# [a-z ]{0,10}",
        "// [a-z ]{0,10}",
        "[0-9]{1,3}->[A-Z]{1,4}",
        "GOTO [A-Z]{1,4}",
        "WAIT [0-9]{1,4}",
        "SET [A-Z]{1,3} = [a-z0-9${}+-]{0,8}",
        "IF [A-Z]{1,3}=[0-9]{1,2} GOTO [A-Z]{1,4}",
        "LOOP [0-9]",
        Just("ENDLOOP".to_owned()),
        "CALL [A-Z]{1,4}",
        Just("RETURN".to_owned()),
        "BAUD [0-9]{3,7}",
        "ECHO [a-z ${}A-Z]{0,12}",
        Just("STOP".to_owned()),
        "[A-Z]{2,6}( [A-Z0-9]{1,4})?",
    ]
}

proptest! {
    /// The parser returns Ok or Err on any input; it never panics.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = parse(&s);
    }

    /// Every non-blank, non-comment line gets exactly one slot.
    #[test]
    fn slot_count_matches_code_lines(lines in prop::collection::vec(script_line(), 0..40)) {
        let src = lines.join("\n");
        // Oversized numeric literals are the only parse errors, and the
        // generators stay well inside u32.
        let program = parse(&src).unwrap();
        prop_assert_eq!(program.len(), code_lines(&src));
    }

    /// Slot line numbers are strictly increasing and point at real lines.
    #[test]
    fn line_numbers_are_monotonic(lines in prop::collection::vec(script_line(), 0..40)) {
        let src = lines.join("\n");
        let program = parse(&src).unwrap();
        let nums: Vec<usize> = program.lines().iter().map(|l| l.line_no).collect();
        prop_assert!(nums.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(nums.iter().all(|&n| n >= 1 && n <= lines.len()));
    }

    /// A label resolves to its own slot whether it is referenced before or
    /// after its definition.
    #[test]
    fn label_resolution_is_direction_independent(
        name in "[A-Z][A-Z0-9_]{0,6}",
        before in 0usize..5,
        after in 0usize..5,
    ) {
        let mut src = String::new();
        src.push_str(&format!("GOTO {name}\n"));
        for i in 0..before {
            src.push_str(&format!("CMD{i}\n"));
        }
        src.push_str(&format!("10->{name}\n"));
        for i in 0..after {
            src.push_str(&format!("CMD{i}\n"));
        }
        src.push_str(&format!("GOTO {name}\n"));

        let program = parse(&src).unwrap();
        let slot = program.label(&name).unwrap();
        prop_assert_eq!(slot, 1 + before);
        prop_assert_eq!(&program.lines()[slot].command, &Command::Label(name.clone()));
        prop_assert_eq!(program.label(&name.to_ascii_lowercase()), Some(slot));
    }

    /// Text without `${` comes back unchanged.
    #[test]
    fn substitute_without_references_is_identity(s in "[^$]*") {
        let mut vars = VarStore::new();
        vars.set_raw("X", "1");
        prop_assert_eq!(vars.substitute(&s), s);
    }

    /// `${A}+${B}` folds to the i64 sum when it does not overflow.
    #[test]
    fn set_adds_integers(a in -1_000_000i64..1_000_000, b in 0i64..1_000_000) {
        let mut vars = VarStore::new();
        vars.set_raw("A", a.to_string());
        vars.set_raw("B", b.to_string());
        let value = vars.set("R", "${A}+${B}").to_owned();
        prop_assert_eq!(value, (a + b).to_string());
    }

    /// However the byte stream is chunked, the framer yields the same lines.
    #[test]
    fn framing_is_chunking_independent(
        lines in prop::collection::vec("[ -~]{0,20}", 0..10),
        cut in 1usize..7,
    ) {
        let stream: String = lines.iter().map(|l| format!("{l}\r\n")).collect();
        let mut framer = LineFramer::new();
        let mut got = Vec::new();
        for chunk in stream.as_bytes().chunks(cut) {
            got.extend(framer.feed(chunk));
        }
        prop_assert!(!framer.has_pending());
        prop_assert_eq!(got, lines);
    }
}

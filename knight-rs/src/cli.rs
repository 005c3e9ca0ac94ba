//! Command-line argument parsing.
//!
//! Usage:
//!   knight [-d] [-f[<file>]] [-b<baud>] [-s|-n] [<baud>] [<port> [<script>]]
//!   knight --list
//!   knight --help

use std::path::PathBuf;

use crate::baud::BaudRate;
use crate::script::Mode;
use crate::transport::Endpoint;

pub const USAGE: &str = "\
usage: knight [-d] [-f[<file>]] [-b<baud>] [-s|-n] [<baud>] [<port> [<script>]]
       knight --list
       knight --help

  -b, --baud <rate>   baud rate (default 9600)
  -s                  run the script one step at a time
  -n                  check the script without connecting (dry run)
  -f<file>            read settings from <file>; -f alone skips the config file
  -d                  debug logging on stderr
  -l, --list          list serial ports and exit
  -h, --help          show this help

<port> is a serial device (/dev/ttyUSB0, COM3) or tcp:<host>:<port>.
Without a script, knight opens an interactive session.";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Config-file specification.
    pub config: ConfigFile,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// `-h` / `--help`.
    pub help: bool,
    /// `-l` / `--list`.
    pub list: bool,
    /// Baud rate from `-b` or a leading numeric argument.
    pub baud: Option<BaudRate>,
    /// How to run the script.
    pub mode: Mode,
    pub port: Option<Endpoint>,
    pub script: Option<PathBuf>,
}

/// How to choose the user config file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Search the standard locations (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip user config.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut step = false;
    let mut dry_run = false;
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            i += 1;
            positional.extend(argv[i..].iter().cloned());
            break;
        }

        if let Some(long) = arg.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((n, v)) => (n, Some(v.to_owned())),
                None => (long, None),
            };
            match name {
                "help" => args.help = true,
                "list" => args.list = true,
                "baud" => {
                    let value = match inline {
                        Some(v) => v,
                        None => {
                            i += 1;
                            argv.get(i)
                                .cloned()
                                .ok_or("--baud requires a rate argument")?
                        }
                    };
                    args.baud = Some(parse_baud(&value)?);
                }
                _ => return Err(format!("unknown option: --{name}")),
            }
            i += 1;
            continue;
        }

        // Non-flag argument.
        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        // Flag argument: iterate over characters after the leading `-`.
        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,
                'h' => args.help = true,
                'l' => args.list = true,
                's' => step = true,
                'n' => dry_run = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else {
                        // -f alone skips the user config; a separate file
                        // argument would be ambiguous with <port>.
                        args.config = ConfigFile::Skip;
                    }
                }

                // -b<baud>
                'b' => {
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-b requires a rate argument".to_owned());
                    };
                    args.baud = Some(parse_baud(&value)?);
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    // A leading all-digit argument is a baud rate: `knight 115200 /dev/ttyUSB0`.
    let mut positional = positional.into_iter().peekable();
    if let Some(first) = positional.peek() {
        if !first.is_empty() && first.bytes().all(|b| b.is_ascii_digit()) {
            if args.baud.is_some() {
                return Err(format!("baud rate given twice ({first})"));
            }
            args.baud = Some(parse_baud(first)?);
            positional.next();
        }
    }
    if let Some(port) = positional.next() {
        args.port = Some(port.parse()?);
    }
    args.script = positional.next().map(PathBuf::from);
    let extra = positional.count();
    if extra > 0 {
        return Err(format!("too many arguments ({extra} extra)"));
    }

    args.mode = match (step, dry_run) {
        (true, true) => return Err("-s and -n cannot be combined".to_owned()),
        (true, false) => Mode::Step,
        (false, true) => Mode::DryRun,
        (false, false) => Mode::Normal,
    };
    // A dry run never connects, so its only positional is the script.
    if args.mode == Mode::DryRun && args.script.is_none() {
        args.script = args.port.take().map(|p| PathBuf::from(p.to_string()));
    }
    if args.mode != Mode::Normal && args.script.is_none() && !args.help && !args.list {
        return Err("-s and -n need a script file".to_owned());
    }

    Ok(args)
}

fn parse_baud(s: &str) -> Result<BaudRate, String> {
    s.parse::<BaudRate>().map_err(|e| e.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! `.knightrc` configuration file parser.
//!
//! One `key = value` setting per line:
//!
//! | Key | Value | Default |
//! |-----|-------|---------|
//! | `port` | serial device or `tcp:host:port` | none |
//! | `baud` | a supported baud rate | 9600 |
//! | `echo_sent` | bool; echo each line sent to the device | `true` |
//! | `partial_flush_ms` | idle delay before a partial device line is shown, `0` to wait for `\n` | 0 |
//! | `max_steps` | script step limit, `0` for none | 0 |
//! | `color` | `auto`, `always` or `never` | `auto` |
//!
//! Lines starting with `#` or `;` are comments.  A bad line is reported and
//! skipped; the rest of the file still loads.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};

use crate::baud::BaudRate;
use crate::transport::Endpoint;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// When to style console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Only when stdout is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn enabled(self, stdout_is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => stdout_is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorMode::Auto),
            "always" => Ok(ColorMode::Always),
            "never" => Ok(ColorMode::Never),
            _ => Err(format!("invalid color mode {s:?} (expected auto, always or never)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Device to open when none is given on the command line.
    pub port: Option<Endpoint>,
    pub baud: BaudRate,
    pub echo_sent: bool,
    /// `None` holds partial device lines until their terminator.
    pub partial_flush: Option<Duration>,
    /// `0` means unlimited.
    pub max_steps: u64,
    pub color: ColorMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            baud: BaudRate::DEFAULT,
            echo_sent: true,
            partial_flush: None,
            max_steps: 0,
            color: ColorMode::Auto,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config text.
    ///
    /// Returns the config and any per-line errors; lines in error leave the
    /// corresponding setting at its previous value.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                errors.push(ConfigError {
                    line: lineno,
                    message: format!("expected key = value, got {line:?}"),
                });
                continue;
            };
            if let Err(message) = config.apply(key.trim(), value.trim()) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key.to_ascii_lowercase().as_str() {
            "port" => self.port = Some(value.parse()?),
            "baud" => self.baud = value.parse::<BaudRate>().map_err(|e| e.to_string())?,
            "echo_sent" => self.echo_sent = parse_bool(value)?,
            "partial_flush_ms" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| format!("partial_flush_ms: not a number: {value:?}"))?;
                self.partial_flush = (ms > 0).then(|| Duration::from_millis(ms));
            }
            "max_steps" => {
                self.max_steps = value
                    .parse()
                    .map_err(|_| format!("max_steps: not a number: {value:?}"))?;
            }
            "color" => self.color = value.parse()?,
            _ => return Err(format!("unknown setting {key:?}")),
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("expected a boolean, got {s:?}")),
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search for the user config file in the standard locations.
///
/// `$KNIGHTRC`, `~/.knightrc`, the platform config directory
/// (`~/.config/knight/knightrc` on Linux), then `./.knightrc`.  Returns the
/// first path that exists.
pub fn find_user_config() -> Option<PathBuf> {
    candidate_paths().into_iter().find(|p| p.is_file())
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = std::env::var_os("KNIGHTRC") {
        paths.push(PathBuf::from(p));
    }
    if let Some(base) = BaseDirs::new() {
        paths.push(base.home_dir().join(".knightrc"));
    }
    if let Some(proj) = ProjectDirs::from("", "", "knight") {
        paths.push(proj.config_dir().join("knightrc"));
    }
    paths.push(PathBuf::from("./.knightrc"));
    paths
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_is_default() {
        let (cfg, errs) = Config::load_str("");
        assert!(errs.is_empty());
        assert_eq!(cfg, Config::default());
        assert!(cfg.echo_sent);
        assert_eq!(cfg.partial_flush, None);
    }

    #[test]
    fn all_keys() {
        let src = "\
# device
port = /dev/ttyACM0
baud = 115200
echo_sent = no
partial_flush_ms = 250
; safety net
max_steps = 10000
color = never
";
        let (cfg, errs) = Config::load_str(src);
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.port, Some(Endpoint::Serial("/dev/ttyACM0".into())));
        assert_eq!(cfg.baud.get(), 115200);
        assert!(!cfg.echo_sent);
        assert_eq!(cfg.partial_flush, Some(Duration::from_millis(250)));
        assert_eq!(cfg.max_steps, 10000);
        assert_eq!(cfg.color, ColorMode::Never);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let (cfg, errs) = Config::load_str("BAUD = 57600\nColor = ALWAYS\n");
        assert!(errs.is_empty());
        assert_eq!(cfg.baud.get(), 57600);
        assert_eq!(cfg.color, ColorMode::Always);
    }

    #[test]
    fn tcp_port() {
        let (cfg, _) = Config::load_str("port = tcp:localhost:2000");
        assert_eq!(
            cfg.port,
            Some(Endpoint::Tcp { host: "localhost".into(), port: 2000 })
        );
    }

    #[test]
    fn bad_lines_are_reported_and_skipped() {
        let src = "baud = 1234\nno equals sign\nwidth = 80\nbaud = 19200\necho_sent = maybe\n";
        let (cfg, errs) = Config::load_str(src);
        let lines: Vec<usize> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 5]);
        assert_eq!(cfg.baud.get(), 19200);
        assert!(cfg.echo_sent);
        assert!(errs[0].to_string().starts_with("line 1:"));
    }

    #[test]
    fn zero_partial_flush_disables_it() {
        let (cfg, errs) = Config::load_str("partial_flush_ms = 0\n");
        assert!(errs.is_empty());
        assert_eq!(cfg.partial_flush, None);
    }

    #[test]
    fn color_mode_resolution() {
        assert!(ColorMode::Auto.enabled(true));
        assert!(!ColorMode::Auto.enabled(false));
        assert!(ColorMode::Always.enabled(false));
        assert!(!ColorMode::Never.enabled(true));
    }

    #[test]
    fn load_file_reads_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "max_steps = 42").unwrap();
        let (cfg, errs) = Config::load_file(f.path()).unwrap();
        assert!(errs.is_empty());
        assert_eq!(cfg.max_steps, 42);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        assert!(Config::load_file(Path::new("/nonexistent/knightrc")).is_err());
    }

    #[test]
    fn search_order_ends_with_cwd() {
        let paths = candidate_paths();
        assert_eq!(paths.last(), Some(&PathBuf::from("./.knightrc")));
    }
}

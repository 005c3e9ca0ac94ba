//! Interactive command loop.
//!
//! Operator input arrives line by line from a dedicated stdin thread.  Local
//! commands (`connect`, `script`, `baud`, ...) are handled here; any other
//! line is sent to the device.  Device output keeps streaming through the
//! reader task while the loop waits for input.
//!
//! The same input channel doubles as the step-mode gate, so a script run
//! with `step <file>` reads its acknowledgements from the prompt.

use std::io;
use std::path::Path;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;

use crate::baud::{self, BaudRate};
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::console::Console;
use crate::script::{self, ExecutionResult, Interpreter, Mode, Program, StepGate};
use crate::transport::{self, Endpoint};

pub const PROMPT: &str = "> ";

pub const HELP: &str = "\
Commands:
  script <file>          run a script
  step <file>            run a script one line at a time (Enter = next, q = abort)
  check <file>           check a script's labels without running it
  connect <port> [baud]  open a serial port or tcp:<host>:<port>
  disconnect             close the connection
  baud <rate>            set the baud rate for the next connection
  info                   show connection details
  ports                  list serial ports
  help                   show this help
  exit, quit             leave knight
Anything else is sent to the device.

Script commands:
  <n>->NAME              label
  GOTO NAME              jump to a label
  WAIT <ms>              pause
  SET VAR = value        assign; ${VAR}+1 and ${VAR}-1 do integer arithmetic
  IF VAR=value GOTO NAME conditional jump (also IF TRUE / IF FALSE)
  LOOP <n> ... ENDLOOP   repeat a block
  CALL NAME ... RETURN   subroutine
  BAUD <rate>            set the baud rate for the next connection
  ECHO text              print text, with ${VAR} substituted
  STOP                   end the script
  # or //                comment";

// ── Input ─────────────────────────────────────────────────────────────────────

/// Spawn the thread that owns stdin and forwards it line by line.
///
/// The channel closes on EOF.  A thread rather than `tokio::io::stdin` keeps
/// a single reader on the fd however often the consuming future is dropped
/// by `select!`.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || forward_lines(io::stdin().lock(), &tx));
    rx
}

/// Send each line of `input` to `tx` until EOF, a read error, or the
/// receiver going away.  Bytes that are not UTF-8 are replaced.
fn forward_lines<R: io::BufRead>(mut input: R, tx: &mpsc::Sender<String>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("stdin read failed: {e}");
                break;
            }
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        let line = match String::from_utf8(std::mem::take(&mut buf)) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("input line is not valid UTF-8; replacing bad bytes");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        if tx.blocking_send(line).is_err() {
            break; // session ended
        }
    }
}

// ── Local commands ────────────────────────────────────────────────────────────

/// One line of operator input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand<'a> {
    Empty,
    Run { mode: Mode, path: &'a str },
    Connect { port: &'a str, baud: Option<&'a str> },
    Disconnect,
    Baud(&'a str),
    Info,
    Ports,
    Help,
    Quit,
    /// A known command with missing or extra arguments.
    Usage(&'static str),
    /// Not a local command: goes to the device.
    Send(&'a str),
}

impl<'a> LocalCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LocalCommand::Empty;
        }
        let (word, rest) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(w, r)| (w, r.trim()));
        let args: Vec<&str> = rest.split_whitespace().collect();

        match word.to_ascii_lowercase().as_str() {
            "script" | "step" | "check" => {
                let mode = match word.to_ascii_lowercase().as_str() {
                    "step" => Mode::Step,
                    "check" => Mode::DryRun,
                    _ => Mode::Normal,
                };
                if rest.is_empty() {
                    LocalCommand::Usage("script|step|check <file>")
                } else {
                    LocalCommand::Run { mode, path: rest }
                }
            }
            "connect" => match args[..] {
                [port] => LocalCommand::Connect { port, baud: None },
                [port, baud] => LocalCommand::Connect { port, baud: Some(baud) },
                _ => LocalCommand::Usage("connect <port> [baud]"),
            },
            "baud" => match args[..] {
                [rate] => LocalCommand::Baud(rate),
                _ => LocalCommand::Usage("baud <rate>"),
            },
            "disconnect" if args.is_empty() => LocalCommand::Disconnect,
            "info" if args.is_empty() => LocalCommand::Info,
            "ports" if args.is_empty() => LocalCommand::Ports,
            "help" if args.is_empty() => LocalCommand::Help,
            "exit" | "quit" if args.is_empty() => LocalCommand::Quit,
            _ => LocalCommand::Send(line.trim_end_matches(['\r', '\n'])),
        }
    }
}

// ── Script helpers ────────────────────────────────────────────────────────────

/// Read and parse a script file.
pub fn load_program(path: &Path) -> Result<Program, String> {
    let src = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let program = script::parse(&src).map_err(|e| format!("{}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), slots = program.len(), "script loaded");
    Ok(program)
}

/// Load `path` and run it in `mode`.
pub async fn run_script_file<G: StepGate>(
    path: &Path,
    mode: Mode,
    conn: &mut ConnectionManager,
    console: &Console,
    gate: &mut G,
    max_steps: u64,
) -> Result<ExecutionResult, String> {
    let program = load_program(path)?;
    // A dry run lists these itself.
    if mode != Mode::DryRun {
        for w in &program.warnings {
            console.notice(format!("warning: {w}"));
        }
    }
    let result = Interpreter::new(&program, console.clone())
        .with_max_steps(max_steps)
        .execute(mode, conn, gate)
        .await;
    Ok(result)
}

/// The one-line summary printed after a run.
pub fn summarize(result: &ExecutionResult) -> String {
    match &result.error {
        Some(e) => format!("script {} after {} steps: {e}", result.status, result.steps),
        None => format!("script {} after {} steps", result.status, result.steps),
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct Session {
    conn: ConnectionManager,
    console: Console,
    input: mpsc::Receiver<String>,
    config: Config,
    sigint: Signal,
    sigterm: Signal,
}

impl Session {
    /// Must be called inside a tokio runtime (signal handlers are installed
    /// here).
    pub fn new(
        conn: ConnectionManager,
        console: Console,
        input: mpsc::Receiver<String>,
        config: Config,
    ) -> io::Result<Self> {
        Ok(Self {
            conn,
            console,
            input,
            config,
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    pub fn connection(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }

    /// Read and dispatch commands until `exit`, EOF or a signal, then close
    /// the connection.
    pub async fn run(&mut self) {
        self.console.notice("knight ready; type help for commands");
        loop {
            self.console.prompt(PROMPT);
            tokio::select! {
                line = self.input.recv() => match line {
                    Some(line) => {
                        if !self.dispatch(&line).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = self.sigint.recv() => {
                    self.console.notice("interrupted");
                    break;
                }
                _ = self.sigterm.recv() => break,
            }
        }
        self.conn.close().await;
    }

    /// Handle one input line.  Returns `false` when the session should end.
    pub async fn dispatch(&mut self, line: &str) -> bool {
        match LocalCommand::parse(line) {
            LocalCommand::Empty => {}
            LocalCommand::Quit => return false,
            LocalCommand::Help => self.console.notice(HELP),
            LocalCommand::Usage(usage) => self.console.error(format!("usage: {usage}")),
            LocalCommand::Run { mode, path } => self.run_script(mode, Path::new(path)).await,
            LocalCommand::Connect { port, baud } => self.connect(port, baud).await,
            LocalCommand::Disconnect => {
                if self.conn.info().is_some() {
                    self.conn.close().await;
                    self.console.notice("disconnected");
                } else {
                    self.console.notice("not connected");
                }
            }
            LocalCommand::Baud(rate) => match rate.parse::<BaudRate>() {
                Ok(rate) => {
                    self.conn.set_pending_baud(rate);
                    if self.conn.is_open() {
                        self.console.notice(format!(
                            "baud rate set to {rate}; disconnect and connect again to apply"
                        ));
                    } else {
                        self.console.notice(format!("baud rate set to {rate}"));
                    }
                }
                Err(e) => self.console.error(e.to_string()),
            },
            LocalCommand::Info => self.info(),
            LocalCommand::Ports => list_ports(&self.console),
            LocalCommand::Send(text) => {
                if !self.conn.is_open() {
                    self.console.notice("not connected; use connect <port>");
                } else if let Err(e) = self.conn.write_line(text).await {
                    self.console.error(format!("send failed: {e}"));
                }
            }
        }
        true
    }

    async fn connect(&mut self, port: &str, baud: Option<&str>) {
        let endpoint: Endpoint = match port.parse() {
            Ok(ep) => ep,
            Err(e) => return self.console.error(e),
        };
        let baud = match baud.map(str::parse::<BaudRate>).transpose() {
            Ok(b) => b.unwrap_or(self.conn.pending_baud()),
            Err(e) => return self.console.error(e.to_string()),
        };
        match self.conn.open(endpoint.clone(), baud.get()).await {
            Ok(()) => {
                self.conn.set_pending_baud(baud);
                self.console.notice(format!("connected to {endpoint} at {baud} baud"));
            }
            Err(e) => self.console.error(format!("cannot open {endpoint}: {e}")),
        }
    }

    async fn run_script(&mut self, mode: Mode, path: &Path) {
        let max_steps = self.config.max_steps;
        let run = run_script_file(
            path,
            mode,
            &mut self.conn,
            &self.console,
            &mut self.input,
            max_steps,
        );
        // Ctrl-C stops the script, not the session.
        let outcome = tokio::select! {
            r = run => Some(r),
            _ = self.sigint.recv() => None,
        };
        match outcome {
            Some(Ok(result)) => self.console.notice(summarize(&result)),
            Some(Err(e)) => self.console.error(e),
            None => self.console.notice("script interrupted"),
        }
    }

    fn info(&self) {
        match self.conn.info() {
            Some(info) => {
                let state = if self.conn.is_open() { "open" } else { "lost" };
                self.console.notice(format!("{info}\nState:       {state}"));
            }
            None => self.console.notice("not connected"),
        }
        self.console.notice(format!(
            "Next baud:   {} (supported: {})",
            self.conn.pending_baud(),
            baud::supported_list()
        ));
    }
}

/// Print the serial ports found on this machine.
pub fn list_ports(console: &Console) {
    match transport::available_ports() {
        Ok(ports) if ports.is_empty() => console.notice("no serial ports found"),
        Ok(ports) => {
            for p in ports {
                console.notice(p.to_string());
            }
        }
        Err(e) => console.error(format!("cannot list ports: {e}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

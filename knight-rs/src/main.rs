use std::process;

use tracing_subscriber::EnvFilter;

use knight::cli::{self, ConfigFile, USAGE};
use knight::config::{self, Config};
use knight::connection::ConnectionManager;
use knight::console::{self, Console};
use knight::script::{Mode, NoGate};
use knight::session::{self, Session, HELP};
use knight::transport;

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("knight: {e}");
            eprintln!("{USAGE}");
            process::exit(1);
        }
    };

    if args.help {
        println!("{USAGE}\n\n{HELP}");
        return;
    }

    // ── Diagnostics on stderr ─────────────────────────────────────────────────
    let filter = if args.debug {
        EnvFilter::new("knight=debug")
    } else {
        EnvFilter::try_from_env("KNIGHT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.list {
        match transport::available_ports() {
            Ok(ports) if ports.is_empty() => println!("no serial ports found"),
            Ok(ports) => ports.iter().for_each(|p| println!("{p}")),
            Err(e) => {
                eprintln!("knight: cannot list ports: {e}");
                process::exit(1);
            }
        }
        return;
    }

    // ── Load user config ──────────────────────────────────────────────────────
    let config_path = match &args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some(path.clone()),
        ConfigFile::Search => config::find_user_config(),
    };
    let mut cfg = Config::default();
    if let Some(path) = config_path {
        match Config::load_file(&path) {
            Ok((loaded, errors)) => {
                for e in errors {
                    eprintln!("knight: warning: {}: {e}", path.display());
                }
                tracing::debug!(path = %path.display(), "config loaded");
                cfg = loaded;
            }
            Err(e) => eprintln!("knight: warning: {}: {e}", path.display()),
        }
    }

    // Command-line values win over the config file.
    let baud = args.baud.unwrap_or(cfg.baud);
    let port = args.port.clone().or_else(|| cfg.port.clone());

    // SAFETY: isatty only inspects the descriptor.
    let is_tty = unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 };
    let (console, out_rx) = Console::channel();
    let console = console.with_echo_sent(cfg.echo_sent);
    let renderer = console::spawn_stdout(out_rx, cfg.color.enabled(is_tty));

    let mut conn = ConnectionManager::new(console.clone()).with_flush_delay(cfg.partial_flush);
    conn.set_pending_baud(baud);

    // ── Script mode ───────────────────────────────────────────────────────────
    if let Some(script) = &args.script {
        let opened = match (&port, args.mode) {
            (_, Mode::DryRun) => true,
            (Some(ep), _) => match conn.open(ep.clone(), baud.get()).await {
                Ok(()) => {
                    console.notice(format!("connected to {ep} at {baud} baud"));
                    true
                }
                Err(e) => {
                    console.error(format!("cannot open {ep}: {e}"));
                    false
                }
            },
            (None, _) => {
                console.error("a port is needed to run a script (or use -n)");
                false
            }
        };

        let max_steps = cfg.max_steps;
        let outcome = match (opened, args.mode) {
            (false, _) => None,
            (true, Mode::Step) => {
                let mut input = session::spawn_stdin_reader();
                let run = session::run_script_file(
                    script, args.mode, &mut conn, &console, &mut input, max_steps,
                );
                Some(run.await)
            }
            (true, mode) => {
                let mut gate = NoGate;
                let run = session::run_script_file(
                    script, mode, &mut conn, &console, &mut gate, max_steps,
                );
                Some(run.await)
            }
        };
        conn.close().await;

        let code = match outcome {
            Some(Ok(result)) => {
                console.notice(session::summarize(&result));
                if result.is_success() { 0 } else { 1 }
            }
            Some(Err(e)) => {
                console.error(e);
                1
            }
            None => 1,
        };
        // The renderer exits once every console handle is gone.
        drop(conn);
        drop(console);
        let _ = renderer.await;
        process::exit(code);
    }

    // ── Interactive session ───────────────────────────────────────────────────
    if let Some(ep) = &port {
        match conn.open(ep.clone(), baud.get()).await {
            Ok(()) => console.notice(format!("connected to {ep} at {baud} baud")),
            Err(e) => console.error(format!("cannot open {ep}: {e}")),
        }
    }

    let input = session::spawn_stdin_reader();
    match Session::new(conn, console.clone(), input, cfg) {
        Ok(mut session) => session.run().await,
        Err(e) => {
            eprintln!("knight: {e}");
            process::exit(1);
        }
    }
    drop(console);
    let _ = renderer.await;
}

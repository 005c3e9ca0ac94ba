//! The single ordered output sink.
//!
//! Both the device reader task and the foreground (interpreter or command
//! loop) print.  Neither writes to stdout directly: each sends an [`Output`]
//! through a cloned [`Console`] handle into one unbounded channel, and a
//! single render task drains it.  Lines are therefore never torn, though the
//! relative order of device output and foreground output is whatever order
//! the messages reached the channel.
//!
//! ```text
//!   reader task ──┐
//!                 ├──► mpsc ──► render task ──► stdout
//!   interpreter ──┘
//! ```

use std::io::{self, Write};

use crossterm::style::Stylize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One unit of console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A complete line received from the device.
    Device(String),
    /// A line that was written to the device.
    Sent(String),
    /// Text from a script `ECHO`.
    Echo(String),
    /// Local informational text (step trace, baud changes, status).
    Notice(String),
    /// A failure reported to the operator.
    Error(String),
    /// The reader task saw EOF or a read error.
    ConnectionLost(String),
    /// An input prompt: printed without a trailing newline.
    Prompt(String),
}

/// Cloneable handle for sending [`Output`] to the render task.
#[derive(Debug, Clone)]
pub struct Console {
    tx: mpsc::UnboundedSender<Output>,
    echo_sent: bool,
}

impl Console {
    /// Create a console and the receiving end its renderer will drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Output>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, echo_sent: true }, rx)
    }

    /// Whether [`Console::sent`] produces output.
    pub fn with_echo_sent(mut self, on: bool) -> Self {
        self.echo_sent = on;
        self
    }

    /// Queue `out` for rendering.  Output sent after the renderer has shut
    /// down is dropped.
    pub fn emit(&self, out: Output) {
        let _ = self.tx.send(out);
    }

    pub fn device(&self, line: impl Into<String>) {
        self.emit(Output::Device(line.into()));
    }

    pub fn sent(&self, line: impl Into<String>) {
        if self.echo_sent {
            self.emit(Output::Sent(line.into()));
        }
    }

    pub fn echo(&self, text: impl Into<String>) {
        self.emit(Output::Echo(text.into()));
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.emit(Output::Notice(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(Output::Error(text.into()));
    }

    pub fn prompt(&self, text: impl Into<String>) {
        self.emit(Output::Prompt(text.into()));
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Writes [`Output`] to a byte sink, optionally with ANSI styling.
pub struct Renderer<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn render(&mut self, output: &Output) -> io::Result<()> {
        if let Output::Prompt(p) = output {
            write!(self.out, "{p}")?;
            return self.out.flush();
        }
        let text = plain_text(output);
        if self.color {
            match output {
                Output::Device(_) => writeln!(self.out, "{text}")?,
                Output::Sent(_) => writeln!(self.out, "{}", text.cyan())?,
                Output::Echo(_) => writeln!(self.out, "{}", text.bold())?,
                Output::Notice(_) => writeln!(self.out, "{}", text.dim())?,
                Output::Error(_) | Output::ConnectionLost(_) => {
                    writeln!(self.out, "{}", text.red())?
                }
                Output::Prompt(_) => unreachable!("handled above"),
            }
        } else {
            writeln!(self.out, "{text}")?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// The uncoloured text for one output line.
pub fn plain_text(output: &Output) -> String {
    match output {
        Output::Device(s) | Output::Echo(s) | Output::Notice(s) | Output::Prompt(s) => s.clone(),
        Output::Sent(s) => format!("  \u{2192} device: {s}"),
        Output::Error(s) => format!("error: {s}"),
        Output::ConnectionLost(reason) => format!("** connection lost: {reason} **"),
    }
}

/// Spawn the render task that prints everything sent to `rx` on stdout.
///
/// The task ends once every [`Console`] clone has been dropped and the queue
/// is drained.
pub fn spawn_stdout(mut rx: mpsc::UnboundedReceiver<Output>, color: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = Renderer::new(io::stdout(), color);
        while let Some(out) = rx.recv().await {
            if let Err(e) = renderer.render(&out) {
                tracing::warn!("console write failed: {e}");
                break;
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn render_plain(outputs: &[Output]) -> String {
        let mut r = Renderer::new(Vec::new(), false);
        for o in outputs {
            r.render(o).unwrap();
        }
        String::from_utf8(r.into_inner()).unwrap()
    }

    #[test]
    fn channel_preserves_order() {
        let (console, mut rx) = Console::channel();
        let reader_side = console.clone();
        console.echo("one");
        reader_side.device("two");
        console.notice("three");
        assert_eq!(rx.try_recv().unwrap(), Output::Echo("one".into()));
        assert_eq!(rx.try_recv().unwrap(), Output::Device("two".into()));
        assert_eq!(rx.try_recv().unwrap(), Output::Notice("three".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sent_echo_can_be_disabled() {
        let (console, mut rx) = Console::channel();
        let console = console.with_echo_sent(false);
        console.sent("LED ON");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (console, rx) = Console::channel();
        drop(rx);
        console.error("nobody listening");
    }

    #[test]
    fn plain_rendering() {
        let text = render_plain(&[
            Output::Device("T=21.5".into()),
            Output::Sent("READ".into()),
            Output::Error("boom".into()),
            Output::ConnectionLost("EOF".into()),
            Output::Prompt("> ".into()),
        ]);
        assert_eq!(
            text,
            "T=21.5\n  \u{2192} device: READ\nerror: boom\n** connection lost: EOF **\n> "
        );
    }

    #[test]
    fn colored_rendering_wraps_text_in_escapes() {
        let mut r = Renderer::new(Vec::new(), true);
        r.render(&Output::Error("bad".into())).unwrap();
        let s = String::from_utf8(r.into_inner()).unwrap();
        assert!(s.contains("error: bad"));
        assert!(s.contains('\x1b'));
    }
}

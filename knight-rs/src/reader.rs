//! Background device reader.
//!
//! While a connection is open, [`reader_task`] owns the read half of the
//! transport and turns the byte stream into console lines.  It never writes
//! to the device.
//!
//! Line framing lives in [`LineFramer`], which is pure and independently
//! testable.  Bytes are held until a `\n` arrives, so a device that pauses
//! mid-line still produces one line.  A device that prints a prompt without
//! a newline (`"> "`) can opt in to an idle flush: after each read that
//! leaves partial data, the task arms a timer and shows the partial line if
//! nothing more arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

use crate::console::{Console, Output};

const READ_BUF: usize = 4096;

/// Longest line kept in the buffer; past this the bytes are emitted as a line.
pub const MAX_LINE: usize = READ_BUF * 4;

// ── LineFramer ────────────────────────────────────────────────────────────────

/// Accumulates bytes and splits them into lines on `\n`, dropping a
/// trailing `\r`.  Invalid UTF-8 is replaced, not rejected.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Set when `flush` took a line that ended in `\r`; the `\n` that
    /// completes it belongs to that line, not a new empty one.
    flushed_cr: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every line completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in data {
            if b == b'\n' {
                if std::mem::take(&mut self.flushed_cr) && self.buf.is_empty() {
                    continue;
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                lines.push(self.take_line());
            } else {
                self.flushed_cr = false;
                self.buf.push(b);
                if self.buf.len() >= MAX_LINE {
                    lines.push(self.take_line());
                }
            }
        }
        lines
    }

    /// Whether unterminated bytes are waiting.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Take the unterminated bytes as a line, if there are any.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
            self.flushed_cr = true;
        }
        Some(self.take_line())
    }

    fn take_line(&mut self) -> String {
        let line = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&line).into_owned()
    }
}

// ── Reader task ───────────────────────────────────────────────────────────────

/// How a reader task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The connection manager asked it to stop.
    Closed,
    /// The device stream ended.
    Eof,
    /// A read failed.
    Failed(String),
}

/// Drain `rd` into `console` until `shutdown` fires or the stream ends.
///
/// With `flush_delay` set, partial data idle for that long is shown as a
/// line.  On EOF or error `alive` is cleared and a
/// [`Output::ConnectionLost`] is emitted; on shutdown the task exits quietly.
/// Any partial line is flushed either way.
pub async fn reader_task<R>(
    mut rd: R,
    mut shutdown: oneshot::Receiver<()>,
    console: Console,
    alive: Arc<AtomicBool>,
    flush_delay: Option<Duration>,
) -> ReaderExit
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_BUF];
    let mut flush_deadline: Option<tokio::time::Instant> = None;

    let exit = loop {
        // Pending while no partial line is waiting.
        let flush_sleep = async {
            match flush_deadline {
                Some(dl) => tokio::time::sleep_until(dl).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            // A dropped sender counts as a close request too.
            _ = &mut shutdown => break ReaderExit::Closed,
            result = rd.read(&mut buf) => match result {
                Ok(0) => break ReaderExit::Eof,
                Ok(n) => {
                    for line in framer.feed(&buf[..n]) {
                        console.device(line);
                    }
                    flush_deadline = flush_delay
                        .filter(|_| framer.has_pending())
                        .map(|d| tokio::time::Instant::now() + d);
                }
                Err(e) => break ReaderExit::Failed(e.to_string()),
            },
            _ = flush_sleep => {
                if let Some(line) = framer.flush() {
                    console.device(line);
                }
                flush_deadline = None;
            }
        }
    };

    if let Some(line) = framer.flush() {
        console.device(line);
    }

    match &exit {
        ReaderExit::Closed => tracing::debug!("device reader stopped"),
        ReaderExit::Eof => {
            alive.store(false, Ordering::SeqCst);
            tracing::info!("device stream ended");
            console.emit(Output::ConnectionLost("device closed the stream".into()));
        }
        ReaderExit::Failed(reason) => {
            alive.store(false, Ordering::SeqCst);
            tracing::warn!("device read failed: {reason}");
            console.emit(Output::ConnectionLost(reason.clone()));
        }
    }
    exit
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn splits_crlf() {
        let mut f = LineFramer::new();
        assert_eq!(f.feed(b"hello\r\nworld\r\n"), vec!["hello", "world"]);
        assert!(!f.has_pending());
    }

    #[test]
    fn splits_lf_only() {
        let mut f = LineFramer::new();
        assert_eq!(f.feed(b"a\nb\n"), vec!["a", "b"]);
    }

    #[test]
    fn partial_line_is_buffered_across_feeds() {
        let mut f = LineFramer::new();
        assert!(f.feed(b"T=2").is_empty());
        assert!(f.has_pending());
        assert_eq!(f.feed(b"1.5\r"), Vec::<String>::new());
        assert_eq!(f.feed(b"\n"), vec!["T=21.5"]);
    }

    #[test]
    fn empty_lines_are_kept() {
        let mut f = LineFramer::new();
        assert_eq!(f.feed(b"\r\n\n"), vec!["", ""]);
    }

    #[test]
    fn flush_returns_partial_once() {
        let mut f = LineFramer::new();
        f.feed(b"> ");
        assert_eq!(f.flush().as_deref(), Some("> "));
        assert_eq!(f.flush(), None);
    }

    #[test]
    fn lf_after_flushed_cr_ends_the_same_line() {
        let mut f = LineFramer::new();
        f.feed(b"1.5\r");
        assert_eq!(f.flush().as_deref(), Some("1.5"));
        assert!(f.feed(b"\n").is_empty());
        assert_eq!(f.feed(b"next\r\n"), vec!["next"]);
    }

    #[test]
    fn lone_lf_after_plain_flush_is_an_empty_line() {
        let mut f = LineFramer::new();
        f.feed(b"> ");
        f.flush();
        assert_eq!(f.feed(b"\n"), vec![""]);
    }

    #[test]
    fn overlong_line_is_cut_at_max_line() {
        let mut f = LineFramer::new();
        let data = vec![b'x'; MAX_LINE + 10];
        let lines = f.feed(&data);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE);
        assert_eq!(f.feed(b"\n"), vec!["x".repeat(10)]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut f = LineFramer::new();
        assert_eq!(f.feed(b"ok\xff\n"), vec!["ok\u{fffd}"]);
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Output>) -> Vec<Output> {
        let mut v = Vec::new();
        while let Ok(o) = rx.try_recv() {
            v.push(o);
        }
        v
    }

    #[tokio::test]
    async fn eof_marks_connection_lost() {
        let (mut device, host) = tokio::io::duplex(64);
        let (console, mut rx) = Console::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let (_stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(reader_task(
            host,
            stop_rx,
            console,
            alive.clone(),
            None,
        ));
        device.write_all(b"READY\r\npart").await.unwrap();
        drop(device);

        assert_eq!(task.await.unwrap(), ReaderExit::Eof);
        assert!(!alive.load(Ordering::SeqCst));
        assert_eq!(
            drain(&mut rx),
            vec![
                Output::Device("READY".into()),
                Output::Device("part".into()),
                Output::ConnectionLost("device closed the stream".into()),
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_exits_quietly() {
        let (_device, host) = tokio::io::duplex(64);
        let (console, mut rx) = Console::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(reader_task(
            host,
            stop_rx,
            console,
            alive.clone(),
            None,
        ));
        stop_tx.send(()).unwrap();

        assert_eq!(task.await.unwrap(), ReaderExit::Closed);
        assert!(alive.load(Ordering::SeqCst));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn idle_partial_is_flushed() {
        let (mut device, host) = tokio::io::duplex(64);
        let (console, mut rx) = Console::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(reader_task(
            host,
            stop_rx,
            console,
            alive,
            Some(Duration::from_millis(10)),
        ));
        device.write_all(b"> ").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(drain(&mut rx), vec![Output::Device("> ".into())]);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn slow_line_stays_whole_without_idle_flush() {
        let (mut device, host) = tokio::io::duplex(64);
        let (console, mut rx) = Console::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(reader_task(host, stop_rx, console, alive, None));
        device.write_all(b"T=2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        device.write_all(b"1.5\r").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(drain(&mut rx).is_empty());
        device.write_all(b"\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(drain(&mut rx), vec![Output::Device("T=21.5".into())]);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn idle_flush_before_crlf_adds_no_empty_line() {
        let (mut device, host) = tokio::io::duplex(64);
        let (console, mut rx) = Console::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(reader_task(
            host,
            stop_rx,
            console,
            alive,
            Some(Duration::from_millis(10)),
        ));
        device.write_all(b"T=21.5\r").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        device.write_all(b"\nOK\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            drain(&mut rx),
            vec![Output::Device("T=21.5".into()), Output::Device("OK".into())]
        );

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }
}

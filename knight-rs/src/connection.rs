//! Connection lifecycle.
//!
//! [`ConnectionManager`] owns at most one open [`Connection`].  Opening one
//! splits the transport: the read half moves into a spawned
//! [`reader_task`](crate::reader::reader_task), the write half stays here
//! for the foreground to use.  Closing signals the reader, awaits its join
//! handle, and only then drops the writer, so a later [`open`] can never
//! overlap a reader from the previous connection.
//!
//! [`open`]: ConnectionManager::open

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::baud::BaudRate;
use crate::console::Console;
use crate::reader::{reader_task, ReaderExit};
use crate::transport::{self, BoxedStream, DeviceStream, Endpoint};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConnectionError {
    /// `open` while a live connection exists.
    AlreadyOpen(Endpoint),
    /// The requested rate is not in [`crate::baud::SUPPORTED`].
    UnsupportedBaud(u32),
    /// `write` with no open connection.
    NotConnected,
    /// The transport failed to open or write.
    Io(io::Error),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::AlreadyOpen(ep) => {
                write!(f, "already connected to {ep}; disconnect first")
            }
            ConnectionError::UnsupportedBaud(rate) => {
                write!(f, "unsupported baud rate {rate}")
            }
            ConnectionError::NotConnected => f.write_str("not connected"),
            ConnectionError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// A live device connection.
struct Connection {
    endpoint: Endpoint,
    baud: BaudRate,
    writer: WriteHalf<BoxedStream>,
    /// Cleared by the reader task on EOF / read error.
    alive: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    reader: JoinHandle<ReaderExit>,
}

/// Snapshot of the open connection, for the `info` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub endpoint: Endpoint,
    pub baud: BaudRate,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Port:        {}", self.endpoint)?;
        writeln!(f, "Baud rate:   {}", self.baud)?;
        writeln!(f, "Data bits:   8")?;
        writeln!(f, "Stop bits:   1")?;
        write!(f, "Parity:      none")
    }
}

// ── ConnectionManager ─────────────────────────────────────────────────────────

pub struct ConnectionManager {
    conn: Option<Connection>,
    /// Rate used by the next `open` that does not name one; `BAUD` sets it.
    pending_baud: BaudRate,
    console: Console,
    /// Idle flush for partial device lines; `None` waits for `\n`.
    flush_delay: Option<Duration>,
}

impl ConnectionManager {
    pub fn new(console: Console) -> Self {
        Self {
            conn: None,
            pending_baud: BaudRate::DEFAULT,
            console,
            flush_delay: None,
        }
    }

    /// Idle delay before the reader shows a partial line.  `None`, the
    /// default, holds partial data until its line terminator arrives.
    pub fn with_flush_delay(mut self, delay: Option<Duration>) -> Self {
        self.flush_delay = delay;
        self
    }

    pub fn pending_baud(&self) -> BaudRate {
        self.pending_baud
    }

    /// Change the rate for future connections.  An open connection keeps
    /// its rate until it is reopened.
    pub fn set_pending_baud(&mut self, baud: BaudRate) {
        self.pending_baud = baud;
    }

    /// `true` while a connection is open and its reader has not reported
    /// loss.
    pub fn is_open(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|c| c.alive.load(Ordering::SeqCst))
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.conn.as_ref().map(|c| ConnectionInfo {
            endpoint: c.endpoint.clone(),
            baud: c.baud,
        })
    }

    /// Open `endpoint` at `baud` and start its reader task.
    pub async fn open(&mut self, endpoint: Endpoint, baud: u32) -> Result<(), ConnectionError> {
        self.reap_lost().await;
        if let Some(c) = &self.conn {
            return Err(ConnectionError::AlreadyOpen(c.endpoint.clone()));
        }
        let baud = BaudRate::new(baud).ok_or(ConnectionError::UnsupportedBaud(baud))?;
        let stream = transport::open(&endpoint, baud).await?;
        tracing::info!(%endpoint, %baud, "connected");
        self.attach(endpoint, baud, stream)
    }

    /// Start managing an already-open stream.
    ///
    /// `open` ends here; tests and embedders use it to drive in-memory
    /// streams.  Fails with `AlreadyOpen` until the previous connection has
    /// been closed.
    pub fn attach<S>(
        &mut self,
        endpoint: Endpoint,
        baud: BaudRate,
        stream: S,
    ) -> Result<(), ConnectionError>
    where
        S: DeviceStream + 'static,
    {
        if let Some(c) = &self.conn {
            return Err(ConnectionError::AlreadyOpen(c.endpoint.clone()));
        }
        let boxed: BoxedStream = Box::new(stream);
        let (rd, writer) = tokio::io::split(boxed);
        let alive = Arc::new(AtomicBool::new(true));
        let (shutdown, stop_rx) = oneshot::channel();
        let reader = tokio::spawn(reader_task(
            rd,
            stop_rx,
            self.console.clone(),
            alive.clone(),
            self.flush_delay,
        ));
        self.conn = Some(Connection {
            endpoint,
            baud,
            writer,
            alive,
            shutdown,
            reader,
        });
        Ok(())
    }

    /// Stop the reader, wait for it to finish, and release the transport.
    /// Closing when nothing is open does nothing.
    pub async fn close(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        let Connection { endpoint, mut writer, shutdown, reader, .. } = conn;
        // The reader may already have exited on its own.
        let _ = shutdown.send(());
        match reader.await {
            Ok(exit) => tracing::debug!(?exit, "reader joined"),
            Err(e) => tracing::warn!("reader task failed: {e}"),
        }
        let _ = writer.shutdown().await;
        drop(writer);
        tracing::info!(%endpoint, "disconnected");
    }

    /// Write raw bytes to the device.
    ///
    /// On I/O failure the connection is closed before the error is
    /// returned.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotConnected);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        let result = async {
            conn.writer.write_all(bytes).await?;
            conn.writer.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("device write failed: {e}");
            self.close().await;
            return Err(ConnectionError::Io(e));
        }
        Ok(())
    }

    /// Send one command line, appending CRLF unless it already ends in a
    /// line terminator.
    pub async fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        let framed = frame_line(line);
        self.write(framed.as_bytes()).await?;
        self.console.sent(line.trim_end_matches(['\r', '\n']));
        Ok(())
    }

    /// Join the reader of a connection that was lost on the device side so
    /// its slot can be reused.
    async fn reap_lost(&mut self) {
        if self.conn.is_some() && !self.is_open() {
            self.close().await;
        }
    }
}

/// `line` plus CRLF, unless it already ends in `\r` or `\n`.
pub fn frame_line(line: &str) -> String {
    if line.ends_with(['\r', '\n']) {
        line.to_owned()
    } else {
        format!("{line}\r\n")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Line sources feeding a capture.
//!
//! The ranging device writes newline-terminated text. Distscope reads it from
//! a device path (a serial character device, FIFO or plain file), from
//! standard input or from a TCP stream such as a serial-to-network bridge.
//! Reading happens on its own task, [`pump`], which forwards every line or
//! per-line failure through a bounded channel to the periodic capture task.
//!
//! ## Metrics
//!
//! `lines_read`: Lines forwarded to the capture task
//! `bytes_read`: Bytes consumed from the source, terminators included
//!

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
};

use metrics::counter;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    net::TcpStream,
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

use crate::signals::Shutdown;

/// Item forwarded from the reader task: a line with its terminator and
/// surrounding whitespace removed, or the reason a line was lost.
pub type LineResult = Result<String, LineError>;

/// Line source type used by the daemon.
pub type DynLineReader = LineReader<Box<dyn AsyncBufRead + Send + Unpin>>;

#[derive(thiserror::Error, Debug)]
/// Errors produced when opening or reading an input source
pub enum Error {
    /// Opening the device path failed.
    #[error("Failed to open {path:?}: {source}")]
    Open {
        /// Device path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// Connecting to the TCP source failed.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Remote address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// Reading failed in a way that will not recover.
    #[error("Input read failed after {attempts} consecutive errors: {source}")]
    Read {
        /// Consecutive failed reads, the last included
        attempts: u32,
        /// The last IO error
        #[source]
        source: io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
/// A failure that loses one line but leaves the source readable
pub enum LineError {
    /// The line is not valid UTF-8.
    #[error("Line of {len} bytes is not valid UTF-8")]
    InvalidUtf8 {
        /// Length of the discarded line in bytes
        len: usize,
    },
    /// The line exceeded the configured maximum and was discarded.
    #[error("Line exceeded {limit} bytes and was discarded")]
    TooLong {
        /// The configured maximum
        limit: usize,
    },
    /// A read failed but may succeed if retried.
    #[error("Transient read error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Where lines are read from
pub enum Config {
    /// A path opened read-only, usually a serial character device.
    Device {
        /// Path to the device
        path: PathBuf,
    },
    /// The process's standard input.
    Stdin,
    /// A TCP stream connected to `addr`.
    Tcp {
        /// Address of the line server
        addr: SocketAddr,
    },
}

/// Open the source described by `config`.
///
/// # Errors
///
/// Returns an error if the device cannot be opened or the TCP connection
/// cannot be established.
pub async fn open(config: &Config, max_line_bytes: NonZeroUsize) -> Result<DynLineReader, Error> {
    let inner: Box<dyn AsyncBufRead + Send + Unpin> = match config {
        Config::Device { path } => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|source| Error::Open {
                    path: path.clone(),
                    source,
                })?;
            info!(?path, "Opened input device");
            Box::new(BufReader::new(file))
        }
        Config::Stdin => {
            info!("Reading input from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
        Config::Tcp { addr } => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|source| Error::Connect {
                    addr: *addr,
                    source,
                })?;
            info!(%addr, "Connected to input stream");
            Box::new(BufReader::new(stream))
        }
    };
    Ok(LineReader::new(inner, max_line_bytes))
}

/// Splits a byte stream into bounded, decoded lines.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
    // Set while the rest of an over-long line is being skipped.
    overflow: bool,
    eof: bool,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a new [`LineReader`] discarding lines over `max_line_bytes`.
    #[must_use]
    pub fn new(inner: R, max_line_bytes: NonZeroUsize) -> Self {
        Self {
            inner,
            max_line_bytes: max_line_bytes.get(),
            buf: Vec::new(),
            overflow: false,
            eof: false,
        }
    }

    /// Read the next line. Returns `Ok(None)` once the source is exhausted.
    ///
    /// A final line without terminator is still returned. Surrounding
    /// whitespace, the terminator included, is trimmed.
    ///
    /// # Errors
    ///
    /// Returns a [`LineError`] for a line that cannot be delivered. The
    /// reader remains usable afterwards.
    pub async fn next_line(&mut self) -> Result<Option<String>, LineError> {
        if self.eof {
            return Ok(None);
        }
        loop {
            let available = match self.inner.fill_buf().await {
                Ok(available) => available,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(LineError::Io(err)),
            };

            if available.is_empty() {
                self.eof = true;
                if self.overflow {
                    self.overflow = false;
                    return Err(LineError::TooLong {
                        limit: self.max_line_bytes,
                    });
                }
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return self.take_line().map(Some);
            }

            let (chunk, consumed, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(idx) => (&available[..idx], idx + 1, true),
                None => (available, available.len(), false),
            };
            counter!("bytes_read").increment(consumed as u64);

            if !self.overflow {
                if self.buf.len() + chunk.len() > self.max_line_bytes {
                    self.overflow = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(chunk);
                }
            }
            self.inner.consume(consumed);

            if complete {
                if self.overflow {
                    self.overflow = false;
                    return Err(LineError::TooLong {
                        limit: self.max_line_bytes,
                    });
                }
                return self.take_line().map(Some);
            }
        }
    }

    fn take_line(&mut self) -> Result<String, LineError> {
        let bytes = std::mem::take(&mut self.buf);
        let len = bytes.len();
        let line = String::from_utf8(bytes).map_err(|_| LineError::InvalidUtf8 { len })?;
        let trimmed = line.trim();
        if trimmed.len() == line.len() {
            Ok(line)
        } else {
            Ok(trimmed.to_string())
        }
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::InvalidData
    )
}

/// Forward lines from `reader` into `lines` until the source closes, reading
/// fails persistently, the receiver goes away or shutdown is signaled.
///
/// Transient read errors are forwarded as [`LineError::Io`]. After
/// `max_consecutive_read_errors` of them in a row, or on the first error of
/// any other kind, the source is considered failed.
///
/// # Errors
///
/// Returns [`Error::Read`] if the source failed.
pub async fn pump<R>(
    mut reader: LineReader<R>,
    lines: mpsc::Sender<LineResult>,
    max_consecutive_read_errors: u32,
    mut shutdown: Shutdown,
) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut consecutive_errors: u32 = 0;
    loop {
        let item = tokio::select! {
            res = reader.next_line() => res,
            reason = shutdown.recv() => {
                debug!(?reason, "Shutdown signaled, closing input");
                return Ok(());
            }
        };

        let item = match item {
            Ok(Some(line)) => {
                consecutive_errors = 0;
                counter!("lines_read").increment(1);
                Ok(line)
            }
            Ok(None) => {
                info!("Input source closed");
                return Ok(());
            }
            Err(LineError::Io(err)) => {
                consecutive_errors += 1;
                if !is_transient(err.kind()) || consecutive_errors >= max_consecutive_read_errors {
                    error!(attempts = consecutive_errors, error = %err, "Input read failed");
                    return Err(Error::Read {
                        attempts: consecutive_errors,
                        source: err,
                    });
                }
                Err(LineError::Io(err))
            }
            Err(err) => Err(err),
        };

        if lines.send(item).await.is_err() {
            warn!("Line receiver dropped, closing input");
            return Ok(());
        }
    }
}

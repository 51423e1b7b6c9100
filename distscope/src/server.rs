//! The capture server
//!
//! Every refresh interval the server drains the lines the reader task has
//! queued, without waiting for more, and runs them through one pass of the
//! [`Capture`]. If the pass appended a row the tables of every captured
//! metric go to each configured sink. The capture is owned by this one task
//! and needs no lock.
//!
//! When the reader task stops, the server ingests whatever it already
//! queued, publishes once more and returns an error naming why the input
//! ended.
//!
//! ## Metrics
//!
//! `lines_received`: Lines drained from the reader task
//! `lines_unmatched`: Lines that were not distance estimate records
//! `samples_rejected`: Records from an antenna path outside the configured slots
//! `line_read_errors`: Lines lost to decode or transient read failures
//! `passes_flushed`: Passes that appended a row
//! `active_sources`: Antenna paths observed so far
//!

use std::{num::NonZeroUsize, time::Duration};

use distscope_capture::{Capture, PassSummary};
use metrics::{counter, gauge};
use tokio::{
    io::AsyncBufRead,
    sync::mpsc::{self, error::TryRecvError},
    task::JoinError,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    input::{self, LineReader, LineResult},
    signals::{Reason, Shutdown},
    sink::{self, Sink},
};

/// Lines queued between the reader task and the capture task. Also the most
/// lines a single pass drains.
///
/// The channel never holds more than this, so a pass takes every line that
/// was queued when it began. Lines the reader queues while the pass runs wait
/// for the next tick, which keeps a sustained burst from holding off publish
/// indefinitely. A burst larger than the channel therefore lands on more than
/// one tick.
const LINE_CHANNEL_CAPACITY: usize = 1024;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Server`]
pub enum Error {
    /// The capture configuration is invalid.
    #[error("Capture error: {0}")]
    Capture(#[from] distscope_capture::Error),
    /// The input source could not be opened or failed while reading.
    #[error("Input error: {0}")]
    Input(#[from] input::Error),
    /// The input source reached its end.
    #[error("Input source closed")]
    InputClosed,
    /// A sink refused a snapshot.
    #[error("Sink error: {0}")]
    Sink(#[from] sink::Error),
    /// The reader task panicked or was cancelled.
    #[error("Reader task failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Debug)]
/// The capture server.
pub struct Server {
    input: input::Config,
    max_line_bytes: NonZeroUsize,
    max_consecutive_read_errors: u32,
    refresh_interval: Duration,
    capture: Capture,
    sinks: Vec<Box<dyn Sink>>,
    shutdown: Shutdown,
}

impl Server {
    /// Create a new [`Server`] instance
    ///
    /// # Errors
    ///
    /// Function will error if the capture configuration is invalid.
    pub fn new(config: &Config, shutdown: Shutdown) -> Result<Self, Error> {
        Self::with_clock(config, shutdown, quanta::Clock::new())
    }

    /// Create a new [`Server`] whose ticks are timed by `clock`.
    ///
    /// # Errors
    ///
    /// Function will error if the capture configuration is invalid.
    pub fn with_clock(
        config: &Config,
        shutdown: Shutdown,
        clock: quanta::Clock,
    ) -> Result<Self, Error> {
        Ok(Self {
            input: config.input.clone(),
            max_line_bytes: config.max_line_bytes,
            max_consecutive_read_errors: config.max_consecutive_read_errors,
            refresh_interval: config.refresh_interval(),
            capture: Capture::with_clock(&config.capture, clock)?,
            sinks: config.sinks.iter().map(sink::build).collect(),
            shutdown,
        })
    }

    /// Add a sink in addition to the configured ones.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Run this [`Server`] to completion
    ///
    /// Opens the configured input and runs until shutdown is signaled or the
    /// input ends.
    ///
    /// # Errors
    ///
    /// Function will return an error if the input cannot be opened, fails or
    /// closes, or if a sink fails.
    pub async fn run(self) -> Result<(), Error> {
        let reader = input::open(&self.input, self.max_line_bytes).await?;
        self.run_with(reader).await
    }

    /// Run this [`Server`] to completion over an already opened `reader`.
    ///
    /// # Errors
    ///
    /// See [`Server::run`].
    pub async fn run_with<R>(mut self, reader: LineReader<R>) -> Result<(), Error>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (lines_snd, mut lines_rcv) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(input::pump(
            reader,
            lines_snd,
            self.max_consecutive_read_errors,
            self.shutdown.clone(),
        ));

        info!(
            "Capture server starting at {:?} interval",
            self.refresh_interval
        );
        let mut shutdown = self.shutdown.clone();
        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);

        let mut refresh = time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = refresh.tick() => {
                    let (summary, closed) = drain_pass(&mut self.capture, &mut lines_rcv);
                    if let Err(err) = self.publish(&summary) {
                        error!("Sink failed, capture server stopping: {err}");
                        if self.shutdown.signal(Reason::ServerStopped) {
                            debug!("Reader task told to release the input");
                        }
                        return Err(err);
                    }
                    if closed {
                        break;
                    }
                }
                reason = &mut shutdown_wait => {
                    info!(?reason, "Capture server shutting down");
                    return Ok(());
                }
            }
        }

        match reader_task.await? {
            Ok(()) => {
                info!("Input source closed, capture server stopping");
                Err(Error::InputClosed)
            }
            Err(err) => {
                error!("Input failed, capture server stopping: {err}");
                Err(Error::Input(err))
            }
        }
    }

    fn publish(&mut self, summary: &PassSummary) -> Result<(), Error> {
        counter!("lines_received")
            .increment(summary.accepted + summary.unmatched + summary.rejected);
        counter!("lines_unmatched").increment(summary.unmatched);
        counter!("samples_rejected").increment(summary.rejected);
        counter!("line_read_errors").increment(summary.read_errors);

        let Some(tick) = summary.tick else {
            return Ok(());
        };
        counter!("passes_flushed").increment(1);
        gauge!("active_sources").set(self.capture.active_sources().count() as f64);
        debug!(
            %tick,
            accepted = summary.accepted,
            unmatched = summary.unmatched,
            rejected = summary.rejected,
            read_errors = summary.read_errors,
            "Pass flushed"
        );

        let tables = self.capture.snapshots();
        for sink in &mut self.sinks {
            sink.publish(&tables)?;
        }
        Ok(())
    }
}

/// Run one pass over every line queued in `lines`, without waiting for more.
///
/// Returns the pass summary and whether the reader task has gone away.
fn drain_pass(
    capture: &mut Capture,
    lines: &mut mpsc::Receiver<LineResult>,
) -> (PassSummary, bool) {
    let mut pass = capture.begin_pass();
    let mut closed = false;
    for _ in 0..LINE_CHANNEL_CAPACITY {
        match lines.try_recv() {
            Ok(Ok(line)) => {
                pass.ingest_line(&line);
            }
            Ok(Err(err)) => {
                warn!("Lost input line: {err}");
                pass.record_read_error();
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                closed = true;
                break;
            }
        }
    }
    (pass.finish(), closed)
}

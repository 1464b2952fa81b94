//! Remote console log appender.
//!
//! Wraps the build's output stream. Every completed line is written through to
//! the original destination, cleaned up, and queued. A single background
//! worker drains the queue on a fixed delay and hands batches to a
//! [`LogSink`]; having exactly one consumer is what keeps remote ordering
//! identical to local ordering.
//!
//! ```text
//!  write() ──► on_line() ──► delegate (always)
//!                   │
//!                   └──► LineQueue ──► worker (every flush_interval) ──► LogSink
//!                                         ▲
//!  close() ── shutdown signal ────────────┘  then final drain of the leftovers
//! ```
//!
//! Shutdown is bounded by `shutdown_timeout`. If the worker is still busy when
//! the bound expires, whatever it has not dequeued yet is abandoned.

use std::io::{self, Write};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::facade::LogSink;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

// Host console notes: ESC[8m "ha:" <payload> ESC[0m
static CONSOLE_NOTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\x1b\[8mha:.*?\x1b\[0m").unwrap());

static ANSI_ESCAPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

/// Strip rendering annotations and surrounding whitespace from a raw line.
pub fn clean_line(raw: &str) -> String {
    let without_notes = CONSOLE_NOTE_REGEX.replace_all(raw, "");
    let plain = ANSI_ESCAPE_REGEX.replace_all(&without_notes, "");
    plain.trim_matches(|c: char| c <= ' ').to_string()
}

#[derive(Debug, Clone)]
pub struct AppenderSettings {
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub shutdown_timeout: Duration,
    /// `None` keeps the queue unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for AppenderSettings {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            queue_capacity: None,
        }
    }
}

/// Producer half of the pending-line queue.
pub enum LineSender {
    Unbounded(mpsc::UnboundedSender<String>),
    Bounded(mpsc::Sender<String>),
}

/// Consumer half of the pending-line queue.
pub enum LineReceiver {
    Unbounded(mpsc::UnboundedReceiver<String>),
    Bounded(mpsc::Receiver<String>),
}

/// FIFO queue of cleaned lines, unbounded unless `capacity` is given.
pub fn line_queue(capacity: Option<usize>) -> (LineSender, LineReceiver) {
    match capacity {
        Some(cap) => {
            let (tx, rx) = mpsc::channel(cap.max(1));
            (LineSender::Bounded(tx), LineReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (LineSender::Unbounded(tx), LineReceiver::Unbounded(rx))
        }
    }
}

impl LineSender {
    /// Enqueue without blocking. Hands the line back when it cannot be queued.
    pub fn offer(&self, line: String) -> Result<(), String> {
        match self {
            LineSender::Unbounded(tx) => tx.send(line).map_err(|e| e.0),
            LineSender::Bounded(tx) => tx.try_send(line).map_err(|e| match e {
                mpsc::error::TrySendError::Full(line) => line,
                mpsc::error::TrySendError::Closed(line) => line,
            }),
        }
    }
}

impl LineReceiver {
    /// Next queued line, without waiting.
    pub fn poll(&mut self) -> Option<String> {
        match self {
            LineReceiver::Unbounded(rx) => rx.try_recv().ok(),
            LineReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.poll() {
            lines.push(line);
        }
        lines
    }
}

/// Drain the queue into batches of at most `batch_size` lines.
/// Returns the number of lines handed to the sink.
pub async fn deliver_pending<K: LogSink + ?Sized>(
    sink: &K,
    queue: &mut LineReceiver,
    batch_size: usize,
) -> usize {
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut delivered = 0;

    while let Some(line) = queue.poll() {
        batch.push(line);
        if batch.len() >= batch_size {
            sink.append_job_log(&batch).await;
            delivered += batch.len();
            batch.clear();
        }
    }

    if !batch.is_empty() {
        sink.append_job_log(&batch).await;
        delivered += batch.len();
    }
    delivered
}

/// Worker loop. Hands the queue back once shutdown is requested so the
/// closing side can drain what is left.
async fn run_worker<K: LogSink + ?Sized>(
    sink: Arc<K>,
    mut queue: LineReceiver,
    flush_interval: Duration,
    batch_size: usize,
    mut shutdown: oneshot::Receiver<()>,
) -> LineReceiver {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(flush_interval) => {}
        }
        let delivered = deliver_pending(sink.as_ref(), &mut queue, batch_size).await;
        if delivered > 0 {
            tracing::trace!(lines = delivered, "Delivered console lines");
        }
    }
    queue
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<LineReceiver>,
}

/// Output stream decorator that ships console lines to a [`LogSink`].
pub struct ConsoleLogAppender<W: Write, K: LogSink + ?Sized + 'static> {
    delegate: W,
    sink: Arc<K>,
    queue: LineSender,
    /// Held until `start()` hands it to the worker.
    idle_receiver: Option<LineReceiver>,
    worker: Option<Worker>,
    partial: Vec<u8>,
    settings: AppenderSettings,
}

impl<W: Write, K: LogSink + ?Sized + 'static> ConsoleLogAppender<W, K> {
    pub fn new(delegate: W, sink: Arc<K>) -> Self {
        Self::with_settings(delegate, sink, AppenderSettings::default())
    }

    pub fn with_settings(delegate: W, sink: Arc<K>, settings: AppenderSettings) -> Self {
        let (queue, receiver) = line_queue(settings.queue_capacity);
        tracing::info!("Initialized TFS remote console log appender");
        Self {
            delegate,
            sink,
            queue,
            idle_receiver: Some(receiver),
            worker: None,
            partial: Vec::new(),
            settings,
        }
    }

    /// Start the delivery worker. Must be called within a tokio runtime.
    /// Calling it again is a no-op.
    pub fn start(&mut self) {
        let Some(receiver) = self.idle_receiver.take() else {
            return;
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.sink),
            receiver,
            self.settings.flush_interval,
            self.settings.batch_size,
            shutdown_rx,
        ));
        self.worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
        tracing::info!("TFS remote console log appender started");
    }

    /// Handle one complete raw line (terminator included).
    ///
    /// The raw bytes always reach the delegate, even when queuing fails.
    pub fn on_line(&mut self, raw: &[u8]) -> io::Result<()> {
        let written = self.delegate.write_all(raw);

        let line = clean_line(&String::from_utf8_lossy(raw));
        if let Err(line) = self.queue.offer(line) {
            tracing::warn!(
                "Failed to add log line: {} to queue, is the logger rolling too fast?",
                line
            );
        }

        written
    }

    /// Emit a trailing line that never received its terminator.
    fn force_eol(&mut self) -> io::Result<()> {
        if self.partial.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.partial);
        self.on_line(&line)
    }

    /// Flush the delegate, stop the worker and deliver what is left.
    ///
    /// Waits at most `shutdown_timeout` for an in-flight delivery. On timeout
    /// the remaining lines are abandoned with a warning. Returns the delegate.
    pub async fn close(mut self) -> io::Result<W> {
        let eol = self.force_eol();
        let flushed = self.delegate.flush();

        let remaining = match self.worker.take() {
            None => self.idle_receiver.take(),
            Some(worker) => {
                // the worker may already be gone; the join below covers that
                let _ = worker.shutdown.send(());
                match tokio::time::timeout(self.settings.shutdown_timeout, worker.handle).await {
                    Ok(Ok(queue)) => {
                        tracing::info!("Log delivery worker has terminated.");
                        Some(queue)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            "Log delivery worker failed: {}, log may be incomplete on remote console.",
                            e
                        );
                        None
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Log appender took more than {} seconds to complete, log may be incomplete on remote console.",
                            self.settings.shutdown_timeout.as_secs()
                        );
                        None
                    }
                }
            }
        };

        if let Some(mut queue) = remaining {
            let lines = queue.drain();
            if !lines.is_empty() {
                tracing::info!("Append {} remaining logs.", lines.len());
                self.sink.append_job_log(&lines).await;
            }
        }

        eol?;
        flushed?;
        Ok(self.delegate)
    }
}

impl<W: Write, K: LogSink + ?Sized + 'static> Write for ConsoleLogAppender<W, K> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (line, tail) = rest.split_at(pos + 1);
            if self.partial.is_empty() {
                self.on_line(line)?;
            } else {
                self.partial.extend_from_slice(line);
                let joined = std::mem::take(&mut self.partial);
                self.on_line(&joined)?;
            }
            rest = tail;
        }
        self.partial.extend_from_slice(rest);
        Ok(buf.len())
    }

    /// Flushes the delegate only; an unterminated line stays buffered.
    fn flush(&mut self) -> io::Result<()> {
        self.delegate.flush()
    }
}

//! Non-blocking asynchronous log pipeline
//!
//! Producers enqueue records and return immediately; a background loop drains
//! the queue and delivers each record to every registered sink concurrently,
//! waiting for all sinks before dequeuing further. Sink failures are reported
//! to the diagnostic stream and never reach the enqueuing caller, so the data
//! path can never be broken by observability.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained tracing
    Trace,
    /// Debug information
    Debug,
    /// Normal operation
    Info,
    /// Recoverable problem
    Warning,
    /// Operation failure
    Error,
    /// Unrecoverable failure
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "TRACE"),
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One log record, produced by a component and consumed once per sink.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Time the record was produced
    pub timestamp: DateTime<Utc>,
    /// Producing component
    pub source: String,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
    /// Optional rendered error chain
    pub exception: Option<String>,
}

impl LogRecord {
    /// Create a record stamped now.
    pub fn new(source: &str, level: LogLevel, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.to_string(),
            level,
            message: message.to_string(),
            exception: None,
        }
    }

    /// Attach a rendered error chain.
    #[must_use]
    pub fn with_exception(mut self, exception: &str) -> Self {
        self.exception = Some(exception.to_string());
        self
    }

    /// Render as a single log line.
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.source,
            self.level,
            self.message
        );
        if let Some(exception) = &self.exception {
            line.push_str(" | ");
            line.push_str(exception);
        }
        line
    }
}

/// Sink delivery errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for log records.
///
/// Any component implementing this trait may be registered with the pipeline.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Sink name used in diagnostic messages
    fn name(&self) -> &str;

    /// Deliver one record.
    async fn deliver(&self, record: &LogRecord) -> Result<(), SinkError>;
}

/// Asynchronous log pipeline.
///
/// Dropping records is only possible after [`LogPipeline::shutdown`]; until
/// then `enqueue` always succeeds without blocking.
pub struct LogPipeline {
    tx: Mutex<Option<mpsc::UnboundedSender<LogRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogPipeline {
    /// Create a pipeline draining into the given sinks.
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();

        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let deliveries = join_all(sinks.iter().map(|sink| sink.deliver(&record))).await;
                for (sink, result) in sinks.iter().zip(deliveries) {
                    if let Err(e) = result {
                        tracing::warn!(sink = sink.name(), error = %e, "log sink delivery failed");
                    }
                }
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a record. Never blocks; drops only during shutdown.
    pub fn enqueue(&self, record: LogRecord) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(record);
        }
    }

    /// Enqueue an info record.
    pub fn info(&self, source: &str, message: &str) {
        self.enqueue(LogRecord::new(source, LogLevel::Info, message));
    }

    /// Enqueue a warning record.
    pub fn warning(&self, source: &str, message: &str) {
        self.enqueue(LogRecord::new(source, LogLevel::Warning, message));
    }

    /// Enqueue an error record.
    pub fn error(&self, source: &str, message: &str) {
        self.enqueue(LogRecord::new(source, LogLevel::Error, message));
    }

    /// Enqueue an error record with a rendered error chain.
    pub fn error_with(&self, source: &str, message: &str, error: &dyn fmt::Display) {
        self.enqueue(LogRecord::new(source, LogLevel::Error, message).with_exception(&error.to_string()));
    }

    /// Close the queue and wait for all pending records to be delivered.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

/// Sink writing formatted lines to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl LogSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&self, record: &LogRecord) -> Result<(), SinkError> {
        println!("{}", record.format_line());
        Ok(())
    }
}

/// Durable file sink with time-bucketed rotation.
///
/// Records land in `{dir}/{prefix}_{bucket}.log` where the bucket changes
/// every hour, so log storage never grows as a single unbounded file.
pub struct RotatingFileSink {
    dir: PathBuf,
    prefix: String,
    state: Mutex<Option<(String, BufWriter<File>)>>,
}

impl RotatingFileSink {
    /// Create a sink writing under `dir` with the given filename prefix.
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            state: Mutex::new(None),
        }
    }

    fn bucket_key() -> String {
        Local::now().format("%Y%m%d_%H").to_string()
    }

    /// Path of the file the current bucket writes to.
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}_{}.log", self.prefix, Self::bucket_key()))
    }

    fn write_line(&self, line: &str) -> Result<(), std::io::Error> {
        let key = Self::bucket_key();
        let mut state = self.state.lock();

        let rotate = match state.as_ref() {
            Some((current, _)) => *current != key,
            None => true,
        };
        if rotate {
            std::fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(format!("{}_{}.log", self.prefix, key)))?;
            *state = Some((key, BufWriter::new(file)));
        }

        if let Some((_, writer)) = state.as_mut() {
            writeln!(writer, "{line}")?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for RotatingFileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.write_line(&record.format_line())?;
        Ok(())
    }
}

//! The dedicated logger thread.
//!
//! Every thread in the pipeline sends [`LogMessage`]s down a single
//! unbounded channel; one logger thread drains it and forwards records to
//! the `tracing` subscriber. Funneling through one consumer keeps record
//! emission ordered and keeps workers from ever blocking on log output.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Fine-grained progress records.
    Debug,
    /// Normal lifecycle records.
    Info,
    /// Something recoverable went wrong.
    Warning,
    /// An item failed and was skipped.
    Error,
    /// The pipeline is going down.
    Critical,
}

/// A single log record produced by a pipeline thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Record severity.
    pub level: LogLevel,
    /// Pre-rendered record text.
    pub text: String,
}

/// What travels down the log channel.
#[derive(Debug, Clone)]
pub enum LogMessage {
    /// A record to emit.
    Record(LogRecord),
    /// Stop the logger thread. Sent exactly once, by the supervisor, after
    /// every producer has finished.
    Shutdown,
}

/// Sending half of the log channel, cloned into every pipeline thread.
pub type LogSender = Sender<LogMessage>;

/// Drains the log channel until the shutdown message arrives.
pub fn log_worker(receiver: Receiver<LogMessage>) {
    while let Ok(message) = receiver.recv() {
        match message {
            LogMessage::Record(record) => emit(&record),
            LogMessage::Shutdown => break,
        }
    }
}

fn emit(record: &LogRecord) {
    match record.level {
        LogLevel::Debug => tracing::debug!("{}", record.text),
        LogLevel::Info => tracing::info!("{}", record.text),
        LogLevel::Warning => tracing::warn!("{}", record.text),
        LogLevel::Error | LogLevel::Critical => tracing::error!("{}", record.text),
    }
}

/// Sends one record down the log channel. A closed channel means the logger
/// is already gone, in which case the record is dropped rather than taking
/// the sender down with it.
pub(crate) fn send(log: &LogSender, level: LogLevel, text: String) {
    let _ = log.send(LogMessage::Record(LogRecord { level, text }));
}

//! The queue filler and the fan-out worker.
//!
//! The filler feeds work items into a bounded channel and finishes with one
//! shutdown message per worker. Workers attach to the shared sketches by
//! descriptor, fold items through the caller's callback, and fold their
//! record totals into the sketches before detaching. Both sides poll with a
//! short timeout so the supervisor's abort flag is observed promptly even
//! when the channel has stalled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::error::{ParsketchError, Result};
use crate::sketch::{SketchDescriptor, SketchSet};

use super::logger::{send, LogLevel, LogSender};
use super::ItemError;

/// How long a blocked channel operation waits before re-checking the abort
/// flag.
pub(crate) const CHANNEL_POLL: Duration = Duration::from_millis(50);

/// What travels down the work channel.
#[derive(Debug)]
pub(crate) enum QueueMessage<T> {
    /// A work item for the callback.
    Item(T),
    /// No more items are coming. Each worker consumes exactly one of these
    /// and stops.
    Shutdown,
}

/// Feeds `items` into the work channel, then sends one shutdown message per
/// worker. Returns early without the shutdown messages when the abort flag
/// is raised or every receiver is gone.
pub(crate) fn fill_queue<T, I>(
    sender: &Sender<QueueMessage<T>>,
    items: I,
    n_workers: usize,
    log: &LogSender,
    abort: &Arc<AtomicBool>,
) where
    I: IntoIterator<Item = T>,
{
    let mut placed = 0usize;
    for item in items {
        let mut message = QueueMessage::Item(item);
        loop {
            if abort.load(Ordering::Relaxed) {
                return;
            }
            match sender.send_timeout(message, CHANNEL_POLL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => message = back,
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
        placed += 1;
        send(log, LogLevel::Debug, format!("item {placed} placed on the queue"));
    }
    send(log, LogLevel::Info, format!("All {placed} items placed on the queue"));

    for _ in 0..n_workers {
        let mut message = QueueMessage::Shutdown;
        loop {
            if abort.load(Ordering::Relaxed) {
                return;
            }
            match sender.send_timeout(message, CHANNEL_POLL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => message = back,
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

/// Body of one fan-out worker.
///
/// Attaches to the sketches named by `descriptors`, folds queue items
/// through `process`, and returns the number of records it processed. An
/// item whose callback fails is logged at error level and skipped; failing
/// to attach is fatal for the worker (and, through the supervisor, for the
/// whole pipeline).
pub(crate) fn worker<T, F>(
    id: usize,
    descriptors: Vec<SketchDescriptor>,
    process: Arc<F>,
    receiver: Receiver<QueueMessage<T>>,
    log: LogSender,
    abort: Arc<AtomicBool>,
) -> Result<u64>
where
    F: Fn(&T, &mut SketchSet) -> std::result::Result<u64, ItemError>,
{
    send(&log, LogLevel::Info, format!("WORKER {id:02} is starting"));
    let mut sketches = SketchSet::attach(&descriptors)?;
    let mut n_records = 0u64;
    let started = Instant::now();

    loop {
        // Checked every iteration, not just on an idle queue: after a
        // fail-fast the items still sitting in the channel must not be
        // drained.
        if abort.load(Ordering::Relaxed) {
            return Ok(n_records);
        }
        match receiver.recv_timeout(CHANNEL_POLL) {
            Ok(QueueMessage::Item(item)) => match process(&item, &mut sketches) {
                Ok(n) => {
                    n_records += n;
                    let rate =
                        n_records as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
                    send(
                        &log,
                        LogLevel::Debug,
                        format!(
                            "WORKER {id:02} has processed {n_records} records at {rate:.3} records/sec"
                        ),
                    );
                }
                Err(e) => {
                    send(
                        &log,
                        LogLevel::Error,
                        format!("WORKER {id:02} failed to process an item: {e}"),
                    );
                }
            },
            Ok(QueueMessage::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ParsketchError::WorkerFailed(format!(
                    "WORKER {id:02}: work queue closed before the shutdown message"
                )));
            }
        }
    }

    sketches.add_records_processed(n_records);
    drop(sketches);
    let rate = n_records as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
    send(
        &log,
        LogLevel::Info,
        format!("WORKER {id:02} has finished processing {n_records} records at {rate:.3} records/sec"),
    );
    Ok(n_records)
}

//! The parallel build-and-merge pipeline.
//!
//! [`parallel_add`] fans work items out over a fixed pool of worker threads
//! that each fold items into their own private set of sketches, then merges
//! the per-worker sketches down to one set with a binary merge tree. The
//! supervisor polls its threads and fails fast: the first abnormal worker
//! death aborts everything, and no partial result escapes.
//!
//! Thread roles:
//!
//! - one **logger** draining the log channel ([`logger::log_worker`]);
//! - one **queue filler** feeding the bounded work channel and finishing
//!   with one shutdown message per worker;
//! - `n` **workers** running the caller's callback against attached sketch
//!   handles;
//! - per merge round, one short-lived **merge worker** per sketch pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};

use crate::error::{ParsketchError, Result};
use crate::sketch::{
    CountMin, CountMinArgs, HeavyHitters, HeavyHittersArgs, HyperLogLog, HyperLogLogArgs,
    SharedSketch, SketchDescriptor, SketchSet,
};

pub mod logger;
mod merge;
mod worker;

pub use logger::{log_worker, LogLevel, LogMessage, LogRecord, LogSender};
pub use merge::parallel_merging;

use logger::send;

/// Error type the item callback may return. Item failures are logged and
/// skipped; they never abort the pipeline.
pub type ItemError = Box<dyn std::error::Error + Send + Sync>;

/// The work channel holds this many items per worker.
const QUEUE_CAPACITY_PER_WORKER: usize = 3;

/// Configuration for [`parallel_add`].
///
/// At least one sketch kind must be requested. The worker count defaults to
/// the number of physical cores.
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// Number of fan-out workers. `None` means one per physical core.
    pub n_workers: Option<usize>,
    /// Build a Count-Min sketch with these args.
    pub cms: Option<CountMinArgs>,
    /// Build a heavy-hitters sketch with these args.
    pub hh: Option<HeavyHittersArgs>,
    /// Build a HyperLogLog sketch with these args.
    pub hll: Option<HyperLogLogArgs>,
    /// How often the supervisor polls its threads. `None` means one second.
    pub poll_interval: Option<Duration>,
}

impl ParallelConfig {
    /// An empty configuration. Request at least one sketch kind before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit worker count. Must be greater than 0.
    pub fn with_workers(mut self, n: usize) -> Self {
        self.n_workers = Some(n);
        self
    }

    /// Requests a Count-Min sketch.
    pub fn with_cms(mut self, args: CountMinArgs) -> Self {
        self.cms = Some(args);
        self
    }

    /// Requests a heavy-hitters sketch.
    pub fn with_hh(mut self, args: HeavyHittersArgs) -> Self {
        self.hh = Some(args);
        self
    }

    /// Requests a HyperLogLog sketch.
    pub fn with_hll(mut self, args: HyperLogLogArgs) -> Self {
        self.hll = Some(args);
        self
    }

    /// Sets the supervisor poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

/// Owns every pipeline thread and tears the pipeline down on failure.
struct Supervisor {
    abort: Arc<AtomicBool>,
    log: LogSender,
    logger: Option<JoinHandle<()>>,
    filler: Option<JoinHandle<()>>,
    workers: Vec<Option<JoinHandle<Result<u64>>>>,
    poll: Duration,
}

impl Supervisor {
    /// Raises the abort flag and joins every non-logger thread, discarding
    /// their outcomes.
    fn halt_pipeline(&mut self) {
        self.abort.store(true, Ordering::SeqCst);
        for slot in &mut self.workers {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
        if let Some(handle) = self.filler.take() {
            let _ = handle.join();
        }
    }

    /// Stops the logger thread. Called on every exit path, after all other
    /// threads are down, so no record is lost.
    fn shutdown_logger(&mut self) {
        let _ = self.log.send(LogMessage::Shutdown);
        if let Some(handle) = self.logger.take() {
            let _ = handle.join();
        }
    }

    /// Tears the whole pipeline down and produces the error to return.
    fn fail_fast(&mut self, reason: String) -> ParsketchError {
        send(
            &self.log,
            LogLevel::Critical,
            format!("Terminating the pipeline: {reason}"),
        );
        self.halt_pipeline();
        self.shutdown_logger();
        ParsketchError::WorkerFailed(reason)
    }

    /// Polls worker and filler threads until every worker has finished
    /// normally, failing fast on the first abnormal death.
    fn monitor(&mut self) -> Result<()> {
        loop {
            if let Some(handle) = &self.filler {
                if handle.is_finished() {
                    let panicked = match self.filler.take() {
                        Some(handle) => handle.join().is_err(),
                        None => false,
                    };
                    if panicked {
                        return Err(self.fail_fast("the queue filler panicked".into()));
                    }
                }
            }
            let mut outstanding = false;
            for id in 0..self.workers.len() {
                let finished = match &self.workers[id] {
                    Some(handle) => handle.is_finished(),
                    None => false,
                };
                if finished {
                    if let Some(handle) = self.workers[id].take() {
                        match handle.join() {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                return Err(
                                    self.fail_fast(format!("WORKER {id:02} failed: {e}"))
                                );
                            }
                            Err(_) => {
                                return Err(
                                    self.fail_fast(format!("WORKER {id:02} panicked"))
                                );
                            }
                        }
                    }
                }
                outstanding |= self.workers[id].is_some();
            }
            if !outstanding {
                break;
            }
            thread::sleep(self.poll);
        }
        if let Some(handle) = self.filler.take() {
            if handle.join().is_err() {
                return Err(self.fail_fast("the queue filler panicked".into()));
            }
        }
        Ok(())
    }
}

/// Builds the requested sketches from `items` in parallel and returns the
/// merged result.
///
/// `items` is split across `n_workers` workers through a bounded queue;
/// each worker calls `process_q_item` once per item against its own sketch
/// set and reports how many records the item contained. Item-level callback
/// errors are logged and skipped. Abnormal worker death aborts the whole
/// run with [`ParsketchError::WorkerFailed`] and unlinks every segment the
/// run created.
pub fn parallel_add<T, I, F>(
    items: I,
    process_q_item: F,
    config: ParallelConfig,
) -> Result<SketchSet>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    F: Fn(&T, &mut SketchSet) -> std::result::Result<u64, ItemError> + Send + Sync + 'static,
{
    if config.cms.is_none() && config.hh.is_none() && config.hll.is_none() {
        return Err(ParsketchError::Config(
            "parallel_add requires at least one sketch kind".into(),
        ));
    }
    let n_workers = match config.n_workers {
        Some(0) => {
            return Err(ParsketchError::Config(
                "n_workers must be greater than 0".into(),
            ));
        }
        Some(n) => n,
        None => num_cpus::get_physical().max(1),
    };
    let poll = config.poll_interval.unwrap_or(Duration::from_secs(1));

    // One private sketch of each requested kind per worker. These owner
    // handles stay on this thread; workers only ever see descriptors.
    let mut cms_owners = Vec::new();
    let mut hh_owners = Vec::new();
    let mut hll_owners = Vec::new();
    for _ in 0..n_workers {
        if let Some(args) = &config.cms {
            cms_owners.push(CountMin::create(args)?);
        }
        if let Some(args) = &config.hh {
            hh_owners.push(HeavyHitters::create(args)?);
        }
        if let Some(args) = &config.hll {
            hll_owners.push(HyperLogLog::create(args)?);
        }
    }
    let descriptors_for = |id: usize| -> Vec<SketchDescriptor> {
        let mut descriptors = Vec::new();
        if let Some(sketch) = cms_owners.get(id) {
            descriptors.push(sketch.descriptor());
        }
        if let Some(sketch) = hh_owners.get(id) {
            descriptors.push(sketch.descriptor());
        }
        if let Some(sketch) = hll_owners.get(id) {
            descriptors.push(sketch.descriptor());
        }
        descriptors
    };

    let (work_tx, work_rx) = bounded(QUEUE_CAPACITY_PER_WORKER * n_workers);
    let (log_tx, log_rx) = unbounded();

    let logger = thread::Builder::new()
        .name("parsketch-logger".into())
        .spawn(move || log_worker(log_rx))?;

    let mut sup = Supervisor {
        abort: Arc::new(AtomicBool::new(false)),
        log: log_tx,
        logger: Some(logger),
        filler: None,
        workers: Vec::with_capacity(n_workers),
        poll,
    };

    let process = Arc::new(process_q_item);
    let items = items.into_iter();
    let spawned = (|| -> Result<()> {
        let filler_tx = work_tx;
        let filler_log = sup.log.clone();
        let filler_abort = Arc::clone(&sup.abort);
        sup.filler = Some(
            thread::Builder::new()
                .name("parsketch-filler".into())
                .spawn(move || {
                    worker::fill_queue(&filler_tx, items, n_workers, &filler_log, &filler_abort);
                })?,
        );
        for id in 0..n_workers {
            let descriptors = descriptors_for(id);
            let process = Arc::clone(&process);
            let rx = work_rx.clone();
            let log = sup.log.clone();
            let abort = Arc::clone(&sup.abort);
            let handle = thread::Builder::new()
                .name(format!("parsketch-worker-{id:02}"))
                .spawn(move || worker::worker(id, descriptors, process, rx, log, abort))?;
            sup.workers.push(Some(handle));
        }
        Ok(())
    })();
    drop(work_rx);
    if let Err(e) = spawned {
        sup.halt_pipeline();
        sup.shutdown_logger();
        return Err(e);
    }

    if let Err(e) = sup.monitor() {
        // Dropping the owner vectors unlinks every segment this run made.
        return Err(e);
    }

    // All workers finished normally; fold each kind down to one sketch, in
    // canonical order.
    let mut result = SketchSet::default();
    let merged = (|| -> Result<()> {
        if !cms_owners.is_empty() {
            send(&sup.log, LogLevel::Info, "Merging the cms sketches".into());
            result.cms = Some(parallel_merging(std::mem::take(&mut cms_owners), &sup.log)?);
        }
        if !hh_owners.is_empty() {
            send(&sup.log, LogLevel::Info, "Merging the hh sketches".into());
            result.hh = Some(parallel_merging(std::mem::take(&mut hh_owners), &sup.log)?);
        }
        if !hll_owners.is_empty() {
            send(&sup.log, LogLevel::Info, "Merging the hll sketches".into());
            result.hll = Some(parallel_merging(std::mem::take(&mut hll_owners), &sup.log)?);
        }
        Ok(())
    })();
    sup.shutdown_logger();
    merged?;
    Ok(result)
}

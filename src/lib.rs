//! # Parsketch
//!
//! Mergeable probabilistic sketches in shared memory, with a parallel
//! pipeline that builds them across worker threads and folds the partial
//! results back into one.
//!
//! ## Overview
//!
//! Parsketch separates two concerns that streaming-summary libraries often
//! tangle together: the sketches themselves, and the machinery that lets
//! many workers fill them concurrently. Each sketch lives in a named,
//! file-backed shared-memory segment; any thread can attach its own handle
//! by name, so sketches cross thread boundaries as small descriptors rather
//! than as data.
//!
//! ### Key Features
//!
//! *   **Three sketch families:** Count-Min frequency estimation with
//!     conservative updating, heavy-hitters (topkapi) top-k tracking, and
//!     HyperLogLog cardinality estimation.
//! *   **Shared-memory residency:** sketch state is memory-mapped, zeroed on
//!     creation, and unlinked exactly once when its owner is dropped.
//! *   **Parallel construction:** [`parallel_add`] fans an item stream out
//!     over a pool of workers, each filling a private set of sketches.
//! *   **Tournament merging:** [`parallel_merging`] folds per-worker
//!     sketches pairwise over `ceil(log2 n)` rounds, one thread per pair.
//! *   **Fail-fast supervision:** the first abnormal worker death aborts
//!     the whole run; no partial result escapes and no segment leaks.
//!
//! ## Architecture
//!
//! A [`parallel_add`] run spawns a dedicated logger thread, a queue filler,
//! and `n` workers. Work items flow through a bounded channel (capacity
//! `3 * n`), followed by exactly `n` shutdown messages so every worker
//! stops deterministically. The supervisor polls its threads roughly once
//! per second: a worker that returns an error or panics takes the whole
//! pipeline down. After a clean fan-out, each sketch kind is merged in the
//! canonical `cms`, `hh`, `hll` order and the caller receives one
//! [`SketchSet`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parsketch::{parallel_add, CountMinArgs, ParallelConfig};
//!
//! let config = ParallelConfig::new()
//!     .with_workers(4)
//!     .with_cms(CountMinArgs { width: 1 << 20, depth: 8 });
//!
//! let result = parallel_add(
//!     chunked_lines,
//!     |chunk, sketches| {
//!         let cms = sketches.cms.as_mut().ok_or("cms missing")?;
//!         for line in chunk {
//!             cms.add(line.as_bytes(), 1);
//!         }
//!         Ok(chunk.len() as u64)
//!     },
//!     config,
//! )?;
//! let cms = result.into_cms().ok_or("cms missing")?;
//! println!("total added: {}", cms.n_added());
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** `unsafe` appears only at the two mapping
//!   sites in the `segment` module; single-writer access per segment is a
//!   pipeline invariant, not a lock.
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library
//!   (enforced by clippy lints). Worker and merge-worker panics are still
//!   caught at the joins and reported as errors.
//! * **Comprehensive Errors:** All failures correspond to a
//!   [`ParsketchError`] variant.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

pub mod error;
pub mod parallel;
pub mod segment;
pub mod sketch;

pub use error::{ParsketchError, Result};
pub use parallel::{parallel_add, parallel_merging, ItemError, ParallelConfig};
pub use sketch::{
    CountMin, CountMinArgs, HeavyHitters, HeavyHittersArgs, HyperLogLog, HyperLogLogArgs,
    SharedSketch, SketchArgs, SketchDescriptor, SketchKind, SketchSet,
};

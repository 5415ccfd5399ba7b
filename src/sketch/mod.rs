//! Mergeable probabilistic sketches backed by shared-memory segments.
//!
//! Three sketch families are provided, always referred to in the canonical
//! order `cms`, `hh`, `hll`:
//!
//! - [`CountMin`] — frequency estimation with 32-bit linear counters and
//!   conservative updating.
//! - [`HeavyHitters`] — approximate top-k frequent keys (topkapi).
//! - [`HyperLogLog`] — cardinality estimation.
//!
//! Each sketch lives in a named [`Segment`](crate::segment::Segment) and is
//! described by a [`SketchDescriptor`], which is all another thread needs to
//! attach its own handle. Construction arguments ([`CountMinArgs`] etc.) are
//! value types compared with `==` before any merge.

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::Result;

mod countmin;
mod heavyhitters;
mod hyperloglog;

pub use countmin::{CountMin, CountMinArgs};
pub use heavyhitters::{HeavyHitters, HeavyHittersArgs};
pub use hyperloglog::{HyperLogLog, HyperLogLogArgs};

/// The three sketch families, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SketchKind {
    /// Count-Min frequency sketch.
    CountMin,
    /// Heavy-hitters (topkapi) sketch.
    HeavyHitters,
    /// HyperLogLog cardinality sketch.
    HyperLogLog,
}

impl fmt::Display for SketchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMin => f.write_str("cms"),
            Self::HeavyHitters => f.write_str("hh"),
            Self::HyperLogLog => f.write_str("hll"),
        }
    }
}

/// Construction arguments for any sketch kind.
///
/// A closed enum instead of a string tag: attaching dispatches exhaustively,
/// so an unknown kind is unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SketchArgs {
    /// Count-Min arguments.
    CountMin(CountMinArgs),
    /// Heavy-hitters arguments.
    HeavyHitters(HeavyHittersArgs),
    /// HyperLogLog arguments.
    HyperLogLog(HyperLogLogArgs),
}

impl SketchArgs {
    /// The kind these arguments construct.
    pub fn kind(&self) -> SketchKind {
        match self {
            Self::CountMin(_) => SketchKind::CountMin,
            Self::HeavyHitters(_) => SketchKind::HeavyHitters,
            Self::HyperLogLog(_) => SketchKind::HyperLogLog,
        }
    }
}

/// Everything needed to attach to an existing sketch from another thread:
/// its construction arguments plus the name of its backing segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchDescriptor {
    /// Construction arguments the sketch was created with.
    pub args: SketchArgs,
    /// Name of the shared-memory segment holding the sketch data.
    pub segment: String,
}

/// Common contract for sketches that live in shared-memory segments.
///
/// `create` allocates a fresh zeroed segment; `attach` binds to an existing
/// one by name and never allocates. Merging requires both sides to carry
/// equal construction args and folds `other` into `self`.
pub trait SharedSketch: Sized {
    /// The construction-argument record for this sketch kind.
    type Args: Clone + PartialEq + fmt::Debug;

    /// Which family this sketch belongs to.
    const KIND: SketchKind;

    /// Allocates a new zeroed sketch in a fresh segment.
    fn create(args: &Self::Args) -> Result<Self>;

    /// Attaches to an existing sketch by segment name. Fails if the segment
    /// is missing or its size disagrees with `args`.
    fn attach(args: &Self::Args, segment: &str) -> Result<Self>;

    /// Attaches using a full descriptor. Fails with a configuration error if
    /// the descriptor is for a different sketch kind.
    fn attach_descriptor(desc: &SketchDescriptor) -> Result<Self>;

    /// Folds `other` into `self` element-wise. Both sketches must carry
    /// equal construction args.
    fn merge(&mut self, other: &Self) -> Result<()>;

    /// The construction args this sketch was built with.
    fn args(&self) -> &Self::Args;

    /// Name of the backing segment.
    fn segment_name(&self) -> &str;

    /// Descriptor sufficient for another thread to attach.
    fn descriptor(&self) -> SketchDescriptor;

    /// Folds `n` processed records into the sketch's record counter.
    /// A no-op for kinds without one.
    fn add_records_processed(&mut self, n: u64) {
        let _ = n;
    }
}

/// The bundle of sketches a pipeline run works with.
///
/// Fields follow the canonical order. Workers receive an attached set, the
/// caller receives the merged owners back; `into_cms` and friends extract
/// individual results.
#[derive(Debug, Default)]
pub struct SketchSet {
    /// Count-Min sketch, if requested.
    pub cms: Option<CountMin>,
    /// Heavy-hitters sketch, if requested.
    pub hh: Option<HeavyHitters>,
    /// HyperLogLog sketch, if requested.
    pub hll: Option<HyperLogLog>,
}

impl SketchSet {
    /// Attaches to every sketch named by `descriptors`.
    ///
    /// At most one descriptor per kind is expected; a duplicate kind is a
    /// configuration error.
    pub fn attach(descriptors: &[SketchDescriptor]) -> Result<Self> {
        let mut set = Self::default();
        for desc in descriptors {
            match &desc.args {
                SketchArgs::CountMin(_) => {
                    if set.cms.is_some() {
                        return Err(crate::error::ParsketchError::Config(
                            "duplicate cms descriptor".into(),
                        ));
                    }
                    set.cms = Some(CountMin::attach_descriptor(desc)?);
                }
                SketchArgs::HeavyHitters(_) => {
                    if set.hh.is_some() {
                        return Err(crate::error::ParsketchError::Config(
                            "duplicate hh descriptor".into(),
                        ));
                    }
                    set.hh = Some(HeavyHitters::attach_descriptor(desc)?);
                }
                SketchArgs::HyperLogLog(_) => {
                    if set.hll.is_some() {
                        return Err(crate::error::ParsketchError::Config(
                            "duplicate hll descriptor".into(),
                        ));
                    }
                    set.hll = Some(HyperLogLog::attach_descriptor(desc)?);
                }
            }
        }
        Ok(set)
    }

    /// Folds `n` processed records into every sketch that tracks them.
    pub fn add_records_processed(&mut self, n: u64) {
        if let Some(cms) = &mut self.cms {
            cms.add_records_processed(n);
        }
        if let Some(hh) = &mut self.hh {
            hh.add_records_processed(n);
        }
        if let Some(hll) = &mut self.hll {
            hll.add_records_processed(n);
        }
    }

    /// Extracts the Count-Min sketch.
    pub fn into_cms(self) -> Option<CountMin> {
        self.cms
    }

    /// Extracts the heavy-hitters sketch.
    pub fn into_hh(self) -> Option<HeavyHitters> {
        self.hh
    }

    /// Extracts the HyperLogLog sketch.
    pub fn into_hll(self) -> Option<HyperLogLog> {
        self.hll
    }
}

/// Seeded 64-bit hash of a key. All sketches hash through this so that
/// identical keys land identically across threads and runs.
pub(crate) fn hash_key(key: &[u8], seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(key);
    hasher.finish()
}

/// Reads a little-endian `u32` from `bytes` at `offset`.
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

/// Writes a little-endian `u32` into `bytes` at `offset`.
pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian `u64` from `bytes` at `offset`.
pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

/// Writes a little-endian `u64` into `bytes` at `offset`.
pub(crate) fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

//! Count-Min frequency sketch with 32-bit linear counters.
//!
//! Counters are updated *conservatively*: an add first queries the current
//! estimate and then raises only the counters sitting below the new value,
//! which tightens the one-sided overestimation error at no extra cost.
//!
//! Segment layout, little-endian throughout:
//!
//! ```text
//! [ depth * width * u32 counters ][ n_added u64 ][ n_records u64 ]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ParsketchError, Result};
use crate::segment::Segment;

use super::{
    hash_key, read_u32, read_u64, write_u32, write_u64, SharedSketch, SketchArgs,
    SketchDescriptor, SketchKind,
};

/// Construction arguments for a [`CountMin`] sketch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMinArgs {
    /// Number of counters per row. Error scales with `e / width`.
    pub width: u64,
    /// Number of hash rows. Failure probability scales with `exp(-depth)`.
    pub depth: u64,
}

impl CountMinArgs {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.depth == 0 {
            return Err(ParsketchError::Config(
                "count-min width and depth must be greater than 0".into(),
            ));
        }
        self.segment_len()?;
        Ok(())
    }

    /// Total byte size of the backing segment for these args.
    fn segment_len(&self) -> Result<usize> {
        self.depth
            .checked_mul(self.width)
            .and_then(|cells| cells.checked_mul(4))
            .and_then(|counters| counters.checked_add(16))
            .and_then(|total| usize::try_from(total).ok())
            .ok_or_else(|| {
                ParsketchError::Config(format!(
                    "count-min {}x{} overflows the addressable segment size",
                    self.depth, self.width
                ))
            })
    }
}

/// A Count-Min sketch living in a shared-memory segment.
#[derive(Debug)]
pub struct CountMin {
    args: CountMinArgs,
    segment: Segment,
    // Per-row column indices, reused across adds to avoid reallocation.
    cols: Vec<usize>,
}

impl CountMin {
    fn counters_len(&self) -> usize {
        (self.args.depth * self.args.width * 4) as usize
    }

    fn fill_cols(args: &CountMinArgs, cols: &mut Vec<usize>, key: &[u8]) {
        cols.clear();
        for row in 0..args.depth {
            cols.push((hash_key(key, row) % args.width) as usize);
        }
    }

    /// Estimated number of times `key` has been added.
    pub fn query(&self, key: &[u8]) -> u32 {
        let bytes = self.segment.bytes();
        let width = self.args.width as usize;
        let mut estimate = u32::MAX;
        for row in 0..self.args.depth {
            let col = (hash_key(key, row) % self.args.width) as usize;
            let offset = (row as usize * width + col) * 4;
            estimate = estimate.min(read_u32(bytes, offset));
        }
        estimate
    }

    /// Adds `value` observations of `key`, conservatively.
    pub fn add(&mut self, key: &[u8], value: u32) {
        let width = self.args.width as usize;
        let mut cols = std::mem::take(&mut self.cols);
        Self::fill_cols(&self.args, &mut cols, key);

        let bytes = self.segment.bytes_mut();
        let mut estimate = u32::MAX;
        for (row, &col) in cols.iter().enumerate() {
            estimate = estimate.min(read_u32(bytes, (row * width + col) * 4));
        }
        let new_count = estimate.saturating_add(value);
        for (row, &col) in cols.iter().enumerate() {
            let offset = (row * width + col) * 4;
            if read_u32(bytes, offset) < new_count {
                write_u32(bytes, offset, new_count);
            }
        }
        self.cols = cols;

        let n_added_off = self.counters_len();
        let bytes = self.segment.bytes_mut();
        let n_added = read_u64(bytes, n_added_off).saturating_add(u64::from(value));
        write_u64(bytes, n_added_off, n_added);
    }

    /// Adds one observation of every `ngram`-byte window of `key`. A key
    /// shorter than `ngram` is added whole.
    pub fn add_ngram(&mut self, key: &[u8], ngram: usize) {
        if key.len() <= ngram || ngram == 0 {
            self.add(key, 1);
            return;
        }
        for window in key.windows(ngram) {
            self.add(window, 1);
        }
    }

    /// Total number of element additions, summed over merges.
    pub fn n_added(&self) -> u64 {
        read_u64(self.segment.bytes(), self.counters_len())
    }

    /// Total number of records processed, summed over merges.
    pub fn n_records(&self) -> u64 {
        read_u64(self.segment.bytes(), self.counters_len() + 8)
    }
}

impl SharedSketch for CountMin {
    type Args = CountMinArgs;

    const KIND: SketchKind = SketchKind::CountMin;

    fn create(args: &CountMinArgs) -> Result<Self> {
        args.validate()?;
        let segment = Segment::create(args.segment_len()?)?;
        Ok(Self {
            args: args.clone(),
            segment,
            cols: Vec::with_capacity(args.depth as usize),
        })
    }

    fn attach(args: &CountMinArgs, segment: &str) -> Result<Self> {
        args.validate()?;
        let segment = Segment::attach(segment, args.segment_len()?)?;
        Ok(Self {
            args: args.clone(),
            segment,
            cols: Vec::with_capacity(args.depth as usize),
        })
    }

    fn attach_descriptor(desc: &SketchDescriptor) -> Result<Self> {
        match &desc.args {
            SketchArgs::CountMin(args) => Self::attach(args, &desc.segment),
            other => Err(ParsketchError::Config(format!(
                "descriptor holds {} args, expected cms",
                other.kind()
            ))),
        }
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        if self.args != other.args {
            return Err(ParsketchError::ArgsMismatch(format!(
                "cannot merge cms {:?} with {:?}",
                self.args, other.args
            )));
        }
        let counters_len = self.counters_len();
        let ours = self.segment.bytes_mut();
        let theirs = other.segment.bytes();
        for offset in (0..counters_len).step_by(4) {
            let sum = read_u32(ours, offset).saturating_add(read_u32(theirs, offset));
            write_u32(ours, offset, sum);
        }
        for offset in [counters_len, counters_len + 8] {
            let sum = read_u64(ours, offset).saturating_add(read_u64(theirs, offset));
            write_u64(ours, offset, sum);
        }
        Ok(())
    }

    fn args(&self) -> &CountMinArgs {
        &self.args
    }

    fn segment_name(&self) -> &str {
        self.segment.name()
    }

    fn descriptor(&self) -> SketchDescriptor {
        SketchDescriptor {
            args: SketchArgs::CountMin(self.args.clone()),
            segment: self.segment.name().to_owned(),
        }
    }

    fn add_records_processed(&mut self, n: u64) {
        let offset = self.counters_len() + 8;
        let bytes = self.segment.bytes_mut();
        let n_records = read_u64(bytes, offset).saturating_add(n);
        write_u64(bytes, offset, n_records);
    }
}

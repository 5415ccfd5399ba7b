//! HyperLogLog cardinality sketch with 64-bit hashing.
//!
//! The segment holds `m = 2^p` one-byte registers and nothing else. The
//! low `p` bits of a key's hash pick the register; the rank of the first
//! set bit in the remaining `64 - p` bits is what the register tracks.
//! Merging is an element-wise maximum, so merge order never changes the
//! result. Low cardinalities fall back to linear counting.

use serde::{Deserialize, Serialize};

use crate::error::{ParsketchError, Result};
use crate::segment::Segment;

use super::{hash_key, SharedSketch, SketchArgs, SketchDescriptor, SketchKind};

/// Smallest supported precision.
pub const MIN_P: u8 = 7;
/// Largest supported precision.
pub const MAX_P: u8 = 16;

/// Construction arguments for a [`HyperLogLog`] sketch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperLogLogArgs {
    /// Precision. The sketch uses `2^p` registers; relative error is about
    /// `1.04 / sqrt(2^p)`. Must lie in `[7, 16]`.
    pub p: u8,
    /// Hash seed. Sketches hashed with different seeds must not be merged.
    pub seed: u64,
}

impl HyperLogLogArgs {
    fn validate(&self) -> Result<()> {
        if !(MIN_P..=MAX_P).contains(&self.p) {
            return Err(ParsketchError::Config(format!(
                "hyperloglog precision must lie in [{MIN_P}, {MAX_P}], got {}",
                self.p
            )));
        }
        Ok(())
    }

    /// Number of registers.
    fn m(&self) -> usize {
        1usize << self.p
    }
}

/// A HyperLogLog sketch living in a shared-memory segment.
#[derive(Debug)]
pub struct HyperLogLog {
    args: HyperLogLogArgs,
    segment: Segment,
    // Bias correction constant for m registers.
    alpha: f64,
}

impl HyperLogLog {
    fn alpha(m: usize) -> f64 {
        0.7213 / (1.0 + 1.079 / m as f64)
    }

    /// Adds `key` to the sketch.
    pub fn add(&mut self, key: &[u8]) {
        let hash = hash_key(key, self.args.seed);
        let idx = (hash & (self.args.m() as u64 - 1)) as usize;
        let bits = hash >> self.args.p;
        // bits has at least p leading zeros, so rank peaks at 64 - p + 1
        // when the remainder is all zeros.
        let rank = (bits.leading_zeros() as u8) - self.args.p + 1;
        let registers = self.segment.bytes_mut();
        if registers[idx] < rank {
            registers[idx] = rank;
        }
    }

    /// Adds every `ngram`-byte window of `key`. A key shorter than `ngram`
    /// is added whole.
    pub fn add_ngram(&mut self, key: &[u8], ngram: usize) {
        if key.len() <= ngram || ngram == 0 {
            self.add(key);
            return;
        }
        for window in key.windows(ngram) {
            self.add(window);
        }
    }

    /// Estimated number of distinct keys added.
    pub fn query(&self) -> f64 {
        let registers = self.segment.bytes();
        let m = self.args.m() as f64;
        let mut sum = 0.0;
        let mut zeros = 0u64;
        for &register in registers {
            sum += (-f64::from(register)).exp2();
            if register == 0 {
                zeros += 1;
            }
        }
        let raw = self.alpha * m * m / sum;
        if zeros > 0 && raw <= 2.5 * m {
            // Linear counting is more accurate in this regime.
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
    }
}

impl SharedSketch for HyperLogLog {
    type Args = HyperLogLogArgs;

    const KIND: SketchKind = SketchKind::HyperLogLog;

    fn create(args: &HyperLogLogArgs) -> Result<Self> {
        args.validate()?;
        let segment = Segment::create(args.m())?;
        Ok(Self {
            args: args.clone(),
            segment,
            alpha: Self::alpha(args.m()),
        })
    }

    fn attach(args: &HyperLogLogArgs, segment: &str) -> Result<Self> {
        args.validate()?;
        let segment = Segment::attach(segment, args.m())?;
        Ok(Self {
            args: args.clone(),
            segment,
            alpha: Self::alpha(args.m()),
        })
    }

    fn attach_descriptor(desc: &SketchDescriptor) -> Result<Self> {
        match &desc.args {
            SketchArgs::HyperLogLog(args) => Self::attach(args, &desc.segment),
            other => Err(ParsketchError::Config(format!(
                "descriptor holds {} args, expected hll",
                other.kind()
            ))),
        }
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        if self.args != other.args {
            return Err(ParsketchError::ArgsMismatch(format!(
                "cannot merge hll {:?} with {:?}",
                self.args, other.args
            )));
        }
        let ours = self.segment.bytes_mut();
        let theirs = other.segment.bytes();
        for (ours, theirs) in ours.iter_mut().zip(theirs) {
            if *ours < *theirs {
                *ours = *theirs;
            }
        }
        Ok(())
    }

    fn args(&self) -> &HyperLogLogArgs {
        &self.args
    }

    fn segment_name(&self) -> &str {
        self.segment.name()
    }

    fn descriptor(&self) -> SketchDescriptor {
        SketchDescriptor {
            args: SketchArgs::HyperLogLog(self.args.clone()),
            segment: self.segment.name().to_owned(),
        }
    }
}

//! Heavy-hitters sketch based on the topkapi algorithm.
//!
//! Each cell stores a candidate key alongside a count that behaves like a
//! majority-vote register: a matching key raises it, a non-matching key
//! lowers it, and once it is beaten the incoming key takes the cell over
//! with the surplus. Candidates are re-derived from the cells on every
//! query; there is no hidden cached state.
//!
//! Segment layout, little-endian throughout:
//!
//! ```text
//! [ depth * width * max_key_len key bytes ]
//! [ depth * width * u32 counts ]
//! [ depth * width * u8 key lengths ]
//! [ n_added u64 ][ n_records u64 ]
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ParsketchError, Result};
use crate::segment::Segment;

use super::{
    hash_key, read_u32, read_u64, write_u32, write_u64, SharedSketch, SketchArgs,
    SketchDescriptor, SketchKind,
};

/// Construction arguments for a [`HeavyHitters`] sketch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeavyHittersArgs {
    /// Number of cells per row.
    pub width: u64,
    /// Number of hash rows.
    pub depth: u64,
    /// Keys longer than this are truncated before insertion.
    pub max_key_len: u8,
    /// Default query threshold as a fraction of all added elements.
    pub phi: f64,
}

impl HeavyHittersArgs {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.depth == 0 {
            return Err(ParsketchError::Config(
                "heavy-hitters width and depth must be greater than 0".into(),
            ));
        }
        if self.max_key_len == 0 {
            return Err(ParsketchError::Config(
                "heavy-hitters max_key_len must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.phi) {
            return Err(ParsketchError::Config(format!(
                "heavy-hitters phi must lie in [0, 1], got {}",
                self.phi
            )));
        }
        self.segment_len()?;
        Ok(())
    }

    fn cells(&self) -> Option<u64> {
        self.depth.checked_mul(self.width)
    }

    fn segment_len(&self) -> Result<usize> {
        self.cells()
            .and_then(|cells| {
                let keys = cells.checked_mul(u64::from(self.max_key_len))?;
                let counts = cells.checked_mul(4)?;
                keys.checked_add(counts)?
                    .checked_add(cells)? // key lengths
                    .checked_add(16)
            })
            .and_then(|total| usize::try_from(total).ok())
            .ok_or_else(|| {
                ParsketchError::Config(format!(
                    "heavy-hitters {}x{} overflows the addressable segment size",
                    self.depth, self.width
                ))
            })
    }
}

/// A heavy-hitters sketch living in a shared-memory segment.
#[derive(Debug)]
pub struct HeavyHitters {
    args: HeavyHittersArgs,
    segment: Segment,
}

impl HeavyHitters {
    fn cells(&self) -> usize {
        (self.args.depth * self.args.width) as usize
    }

    fn counts_off(&self) -> usize {
        self.cells() * self.args.max_key_len as usize
    }

    fn lens_off(&self) -> usize {
        self.counts_off() + self.cells() * 4
    }

    fn counters_off(&self) -> usize {
        self.lens_off() + self.cells()
    }

    fn cell_index(&self, row: u64, key: &[u8]) -> usize {
        let col = hash_key(key, row) % self.args.width;
        (row * self.args.width + col) as usize
    }

    /// The key currently held by `cell`, or `None` when the cell is empty.
    fn cell_key<'a>(&self, bytes: &'a [u8], cell: usize) -> Option<&'a [u8]> {
        let len = bytes[self.lens_off() + cell] as usize;
        if len == 0 {
            return None;
        }
        let start = cell * self.args.max_key_len as usize;
        Some(&bytes[start..start + len])
    }

    fn cell_count(&self, bytes: &[u8], cell: usize) -> u32 {
        read_u32(bytes, self.counts_off() + cell * 4)
    }

    fn set_cell(&mut self, cell: usize, key: &[u8], count: u32) {
        let mkl = self.args.max_key_len as usize;
        let counts_off = self.counts_off();
        let lens_off = self.lens_off();
        let bytes = self.segment.bytes_mut();
        let start = cell * mkl;
        bytes[start..start + key.len()].copy_from_slice(key);
        bytes[lens_off + cell] = key.len() as u8;
        write_u32(bytes, counts_off + cell * 4, count);
    }

    fn set_cell_count(&mut self, cell: usize, count: u32) {
        let offset = self.counts_off() + cell * 4;
        write_u32(self.segment.bytes_mut(), offset, count);
    }

    fn truncate<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let mkl = self.args.max_key_len as usize;
        if key.len() > mkl {
            &key[..mkl]
        } else {
            key
        }
    }

    /// Adds `value` observations of `key`. Keys longer than `max_key_len`
    /// are truncated first.
    pub fn add(&mut self, key: &[u8], value: u32) {
        let key = self.truncate(key);
        for row in 0..self.args.depth {
            let cell = self.cell_index(row, key);
            let bytes = self.segment.bytes();
            let count = self.cell_count(bytes, cell);
            let same = self.cell_key(bytes, cell) == Some(key);
            if same {
                self.set_cell_count(cell, count.saturating_add(value));
            } else if value > count {
                self.set_cell(cell, key, value - count);
            } else {
                self.set_cell_count(cell, count - value);
            }
        }
        let offset = self.counters_off();
        let bytes = self.segment.bytes_mut();
        let n_added = read_u64(bytes, offset).saturating_add(u64::from(value));
        write_u64(bytes, offset, n_added);
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

    /// Estimated count for `key`: the maximum count over the rows whose cell
    /// currently holds the key, or 0 if no cell does.
    pub fn max_count(&self, key: &[u8]) -> u32 {
        let key = self.truncate(key);
        let bytes = self.segment.bytes();
        let mut best = 0;
        for row in 0..self.args.depth {
            let cell = self.cell_index(row, key);
            if self.cell_key(bytes, cell) == Some(key) {
                best = best.max(self.cell_count(bytes, cell));
            }
        }
        best
    }

    /// Every candidate key whose estimated count reaches `threshold`.
    pub fn candidate_set(&self, threshold: u32) -> HashMap<Vec<u8>, u32> {
        let bytes = self.segment.bytes();
        let mut candidates = HashMap::new();
        for cell in 0..self.cells() {
            let Some(key) = self.cell_key(bytes, cell) else {
                continue;
            };
            if candidates.contains_key(key) {
                continue;
            }
            let count = self.max_count(key);
            if count >= threshold {
                candidates.insert(key.to_vec(), count);
            }
        }
        candidates
    }

    /// The up-to-`k` most frequent keys at the default `phi * n_added`
    /// threshold, ordered by descending estimated count.
    pub fn query(&self, k: usize) -> Vec<(Vec<u8>, u32)> {
        let threshold = (self.args.phi * self.n_added() as f64).ceil() as u32;
        let mut hitters: Vec<(Vec<u8>, u32)> =
            self.candidate_set(threshold.max(1)).into_iter().collect();
        hitters.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hitters.truncate(k);
        hitters
    }

    /// Total number of element additions, summed over merges.
    pub fn n_added(&self) -> u64 {
        read_u64(self.segment.bytes(), self.counters_off())
    }

    /// Total number of records processed, summed over merges.
    pub fn n_records(&self) -> u64 {
        read_u64(self.segment.bytes(), self.counters_off() + 8)
    }
}

impl SharedSketch for HeavyHitters {
    type Args = HeavyHittersArgs;

    const KIND: SketchKind = SketchKind::HeavyHitters;

    fn create(args: &HeavyHittersArgs) -> Result<Self> {
        args.validate()?;
        let segment = Segment::create(args.segment_len()?)?;
        Ok(Self {
            args: args.clone(),
            segment,
        })
    }

    fn attach(args: &HeavyHittersArgs, segment: &str) -> Result<Self> {
        args.validate()?;
        let segment = Segment::attach(segment, args.segment_len()?)?;
        Ok(Self {
            args: args.clone(),
            segment,
        })
    }

    fn attach_descriptor(desc: &SketchDescriptor) -> Result<Self> {
        match &desc.args {
            SketchArgs::HeavyHitters(args) => Self::attach(args, &desc.segment),
            other => Err(ParsketchError::Config(format!(
                "descriptor holds {} args, expected hh",
                other.kind()
            ))),
        }
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        if self.args != other.args {
            return Err(ParsketchError::ArgsMismatch(format!(
                "cannot merge hh {:?} with {:?}",
                self.args, other.args
            )));
        }
        for cell in 0..self.cells() {
            let theirs = other.segment.bytes();
            let their_count = other.cell_count(theirs, cell);
            let their_key = other.cell_key(theirs, cell).map(<[u8]>::to_vec);

            let ours = self.segment.bytes();
            let our_count = self.cell_count(ours, cell);
            let our_key = self.cell_key(ours, cell);

            if our_key == their_key.as_deref() {
                self.set_cell_count(cell, our_count.saturating_add(their_count));
            } else if their_count > our_count {
                // The incoming candidate wins the cell with the surplus.
                match their_key {
                    Some(key) => self.set_cell(cell, &key, their_count - our_count),
                    None => self.set_cell_count(cell, their_count - our_count),
                }
            } else {
                self.set_cell_count(cell, our_count - their_count);
            }
        }
        let counters_off = self.counters_off();
        let ours = self.segment.bytes_mut();
        let theirs = other.segment.bytes();
        for offset in [counters_off, counters_off + 8] {
            let sum = read_u64(ours, offset).saturating_add(read_u64(theirs, offset));
            write_u64(ours, offset, sum);
        }
        Ok(())
    }

    fn args(&self) -> &HeavyHittersArgs {
        &self.args
    }

    fn segment_name(&self) -> &str {
        self.segment.name()
    }

    fn descriptor(&self) -> SketchDescriptor {
        SketchDescriptor {
            args: SketchArgs::HeavyHitters(self.args.clone()),
            segment: self.segment.name().to_owned(),
        }
    }

    fn add_records_processed(&mut self, n: u64) {
        let offset = self.counters_off() + 8;
        let bytes = self.segment.bytes_mut();
        let n_records = read_u64(bytes, offset).saturating_add(n);
        write_u64(bytes, offset, n_records);
    }
}

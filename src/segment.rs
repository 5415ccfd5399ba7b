//! Named shared-memory segments.
//!
//! A [`Segment`] is a file-backed, memory-mapped region identified by a unique
//! name. The process (or thread) that creates a segment *owns* it: dropping
//! the owner unlinks the backing file. Any number of additional handles may
//! [`attach`](Segment::attach) to an existing segment by name; dropping an
//! attachment only unmaps it.
//!
//! Segments carry no locking. The pipeline guarantees at most one concurrent
//! writer per segment (one worker during fan-out, one merge worker during
//! fan-in), which is what makes the mapping safe to mutate.

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;

use crate::error::{ParsketchError, Result};

/// Monotonic counter making segment names unique within a process.
static SEGMENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Prefix for every backing file created by this crate.
pub const SEGMENT_PREFIX: &str = "parsketch";

/// Resolves a segment name to the path of its backing file.
pub fn segment_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

/// A named, memory-mapped shared segment.
pub struct Segment {
    name: String,
    path: PathBuf,
    map: MmapMut,
    owned: bool,
}

impl Segment {
    /// Allocates a new zero-filled segment of `len` bytes under a fresh
    /// unique name. The returned handle owns the segment and unlinks the
    /// backing file when dropped.
    pub fn create(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ParsketchError::Config(
                "segment length must be greater than 0".into(),
            ));
        }
        let seq = SEGMENT_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("{SEGMENT_PREFIX}-{}-{seq}.seg", std::process::id());
        let path = segment_path(&name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(len as u64)?;

        // Safety: the file was just created with create_new, so no other
        // process can hold a conflicting mapping; the pipeline's single-writer
        // invariant covers everything after this point.
        #[allow(unsafe_code)]
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            name,
            path,
            map,
            owned: true,
        })
    }

    /// Binds to an existing segment by name. Never allocates; fails if the
    /// segment does not exist or its size differs from `expected_len`.
    /// Dropping the returned handle only detaches.
    pub fn attach(name: &str, expected_len: usize) -> Result<Self> {
        let path = segment_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                ParsketchError::Segment(format!("cannot attach segment {name}: {e}"))
            })?;
        let actual = file.metadata()?.len();
        if actual != expected_len as u64 {
            return Err(ParsketchError::Segment(format!(
                "segment {name} holds {actual} bytes, expected {expected_len}"
            )));
        }

        // Safety: same mapping rules as `create`; the caller inherits the
        // single-writer invariant from the descriptor that named this segment.
        #[allow(unsafe_code)]
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            name: name.to_owned(),
            path,
            map,
            owned: false,
        })
    }

    /// The unique name identifying this segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the mapped region in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the mapped region is empty (never true for a live segment).
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Read-only view of the mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Mutable view of the mapped bytes. Callers must be the segment's sole
    /// writer while holding this borrow.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // Owners unlink deterministically; attachments just unmap. Removal
        // failure is tolerated (the file may already be gone).
        if self.owned {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("len", &self.map.len())
            .field("owned", &self.owned)
            .finish()
    }
}

//! Centralized error handling for Parsketch.
//!
//! All failure conditions are propagated through the [`Result`] type; the
//! library never panics (enforced by `#![deny(clippy::panic)]` and
//! `#![deny(clippy::unwrap_used)]`).
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`ParsketchError::Io`]): segment file creation/mapping,
//!   thread spawning
//! - **Configuration Errors** ([`ParsketchError::Config`]): invalid sketch
//!   parameters or pipeline usage errors
//! - **Segment Errors** ([`ParsketchError::Segment`]): attaching to a missing
//!   or wrongly-sized shared-memory segment
//! - **Args Mismatches** ([`ParsketchError::ArgsMismatch`]): sketches slated
//!   for merging that were built with different construction arguments
//! - **Worker Failures** ([`ParsketchError::WorkerFailed`]): abnormal death of
//!   a worker or the queue filler, which aborts the whole pipeline
//! - **Merge Failures** ([`ParsketchError::MergeFailed`]): a merge worker died
//!   mid-merge, leaving the result unusable
//! - **Internal Errors** ([`ParsketchError::Internal`]): logic errors that
//!   should not occur in production
//!
//! The type is `Clone` so a single failure can be shared across threads;
//! I/O errors are wrapped in `Arc` to keep cloning cheap.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for Parsketch operations.
pub type Result<T> = std::result::Result<T, ParsketchError>;

/// The master error enum covering all failure domains in Parsketch.
///
/// Per-item callback errors are *not* represented here: they are logged by the
/// worker that hit them and never surface to the caller. Everything in this
/// enum aborts the operation that raised it.
#[derive(Debug, Clone)]
pub enum ParsketchError {
    /// Low-level I/O failure (segment file creation, mapping, thread spawn).
    ///
    /// The underlying `io::Error` is wrapped in an `Arc` to make the error
    /// `Clone`.
    Io(Arc<io::Error>),

    /// Invalid sketch parameters or pipeline usage (e.g. `parallel_add`
    /// called without any sketch arguments, or a zero worker count).
    Config(String),

    /// A shared-memory segment could not be attached: the named segment does
    /// not exist or its size does not match the supplied construction args.
    Segment(String),

    /// Sketches slated for merging carry different construction args.
    ///
    /// Raised before any merge is attempted; the operation is aborted with no
    /// partial result.
    ArgsMismatch(String),

    /// A worker (or the queue filler) died abnormally. The supervisor
    /// terminates every other in-flight worker and returns this error with no
    /// partial result.
    WorkerFailed(String),

    /// A merge worker died mid-merge. The surviving sketch of that pair is in
    /// an unspecified state, so the whole merge is abandoned.
    MergeFailed(String),

    /// Logic error in the pipeline itself. Should not occur in production;
    /// please report it as a bug.
    Internal(String),
}

impl fmt::Display for ParsketchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Config(s) => write!(f, "Configuration Error: {s}"),
            Self::Segment(s) => write!(f, "Segment Error: {s}"),
            Self::ArgsMismatch(s) => write!(f, "Args Mismatch: {s}"),
            Self::WorkerFailed(s) => write!(f, "Worker Failed: {s}"),
            Self::MergeFailed(s) => write!(f, "Merge Failed: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for ParsketchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for ParsketchError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

//! The parallel merge tree.
//!
//! Merging `n` sketches takes `ceil(log2 n)` rounds. Each round pairs
//! adjacent sketches, hands every pair to its own merge-worker thread, and
//! keeps the even-indexed survivor of each pair; an odd leftover simply
//! advances to the next round. Merge workers never receive the sketches
//! themselves, only descriptors: each attaches its own pair of handles,
//! merges the second into the first, and detaches.

use std::thread;

use crate::error::{ParsketchError, Result};
use crate::sketch::{SharedSketch, SketchDescriptor};

use super::logger::{send, LogLevel, LogSender};

/// Body of one merge worker: attach both sketches, fold the second into the
/// first, detach.
fn merge_worker<S: SharedSketch>(
    into: &SketchDescriptor,
    from: &SketchDescriptor,
) -> Result<()> {
    let mut into = S::attach_descriptor(into)?;
    let from = S::attach_descriptor(from)?;
    into.merge(&from)
}

/// Merges `sketches` down to one, destructively: losers of each round are
/// dropped (and their segments unlinked) as the round completes.
///
/// All sketches must carry equal construction args; this is checked up
/// front, before any merge runs, so a mismatch never leaves a partially
/// merged result.
pub fn parallel_merging<S: SharedSketch>(sketches: Vec<S>, log: &LogSender) -> Result<S> {
    let Some(first) = sketches.first() else {
        return Err(ParsketchError::Config(
            "parallel_merging requires at least one sketch".into(),
        ));
    };
    for (i, sketch) in sketches.iter().enumerate().skip(1) {
        if sketch.args() != first.args() {
            return Err(ParsketchError::ArgsMismatch(format!(
                "{} sketch {i} was built with {:?}, expected {:?}",
                S::KIND,
                sketch.args(),
                first.args()
            )));
        }
    }

    let mut remaining = sketches;
    while remaining.len() > 1 {
        let pairs: Vec<(SketchDescriptor, SketchDescriptor)> = remaining
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| (pair[0].descriptor(), pair[1].descriptor()))
            .collect();

        let mut first_error = None;
        thread::scope(|scope| {
            let handles: Vec<_> = pairs
                .iter()
                .map(|(into, from)| scope.spawn(move || merge_worker::<S>(into, from)))
                .collect();
            for handle in handles {
                let outcome = match handle.join() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ParsketchError::MergeFailed(format!(
                        "a {} merge worker panicked mid-merge",
                        S::KIND
                    ))),
                };
                if let Err(e) = outcome {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        });
        if let Some(e) = first_error {
            return Err(e);
        }

        // Keep the merge targets (and an odd trailing sketch); the sources
        // are dropped here, unlinking their segments.
        remaining = remaining
            .into_iter()
            .enumerate()
            .filter_map(|(i, sketch)| (i % 2 == 0).then_some(sketch))
            .collect();
        send(
            log,
            LogLevel::Debug,
            format!("Finished round of merging. {} remaining", remaining.len()),
        );
    }

    remaining.pop().ok_or_else(|| {
        ParsketchError::Internal("merge tree emptied without yielding a result".into())
    })
}

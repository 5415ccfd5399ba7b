//! Merge-tree shape and pre-check tests.

use crossbeam_channel::unbounded;
use parsketch::parallel::{parallel_merging, LogMessage};
use parsketch::{CountMin, CountMinArgs, ParsketchError, Result, SharedSketch};

fn args() -> CountMinArgs {
    CountMinArgs {
        width: 1 << 10,
        depth: 4,
    }
}

#[test]
fn test_five_sketches_take_three_rounds() -> Result<()> {
    let mut sketches = Vec::new();
    for i in 0..5u32 {
        let mut cms = CountMin::create(&args())?;
        cms.add(format!("key-{i}").as_bytes(), i + 1);
        sketches.push(cms);
    }

    let (tx, rx) = unbounded();
    let merged = parallel_merging(sketches, &tx)?;
    drop(tx);

    // ceil(log2 5) = 3 rounds: 5 -> 3 -> 2 -> 1.
    let remaining: Vec<String> = rx
        .iter()
        .filter_map(|message| match message {
            LogMessage::Record(record) if record.text.contains("remaining") => Some(record.text),
            _ => None,
        })
        .collect();
    assert_eq!(
        remaining,
        vec![
            "Finished round of merging. 3 remaining",
            "Finished round of merging. 2 remaining",
            "Finished round of merging. 1 remaining",
        ]
    );

    for i in 0..5u32 {
        assert_eq!(merged.query(format!("key-{i}").as_bytes()), i + 1);
    }
    assert_eq!(merged.n_added(), 1 + 2 + 3 + 4 + 5);
    Ok(())
}

#[test]
fn test_single_sketch_needs_no_rounds() -> Result<()> {
    let mut cms = CountMin::create(&args())?;
    cms.add(b"solo", 9);

    let (tx, rx) = unbounded();
    let merged = parallel_merging(vec![cms], &tx)?;
    drop(tx);

    assert_eq!(rx.iter().count(), 0);
    assert_eq!(merged.query(b"solo"), 9);
    Ok(())
}

#[test]
fn test_empty_input_is_rejected() {
    let (tx, _rx) = unbounded();
    match parallel_merging::<CountMin>(Vec::new(), &tx) {
        Err(ParsketchError::Config(_)) => {}
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn test_mismatched_args_abort_before_any_merge() -> Result<()> {
    let mut first = CountMin::create(&args())?;
    first.add(b"key", 1);
    let odd_one_out = CountMin::create(&CountMinArgs {
        width: 1 << 9,
        depth: 4,
    })?;

    let first_descriptor = first.descriptor();
    let (tx, rx) = unbounded();
    match parallel_merging(vec![first, odd_one_out], &tx) {
        Err(ParsketchError::ArgsMismatch(_)) => {}
        other => panic!("expected ArgsMismatch, got {other:?}"),
    }
    drop(tx);

    // No round ever started, so no round record was logged and the first
    // sketch's segment is gone untouched (its owner was consumed).
    assert_eq!(rx.iter().count(), 0);
    assert!(CountMin::attach_descriptor(&first_descriptor).is_err());
    Ok(())
}

#[test]
fn test_segments_of_merge_losers_are_unlinked() -> Result<()> {
    let mut sketches = Vec::new();
    for _ in 0..4 {
        sketches.push(CountMin::create(&args())?);
    }
    let descriptors: Vec<_> = sketches.iter().map(SharedSketch::descriptor).collect();

    let (tx, _rx) = unbounded();
    let merged = parallel_merging(sketches, &tx)?;

    // Only the overall winner's segment survives.
    let mut alive = 0;
    for descriptor in &descriptors {
        if CountMin::attach_descriptor(descriptor).is_ok() {
            alive += 1;
            assert_eq!(descriptor.segment, merged.segment_name());
        }
    }
    assert_eq!(alive, 1);
    Ok(())
}

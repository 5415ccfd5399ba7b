//! End-to-end tests for the parallel build-and-merge pipeline.

use std::time::Duration;

use approx::assert_abs_diff_eq;
use parsketch::{
    parallel_add, CountMinArgs, HeavyHittersArgs, HyperLogLog, HyperLogLogArgs, ParallelConfig,
    ParsketchError, Result, SharedSketch,
};

fn fast_poll() -> Duration {
    Duration::from_millis(20)
}

fn cms_config(workers: usize) -> ParallelConfig {
    ParallelConfig::new()
        .with_workers(workers)
        .with_cms(CountMinArgs {
            width: 1 << 12,
            depth: 4,
        })
        .with_poll_interval(fast_poll())
}

#[test]
fn test_every_item_lands_in_the_merged_sketch() -> Result<()> {
    let items: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();

    let result = parallel_add(
        items,
        |item: &String, sketches| {
            let cms = sketches.cms.as_mut().ok_or("missing cms")?;
            cms.add(item.as_bytes(), 1);
            Ok(1)
        },
        cms_config(4),
    )?;

    let cms = result.into_cms().expect("cms requested");
    for key in ["a", "b", "c", "d"] {
        assert_eq!(cms.query(key.as_bytes()), 1);
    }
    assert_eq!(cms.n_added(), 4);
    assert_eq!(cms.n_records(), 4);
    Ok(())
}

#[test]
fn test_disjoint_chunks_accumulate_cardinality() -> Result<()> {
    // Five disjoint chunks of 1000 keys each across 5 workers.
    let items: Vec<std::ops::Range<u32>> = (0..5).map(|c| c * 1000..(c + 1) * 1000).collect();

    let config = ParallelConfig::new()
        .with_workers(5)
        .with_hll(HyperLogLogArgs { p: 14, seed: 0 })
        .with_poll_interval(fast_poll());

    let result = parallel_add(
        items,
        |chunk: &std::ops::Range<u32>, sketches| {
            let hll = sketches.hll.as_mut().ok_or("missing hll")?;
            let mut n = 0u64;
            for i in chunk.clone() {
                hll.add(format!("key-{i}").as_bytes());
                n += 1;
            }
            Ok(n)
        },
        config,
    )?;

    let hll = result.into_hll().expect("hll requested");
    assert_abs_diff_eq!(hll.query(), 5000.0, epsilon = 250.0);
    Ok(())
}

#[test]
fn test_failed_items_are_skipped_not_fatal() -> Result<()> {
    let items: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();

    let result = parallel_add(
        items,
        |item: &String, sketches| {
            if item == "c" {
                return Err("malformed item".into());
            }
            let cms = sketches.cms.as_mut().ok_or("missing cms")?;
            cms.add(item.as_bytes(), 1);
            Ok(1)
        },
        cms_config(2),
    )?;

    let cms = result.into_cms().expect("cms requested");
    assert_eq!(cms.query(b"a"), 1);
    assert_eq!(cms.query(b"b"), 1);
    assert_eq!(cms.query(b"c"), 0);
    assert_eq!(cms.query(b"d"), 1);
    // The failed item contributes no records.
    assert_eq!(cms.n_records(), 3);
    Ok(())
}

#[test]
fn test_parallel_equals_sequential() -> Result<()> {
    let args = HyperLogLogArgs { p: 12, seed: 7 };
    let n = 4000u32;

    let mut sequential = HyperLogLog::create(&args)?;
    for i in 0..n {
        sequential.add(format!("key-{i}").as_bytes());
    }

    let items: Vec<std::ops::Range<u32>> = (0..8).map(|c| c * 500..(c + 1) * 500).collect();
    let config = ParallelConfig::new()
        .with_workers(4)
        .with_hll(args)
        .with_poll_interval(fast_poll());
    let result = parallel_add(
        items,
        |chunk: &std::ops::Range<u32>, sketches| {
            let hll = sketches.hll.as_mut().ok_or("missing hll")?;
            for i in chunk.clone() {
                hll.add(format!("key-{i}").as_bytes());
            }
            Ok(u64::from(chunk.end - chunk.start))
        },
        config,
    )?;
    let parallel = result.into_hll().expect("hll requested");

    // Register-wise max merging makes the parallel result exactly equal to
    // the sequential one, independent of how items were distributed.
    assert_eq!(parallel.query(), sequential.query());
    Ok(())
}

#[test]
fn test_all_three_kinds_in_canonical_bundle() -> Result<()> {
    let items: Vec<String> = (0..20).map(|i| format!("key-{}", i % 5)).collect();

    let config = ParallelConfig::new()
        .with_workers(3)
        .with_cms(CountMinArgs {
            width: 1 << 10,
            depth: 4,
        })
        .with_hh(HeavyHittersArgs {
            width: 128,
            depth: 4,
            max_key_len: 16,
            phi: 0.0,
        })
        .with_hll(HyperLogLogArgs { p: 10, seed: 0 })
        .with_poll_interval(fast_poll());

    let result = parallel_add(
        items,
        |item: &String, sketches| {
            if let Some(cms) = sketches.cms.as_mut() {
                cms.add(item.as_bytes(), 1);
            }
            if let Some(hh) = sketches.hh.as_mut() {
                hh.add(item.as_bytes(), 1);
            }
            if let Some(hll) = sketches.hll.as_mut() {
                hll.add(item.as_bytes());
            }
            Ok(1)
        },
        config,
    )?;

    let cms = result.cms.as_ref().expect("cms requested");
    let hh = result.hh.as_ref().expect("hh requested");
    let hll = result.hll.as_ref().expect("hll requested");

    assert_eq!(cms.n_added(), 20);
    assert_eq!(cms.n_records(), 20);
    assert_eq!(cms.query(b"key-0"), 4);
    assert_eq!(hh.max_count(b"key-0"), 4);
    assert_eq!(hh.n_records(), 20);
    assert_abs_diff_eq!(hll.query(), 5.0, epsilon = 1.1);
    Ok(())
}

#[test]
fn test_rejects_config_without_sketches() {
    let items: Vec<String> = vec![];
    let outcome = parallel_add(
        items,
        |_: &String, _| Ok(0),
        ParallelConfig::new().with_workers(2),
    );
    match outcome {
        Err(ParsketchError::Config(_)) => {}
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn test_rejects_zero_workers() {
    let items: Vec<String> = vec![];
    let outcome = parallel_add(items, |_: &String, _| Ok(0), cms_config(0));
    match outcome {
        Err(ParsketchError::Config(_)) => {}
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn test_abort_stops_surviving_workers_promptly() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // One worker dies on the first item; the other is slow enough that the
    // abort flag is raised while it still has a long backlog queued. It may
    // finish its in-flight item but must not drain the rest of the queue.
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let items: Vec<u32> = (0..60).collect();

    let outcome = parallel_add(
        items,
        move |item: &u32, sketches| {
            if *item == 0 {
                panic!("poisoned item");
            }
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            let cms = sketches.cms.as_mut().ok_or("missing cms")?;
            cms.add(&item.to_le_bytes(), 1);
            Ok(1)
        },
        cms_config(2),
    );
    match outcome {
        Err(ParsketchError::WorkerFailed(_)) => {}
        other => panic!("expected WorkerFailed, got {other:?}"),
    }
    // The bounded queue alone held six items; draining it would show here.
    assert!(
        processed.load(Ordering::SeqCst) <= 3,
        "surviving worker drained the queue after the abort"
    );
}

#[test]
fn test_more_workers_than_items() -> Result<()> {
    // Workers that never receive an item must still stop on their shutdown
    // message and contribute an empty sketch to the merge.
    let items: Vec<String> = vec!["only".into()];
    let result = parallel_add(
        items,
        |item: &String, sketches| {
            let cms = sketches.cms.as_mut().ok_or("missing cms")?;
            cms.add(item.as_bytes(), 1);
            Ok(1)
        },
        cms_config(8),
    )?;

    let cms = result.into_cms().expect("cms requested");
    assert_eq!(cms.query(b"only"), 1);
    assert_eq!(cms.n_records(), 1);
    Ok(())
}

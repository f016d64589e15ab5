//! End-to-end flow: per-shard scans, wire round-trips for the remote
//! shards, cross-shard reduce and final materialization.

use distinct_histogram::{
    BucketKey, BucketMap, EstimatorConfig, HistogramCollector, Materializer, SketchSpec,
    SlicedBucketMap, SlicedHistogramCollector, SlicedMaterializer,
};

fn config() -> EstimatorConfig {
    EstimatorConfig::new()
        .with_tipping_point(1_000)
        .with_sketch(SketchSpec::with_precision(14))
}

fn floor_to_second(raw: i64) -> i64 {
    raw / 1000 * 1000
}

fn scan(docs: &[(Option<i64>, &[u8])]) -> BucketMap {
    let mut collector = HistogramCollector::new(config(), floor_to_second);
    for (raw, value) in docs {
        collector.collect(*raw, value);
    }
    collector.finish()
}

#[test]
fn test_flat_pipeline_across_three_shards() {
    let local = scan(&[
        (Some(1_500), b"alice"),
        (Some(1_700), b"bob"),
        (Some(2_500), b"alice"),
    ]);
    let remote_a = scan(&[
        (Some(1_100), b"alice"),
        (Some(2_900), b"carol"),
        (None, b"dave"),
    ]);
    let remote_b = scan(&[(Some(2_000), b"bob")]);

    // Remote shards arrive as bytes.
    let remote_a = BucketMap::unpack_from_slice(&remote_a.pack_to_vec()).unwrap();
    let remote_b = BucketMap::unpack_from_slice(&remote_b.pack_to_vec()).unwrap();

    let reduced = BucketMap::reduce(vec![local, remote_a, remote_b]).unwrap();
    let mut materializer = Materializer::new(reduced);
    let result = materializer.result().unwrap();

    assert_eq!(result.total, 6);
    assert_eq!(result.distinct, 3);

    let summary: Vec<(i64, u64, u64)> = result
        .entries
        .iter()
        .map(|entry| (entry.key.0, entry.total, entry.distinct))
        .collect();
    assert_eq!(summary, vec![(1_000, 3, 2), (2_000, 3, 3)]);
}

#[test]
fn test_flat_pipeline_fold_order_is_irrelevant() {
    let shards = || {
        vec![
            scan(&[(Some(1_000), b"a"), (Some(1_100), b"b")]),
            scan(&[(Some(1_200), b"b"), (Some(2_000), b"c")]),
            scan(&[(Some(2_500), b"a")]),
        ]
    };

    let mut forward = shards();
    let mut backward = shards();
    backward.reverse();

    let mut lhs = Materializer::new(BucketMap::reduce(forward.drain(..)).unwrap());
    let mut rhs = Materializer::new(BucketMap::reduce(backward.drain(..)).unwrap());
    let lhs = lhs.result().unwrap();
    let rhs = rhs.result().unwrap();

    assert_eq!(lhs.total, rhs.total);
    assert_eq!(lhs.distinct, rhs.distinct);
    assert_eq!(lhs.entries, rhs.entries);
}

#[test]
fn test_sliced_pipeline() {
    let scan_sliced = |docs: &[(Option<i64>, &[u8], &[u8])]| {
        let mut collector = SlicedHistogramCollector::new(config(), floor_to_second);
        for (raw, label, value) in docs {
            collector.collect(*raw, label, value);
        }
        collector.finish()
    };

    let local = scan_sliced(&[
        (Some(1_500), b"api", b"alice"),
        (Some(1_600), b"api", b"bob"),
        (Some(1_700), b"web", b"alice"),
    ]);
    let remote = scan_sliced(&[
        (Some(1_100), b"api", b"alice"),
        (Some(2_000), b"web", b"carol"),
    ]);
    let remote = SlicedBucketMap::unpack_from_slice(&remote.pack_to_vec()).unwrap();

    let reduced = SlicedBucketMap::reduce(vec![local, remote]).unwrap();
    let mut materializer = SlicedMaterializer::new(reduced);
    let result = materializer.result().unwrap();

    assert_eq!(result.total, 5);
    assert_eq!(result.distinct, 3);
    assert_eq!(result.entries.len(), 2);

    let first = &result.entries[0];
    assert_eq!(first.key, BucketKey(1_000));
    assert_eq!(first.total, 4);
    assert_eq!(first.distinct, 2);
    let labels: Vec<&[u8]> = first
        .slices
        .iter()
        .map(|slice| slice.label.as_ref())
        .collect();
    assert_eq!(labels, vec![b"api".as_slice(), b"web".as_slice()]);
    let api = &first.slices[0];
    assert_eq!((api.total, api.distinct), (3, 2));

    let second = &result.entries[1];
    assert_eq!(second.key, BucketKey(2_000));
    assert_eq!((second.total, second.distinct), (1, 1));
}

#[test]
fn test_zero_shards_materialize_to_nothing() {
    let reduced = BucketMap::reduce(Vec::new()).unwrap();
    let mut materializer = Materializer::new(reduced);
    let result = materializer.result().unwrap();
    assert_eq!((result.total, result.distinct), (0, 0));
    assert!(result.entries.is_empty());
}

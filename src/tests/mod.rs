//! Cross-module scenario coverage (spec.md §8): the concrete S1-S6
//! scenarios and the universally-quantified properties that don't belong
//! to any single codec/cache module, mirroring the teacher's
//! `src/tests/mod.rs` directory-of-integration-tests layout.

use proptest::prelude::*;

use crate::addressing::{self, BucketKind};
use crate::disk;
use crate::point::{Address, Payload, Point, SourceDict};
use crate::wire;

/// S1: `VaultPrefix{extended=false, version=7, compression=Compressed,
/// quantity=Multiple, size=42}` encodes to exactly the bytes `[0x7c, 0x2a]`.
#[test]
fn s1_prefix_bytes_match_the_documented_encoding() {
    let prefix = disk::VaultPrefix::new(
        false,
        7,
        disk::Compression::Compressed,
        disk::Quantity::Multiple,
        42,
    )
    .unwrap();
    assert_eq!(prefix.encode(), [0x7c, 0x2a]);
}

/// S2: two points with the same origin and the same source-key-set (in
/// different insertion order) and timestamps within the same epoch must
/// address to the same bucket.
#[test]
fn s2_points_with_reordered_tags_in_the_same_epoch_share_a_bucket_label() {
    let origin = b"arithmetic".to_vec();
    let p1 = Point {
        origin: origin.clone(),
        source: SourceDict::from_pairs([
            ("hostname", "web01.example.com"),
            ("metric", "math-constants"),
            ("datacenter", "lhr1"),
        ]),
        timestamp: 1_387_929_601_271_828_182,
        payload: Payload::Measurement(2.718281),
    };
    let p2 = Point {
        origin: origin.clone(),
        source: SourceDict::from_pairs([
            ("metric", "math-constants"),
            ("datacenter", "lhr1"),
            ("hostname", "web01.example.com"),
        ]),
        timestamp: 1_387_929_601_314_159_265,
        payload: Payload::Measurement(3.141592),
    };

    assert_eq!(p1.address(), p2.address());

    let marks1 = addressing::calculate_timemarks(p1.timestamp, p1.timestamp);
    let marks2 = addressing::calculate_timemarks(p2.timestamp, p2.timestamp);
    assert_eq!(marks1, marks2, "both timestamps fall in the same epoch");

    let bucket_count = 16;
    let label1 = addressing::bucket_oid(
        &origin,
        marks1[0].epoch,
        p1.address().bucket_index(bucket_count),
        BucketKind::Simple,
    );
    let label2 = addressing::bucket_oid(
        &origin,
        marks2[0].epoch,
        p2.address().bucket_index(bucket_count),
        BucketKind::Simple,
    );
    assert_eq!(label1, label2);
}

/// S4/S5 style coverage lives alongside the wire codec and worker modules
/// (`wire::tests`, `workers::tests`) where the fixtures they need already
/// live; this file only covers properties that cut across modules.

proptest! {
    /// Testable property 2: address is a pure function of the source
    /// dict's key/value set, independent of insertion order.
    #[test]
    fn address_is_order_invariant_under_shuffling(
        pairs in prop::collection::vec(("[a-z]{1,6}", "[a-z0-9]{1,8}"), 1..6),
    ) {
        let mut deduped = std::collections::BTreeMap::new();
        for (k, v) in &pairs {
            deduped.insert(k.clone(), v.clone());
        }
        let forward = SourceDict::from_pairs(deduped.clone());
        let reversed = SourceDict::from_pairs(deduped.into_iter().rev());
        prop_assert_eq!(forward.address(), reversed.address());
    }

    /// Testable property 4: `calculate_timemarks` always returns a
    /// strictly increasing sequence whose epoch windows cover the
    /// requested range with no gaps.
    #[test]
    fn timemarks_cover_the_requested_range_without_gaps(
        t_alpha in 0u64..10_000_000_000_000,
        width in 0u64..(addressing::EPOCH_WIDTH_NS * 5),
    ) {
        let t_omega = t_alpha + width;
        let marks = addressing::calculate_timemarks(t_alpha, t_omega);

        prop_assert!(!marks.is_empty());
        for pair in marks.windows(2) {
            prop_assert!(pair[0].epoch < pair[1].epoch);
        }
        prop_assert!(marks[0].epoch <= t_alpha);
        prop_assert!(*marks.last().map(|m| &m.epoch).unwrap() <= t_omega);
        let last_epoch = marks.last().unwrap().epoch;
        prop_assert!(last_epoch + addressing::EPOCH_WIDTH_NS > t_omega);
    }

    /// Testable property 5: filtering a bucket by `[t_alpha, t_omega]`
    /// keeps every in-range point and drops every out-of-range one.
    #[test]
    fn filter_keeps_exactly_the_points_in_range(
        timestamps in prop::collection::vec(0u64..1_000_000u64, 1..20),
        t_alpha in 0u64..500_000u64,
        width in 0u64..500_000u64,
    ) {
        let t_omega = t_alpha + width;
        let origin = b"arithmetic".to_vec();
        let points: Vec<Point> = timestamps
            .iter()
            .map(|&timestamp| Point {
                origin: origin.clone(),
                source: SourceDict::from_pairs([("wave", "sine")]),
                timestamp,
                payload: Payload::Measurement(0.0),
            })
            .collect();

        let encoded = disk::encode_points(&points).unwrap();
        let decoded = disk::decode_points(&origin, &encoded).unwrap();
        let filtered: Vec<_> = decoded
            .into_iter()
            .filter(|p| p.timestamp >= t_alpha && p.timestamp <= t_omega)
            .collect();

        for point in &filtered {
            prop_assert!(point.timestamp >= t_alpha && point.timestamp <= t_omega);
        }
        let expected_count = timestamps
            .iter()
            .filter(|&&t| t >= t_alpha && t <= t_omega)
            .count();
        prop_assert_eq!(filtered.len(), expected_count);
    }
}

/// Testable property 7 / S7-style: wire round-trip through `encode_points`
/// / `decode_points` preserves structural equality.
#[test]
fn wire_round_trip_preserves_structural_equality() {
    let origin = b"arithmetic".to_vec();
    let points = vec![
        Point {
            origin: origin.clone(),
            source: SourceDict::from_pairs([("wave", "sine")]),
            timestamp: 1,
            payload: Payload::Numeric(7),
        },
        Point {
            origin: origin.clone(),
            source: SourceDict::new(),
            timestamp: 2,
            payload: Payload::Empty,
        },
    ];
    let encoded = wire::encode_points(&points);
    let decoded = wire::decode_points(&origin, &encoded).unwrap();
    assert_eq!(decoded, points);
}

#[test]
fn bucket_index_wraps_at_the_bucket_count() {
    let address = Address(10);
    assert_eq!(address.bucket_index(4), 2);
    assert_eq!(address.bucket_index(3), 1);
}

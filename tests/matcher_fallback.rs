//! Exercises the fallback path of §4.5: a group whose head/tail robust
//! fit disagrees enough to fail the time-factor admission test, but
//! whose Δt histogram still shows one dominant bucket.

use acoufp::config::Config;
use acoufp::matcher::{match_fingerprints, MatchParams};
use acoufp::store::{MemoryStore, Store};
use acoufp::types::{EventPoint, Fingerprint, ResourceMetadata};
use std::collections::HashSet;

fn cfg(fallback: bool) -> Config {
    let mut c = Config::default();
    c.sample_rate = 16000;
    c.hop = 64;
    c.query_range = 1;
    c.min_hits_unfiltered = 3;
    c.min_hits_filtered = 3;
    c.hit_part_divider = 4;
    c.hit_part_max_size = 50;
    c.min_time_factor = 0.8;
    c.max_time_factor = 1.2;
    c.min_match_duration = 0.01;
    c.min_sec_with_match = 0.0;
    c.match_fallback_to_hist = fallback;
    c
}

fn fp(hash: u64, t1: i32) -> Fingerprint {
    Fingerprint {
        hash,
        p1: EventPoint::new(t1, 0, 1.0),
        p2: EventPoint::new(t1 + 1, 0, 1.0),
        p3: EventPoint::new(t1 + 2, 0, 1.0),
    }
}

/// Deltas chosen so the head-of-group mode (48) and tail-of-group mode
/// (52) disagree enough that the linear fit's slope drives `time_factor`
/// below `min_time_factor`, while the full set still clusters tightly
/// enough around Δt≈50 for the 5-frame-bucket histogram to dominate.
const DELTAS: [i32; 12] = [48, 48, 50, 50, 50, 50, 50, 50, 50, 50, 52, 52];

async fn seed_store() -> MemoryStore {
    let store = MemoryStore::new();
    for (i, &delta) in DELTAS.iter().enumerate() {
        store.add(i as u64, 7, i as i32 + delta).await.unwrap();
    }
    store.flush_store().await.unwrap();
    store
        .put_metadata(ResourceMetadata {
            id: 7,
            path: "ref.wav".into(),
            duration_seconds: 5.0,
            num_fingerprints: DELTAS.len() as i32,
        })
        .await
        .unwrap();
    store
}

fn query_fingerprints() -> Vec<Fingerprint> {
    (0..DELTAS.len() as i32).map(|i| fp(i as u64, i)).collect()
}

#[tokio::test]
async fn fallback_admits_a_result_the_primary_fit_rejects() {
    let config = cfg(true);
    let store = seed_store().await;
    let avoid = HashSet::new();

    let results = match_fingerprints(
        &store,
        &config,
        &query_fingerprints(),
        MatchParams {
            query_path: "query.wav",
            query_time_offset_s: 0.0,
            avoid_ids: &avoid,
            deadline: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ref_id, 7);
    assert!((results[0].time_factor - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn without_fallback_the_same_group_is_rejected() {
    let config = cfg(false);
    let store = seed_store().await;
    let avoid = HashSet::new();

    let results = match_fingerprints(
        &store,
        &config,
        &query_fingerprints(),
        MatchParams {
            query_path: "query.wav",
            query_time_offset_s: 0.0,
            avoid_ids: &avoid,
            deadline: None,
        },
    )
    .await
    .unwrap();

    assert!(results.is_empty());
}

use crate::config::Config;
use crate::error::Result;
use crate::store::Store;
use crate::types::{Fingerprint, Hit, QueryResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::BuildHasherDefault;
use tokio::time::Instant;
use twox_hash::XxHash64;

/// Grouping by resource id is a hot, internal-only path (§4.5 step 2);
/// `XxHash64` avoids `HashMap`'s default SipHash overhead for keys that
/// never cross a trust boundary.
type FastHasher = BuildHasherDefault<XxHash64>;

/// Per-call parameters that aren't part of the tunable [`Config`]: which
/// query this is (for labelling results) and which resources to skip
/// (e.g. the monitor excluding a resource already matched in a prior
/// window, or an engine excluding the resource currently being stored).
pub struct MatchParams<'a> {
    pub query_path: &'a str,
    /// Offset, in seconds, to add to every reported `query_start`/`query_stop`;
    /// nonzero when this call matches one window of a longer clip (§4.6).
    pub query_time_offset_s: f32,
    pub avoid_ids: &'a HashSet<i32>,
    /// Caller-supplied deadline (§5, "Cancellation/timeouts"). Checked
    /// cooperatively between resource groups; on expiry the groups
    /// processed so far are returned with `cancelled` set rather than
    /// being discarded.
    pub deadline: Option<Instant>,
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

struct Fit {
    slope: f32,
    offset: f32,
    time_factor: f32,
}

/// Runs the matcher of §4.5 against the current store state for one
/// batch of query fingerprints (one monitor window, or a whole clip).
pub async fn match_fingerprints(
    store: &dyn Store,
    config: &Config,
    fingerprints: &[Fingerprint],
    params: MatchParams<'_>,
) -> Result<Vec<QueryResult>> {
    // Step 1: lookup.
    let mut hits_per_id: HashMap<i32, Vec<Hit>, FastHasher> = HashMap::default();
    for fp in fingerprints {
        let postings = store.query(fp.hash, config.query_range).await?;
        for (matched_hash, posting) in postings {
            if params.avoid_ids.contains(&posting.resource_id) {
                continue;
            }
            hits_per_id
                .entry(posting.resource_id)
                .or_default()
                .push(Hit {
                    resource_id: posting.resource_id,
                    ref_t1: posting.t1,
                    query_t1: fp.t1(),
                    original_hash: fp.hash,
                    matched_hash,
                });
        }
    }

    let mut results = Vec::new();
    let mut exhausted_groups: Vec<Vec<Hit>> = Vec::new();
    let mut cancelled = false;

    for (resource_id, mut hits) in hits_per_id {
        if deadline_passed(params.deadline) {
            cancelled = true;
            break;
        }

        // Step 2: drop undersized groups.
        if hits.len() < config.min_hits_unfiltered {
            continue;
        }
        hits.sort_by_key(|h| h.query_t1);

        // Step 3+4: robust fit, admit by time factor.
        match fit_time_offset(&hits, config) {
            Some(fit) => {
                if !(config.min_time_factor < fit.time_factor
                    && fit.time_factor < config.max_time_factor)
                {
                    exhausted_groups.push(hits);
                    continue;
                }

                if let Some(result) =
                    finish_group(resource_id, &hits, &fit, store, config, &params).await?
                {
                    results.push(result);
                } else {
                    exhausted_groups.push(hits);
                }
            }
            None => exhausted_groups.push(hits),
        }
    }

    if !cancelled && results.is_empty() && config.match_fallback_to_hist {
        for hits in exhausted_groups {
            if deadline_passed(params.deadline) {
                cancelled = true;
                break;
            }
            if let Some(result) =
                fallback_histogram_match(hits, store, config, &params).await?
            {
                results.push(result);
            }
        }
    }

    if cancelled {
        for result in &mut results {
            result.cancelled = true;
        }
    }

    results.sort_by(|a, b| b.score.cmp(&a.score));
    results.truncate(config.max_results);
    Ok(results)
}

/// Step 3: robust fit of `Δt` as a linear function of query time, taken
/// from the mode of `Δt` in the first and last `L` hits rather than a
/// least-squares fit over the whole (possibly noisy) group.
fn fit_time_offset(hits: &[Hit], config: &Config) -> Option<Fit> {
    let size = hits.len();
    let l = config
        .hit_part_max_size
        .min(config.min_hits_unfiltered.max(size / config.hit_part_divider.max(1)))
        .max(1)
        .min(size);

    let first = &hits[..l];
    let last = &hits[size - l..];

    let y1 = mode_delta(first)?;
    let x1 = first.iter().find(|h| h.delta_t() == y1)?.query_t1;

    let y2 = mode_delta(last)?;
    let x2 = last.iter().rev().find(|h| h.delta_t() == y2)?.query_t1;

    if x1 == x2 {
        return Some(Fit {
            slope: 0.0,
            offset: y1 as f32,
            time_factor: 1.0,
        });
    }

    let slope = (y2 - y1) as f32 / (x2 - x1) as f32;
    let offset = y1 as f32 - slope * x1 as f32;
    Some(Fit {
        slope,
        offset,
        time_factor: 1.0 - slope,
    })
}

fn mode_delta(hits: &[Hit]) -> Option<i32> {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for h in hits {
        *counts.entry(h.delta_t()).or_insert(0) += 1;
    }
    let mut best: Option<(i32, usize)> = None;
    for (&delta, &count) in &counts {
        if best.is_none_or(|(_, bc)| count > bc) {
            best = Some((delta, count));
        }
    }
    best.map(|(delta, _)| delta)
}

/// Steps 5-7 for a group that survived the time-factor admission test.
async fn finish_group(
    resource_id: i32,
    hits: &[Hit],
    fit: &Fit,
    store: &dyn Store,
    config: &Config,
    params: &MatchParams<'_>,
) -> Result<Option<QueryResult>> {
    let threshold = config.query_range as f32;
    let filtered: Vec<Hit> = hits
        .iter()
        .copied()
        .filter(|h| {
            let predicted = fit.slope * h.query_t1 as f32 + fit.offset;
            (h.delta_t() as f32 - predicted).abs() <= threshold
        })
        .collect();

    emit_if_covered(resource_id, filtered, fit.time_factor, store, config, params).await
}

/// Step 6 (coverage) + step 7 (emit); shared by the primary fit path and
/// the histogram fallback.
async fn emit_if_covered(
    resource_id: i32,
    mut filtered: Vec<Hit>,
    time_factor: f32,
    store: &dyn Store,
    config: &Config,
    params: &MatchParams<'_>,
) -> Result<Option<QueryResult>> {
    if filtered.len() <= config.min_hits_filtered {
        return Ok(None);
    }
    filtered.sort_by_key(|h| h.query_t1);

    let frame_to_s = config.hop as f32 / config.sample_rate as f32;
    let query_start_s = filtered.first().unwrap().query_t1 as f32 * frame_to_s;
    let query_stop_s = filtered.last().unwrap().query_t1 as f32 * frame_to_s;
    if query_stop_s - query_start_s < config.min_match_duration {
        return Ok(None);
    }

    let ref_t1_min = filtered.iter().map(|h| h.ref_t1).min().unwrap();
    let ref_t1_max = filtered.iter().map(|h| h.ref_t1).max().unwrap();
    let ref_start_s = ref_t1_min as f32 * frame_to_s;
    let ref_stop_s = ref_t1_max as f32 * frame_to_s;

    let total_seconds = ((ref_stop_s - ref_start_s).ceil() as i64).max(1);
    let mut covered: HashSet<i64> = HashSet::new();
    for h in &filtered {
        let sec = ((h.ref_t1 as f32 * frame_to_s) - ref_start_s).floor() as i64;
        covered.insert(sec);
    }
    let empty_seconds = total_seconds - covered.len() as i64;
    let percent_seconds_with_match = 1.0 - (empty_seconds as f32 / total_seconds as f32);
    if percent_seconds_with_match < config.min_sec_with_match {
        return Ok(None);
    }

    let Some(metadata) = store.get_metadata(resource_id).await? else {
        return Ok(None);
    };

    Ok(Some(QueryResult {
        query_path: params.query_path.to_string(),
        query_start: query_start_s + params.query_time_offset_s,
        query_stop: query_stop_s + params.query_time_offset_s,
        ref_path: metadata.path,
        ref_id: resource_id,
        ref_start: ref_start_s,
        ref_stop: ref_stop_s,
        score: filtered.len(),
        time_factor,
        frequency_factor: 1.0,
        percent_seconds_with_match,
        cancelled: false,
    }))
}

/// Fallback path of §4.5: when the robust fit finds no admissible slope,
/// look for a single dominant `Δt` bucket (5-frame buckets) instead.
async fn fallback_histogram_match(
    hits: Vec<Hit>,
    store: &dyn Store,
    config: &Config,
    params: &MatchParams<'_>,
) -> Result<Option<QueryResult>> {
    const BUCKET_FRAMES: i32 = 5;
    if hits.is_empty() {
        return Ok(None);
    }
    let resource_id = hits[0].resource_id;

    let mut buckets: BTreeMap<i32, usize> = BTreeMap::new();
    for h in &hits {
        let bucket = h.delta_t().div_euclid(BUCKET_FRAMES);
        *buckets.entry(bucket).or_insert(0) += 1;
    }
    let Some((&top_bucket, &top_count)) =
        buckets.iter().max_by_key(|(_, &count)| count)
    else {
        return Ok(None);
    };
    if top_count <= config.min_hits_unfiltered {
        return Ok(None);
    }

    let centre = top_bucket * BUCKET_FRAMES + BUCKET_FRAMES / 2;
    let admitted: Vec<Hit> = hits
        .into_iter()
        .filter(|h| (h.delta_t() - centre).abs() <= BUCKET_FRAMES)
        .collect();

    emit_if_covered(resource_id, admitted, 1.0, store, config, params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::ResourceMetadata;

    fn cfg() -> Config {
        let mut c = Config::default();
        c.sample_rate = 1000;
        c.hop = 10; // 1 frame = 10ms
        c.query_range = 1;
        c.min_hits_unfiltered = 3;
        c.min_hits_filtered = 3;
        c.hit_part_divider = 2;
        c.hit_part_max_size = 50;
        c.min_time_factor = 0.8;
        c.max_time_factor = 1.2;
        c.min_match_duration = 0.01;
        c.min_sec_with_match = 0.0;
        c
    }

    fn fp(hash: u64, t1: i32) -> Fingerprint {
        use crate::types::EventPoint;
        Fingerprint {
            hash,
            p1: EventPoint::new(t1, 0, 1.0),
            p2: EventPoint::new(t1 + 1, 0, 1.0),
            p3: EventPoint::new(t1 + 2, 0, 1.0),
        }
    }

    #[tokio::test]
    async fn a_clean_offset_produces_one_result_with_time_factor_one() {
        let config = cfg();
        let store = MemoryStore::new();
        let offset = 50;
        for i in 0..20 {
            store.add(i as u64, 7, i + offset).await.unwrap();
        }
        store.flush_store().await.unwrap();
        store
            .put_metadata(ResourceMetadata {
                id: 7,
                path: "ref.wav".into(),
                duration_seconds: 10.0,
                num_fingerprints: 20,
            })
            .await
            .unwrap();

        let query_fps: Vec<Fingerprint> = (0..20).map(|i| fp(i as u64, i)).collect();
        let avoid = HashSet::new();
        let results = match_fingerprints(
            &store,
            &config,
            &query_fps,
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
        assert!((results[0].time_factor - 1.0).abs() < 0.01);
        assert_eq!(results[0].ref_path, "ref.wav");
    }

    #[tokio::test]
    async fn no_postings_yields_no_results() {
        let config = cfg();
        let store = MemoryStore::new();
        let query_fps: Vec<Fingerprint> = (0..5).map(|i| fp(i as u64, i)).collect();
        let avoid = HashSet::new();
        let results = match_fingerprints(
            &store,
            &config,
            &query_fps,
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

    #[tokio::test]
    async fn avoid_set_excludes_a_resource() {
        let config = cfg();
        let store = MemoryStore::new();
        for i in 0..20 {
            store.add(i as u64, 7, i + 50).await.unwrap();
        }
        store.flush_store().await.unwrap();
        store
            .put_metadata(ResourceMetadata {
                id: 7,
                path: "ref.wav".into(),
                duration_seconds: 10.0,
                num_fingerprints: 20,
            })
            .await
            .unwrap();

        let query_fps: Vec<Fingerprint> = (0..20).map(|i| fp(i as u64, i)).collect();
        let mut avoid = HashSet::new();
        avoid.insert(7);
        let results = match_fingerprints(
            &store,
            &config,
            &query_fps,
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

    #[tokio::test]
    async fn an_expired_deadline_yields_no_results_and_no_partial_work() {
        let config = cfg();
        let store = MemoryStore::new();
        let offset = 50;
        for i in 0..20 {
            store.add(i as u64, 7, i + offset).await.unwrap();
        }
        store.flush_store().await.unwrap();
        store
            .put_metadata(ResourceMetadata {
                id: 7,
                path: "ref.wav".into(),
                duration_seconds: 10.0,
                num_fingerprints: 20,
            })
            .await
            .unwrap();

        let query_fps: Vec<Fingerprint> = (0..20).map(|i| fp(i as u64, i)).collect();
        let avoid = HashSet::new();
        let results = match_fingerprints(
            &store,
            &config,
            &query_fps,
            MatchParams {
                query_path: "query.wav",
                query_time_offset_s: 0.0,
                avoid_ids: &avoid,
                deadline: Some(Instant::now()),
            },
        )
        .await
        .unwrap();

        // The deadline is already past before the single resource group is
        // reached, so that group never gets scored.
        assert!(results.is_empty());
    }
}

use crate::engine::Engine;
use crate::error::Result;
use crate::store::Store;
use crate::types::QueryResult;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Sliding-window dispatch over a long query (§4.6): decodes `[t, t+step)`
/// windows for `t = 0, step-overlap, 2(step-overlap), ...` while
/// `t+step < duration`, matches each window independently, then collapses
/// adjacent-window duplicate detections of the same reference.
///
/// Grounded in Panako-Rust's `fpmonitor` segment loop and its
/// `merge_overlapping_detections`.
pub async fn monitor_path(engine: &Engine, path: &Path, duration_s: f32) -> Result<Vec<QueryResult>> {
    let step = engine.config.monitor_step;
    let overlap = engine.config.monitor_overlap;
    let stride = (step - overlap).max(0.001);

    let mut all_results = Vec::new();
    let avoid: HashSet<i32> = HashSet::new();

    let mut t = 0.0f32;
    while t + step < duration_s {
        let window_results = engine
            .query_window(path, Some(t), Some(step), t, &avoid, None)
            .await?;
        all_results.extend(window_results);
        t += stride;
    }

    merge_overlapping_detections(engine, all_results).await
}

/// Groups detections by reference id, sorts each group by absolute start
/// time (`query_start`, already offset into the full clip), then collapses
/// runs whose starts fall within one third of the reference's full
/// duration of one another, keeping the higher-scoring detection (ties
/// keep the earlier one).
async fn merge_overlapping_detections(
    engine: &Engine,
    results: Vec<QueryResult>,
) -> Result<Vec<QueryResult>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }

    let mut by_ref: HashMap<i32, Vec<QueryResult>> = HashMap::new();
    for result in results {
        by_ref.entry(result.ref_id).or_default().push(result);
    }

    let mut merged = Vec::new();
    for (ref_id, mut group) in by_ref {
        group.sort_by(|a, b| a.query_start.partial_cmp(&b.query_start).unwrap());

        let ref_duration_s = match engine.store.get_metadata(ref_id).await? {
            Some(metadata) if metadata.duration_seconds > 0.0 => metadata.duration_seconds,
            _ => group
                .iter()
                .map(|r| r.ref_stop - r.ref_start)
                .fold(0.0f32, f32::max)
                .max(1.0),
        };
        let threshold = ref_duration_s / 3.0;

        let mut i = 0;
        while i < group.len() {
            let current_start = group[i].query_start;
            let mut best = i;
            let mut j = i + 1;
            while j < group.len() && (group[j].query_start - current_start).abs() < threshold {
                if group[j].score > group[best].score {
                    best = j;
                }
                j += 1;
            }
            merged.push(group[best].clone());
            i = j;
        }
    }

    merged.sort_by(|a, b| a.query_start.partial_cmp(&b.query_start).unwrap());
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use crate::types::ResourceMetadata;
    use std::sync::Arc;

    fn qr(ref_id: i32, query_start: f32, score: usize) -> QueryResult {
        QueryResult {
            query_path: "q.wav".into(),
            query_start,
            query_stop: query_start + 5.0,
            ref_path: "r.wav".into(),
            ref_id,
            ref_start: 0.0,
            ref_stop: 5.0,
            score,
            time_factor: 1.0,
            frequency_factor: 1.0,
            percent_seconds_with_match: 1.0,
            cancelled: false,
        }
    }

    async fn engine_with_resource(ref_id: i32, duration_seconds: f32) -> Engine {
        let store = MemoryStore::new();
        store
            .put_metadata(ResourceMetadata {
                id: ref_id,
                path: "r.wav".into(),
                duration_seconds,
                num_fingerprints: 100,
            })
            .await
            .unwrap();
        Engine::new(Config::default(), Arc::new(store))
    }

    #[tokio::test]
    async fn close_detections_of_the_same_reference_collapse_to_the_higher_score() {
        let engine = engine_with_resource(7, 30.0).await;
        let results = vec![qr(7, 0.0, 10), qr(7, 2.0, 25), qr(7, 4.0, 5)];

        let merged = merge_overlapping_detections(&engine, results).await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 25);
    }

    #[tokio::test]
    async fn detections_far_apart_are_kept_separate() {
        let engine = engine_with_resource(7, 9.0).await;
        let results = vec![qr(7, 0.0, 10), qr(7, 20.0, 12)];

        let merged = merge_overlapping_detections(&engine, results).await.unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let engine = engine_with_resource(7, 9.0).await;
        assert!(merge_overlapping_detections(&engine, vec![]).await.unwrap().is_empty());
    }
}

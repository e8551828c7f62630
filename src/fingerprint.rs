use crate::config::Config;
use crate::types::{EventPoint, Fingerprint};

/// Quantisation widths for the hash bit layout (§4.3, decided in
/// SPEC_FULL.md §9 "Open questions").
const FREQ_BITS: u32 = 9;
const FREQ_RATIO_BITS: u32 = 9;
const TIME_RATIO_BITS: u32 = 12;

const FREQ_MASK: u64 = (1 << FREQ_BITS) - 1;
const FREQ_RATIO_MASK: u64 = (1 << FREQ_RATIO_BITS) - 1;
const TIME_RATIO_MASK: u64 = (1 << TIME_RATIO_BITS) - 1;

/// Upper bound on the frequency ratio the quantiser resolves; ratios
/// beyond this saturate rather than wrap, so distinct-but-extreme
/// triplets still collide predictably instead of aliasing.
const FREQ_RATIO_SPAN: f32 = 8.0;

/// Combines a stream of event points into geometrically-constrained
/// triplets and folds each one into its 64-bit hash (§4.3).
pub struct FingerprintBuilder<'a> {
    config: &'a Config,
}

impl<'a> FingerprintBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// `points` must already be sorted by `t` ascending (the extractor's
    /// natural output order).
    pub fn build(&self, points: &[EventPoint]) -> Vec<Fingerprint> {
        let mut fingerprints = Vec::new();
        let dt_min = self.config.fp_dt_min as i32;
        let dt_max = self.config.fp_dt_max as i32;
        // The third peak gets a widened time window relative to the
        // anchor, per §4.3.
        let dt_max_wide = dt_max * 2;
        let df_min = self.config.fp_df_min;
        let df_max = self.config.fp_df_max;

        for i in 0..points.len() {
            let p1 = points[i];
            let mut candidates: Vec<(EventPoint, EventPoint)> = Vec::new();

            for j in (i + 1)..points.len() {
                let p2 = points[j];
                let t2_delta = p2.t - p1.t;
                if t2_delta > dt_max {
                    break;
                }
                if t2_delta < dt_min {
                    continue;
                }
                let f2_delta = p2.f - p1.f;
                if f2_delta < df_min || f2_delta > df_max {
                    continue;
                }

                for k in (j + 1)..points.len() {
                    let p3 = points[k];
                    let t3_delta = p3.t - p1.t;
                    if t3_delta > dt_max_wide {
                        break;
                    }
                    if t3_delta < dt_min {
                        continue;
                    }
                    let f3_delta = p3.f - p1.f;
                    if f3_delta < df_min || f3_delta > df_max {
                        continue;
                    }
                    candidates.push((p2, p3));
                }
            }

            if candidates.len() > self.config.fp_max_per_anchor {
                candidates.sort_by(|a, b| {
                    let sum_a = a.0.magnitude() + a.1.magnitude();
                    let sum_b = b.0.magnitude() + b.1.magnitude();
                    sum_b.partial_cmp(&sum_a).unwrap()
                });
                candidates.truncate(self.config.fp_max_per_anchor);
            }

            for (p2, p3) in candidates {
                let hash = hash_triplet(p1, p2, p3);
                fingerprints.push(Fingerprint { hash, p1, p2, p3 });
            }
        }

        fingerprints
    }
}

/// Folds a geometrically-valid triplet into its 64-bit hash (§4.3).
///
/// Pure function of `(p1, p2, p3)`: depends only on quantised frequency
/// and ratio deltas, never on absolute time, so identical triplets
/// always hash identically and near-identical triplets land in the
/// ±Q numeric neighbourhood the matcher's lookup relies on.
pub fn hash_triplet(p1: EventPoint, p2: EventPoint, p3: EventPoint) -> u64 {
    let f1 = (p1.f.max(0) as u32 as u64) & FREQ_MASK;

    let freq_ratio = |f: i32, base: i32| -> u64 {
        let base = base.max(1) as f32;
        let ratio = (f as f32 / base).clamp(0.0, FREQ_RATIO_SPAN);
        let q = ((ratio / FREQ_RATIO_SPAN) * FREQ_RATIO_MASK as f32).round() as u64;
        q & FREQ_RATIO_MASK
    };
    let f2_ratio = freq_ratio(p2.f, p1.f);
    let f3_ratio = freq_ratio(p3.f, p1.f);

    let span13 = (p3.t - p1.t).max(1) as f32;
    let t12_ratio = (((p2.t - p1.t) as f32 / span13).clamp(0.0, 1.0) * TIME_RATIO_MASK as f32)
        .round() as u64
        & TIME_RATIO_MASK;
    let t23_ratio = (((p3.t - p2.t) as f32 / span13).clamp(0.0, 1.0) * TIME_RATIO_MASK as f32)
        .round() as u64
        & TIME_RATIO_MASK;

    let mut hash = f1;
    let mut shift = FREQ_BITS;
    hash |= f2_ratio << shift;
    shift += FREQ_RATIO_BITS;
    hash |= f3_ratio << shift;
    shift += FREQ_RATIO_BITS;
    hash |= t12_ratio << shift;
    shift += TIME_RATIO_BITS;
    hash |= t23_ratio << shift;

    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(t: i32, f: i32, m: f32) -> EventPoint {
        EventPoint::new(t, f, m)
    }

    #[test]
    fn hash_is_a_pure_function_of_the_triplet() {
        let p1 = ep(0, 100, 1.0);
        let p2 = ep(5, 110, 1.0);
        let p3 = ep(12, 95, 1.0);

        let h1 = hash_triplet(p1, p2, p3);
        let h2 = hash_triplet(p1, p2, p3);
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_is_independent_of_absolute_time() {
        let p1 = ep(0, 100, 1.0);
        let p2 = ep(5, 110, 1.0);
        let p3 = ep(12, 95, 1.0);

        let shift = 1000;
        let p1s = ep(p1.t + shift, p1.f, 1.0);
        let p2s = ep(p2.t + shift, p2.f, 1.0);
        let p3s = ep(p3.t + shift, p3.f, 1.0);

        assert_eq!(hash_triplet(p1, p2, p3), hash_triplet(p1s, p2s, p3s));
    }

    #[test]
    fn builder_only_emits_ordered_geometrically_valid_triplets() {
        let mut cfg = Config::default();
        cfg.fp_dt_min = 1;
        cfg.fp_dt_max = 20;
        cfg.fp_df_min = -50;
        cfg.fp_df_max = 50;
        cfg.fp_max_per_anchor = 10;
        let builder = FingerprintBuilder::new(&cfg);

        let points = vec![ep(0, 100, 1.0), ep(3, 110, 1.0), ep(8, 120, 1.0)];
        let fps = builder.build(&points);

        assert_eq!(fps.len(), 1);
        let fp = &fps[0];
        assert!(fp.p1.t < fp.p2.t);
        assert!(fp.p2.t < fp.p3.t);
    }

    #[test]
    fn single_event_point_yields_no_fingerprints() {
        let cfg = Config::default();
        let builder = FingerprintBuilder::new(&cfg);
        let points = vec![ep(0, 100, 1.0)];
        assert!(builder.build(&points).is_empty());
    }

    #[test]
    fn max_per_anchor_caps_candidate_fanout() {
        let mut cfg = Config::default();
        cfg.fp_dt_min = 1;
        cfg.fp_dt_max = 100;
        cfg.fp_df_min = -1000;
        cfg.fp_df_max = 1000;
        cfg.fp_max_per_anchor = 2;
        let builder = FingerprintBuilder::new(&cfg);

        let mut points = vec![ep(0, 100, 10.0)];
        for i in 1..10 {
            points.push(ep(i, 100 + i, 1.0));
        }
        let fps = builder.build(&points);
        let from_anchor: Vec<_> = fps.iter().filter(|f| f.p1.t == 0).collect();
        assert!(from_anchor.len() <= 2);
    }
}

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A single time–frequency local maximum that survived whitening and
/// density gating (§3). Never persisted on its own; only consumed by the
/// fingerprint builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventPoint {
    /// Frame index. Seconds = t * hop / sample_rate.
    pub t: i32,
    /// FFT bin index, 0..frame_size/2.
    pub f: i32,
    pub m: OrderedFloat<f32>,
}

impl EventPoint {
    pub fn new(t: i32, f: i32, m: f32) -> Self {
        Self {
            t,
            f,
            m: OrderedFloat(m),
        }
    }

    pub fn magnitude(&self) -> f32 {
        self.m.into_inner()
    }
}

/// A triplet of event points plus its derived 64-bit hash (§3, §4.3).
///
/// `t1 < t2 < t3` is an invariant enforced at construction; only `(hash,
/// t1)` is indexed, `p2`/`p3` are retained for diagnostics and for the
/// fingerprint export report (§6).
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    pub hash: u64,
    pub p1: EventPoint,
    pub p2: EventPoint,
    pub p3: EventPoint,
}

impl Fingerprint {
    pub fn t1(&self) -> i32 {
        self.p1.t
    }
}

/// Metadata recorded once per stored resource (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub id: i32,
    pub path: String,
    pub duration_seconds: f32,
    pub num_fingerprints: i32,
}

impl ResourceMetadata {
    pub fn prints_per_second(&self) -> f32 {
        if self.duration_seconds > 0.0 {
            self.num_fingerprints as f32 / self.duration_seconds
        } else {
            0.0
        }
    }
}

/// A single (resource_id, t1) posting returned by a store query (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub resource_id: i32,
    pub t1: i32,
}

/// One matched fingerprint hash between a query and a stored resource
/// (§3, "Match hit").
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub resource_id: i32,
    pub ref_t1: i32,
    pub query_t1: i32,
    pub original_hash: u64,
    pub matched_hash: u64,
}

impl Hit {
    pub fn delta_t(&self) -> i32 {
        self.ref_t1 - self.query_t1
    }
}

/// A ranked candidate produced by the matcher (§4.5, Step 7).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query_path: String,
    pub query_start: f32,
    pub query_stop: f32,
    pub ref_path: String,
    pub ref_id: i32,
    pub ref_start: f32,
    pub ref_stop: f32,
    pub score: usize,
    pub time_factor: f32,
    pub frequency_factor: f32,
    pub percent_seconds_with_match: f32,
    /// Set when a caller-supplied deadline (§5, "Cancellation/timeouts")
    /// expired before every resource group could be evaluated; `true`
    /// means this result (and the list it came back in) reflects only the
    /// groups processed before expiry, never a partial/duplicated group.
    pub cancelled: bool,
}

/// Backend-wide counters (§4.4, `stats()`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub num_postings: usize,
    pub num_resources: usize,
}

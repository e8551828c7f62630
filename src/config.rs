use crate::error::{EngineError, Result};
use std::env;

/// Recognised storage backends (§6, STORAGE_BACKEND).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
    File,
}

impl std::str::FromStr for StorageBackend {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "kv" => Ok(StorageBackend::Postgres),
            "file" => Ok(StorageBackend::File),
            other => Err(EngineError::Config(format!(
                "unknown STORAGE_BACKEND '{other}'"
            ))),
        }
    }
}

/// Flat, typed configuration for the whole pipeline (§6).
///
/// One field per recognised key. `Config::default()` carries the values
/// this implementation picked for the parameters the spec leaves open
/// (see "Open questions" in SPEC_FULL.md §9); `Config::from_env()` layers
/// environment overrides on top.
#[derive(Debug, Clone)]
pub struct Config {
    // Spectral framing
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop: usize,

    // Event-point extractor
    pub peak_neighbourhood_t: usize,
    pub peak_neighbourhood_f: usize,
    pub peak_ema_alpha: f32,
    pub peak_ema_k: f32,
    pub peaks_per_frame_max: usize,

    // Triplet geometry
    pub fp_dt_min: usize,
    pub fp_dt_max: usize,
    pub fp_df_min: i32,
    pub fp_df_max: i32,
    pub fp_max_per_anchor: usize,

    // Matcher
    pub query_range: u64,
    pub min_hits_unfiltered: usize,
    pub min_hits_filtered: usize,
    pub hit_part_max_size: usize,
    pub hit_part_divider: usize,
    pub min_time_factor: f32,
    pub max_time_factor: f32,
    pub min_match_duration: f32,
    pub min_sec_with_match: f32,
    pub match_fallback_to_hist: bool,
    pub max_results: usize,

    // Storage
    pub storage_backend: StorageBackend,
    pub cache_to_file: bool,
    pub cache_folder: String,
    pub use_cached_prints: bool,
    pub database_url: Option<String>,

    // Monitor
    pub monitor_step: f32,
    pub monitor_overlap: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 11025,
            frame_size: 1024,
            hop: 128,

            peak_neighbourhood_t: 7,
            peak_neighbourhood_f: 7,
            peak_ema_alpha: 0.9,
            peak_ema_k: 2.0,
            peaks_per_frame_max: 8,

            fp_dt_min: 1,
            fp_dt_max: 64,
            fp_df_min: -512,
            fp_df_max: 512,
            fp_max_per_anchor: 6,

            query_range: 2,
            min_hits_unfiltered: 4,
            min_hits_filtered: 5,
            hit_part_max_size: 50,
            hit_part_divider: 4,
            min_time_factor: 0.8,
            max_time_factor: 1.2,
            min_match_duration: 1.0,
            min_sec_with_match: 0.2,
            match_fallback_to_hist: true,
            max_results: 10,

            storage_backend: StorageBackend::Memory,
            cache_to_file: false,
            cache_folder: "cache".to_string(),
            use_cached_prints: false,
            database_url: None,

            monitor_step: 25.0,
            monitor_overlap: 5.0,
        }
    }
}

macro_rules! env_override {
    ($cfg:expr, $field:ident, $key:expr, $parse:expr) => {
        if let Ok(raw) = env::var($key) {
            $cfg.$field = $parse(&raw).map_err(|_| {
                EngineError::Config(format!("invalid value for {}: '{}'", $key, raw))
            })?;
        }
    };
}

impl Config {
    /// Loads `.env` (if present, via dotenvy, matching the teacher's
    /// `DB::new()`) then layers environment-variable overrides onto the
    /// documented defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut cfg = Config::default();

        env_override!(cfg, sample_rate, "SAMPLE_RATE", str::parse::<u32>);
        env_override!(cfg, frame_size, "FRAME_SIZE", str::parse::<usize>);
        env_override!(cfg, hop, "HOP", str::parse::<usize>);

        env_override!(
            cfg,
            peak_neighbourhood_t,
            "PEAK_NEIGHBOURHOOD_T",
            str::parse::<usize>
        );
        env_override!(
            cfg,
            peak_neighbourhood_f,
            "PEAK_NEIGHBOURHOOD_F",
            str::parse::<usize>
        );
        env_override!(cfg, peak_ema_alpha, "PEAK_EMA_ALPHA", str::parse::<f32>);
        env_override!(cfg, peak_ema_k, "PEAK_EMA_K", str::parse::<f32>);
        env_override!(
            cfg,
            peaks_per_frame_max,
            "PEAKS_PER_FRAME_MAX",
            str::parse::<usize>
        );

        env_override!(cfg, fp_dt_min, "FP_DT_MIN", str::parse::<usize>);
        env_override!(cfg, fp_dt_max, "FP_DT_MAX", str::parse::<usize>);
        env_override!(cfg, fp_df_min, "FP_DF_MIN", str::parse::<i32>);
        env_override!(cfg, fp_df_max, "FP_DF_MAX", str::parse::<i32>);
        env_override!(
            cfg,
            fp_max_per_anchor,
            "FP_MAX_PER_ANCHOR",
            str::parse::<usize>
        );

        env_override!(cfg, query_range, "QUERY_RANGE", str::parse::<u64>);
        env_override!(
            cfg,
            min_hits_unfiltered,
            "MIN_HITS_UNFILTERED",
            str::parse::<usize>
        );
        env_override!(
            cfg,
            min_hits_filtered,
            "MIN_HITS_FILTERED",
            str::parse::<usize>
        );
        env_override!(
            cfg,
            hit_part_max_size,
            "HIT_PART_MAX_SIZE",
            str::parse::<usize>
        );
        env_override!(
            cfg,
            hit_part_divider,
            "HIT_PART_DIVIDER",
            str::parse::<usize>
        );
        env_override!(cfg, min_time_factor, "MIN_TIME_FACTOR", str::parse::<f32>);
        env_override!(cfg, max_time_factor, "MAX_TIME_FACTOR", str::parse::<f32>);
        env_override!(
            cfg,
            min_match_duration,
            "MIN_MATCH_DURATION",
            str::parse::<f32>
        );
        env_override!(
            cfg,
            min_sec_with_match,
            "MIN_SEC_WITH_MATCH",
            str::parse::<f32>
        );
        env_override!(
            cfg,
            match_fallback_to_hist,
            "MATCH_FALLBACK_TO_HIST",
            str::parse::<bool>
        );
        env_override!(cfg, max_results, "MAX_RESULTS", str::parse::<usize>);

        env_override!(
            cfg,
            storage_backend,
            "STORAGE_BACKEND",
            str::parse::<StorageBackend>
        );
        env_override!(cfg, cache_to_file, "CACHE_TO_FILE", str::parse::<bool>);
        if let Ok(folder) = env::var("CACHE_FOLDER") {
            cfg.cache_folder = folder;
        }
        env_override!(
            cfg,
            use_cached_prints,
            "USE_CACHED_PRINTS",
            str::parse::<bool>
        );
        if let Ok(url) = env::var("DATABASE_URL") {
            cfg.database_url = Some(url);
        }

        env_override!(cfg, monitor_step, "MONITOR_STEP", str::parse::<f32>);
        env_override!(cfg, monitor_overlap, "MONITOR_OVERLAP", str::parse::<f32>);

        cfg.validate()?;
        Ok(cfg)
    }

    /// Cross-field sanity checks implied by §3/§4 of the spec.
    pub fn validate(&self) -> Result<()> {
        if !self.frame_size.is_power_of_two() {
            return Err(EngineError::Config(
                "FRAME_SIZE must be a power of two".into(),
            ));
        }
        if self.hop == 0 || self.hop > self.frame_size {
            return Err(EngineError::Config(
                "HOP must be in (0, FRAME_SIZE]".into(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(EngineError::Config("SAMPLE_RATE must be > 0".into()));
        }
        if self.fp_dt_min == 0 || self.fp_dt_min >= self.fp_dt_max {
            return Err(EngineError::Config("FP_DT_MIN must be in (0, FP_DT_MAX)".into()));
        }
        if !(self.min_time_factor < 1.0 && 1.0 < self.max_time_factor) {
            return Err(EngineError::Config(
                "MIN_TIME_FACTOR must be < 1.0 < MAX_TIME_FACTOR".into(),
            ));
        }
        if self.storage_backend == StorageBackend::Postgres && self.database_url.is_none() {
            return Err(EngineError::Config(
                "DATABASE_URL is required for the postgres backend".into(),
            ));
        }
        if self.monitor_overlap >= self.monitor_step {
            return Err(EngineError::Config(
                "MONITOR_OVERLAP must be smaller than MONITOR_STEP".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_frame_size() {
        let mut cfg = Config::default();
        cfg.frame_size = 1000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_hop_larger_than_frame() {
        let mut cfg = Config::default();
        cfg.hop = cfg.frame_size + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_postgres_without_url() {
        let mut cfg = Config::default();
        cfg.storage_backend = StorageBackend::Postgres;
        cfg.database_url = None;
        assert!(cfg.validate().is_err());
    }
}

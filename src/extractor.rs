use crate::config::Config;
use crate::fft::{FrameSource, SpectralFrontEnd};
use crate::types::EventPoint;

/// Locates sparse time-frequency peaks on a magnitude spectrogram (§4.2):
/// a local-maximum rule over a (2Δt+1)x(2Δf+1) neighbourhood, gated by a
/// per-bin EMA ("spectral whitening"), then capped per frame by
/// magnitude to bound event density.
pub struct EventPointExtractor<'a> {
    config: &'a Config,
}

impl<'a> EventPointExtractor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Runs the full extractor over one clip's mono PCM samples.
    ///
    /// The whole spectrogram is materialised eagerly (bounded-length
    /// clips, per SPEC_FULL §4.2) rather than processed as an unbounded
    /// stream; a true streaming front end would keep only the last
    /// `2*peak_neighbourhood_t + 1` spectra in a ring buffer, which is
    /// what this buffering is standing in for.
    pub fn extract(&self, samples: &[f32]) -> Vec<EventPoint> {
        let front_end = SpectralFrontEnd::new(self.config.frame_size);
        let frames = FrameSource::new(samples, self.config.frame_size, self.config.hop);
        let spectra: Vec<Vec<f32>> = frames
            .map(|(_, frame)| front_end.magnitude_spectrum(frame))
            .collect();

        self.extract_from_spectra(&spectra)
    }

    /// Same as [`extract`] but operating on an already-computed
    /// spectrogram (half-spectrum magnitudes per frame); split out for
    /// unit testing without the FFT in the loop.
    pub fn extract_from_spectra(&self, spectra: &[Vec<f32>]) -> Vec<EventPoint> {
        let num_frames = spectra.len();
        if num_frames == 0 {
            return Vec::new();
        }
        let num_bins = spectra[0].len();

        let dt = self.config.peak_neighbourhood_t;
        let df = self.config.peak_neighbourhood_f;
        let alpha = self.config.peak_ema_alpha;
        let k = self.config.peak_ema_k;

        // EMA snapshot taken *before* folding in frame t, so gating at t
        // never compares a bin against itself (§4.2).
        let mut ema = vec![0.0f32; num_bins];
        let mut ema_snapshots: Vec<Vec<f32>> = Vec::with_capacity(num_frames);
        for (t, spectrum) in spectra.iter().enumerate() {
            if t == 0 {
                ema.copy_from_slice(spectrum);
            }
            ema_snapshots.push(ema.clone());
            for f in 0..num_bins {
                ema[f] = alpha * ema[f] + (1.0 - alpha) * spectrum[f];
            }
        }

        let mut points = Vec::new();
        if num_frames <= 2 * dt || num_bins <= 2 * df {
            return points;
        }

        for t in dt..(num_frames - dt) {
            let mut frame_candidates: Vec<EventPoint> = Vec::new();

            for f in df..(num_bins - df) {
                let m = spectra[t][f];
                if m <= 0.0 {
                    continue;
                }

                if !self.is_local_max(spectra, t, f, dt, df) {
                    continue;
                }

                if m <= k * ema_snapshots[t][f] {
                    continue;
                }

                frame_candidates.push(EventPoint::new(t as i32, f as i32, m));
            }

            if frame_candidates.len() > self.config.peaks_per_frame_max {
                frame_candidates
                    .sort_by(|a, b| b.magnitude().partial_cmp(&a.magnitude()).unwrap());
                frame_candidates.truncate(self.config.peaks_per_frame_max);
                frame_candidates.sort_by_key(|p| p.f);
            }

            points.extend(frame_candidates);
        }

        points
    }

    fn is_local_max(
        &self,
        spectra: &[Vec<f32>],
        t: usize,
        f: usize,
        dt: usize,
        df: usize,
    ) -> bool {
        let m = spectra[t][f];
        for nt in t - dt..=t + dt {
            for nf in f - df..=f + df {
                if nt == t && nf == f {
                    continue;
                }
                if spectra[nt][nf] >= m {
                    return false;
                }
            }
        }
        true
    }
}

use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Synthesises a short multi-tone clip (a chord, plus slow amplitude
/// modulation so the spectrum isn't perfectly static across the whole
/// clip) and writes it as a 16-bit PCM WAV, self-contained and
/// network-free per SPEC_FULL.md §10's test-tooling section.
pub fn write_chord_wav(path: &Path, freqs_hz: &[f32], duration_s: f32, sample_rate: u32) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let num_samples = (duration_s * sample_rate as f32) as usize;

    for i in 0..num_samples {
        let t = i as f32 / sample_rate as f32;
        let wobble = 1.0 + 0.15 * (2.0 * std::f32::consts::PI * 0.7 * t).sin();
        let mut sample = 0.0f32;
        for (k, &f) in freqs_hz.iter().enumerate() {
            let phase = 2.0 * std::f32::consts::PI * f * wobble * t;
            sample += (phase + k as f32).sin();
        }
        sample /= freqs_hz.len() as f32;
        let amplitude = i16::MAX as f32 * 0.8;
        writer.write_sample((sample * amplitude) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Writes a clip built from a disjoint set of frequencies from
/// [`write_chord_wav`], standing in for "an unrelated clip" in the noise
/// rejection scenario.
pub fn write_unrelated_wav(path: &Path, duration_s: f32, sample_rate: u32) {
    write_chord_wav(path, &[311.0, 829.0, 1511.0], duration_s, sample_rate);
}

/// Re-encodes an existing mono `f32` buffer at a different sample rate by
/// simple linear interpolation, simulating a time-stretched re-recording
/// of the same material (scenario 4, §8).
pub fn write_stretched_wav(
    src_samples: &[f32],
    src_rate: u32,
    stretch_factor: f32,
    path: &Path,
) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: src_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let new_len = (src_samples.len() as f32 * stretch_factor) as usize;
    for i in 0..new_len {
        let src_idx = i as f32 / stretch_factor;
        let lo = src_idx.floor() as usize;
        let frac = src_idx.fract();
        let s = if lo + 1 < src_samples.len() {
            src_samples[lo] + frac * (src_samples[lo + 1] - src_samples[lo])
        } else if lo < src_samples.len() {
            src_samples[lo]
        } else {
            0.0
        };
        let amplitude = i16::MAX as f32;
        writer.write_sample((s * amplitude) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn read_wav_as_mono_f32(path: &Path) -> (Vec<f32>, u32) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.unwrap() as f32 / i16::MAX as f32)
        .collect();
    (samples, spec.sample_rate)
}

/// A `Config` tuned for short synthetic fixtures: a smaller frame/hop
/// than the production defaults so a handful of seconds of audio still
/// yields enough frames for peaks and triplets to form.
pub fn test_config(sample_rate: u32) -> acoufp::Config {
    let mut cfg = acoufp::Config::default();
    cfg.sample_rate = sample_rate;
    cfg.frame_size = 512;
    cfg.hop = 64;
    cfg.peak_neighbourhood_t = 3;
    cfg.peak_neighbourhood_f = 3;
    cfg.peak_ema_k = 1.2;
    cfg.peaks_per_frame_max = 12;
    cfg.fp_dt_min = 1;
    cfg.fp_dt_max = 40;
    cfg.fp_df_min = -200;
    cfg.fp_df_max = 200;
    cfg.fp_max_per_anchor = 8;
    cfg.query_range = 2;
    cfg.min_hits_unfiltered = 3;
    cfg.min_hits_filtered = 3;
    cfg.hit_part_max_size = 50;
    cfg.hit_part_divider = 4;
    cfg.min_time_factor = 0.8;
    cfg.max_time_factor = 1.2;
    cfg.min_match_duration = 0.2;
    cfg.min_sec_with_match = 0.0;
    cfg.match_fallback_to_hist = true;
    cfg.max_results = 10;
    cfg
}

use crate::error::{EngineError, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// The decoder interface consumed by the engine (§6): decodes a file to
/// a mono `f32` PCM buffer at `target_sample_rate`, optionally windowed
/// to `[start_s, start_s + len_s)`. Built on `symphonia`, generalising
/// the teacher's `AudioProcessor::get_decoded_audio` (down-mix by
/// channel-averaging, linear resample to the engine's configured rate).
pub fn decode_to_mono(
    path: &Path,
    target_sample_rate: u32,
    start_s: Option<f32>,
    len_s: Option<f32>,
) -> Result<Vec<f32>> {
    let (samples, native_rate) = decode_all_channels_averaged(path)?;
    let windowed = window_samples(samples, native_rate, start_s, len_s);
    Ok(resample_linear(&windowed, native_rate, target_sample_rate))
}

fn window_samples(samples: Vec<f32>, sample_rate: u32, start_s: Option<f32>, len_s: Option<f32>) -> Vec<f32> {
    let start_sample = (start_s.unwrap_or(0.0) * sample_rate as f32).round() as usize;
    let start_sample = start_sample.min(samples.len());
    let end_sample = match len_s {
        Some(len) => (start_sample + (len * sample_rate as f32).round() as usize).min(samples.len()),
        None => samples.len(),
    };
    samples[start_sample..end_sample].to_vec()
}

fn decode_all_channels_averaged(path: &Path) -> Result<(Vec<f32>, u32)> {
    let file = File::open(path).map_err(|e| EngineError::Decode(e.to_string()))?;
    let source: Box<dyn MediaSource> = Box::new(file);
    let stream = MediaSourceStream::new(source, Default::default());

    let probe = symphonia::default::get_probe();
    let format_options = FormatOptions::default();
    let metadata_options = MetadataOptions::default();

    let probed = probe
        .format(&Hint::new(), stream, &format_options, &metadata_options)
        .map_err(|e| EngineError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.sample_rate.is_some())
        .ok_or_else(|| EngineError::Decode("no decodable audio track".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| EngineError::Decode("track has no sample rate".into()))?;

    let codec_registry = symphonia::default::get_codecs();
    let mut decoder = codec_registry
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(EngineError::from(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).map_err(EngineError::from)?;
        let spec = *decoded.spec();
        let num_channels = spec.channels.count().max(1);

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);

        for frame in buf.samples().chunks_exact(num_channels) {
            let mono = frame.iter().sum::<f32>() / num_channels as f32;
            samples.push(mono);
        }
    }

    Ok((samples, sample_rate))
}

/// Linear resampler, matching `AudioProcessor::resample_linear` in the
/// teacher: good enough to carry fixtures and real-world clips between
/// sample rates without pulling in a dedicated DSP crate.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let in_idx_float = i as f64 * ratio;
        let in_idx = in_idx_float.floor() as usize;
        let frac = in_idx_float.fract() as f32;

        if in_idx + 1 < samples.len() {
            let p1 = samples[in_idx];
            let p2 = samples[in_idx + 1];
            resampled.push(p1 + frac * (p2 - p1));
        } else if in_idx < samples.len() {
            resampled.push(samples[in_idx]);
        } else {
            break;
        }
    }
    resampled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resampling_to_the_same_rate_is_a_no_op() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples);
    }

    #[test]
    fn downsampling_halves_the_length() {
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let out = resample_linear(&samples, 2000, 1000);
        assert!((out.len() as i64 - 500).abs() <= 1);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(resample_linear(&[], 16000, 8000).is_empty());
    }
}

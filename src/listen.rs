use crate::decode::resample_linear;
use crate::error::{EngineError, Result};
use audio_gate::NoiseGate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use hound::{SampleFormat as WavSampleFormat, WavSpec, WavWriter};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Live-microphone capture for the `listen` CLI subcommand (§6, §10):
/// records `duration_secs` of audio from the default input device and
/// returns it downmixed to mono at `target_sample_rate`, the same shape
/// [`crate::decode::decode_to_mono`] produces for a file.
///
/// Grounded in the teacher's `AudioProcessor::record_audio`: same `cpal`
/// device/stream setup, same noise-gate construction (also left
/// unwired in the teacher — the gate exists to mark the intended
/// processing point, not because this implementation forgot to call
/// it).
pub fn record_from_microphone(duration_secs: u64, target_sample_rate: u32) -> Result<Vec<f32>> {
    let _gate = NoiseGate::new(-36.0, -54.0, 48000.0, 2, 150.0, 25.0, 150.0);

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| EngineError::Decode("no input device found".into()))?;
    let config = device
        .default_input_config()
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let recorded = Arc::new(Mutex::new(Vec::<f32>::new()));
    let recorded_clone = recorded.clone();
    let err_fn = |err| log::warn!("input stream error: {err}");

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[f32], _: &_| {
                recorded_clone.lock().unwrap().extend_from_slice(data);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[i16], _: &_| {
                let mut buf = recorded_clone.lock().unwrap();
                buf.extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
            },
            err_fn,
            None,
        ),
        other => {
            return Err(EngineError::Decode(format!(
                "unsupported input sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| EngineError::Decode(e.to_string()))?;

    stream
        .play()
        .map_err(|e| EngineError::Decode(e.to_string()))?;
    thread::sleep(Duration::from_secs(duration_secs));
    drop(stream);

    let interleaved = recorded.lock().unwrap().clone();
    let channels = config.channels() as usize;
    let mono = downmix(&interleaved, channels.max(1));
    Ok(resample_linear(&mono, config.sample_rate().0, target_sample_rate))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Saves a mono `f32` buffer as a 16-bit PCM WAV file, mirroring the
/// teacher's `AudioProcessor::save_as_wav` (used by `listen` to persist
/// what was captured before fingerprinting it).
pub fn save_as_wav(samples: &[f32], sample_rate: u32, path: &Path) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: WavSampleFormat::Int,
    };
    let mut writer =
        WavWriter::create(path, spec).map_err(|e| EngineError::StorageIo(e.to_string()))?;
    for &sample in samples {
        let amplitude = i16::MAX as f32;
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * amplitude) as i16)
            .map_err(|e| EngineError::StorageIo(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| EngineError::StorageIo(e.to_string()))?;
    Ok(())
}

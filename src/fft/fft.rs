use crate::fft::complex::Complex;
use std::f32::consts::PI;

/// The spectral front-end of §4.1: windows a frame, runs a radix-2
/// Cooley-Tukey FFT over it, and returns the half-spectrum magnitude
/// vector the event-point extractor consumes.
///
/// `frame_size` must be a power of two (enforced by `Config::validate`,
/// checked again here defensively since this type can be built directly
/// in tests).
pub struct SpectralFrontEnd {
    frame_size: usize,
    hann_window: Vec<f32>,
}

impl SpectralFrontEnd {
    pub fn new(frame_size: usize) -> Self {
        assert!(
            frame_size.is_power_of_two(),
            "frame_size must be a power of two"
        );
        Self {
            frame_size,
            hann_window: Self::build_hann_window(frame_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn build_hann_window(n: usize) -> Vec<f32> {
        if n <= 1 {
            return vec![1.0; n];
        }
        (0..n)
            .map(|i| {
                let num = 2.0 * PI * (i as f32);
                let denom = (n as f32) - 1.0;
                0.5 * (1.0 - (num / denom).cos())
            })
            .collect()
    }

    /// Applies the cached Hann window to `frame` (must have length `frame_size`).
    pub fn apply_window(&self, frame: &[f32]) -> Vec<f32> {
        debug_assert_eq!(frame.len(), self.frame_size);
        frame
            .iter()
            .zip(self.hann_window.iter())
            .map(|(&sample, &w)| sample * w)
            .collect()
    }

    fn real_fft(&self, windowed: &[f32]) -> Vec<Complex> {
        let mut buf: Vec<Complex> = windowed.iter().map(|&s| Complex::new(s, 0.0)).collect();
        Self::cooley_tukey(&mut buf);
        buf
    }

    fn cooley_tukey(buf: &mut [Complex]) {
        let n = buf.len();
        if n <= 1 {
            return;
        }

        let mut even: Vec<Complex> = Vec::with_capacity(n / 2);
        let mut odd: Vec<Complex> = Vec::with_capacity(n / 2);
        for (i, &sample) in buf.iter().enumerate() {
            if i % 2 == 0 {
                even.push(sample);
            } else {
                odd.push(sample);
            }
        }

        Self::cooley_tukey(&mut even);
        Self::cooley_tukey(&mut odd);

        // P(ω) = Pe(ω²) + ω·Po(ω²); P(-ω) = Pe(ω²) - ω·Po(ω²)
        for j in 0..n / 2 {
            let theta = (2.0 * PI * (j as f32)) / (n as f32);
            let omega = Complex::from_polar(1.0, -theta);
            buf[j] = even[j] + (omega * odd[j]);
            buf[j + n / 2] = even[j] - (omega * odd[j]);
        }
    }

    /// Windows, FFTs and takes the magnitude of one frame, returning the
    /// half-spectrum (`frame_size / 2` bins) the extractor operates on
    /// (§4.1).
    pub fn magnitude_spectrum(&self, frame: &[f32]) -> Vec<f32> {
        let windowed = self.apply_window(frame);
        let spectrum = self.real_fft(&windowed);
        let half = self.frame_size / 2;
        spectrum[..half].iter().map(Complex::magnitude).collect()
    }
}

/// Splits a mono PCM buffer into overlapping frames of `frame_size` with
/// hop `hop`, yielding `(frame_index, frame_slice)` in order (§2.1, §4.1).
/// Frame index `t` counts hops: seconds = `t * hop / sample_rate` (§3).
pub struct FrameSource<'a> {
    samples: &'a [f32],
    frame_size: usize,
    hop: usize,
    position: usize,
    frame_index: i32,
}

impl<'a> FrameSource<'a> {
    pub fn new(samples: &'a [f32], frame_size: usize, hop: usize) -> Self {
        Self {
            samples,
            frame_size,
            hop,
            position: 0,
            frame_index: 0,
        }
    }
}

impl<'a> Iterator for FrameSource<'a> {
    type Item = (i32, &'a [f32]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.position + self.frame_size > self.samples.len() {
            return None;
        }
        let frame = &self.samples[self.position..self.position + self.frame_size];
        let t = self.frame_index;
        self.position += self.hop;
        self.frame_index += 1;
        Some((t, frame))
    }
}

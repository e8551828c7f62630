pub mod complex;
pub mod fft;

pub use fft::{FrameSource, SpectralFrontEnd};

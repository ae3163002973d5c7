//! Waveform loading: container decoding, down-mixing and resampling.

pub mod decoder;
pub mod resample;

pub use decoder::load;

/// Mono audio, samples normalised to [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

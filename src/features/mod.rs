//! Fixed-length acoustic descriptors for variable-length recordings.

mod spectral;
pub mod temporal;

use std::path::Path;

use anyhow::{ensure, Context, Result};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio;
use crate::dataset::Sample;

/// Parameters of the MFCC front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub n_mfcc: usize,
    /// Number of frames every clip is padded or truncated to.
    pub max_len: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_mfcc: 13,
            max_len: 150,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.sample_rate > 0, "sample_rate must be positive");
        ensure!(self.n_mfcc > 0, "n_mfcc must be positive");
        ensure!(self.max_len > 0, "max_len must be positive");
        ensure!(self.n_fft > 0, "n_fft must be positive");
        ensure!(self.hop_length > 0, "hop_length must be positive");
        ensure!(
            self.n_mels >= self.n_mfcc,
            "n_mels ({}) must be at least n_mfcc ({})",
            self.n_mels,
            self.n_mfcc
        );
        Ok(())
    }

    /// Length of every flattened feature vector.
    pub fn vector_len(&self) -> usize {
        3 * self.n_mfcc * self.max_len
    }
}

/// Per-split tally of files whose features had to be zero-filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub errors: usize,
    pub total: usize,
}

impl std::fmt::Display for ExtractionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.errors, self.total)
    }
}

/// Feature matrix for a batch, row-aligned with the input samples.
#[derive(Debug, Clone)]
pub struct BatchFeatures {
    pub matrix: Array2<f64>,
    pub report: ExtractionReport,
}

/// Converts audio files into flattened MFCC/Δ/ΔΔ vectors.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn extract(&self, path: &Path) -> Result<Array1<f64>> {
        let waveform = audio::load(path, self.config.sample_rate)?;
        self.extract_samples(&waveform.samples)
            .with_context(|| format!("feature extraction failed for {}", path.display()))
    }

    /// Features for an already decoded waveform at the configured rate.
    pub fn extract_samples(&self, samples: &[f32]) -> Result<Array1<f64>> {
        let coefficients = spectral::mfcc(samples, &self.config)?;
        let stacked = temporal::stack_with_deltas(coefficients.view());
        let fixed = temporal::fix_length(stacked.view(), self.config.max_len);
        Ok(temporal::flatten(fixed.view()))
    }

    /// Extracts every sample in parallel into a preallocated matrix.
    ///
    /// A file that fails to decode or transform leaves its row zero-filled
    /// and is counted in the report; the batch itself never fails.
    pub fn extract_batch(&self, samples: &[Sample]) -> BatchFeatures {
        let width = self.config.vector_len();
        let mut matrix = Array2::zeros((samples.len(), width));
        let errors = matrix
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(samples.par_iter())
            .map(|(row, sample)| self.fill_row(row, sample))
            .filter(|filled| !filled)
            .count();

        let report = ExtractionReport {
            errors,
            total: samples.len(),
        };
        info!(errors, total = report.total, "feature extraction finished");
        BatchFeatures { matrix, report }
    }

    fn fill_row(&self, mut row: ArrayViewMut1<'_, f64>, sample: &Sample) -> bool {
        match self.extract(&sample.path) {
            Ok(features) if features.len() == row.len() => {
                row.assign(&features);
                true
            }
            Ok(features) => {
                warn!(
                    path = %sample.path.display(),
                    expected = row.len(),
                    got = features.len(),
                    "feature vector has wrong length; zero-filling"
                );
                false
            }
            Err(err) => {
                warn!(
                    path = %sample.path.display(),
                    error = %format!("{err:#}"),
                    "zero-filling failed extraction"
                );
                false
            }
        }
    }
}

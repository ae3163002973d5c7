use anyhow::{ensure, Result};
use aus::analysis;
use aus::analysis::mel::MelFilterbank;
use aus::spectrum;
use aus::WindowType;
use ndarray::Array2;
use rustdct::{Dct2, DctPlanner};

use super::FeatureConfig;

const MIN_FREQ: f64 = 20.0;
const POWER_FLOOR: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

/// MFCC time series laid out as `n_mfcc × frames`.
///
/// The transform window shrinks to the clip length for clips shorter than
/// `n_fft`.
pub(crate) fn mfcc(samples: &[f32], config: &FeatureConfig) -> Result<Array2<f64>> {
    ensure!(!samples.is_empty(), "cannot compute MFCCs of an empty waveform");
    let audio: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let window = config.n_fft.min(audio.len()).max(1);
    let hop = config.hop_length.max(1);

    let stft = spectrum::rstft(&audio, window, hop, WindowType::Hanning);
    ensure!(!stft.is_empty(), "spectral transform produced no frames");
    let (magnitude, _) = spectrum::complex_to_polar_rstft(&stft);
    let power = analysis::make_power_spectrogram(&magnitude);

    let freqs = spectrum::rfftfreq(window, config.sample_rate);
    let filterbank = MelFilterbank::new(
        MIN_FREQ,
        config.sample_rate as f64 / 2.0,
        config.n_mels,
        &freqs,
        true,
    );
    let mel = analysis::mel::make_mel_spectrogram(&power, &filterbank);
    ensure!(
        mel.iter().all(|frame| frame.len() == config.n_mels),
        "mel spectrogram has unexpected band count"
    );

    let log_mel = power_to_db(&mel);
    let dct = DctPlanner::<f64>::new().plan_dct2(config.n_mels);
    let mut coefficients = Array2::zeros((config.n_mfcc, log_mel.len()));
    for (t, frame) in log_mel.into_iter().enumerate() {
        let cepstrum = orthonormal_dct2(&*dct, frame);
        coefficients
            .column_mut(t)
            .iter_mut()
            .zip(cepstrum)
            .for_each(|(c, v)| *c = v);
    }
    Ok(coefficients)
}

/// Decibel scaling relative to unit power, clipped to `TOP_DB` below the peak.
fn power_to_db(mel: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut db: Vec<Vec<f64>> = mel
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|&p| 10.0 * p.max(POWER_FLOOR).log10())
                .collect()
        })
        .collect();
    let peak = db
        .iter()
        .flat_map(|frame| frame.iter().copied())
        .fold(f64::NEG_INFINITY, f64::max);
    if peak.is_finite() {
        let floor = peak - TOP_DB;
        db.iter_mut()
            .flat_map(|frame| frame.iter_mut())
            .for_each(|v| *v = v.max(floor));
    }
    db
}

/// DCT-II scaled so the transform matrix is orthonormal.
fn orthonormal_dct2<D: Dct2<f64> + ?Sized>(dct: &D, mut frame: Vec<f64>) -> Vec<f64> {
    if frame.is_empty() {
        return frame;
    }
    dct.process_dct2(&mut frame);
    let n = frame.len() as f64;
    frame[0] *= (1.0 / n).sqrt();
    let rest = (2.0 / n).sqrt();
    frame[1..].iter_mut().for_each(|v| *v *= rest);
    frame
}

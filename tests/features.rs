use std::f32::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use articulyzer::dataset::Sample;
use articulyzer::features::{FeatureConfig, FeatureExtractor};
use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

fn write_tone(dir: &Path, name: &str, sample_rate: u32, seconds: f32, freq: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).expect("create wav");
    let total = (sample_rate as f32 * seconds) as usize;
    for n in 0..total {
        let t = n as f32 / sample_rate as f32;
        let value = 0.4 * (2.0 * PI * freq * t).sin() + 0.1 * (2.0 * PI * 3.0 * freq * t).sin();
        writer
            .write_sample((value * i16::MAX as f32) as i16)
            .expect("write sample");
    }
    writer.finalize().expect("finalize wav");
    path
}

fn sample(path: PathBuf, label: &str) -> Sample {
    Sample {
        path,
        label: label.to_string(),
    }
}

#[test]
fn short_and_long_clips_share_vector_length() {
    let dir = TempDir::new().unwrap();
    let short = write_tone(dir.path(), "short.wav", 16_000, 0.25, 220.0);
    let long = write_tone(dir.path(), "long.wav", 16_000, 6.0, 220.0);
    let extractor = FeatureExtractor::default();
    let expected = 3 * 13 * 150;

    let short_features = extractor.extract(&short).expect("short clip extracts");
    let long_features = extractor.extract(&long).expect("long clip extracts");
    assert_eq!(short_features.len(), expected);
    assert_eq!(long_features.len(), expected);
    assert!(short_features.iter().all(|v| v.is_finite()));
    assert!(long_features.iter().all(|v| v.is_finite()));
}

#[test]
fn short_clip_is_zero_padded_at_the_end() {
    let dir = TempDir::new().unwrap();
    let clip = write_tone(dir.path(), "clip.wav", 16_000, 0.5, 330.0);
    let config = FeatureConfig {
        max_len: 60,
        ..FeatureConfig::default()
    };
    let features = FeatureExtractor::new(config.clone())
        .extract(&clip)
        .unwrap();
    // Row-major layout: the last column of the first coefficient row.
    assert_abs_diff_eq!(features[config.max_len - 1], 0.0);
    assert!(features[0] != 0.0);
}

#[test]
fn extraction_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let clip = write_tone(dir.path(), "clip.wav", 16_000, 1.0, 440.0);
    let extractor = FeatureExtractor::default();
    let first = extractor.extract(&clip).unwrap();
    let second = extractor.extract(&clip).unwrap();
    assert_eq!(first, second);
}

#[test]
fn other_sample_rates_are_resampled() {
    let dir = TempDir::new().unwrap();
    let clip = write_tone(dir.path(), "clip.wav", 44_100, 0.5, 440.0);
    let features = FeatureExtractor::default().extract(&clip).unwrap();
    assert_eq!(features.len(), 3 * 13 * 150);
}

#[test]
fn corrupt_file_is_counted_and_zero_filled() {
    let dir = TempDir::new().unwrap();
    let good_a = write_tone(dir.path(), "a.wav", 16_000, 0.5, 220.0);
    let broken = dir.path().join("broken.wav");
    fs::write(&broken, b"RIFF but not really a wave file").unwrap();
    let good_b = write_tone(dir.path(), "b.wav", 16_000, 0.5, 660.0);

    let batch = FeatureExtractor::default().extract_batch(&[
        sample(good_a, "correct"),
        sample(broken, "correct"),
        sample(good_b, "lisp"),
    ]);

    assert_eq!(batch.report.errors, 1);
    assert_eq!(batch.report.total, 3);
    assert_eq!(batch.report.to_string(), "1/3");
    assert_eq!(batch.matrix.dim(), (3, 3 * 13 * 150));
    assert!(batch.matrix.row(1).iter().all(|&v| v == 0.0));
    assert!(batch.matrix.row(0).iter().any(|&v| v != 0.0));
    assert!(batch.matrix.row(2).iter().any(|&v| v != 0.0));
}

#[test]
fn batch_rows_match_single_extraction() {
    let dir = TempDir::new().unwrap();
    let clip = write_tone(dir.path(), "clip.wav", 16_000, 0.75, 300.0);
    let extractor = FeatureExtractor::default();
    let single = extractor.extract(&clip).unwrap();
    let batch = extractor.extract_batch(&[sample(clip, "correct")]);
    assert_eq!(batch.report.errors, 0);
    assert_eq!(batch.matrix.row(0).to_owned(), single);
}

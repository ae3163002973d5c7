//! End-to-end batch run: index, extract, encode, train, report.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::ArrayView2;
use serde::Serialize;
use tracing::info;

use crate::config::{DatasetRoot, PipelineConfig};
use crate::dataset::{index_split, Dataset, SplitLayout};
use crate::error::ClassifierError;
use crate::features::{ExtractionReport, FeatureExtractor};
use crate::labels::LabelEncoder;
use crate::models::bank::{BankConfig, BankOutcome, ModelBank, Split};

/// Size and extraction health of one split.
#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub samples: usize,
    pub per_label: BTreeMap<String, usize>,
    pub extraction: ExtractionReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub classes: Vec<String>,
    pub train: SplitSummary,
    pub test: SplitSummary,
    #[serde(flatten)]
    pub bank: BankOutcome,
}

impl RunReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialise report")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn summarize(dataset: &Dataset, extraction: ExtractionReport) -> SplitSummary {
    SplitSummary {
        samples: dataset.len(),
        per_label: dataset
            .label_counts()
            .into_iter()
            .map(|(label, count)| (label.to_string(), count))
            .collect(),
        extraction,
    }
}

fn print_split(name: &str, summary: &SplitSummary) {
    println!("{name} samples: {}", summary.samples);
    for (label, count) in &summary.per_label {
        println!("  {label}: {count}");
    }
}

/// Runs the whole job on `root/{Train,Test}` and prints the comparison.
pub fn run(root: &Path, config: &PipelineConfig) -> Result<RunReport> {
    let dirs = DatasetRoot::resolve(root)?;
    let train_set = index_split(&dirs.train, SplitLayout::Train)?;
    let test_set = index_split(&dirs.test, SplitLayout::Test)?;
    info!(
        train = train_set.len(),
        test = test_set.len(),
        root = %dirs.root.display(),
        "dataset indexed"
    );
    for (set, layout) in [(&train_set, SplitLayout::Train), (&test_set, SplitLayout::Test)] {
        if set.is_empty() {
            return Err(ClassifierError::EmptySplit {
                split: layout.name().to_string(),
            }
            .into());
        }
    }

    let extractor = FeatureExtractor::new(config.features.clone());
    let train = extractor.extract_batch(train_set.samples());
    let test = extractor.extract_batch(test_set.samples());
    let train_summary = summarize(&train_set, train.report);
    let test_summary = summarize(&test_set, test.report);

    print_split("Train", &train_summary);
    print_split("Test", &test_summary);
    println!("Feature extraction errors (train): {}", train.report);
    println!("Feature extraction errors (test): {}", test.report);
    println!("Feature vector length: {}", config.features.vector_len());

    let (encoder, bank) = classify(
        train.matrix.view(),
        &train_set.labels(),
        test.matrix.view(),
        &test_set.labels(),
        &config.bank,
    )?;

    println!();
    for result in &bank.results {
        println!("{result}");
    }

    Ok(RunReport {
        classes: encoder.classes().to_vec(),
        train: train_summary,
        test: test_summary,
        bank,
    })
}

/// Encodes labels and runs every model branch on prepared feature matrices.
///
/// Test labels must all appear among the training labels.
pub fn classify(
    train_x: ArrayView2<'_, f64>,
    train_labels: &[String],
    test_x: ArrayView2<'_, f64>,
    test_labels: &[String],
    config: &BankConfig,
) -> Result<(LabelEncoder, BankOutcome)> {
    let (encoder, train_y) = LabelEncoder::fit_transform(train_labels);
    let test_y = encoder
        .transform(test_labels)
        .context("test split contains a label absent from training")?;
    info!(classes = encoder.n_classes(), "labels encoded");

    let bank = ModelBank::new(config.clone());
    let outcome = bank.run(
        Split {
            x: train_x.view(),
            y: &train_y,
        },
        Split {
            x: test_x.view(),
            y: &test_y,
        },
        encoder.classes(),
    )?;
    Ok((encoder, outcome))
}

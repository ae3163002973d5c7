//! Discovery of labelled audio files on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ClassifierError, Result};

const AUDIO_EXTENSION: &str = "wav";
const TRAIN_AUDIO_SUBDIR: &str = "wav";

/// Directory layout of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLayout {
    /// `<label>/wav/*.wav`
    Train,
    /// `<label>/*.wav`
    Test,
}

impl SplitLayout {
    pub fn name(self) -> &'static str {
        match self {
            SplitLayout::Train => "train",
            SplitLayout::Test => "test",
        }
    }

    /// Directory of this split under the dataset root.
    pub fn dir_name(self) -> &'static str {
        match self {
            SplitLayout::Train => "Train",
            SplitLayout::Test => "Test",
        }
    }

    fn audio_dir(self, label_dir: &Path) -> PathBuf {
        match self {
            SplitLayout::Train => label_dir.join(TRAIN_AUDIO_SUBDIR),
            SplitLayout::Test => label_dir.to_path_buf(),
        }
    }
}

/// One discovered audio file and its raw label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: String,
}

/// Ordered list of samples from a single split.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.samples.iter().map(|s| s.path.as_path()).collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per label, in label order.
    pub fn label_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.samples {
            *counts.entry(sample.label.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Collects every audio file under `root`, one label per sub-directory.
///
/// Label directories and the files inside them are visited in lexicographic
/// order so repeated runs produce the same sample order. A label directory
/// lacking the expected audio folder simply contributes nothing.
pub fn index_split(root: &Path, layout: SplitLayout) -> Result<Dataset> {
    let mut samples = Vec::new();
    for label_dir in sorted_entries(root)? {
        if !label_dir.is_dir() {
            continue;
        }
        let Some(label) = label_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let audio_dir = layout.audio_dir(&label_dir);
        if !audio_dir.is_dir() {
            debug!(label, dir = %audio_dir.display(), "no audio folder; skipping label");
            continue;
        }
        let before = samples.len();
        for path in sorted_entries(&audio_dir)? {
            if path.is_file() && is_audio_file(&path) {
                samples.push(Sample {
                    path,
                    label: label.to_string(),
                });
            }
        }
        debug!(
            label,
            split = layout.name(),
            files = samples.len() - before,
            "indexed label directory"
        );
    }
    Ok(Dataset::new(samples))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| ClassifierError::io(dir, err))?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| ClassifierError::io(dir, err))?;
    paths.sort();
    Ok(paths)
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(AUDIO_EXTENSION))
}

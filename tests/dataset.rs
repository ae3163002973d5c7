use std::fs;
use std::path::Path;

use articulyzer::config::DatasetRoot;
use articulyzer::dataset::{index_split, SplitLayout};
use articulyzer::ClassifierError;
use tempfile::TempDir;

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}

#[test]
fn train_layout_reads_wav_subfolders_in_order() {
    let root = TempDir::new().unwrap();
    let train = root.path().join("Train");
    touch(&train.join("lisp/wav/b.wav"));
    touch(&train.join("lisp/wav/a.WAV"));
    touch(&train.join("correct/wav/z.wav"));
    touch(&train.join("correct/wav/notes.txt"));
    touch(&train.join("correct/loose.wav"));
    touch(&train.join("README.md"));
    fs::create_dir_all(train.join("stopping")).unwrap();
    fs::create_dir_all(train.join("lisp/wav/nested.wav")).unwrap();

    let dataset = index_split(&train, SplitLayout::Train).unwrap();
    let names: Vec<String> = dataset
        .paths()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["z.wav", "a.WAV", "b.wav"]);
    assert_eq!(dataset.labels(), vec!["correct", "lisp", "lisp"]);
    assert_eq!(dataset.label_counts().get("lisp"), Some(&2));
    assert!(!dataset.label_counts().contains_key("stopping"));
}

#[test]
fn test_layout_reads_label_folders_directly() {
    let root = TempDir::new().unwrap();
    let test = root.path().join("Test");
    touch(&test.join("correct/one.wav"));
    touch(&test.join("correct/wav/ignored.wav"));
    touch(&test.join("fronting/two.wav"));

    let dataset = index_split(&test, SplitLayout::Test).unwrap();
    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.labels(), vec!["correct", "fronting"]);
}

#[test]
fn empty_split_is_not_an_error() {
    let root = TempDir::new().unwrap();
    let dataset = index_split(root.path(), SplitLayout::Train).unwrap();
    assert!(dataset.is_empty());
}

#[test]
fn missing_root_is_an_io_error() {
    let root = TempDir::new().unwrap();
    let err = index_split(&root.path().join("absent"), SplitLayout::Test).unwrap_err();
    assert!(matches!(err, ClassifierError::Io { .. }));
}

#[test]
fn dataset_root_requires_test_split() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("Train")).unwrap();
    let err = DatasetRoot::resolve(root.path()).unwrap_err();
    assert!(matches!(err, ClassifierError::MissingDirectory(path) if path.ends_with("Test")));
}

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn missing_dataset_root_fails_validation() {
    Command::cargo_bin("articulyzer")
        .unwrap()
        .arg("/definitely/not/a/dataset")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Dataset root does not exist"));
}

#[test]
fn zero_jobs_is_rejected() {
    let root = TempDir::new().unwrap();
    Command::cargo_bin("articulyzer")
        .unwrap()
        .arg(root.path())
        .args(["--jobs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Job count must be positive"));
}

#[test]
fn root_without_splits_reports_missing_directory() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("Train")).unwrap();
    Command::cargo_bin("articulyzer")
        .unwrap()
        .arg(root.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("dataset directory not found"));
}

#[test]
fn empty_train_split_is_fatal() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("Train/correct/wav")).unwrap();
    fs::create_dir_all(root.path().join("Test/correct")).unwrap();
    Command::cargo_bin("articulyzer")
        .unwrap()
        .arg(root.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("train split contains no audio samples"));
}

#[test]
fn invalid_config_file_is_reported() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("config.json");
    fs::write(&config, r#"{ "bank": { "cv_folds": 0 } }"#).unwrap();
    Command::cargo_bin("articulyzer")
        .unwrap()
        .arg(root.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cv_folds must be at least 2"));
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::SplitLayout;
use crate::error::ClassifierError;
use crate::features::FeatureConfig;
use crate::models::bank::BankConfig;

/// Everything a run needs besides the dataset location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub bank: BankConfig,
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("invalid pipeline configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.features
            .validate()
            .context("feature configuration rejected")?;
        self.bank.validate().context("model configuration rejected")?;
        Ok(())
    }
}

/// Resolved `Train` and `Test` directories under a dataset root.
#[derive(Debug, Clone)]
pub struct DatasetRoot {
    pub root: PathBuf,
    pub train: PathBuf,
    pub test: PathBuf,
}

impl DatasetRoot {
    pub fn resolve(path: &Path) -> crate::error::Result<Self> {
        let root = path
            .canonicalize()
            .map_err(|err| ClassifierError::io(path, err))?;
        if !root.is_dir() {
            return Err(ClassifierError::MissingDirectory(root));
        }
        let split_dir = |layout: SplitLayout| {
            let dir = root.join(layout.dir_name());
            if dir.is_dir() {
                Ok(dir)
            } else {
                Err(ClassifierError::MissingDirectory(dir))
            }
        };
        let train = split_dir(SplitLayout::Train)?;
        let test = split_dir(SplitLayout::Test)?;
        Ok(Self { root, train, test })
    }
}

#[cfg(test)]
mod tests {
    use super::{DatasetRoot, PipelineConfig};
    use crate::models::mixture::CovarianceType;
    use crate::models::svm::Gamma;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{
                "features": { "max_len": 40 },
                "bank": {
                    "seed": 7,
                    "svc_grid": { "gamma": ["scale", { "fixed": 0.5 }] },
                    "mixture": { "covariance_types": ["diagonal"] }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.features.max_len, 40);
        assert_eq!(config.features.n_mfcc, 13);
        assert_eq!(config.bank.seed, 7);
        assert_eq!(config.bank.cv_folds, 3);
        assert_eq!(config.bank.svc_grid.gamma, vec![Gamma::Scale, Gamma::Fixed(0.5)]);
        assert_eq!(config.bank.svc_grid.c, vec![0.1, 1.0, 10.0]);
        assert_eq!(
            config.bank.mixture.covariance_types,
            vec![CovarianceType::Diagonal]
        );
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(PipelineConfig::from_json(r#"{ "features": { "n_mfcc": 0 } }"#).is_err());
        assert!(PipelineConfig::from_json(r#"{ "bank": { "cv_folds": 1 } }"#).is_err());
        assert!(PipelineConfig::from_json("not json").is_err());
    }

    #[test]
    fn resolve_requires_both_splits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Train")).unwrap();
        assert!(DatasetRoot::resolve(dir.path()).is_err());
        std::fs::create_dir(dir.path().join("Test")).unwrap();
        let resolved = DatasetRoot::resolve(dir.path()).unwrap();
        assert!(resolved.train.ends_with("Train"));
        assert!(resolved.test.ends_with("Test"));
    }
}

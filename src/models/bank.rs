//! The fixed set of model branches trained and compared on one split.

use std::sync::Arc;

use anyhow::ensure;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::boosting::{GradientBoosting, GradientBoostingModel};
use super::cv::{accuracy, CandidateScore, GridSearch};
use super::ensemble::{SoftVoting, StackMember, Stacking};
use super::forest::RandomForest;
use super::mixture::{CovarianceType, FittedMixture, GaussianMixture};
use super::pca::Pca;
use super::svm::{Gamma, Svc};
use super::tree::MaxFeatures;
use super::{argmax_rows, Classifier, Estimator, Refit};
use crate::error::{ClassifierError, Result};
use crate::report::{evaluate, EvaluationResult};

pub const FOREST: &str = "Random Forest";
pub const SVM: &str = "SVM";
pub const MIXTURE: &str = "Gaussian Mixture";
pub const BOOSTING: &str = "Gradient Boosting";
pub const STACKING: &str = "Stacking";
pub const VOTING: &str = "Soft Voting";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestGrid {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
}

impl Default for ForestGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![100, 200],
            max_depth: vec![None, Some(10), Some(20)],
            min_samples_split: vec![2, 5],
        }
    }
}

impl ForestGrid {
    fn candidates(&self, seed: u64) -> Vec<RandomForest> {
        let mut out = Vec::new();
        for &n_estimators in &self.n_estimators {
            for &max_depth in &self.max_depth {
                for &min_samples_split in &self.min_samples_split {
                    out.push(RandomForest {
                        n_estimators,
                        max_depth,
                        min_samples_split,
                        max_features: MaxFeatures::Sqrt,
                        bootstrap: true,
                        seed,
                    });
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvcGrid {
    pub c: Vec<f64>,
    pub gamma: Vec<Gamma>,
}

impl Default for SvcGrid {
    fn default() -> Self {
        Self {
            c: vec![0.1, 1.0, 10.0],
            gamma: vec![Gamma::Scale, Gamma::Fixed(0.01), Gamma::Fixed(0.001)],
        }
    }
}

impl SvcGrid {
    fn candidates(&self) -> Vec<Svc> {
        self.c
            .iter()
            .flat_map(|&c| {
                self.gamma.iter().map(move |&gamma| Svc {
                    c,
                    gamma,
                    ..Svc::default()
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub max_bins: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        let defaults = GradientBoosting::default();
        Self {
            n_rounds: defaults.n_rounds,
            learning_rate: defaults.learning_rate,
            max_depth: defaults.max_depth,
            max_bins: defaults.max_bins,
        }
    }
}

impl BoostingConfig {
    fn estimator(&self) -> GradientBoosting {
        GradientBoosting {
            n_rounds: self.n_rounds,
            learning_rate: self.learning_rate,
            max_depth: self.max_depth,
            max_bins: self.max_bins,
            ..GradientBoosting::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixtureGrid {
    pub pca_components: usize,
    pub covariance_types: Vec<CovarianceType>,
    pub component_counts: Vec<usize>,
}

impl Default for MixtureGrid {
    fn default() -> Self {
        Self {
            pca_components: 50,
            covariance_types: vec![CovarianceType::Diagonal, CovarianceType::Full],
            component_counts: vec![2, 4, 6, 8],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    pub seed: u64,
    pub cv_folds: usize,
    pub stacking_folds: usize,
    pub forest_grid: ForestGrid,
    pub svc_grid: SvcGrid,
    pub boosting: BoostingConfig,
    pub mixture: MixtureGrid,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cv_folds: 3,
            stacking_folds: 5,
            forest_grid: ForestGrid::default(),
            svc_grid: SvcGrid::default(),
            boosting: BoostingConfig::default(),
            mixture: MixtureGrid::default(),
        }
    }
}

impl BankConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.cv_folds >= 2, "cv_folds must be at least 2");
        ensure!(self.stacking_folds >= 2, "stacking_folds must be at least 2");
        let forest = &self.forest_grid;
        ensure!(
            !forest.n_estimators.is_empty()
                && !forest.max_depth.is_empty()
                && !forest.min_samples_split.is_empty(),
            "forest grid must list at least one value per parameter"
        );
        ensure!(
            forest.n_estimators.iter().all(|&n| n > 0),
            "forest n_estimators must be positive"
        );
        ensure!(
            !self.svc_grid.c.is_empty() && !self.svc_grid.gamma.is_empty(),
            "svc grid must list at least one C and one gamma"
        );
        ensure!(
            self.svc_grid.c.iter().all(|&c| c > 0.0),
            "svc C values must be positive"
        );
        ensure!(
            self.boosting.learning_rate > 0.0,
            "boosting learning_rate must be positive"
        );
        ensure!(
            self.mixture.pca_components > 0,
            "mixture pca_components must be positive"
        );
        ensure!(
            self.mixture.component_counts.iter().all(|&k| k > 0),
            "mixture component counts must be positive"
        );
        Ok(())
    }
}

/// One evaluated point of the mixture grid.
#[derive(Debug, Clone, Serialize)]
pub struct MixtureSummary {
    pub covariance: CovarianceType,
    pub components: usize,
    /// `None` when the configuration produced no usable model.
    pub accuracy: Option<f64>,
    pub skipped_classes: Vec<String>,
}

/// Everything one bank run produces.
#[derive(Debug, Clone, Serialize)]
pub struct BankOutcome {
    pub results: Vec<EvaluationResult>,
    pub forest_search: Vec<CandidateScore>,
    pub svc_search: Vec<CandidateScore>,
    pub mixture_search: Vec<MixtureSummary>,
}

/// Read-only split shared by every branch.
#[derive(Debug, Clone, Copy)]
pub struct Split<'a> {
    pub x: ArrayView2<'a, f64>,
    pub y: &'a [usize],
}

pub struct ModelBank {
    config: BankConfig,
}

struct SearchedBranch<E: Estimator> {
    estimator: E,
    model: Arc<E::Model>,
    scores: Vec<CandidateScore>,
}

struct MixtureOutcome {
    best: Option<(MixtureSummary, Vec<usize>)>,
    summaries: Vec<MixtureSummary>,
}

impl ModelBank {
    pub fn new(config: BankConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    pub fn run(
        &self,
        train: Split<'_>,
        test: Split<'_>,
        classes: &[String],
    ) -> Result<BankOutcome> {
        let n_classes = classes.len();
        if train.x.ncols() != test.x.ncols() {
            return Err(ClassifierError::DimensionMismatch {
                expected: train.x.ncols(),
                got: test.x.ncols(),
            });
        }
        if test.x.nrows() != test.y.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: test.x.nrows(),
                got: test.y.len(),
            });
        }

        let ((forest, svc), (boosting, mixture)) = rayon::join(
            || {
                rayon::join(
                    || self.search_forest(train, n_classes),
                    || self.search_svc(train, n_classes),
                )
            },
            || {
                rayon::join(
                    || self.fit_boosting(train, n_classes),
                    || self.search_mixtures(train, test, classes),
                )
            },
        );
        let (forest, svc, boosting, mixture) = (forest?, svc?, boosting?, mixture?);

        let forest_fitted: Arc<dyn Classifier> = forest.model.clone();
        let svc_fitted: Arc<dyn Classifier> = svc.model.clone();
        let boosting_fitted: Arc<dyn Classifier> = boosting.1.clone();
        let members = vec![
            StackMember {
                name: "boosting".to_string(),
                estimator: Arc::new(boosting.0) as Arc<dyn Refit>,
                fitted: boosting_fitted,
            },
            StackMember {
                name: "forest".to_string(),
                estimator: Arc::new(forest.estimator.clone()),
                fitted: Arc::clone(&forest_fitted),
            },
            StackMember {
                name: "svm".to_string(),
                estimator: Arc::new(svc.estimator.clone()),
                fitted: Arc::clone(&svc_fitted),
            },
        ];
        let stacking = Stacking {
            members,
            final_estimator: RandomForest {
                seed: self.config.seed,
                ..RandomForest::default()
            },
            folds: self.config.stacking_folds,
        };

        let (stacked, voting) = rayon::join(
            || stacking.fit(train.x, train.y, n_classes),
            || SoftVoting::new(vec![forest_fitted, svc_fitted]),
        );
        let (stacked, voting) = (stacked?, voting?);

        let score = |name: &str, params: Option<String>, model: &dyn Classifier| {
            let predicted = model.predict(test.x);
            let result = evaluate(name, params, test.y, &predicted, classes);
            info!(model = name, accuracy = result.accuracy, "branch evaluated");
            result
        };

        let mut results = vec![
            score(FOREST, Some(forest.estimator.describe()), &*forest.model),
            score(SVM, Some(svc.estimator.describe()), &*svc.model),
        ];
        match &mixture.best {
            Some((summary, predicted)) => {
                let params = format!(
                    "covariance={} components={}",
                    summary.covariance.name(),
                    summary.components
                );
                results.push(evaluate(MIXTURE, Some(params), test.y, predicted, classes));
            }
            None => warn!("no mixture configuration could be evaluated"),
        }
        results.push(score(BOOSTING, None, &*boosting.1));
        results.push(score(STACKING, Some(stacking.describe()), &stacked));
        results.push(score(VOTING, None, &voting));

        Ok(BankOutcome {
            results,
            forest_search: forest.scores,
            svc_search: svc.scores,
            mixture_search: mixture.summaries,
        })
    }

    fn search_forest(
        &self,
        train: Split<'_>,
        n_classes: usize,
    ) -> Result<SearchedBranch<RandomForest>> {
        let candidates = self.config.forest_grid.candidates(self.config.seed);
        info!(candidates = candidates.len(), "searching random forest grid");
        let outcome =
            GridSearch::new(candidates, self.config.cv_folds).fit(train.x, train.y, n_classes)?;
        info!(
            params = %outcome.best.describe(),
            cv_accuracy = outcome.best_score,
            "random forest selected"
        );
        Ok(SearchedBranch {
            estimator: outcome.best,
            model: Arc::new(outcome.model),
            scores: outcome.scores,
        })
    }

    fn search_svc(&self, train: Split<'_>, n_classes: usize) -> Result<SearchedBranch<Svc>> {
        let candidates = self.config.svc_grid.candidates();
        info!(candidates = candidates.len(), "searching svm grid");
        let outcome =
            GridSearch::new(candidates, self.config.cv_folds).fit(train.x, train.y, n_classes)?;
        info!(
            params = %outcome.best.describe(),
            cv_accuracy = outcome.best_score,
            "svm selected"
        );
        Ok(SearchedBranch {
            estimator: outcome.best,
            model: Arc::new(outcome.model),
            scores: outcome.scores,
        })
    }

    fn fit_boosting(
        &self,
        train: Split<'_>,
        n_classes: usize,
    ) -> Result<(GradientBoosting, Arc<GradientBoostingModel>)> {
        let estimator = self.config.boosting.estimator();
        info!(params = %estimator.describe(), "fitting gradient boosting");
        let model = estimator.fit(train.x, train.y, n_classes)?;
        Ok((estimator, Arc::new(model)))
    }

    fn search_mixtures(
        &self,
        train: Split<'_>,
        test: Split<'_>,
        classes: &[String],
    ) -> Result<MixtureOutcome> {
        let grid = &self.config.mixture;
        let pca = Pca {
            n_components: grid.pca_components,
            seed: self.config.seed,
        }
        .fit(train.x)?;
        let train_p = pca.transform(train.x)?;
        let test_p = pca.transform(test.x)?;
        info!(components = pca.n_components(), "projected features for mixtures");

        let mut class_rows: Vec<Vec<usize>> = vec![Vec::new(); classes.len()];
        for (row, &label) in train.y.iter().enumerate() {
            class_rows[label].push(row);
        }

        let configurations: Vec<(CovarianceType, usize)> = grid
            .covariance_types
            .iter()
            .flat_map(|&cov| grid.component_counts.iter().map(move |&k| (cov, k)))
            .collect();
        let evaluated: Vec<(MixtureSummary, Option<Vec<usize>>)> = configurations
            .par_iter()
            .map(|&(covariance, components)| {
                let mixture = GaussianMixture {
                    n_components: components,
                    covariance,
                    seed: self.config.seed,
                    ..GaussianMixture::default()
                };
                let mut summary = MixtureSummary {
                    covariance,
                    components,
                    accuracy: None,
                    skipped_classes: Vec::new(),
                };
                let predicted = fit_class_mixtures(
                    &mixture,
                    train_p.view(),
                    test_p.view(),
                    &class_rows,
                    classes,
                    &mut summary,
                );
                if let Some(predicted) = &predicted {
                    summary.accuracy = Some(accuracy(test.y, predicted));
                }
                (summary, predicted)
            })
            .collect();

        let mut best: Option<(MixtureSummary, Vec<usize>)> = None;
        let mut summaries = Vec::with_capacity(evaluated.len());
        for (summary, predicted) in evaluated {
            info!(
                covariance = summary.covariance.name(),
                components = summary.components,
                accuracy = ?summary.accuracy,
                "mixture configuration evaluated"
            );
            if let (Some(accuracy), Some(predicted)) = (summary.accuracy, predicted) {
                let better = best
                    .as_ref()
                    .map_or(true, |(b, _)| b.accuracy.is_some_and(|top| accuracy > top));
                if better {
                    best = Some((summary.clone(), predicted));
                }
            }
            summaries.push(summary);
        }
        Ok(MixtureOutcome { best, summaries })
    }
}

/// Fits one mixture per class and predicts the most likely class per test
/// row. Returns `None` when the configuration has to be skipped.
fn fit_class_mixtures(
    mixture: &GaussianMixture,
    train: ArrayView2<'_, f64>,
    test: ArrayView2<'_, f64>,
    class_rows: &[Vec<usize>],
    classes: &[String],
    summary: &mut MixtureSummary,
) -> Option<Vec<usize>> {
    let mut fitted: Vec<(usize, FittedMixture)> = Vec::new();
    for (class, rows) in class_rows.iter().enumerate() {
        if rows.len() < mixture.n_components {
            info!(
                class = %classes[class],
                samples = rows.len(),
                components = mixture.n_components,
                "skipping class with too few samples for mixture"
            );
            summary.skipped_classes.push(classes[class].clone());
            continue;
        }
        match mixture.fit(train.select(Axis(0), rows).view()) {
            Ok(model) => fitted.push((class, model)),
            Err(err) => {
                warn!(
                    covariance = mixture.covariance.name(),
                    components = mixture.n_components,
                    class = %classes[class],
                    error = %err,
                    "mixture fit failed, skipping configuration"
                );
                return None;
            }
        }
    }
    if fitted.is_empty() {
        info!(
            covariance = mixture.covariance.name(),
            components = mixture.n_components,
            "no class could be fitted, skipping configuration"
        );
        return None;
    }

    let mut scores = Array2::<f64>::zeros((test.nrows(), fitted.len()));
    for (column, (_, model)) in fitted.iter().enumerate() {
        match model.score_samples(test) {
            Ok(values) => scores.column_mut(column).assign(&values),
            Err(err) => {
                warn!(error = %err, "mixture scoring failed, skipping configuration");
                return None;
            }
        }
    }
    Some(
        argmax_rows(&scores)
            .into_iter()
            .map(|column| fitted[column].0)
            .collect(),
    )
}

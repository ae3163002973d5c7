//! Accuracy and per-class precision / recall / F1 for one model.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Averages {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub macro_avg: Averages,
    pub weighted_avg: Averages,
    /// `confusion[true][predicted]`.
    pub confusion: Vec<Vec<usize>>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub model: String,
    pub params: Option<String>,
    pub accuracy: f64,
    pub report: ClassificationReport,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Scores `y_pred` against `y_true`; indices outside `classes` are counted
/// as wrong but do not get a row of their own.
pub fn evaluate(
    model: &str,
    params: Option<String>,
    y_true: &[usize],
    y_pred: &[usize],
    classes: &[String],
) -> EvaluationResult {
    let n = classes.len();
    let mut confusion = vec![vec![0usize; n]; n];
    let mut correct = 0;
    let mut predicted_counts = vec![0usize; n];
    let mut true_counts = vec![0usize; n];
    for (&truth, &guess) in y_true.iter().zip(y_pred) {
        if truth == guess {
            correct += 1;
        }
        if truth < n {
            true_counts[truth] += 1;
        }
        if guess < n {
            predicted_counts[guess] += 1;
        }
        if truth < n && guess < n {
            confusion[truth][guess] += 1;
        }
    }

    let per_class: Vec<ClassMetrics> = classes
        .iter()
        .enumerate()
        .map(|(k, label)| {
            let hits = confusion[k][k];
            let precision = ratio(hits, predicted_counts[k]);
            let recall = ratio(hits, true_counts[k]);
            ClassMetrics {
                label: label.clone(),
                precision,
                recall,
                f1: harmonic(precision, recall),
                support: true_counts[k],
            }
        })
        .collect();

    let total = y_true.len();
    let macro_avg = average(&per_class, |_| 1.0);
    let support_total: usize = per_class.iter().map(|c| c.support).sum();
    let weighted_avg = if support_total == 0 {
        Averages {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
        }
    } else {
        average(&per_class, |c| c.support as f64)
    };

    EvaluationResult {
        model: model.to_string(),
        params,
        accuracy: ratio(correct, total),
        report: ClassificationReport {
            classes: per_class,
            macro_avg,
            weighted_avg,
            confusion,
            total,
        },
    }
}

fn average(classes: &[ClassMetrics], weight: impl Fn(&ClassMetrics) -> f64) -> Averages {
    let total: f64 = classes.iter().map(&weight).sum();
    if total == 0.0 {
        return Averages {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
        };
    }
    let mean = |field: fn(&ClassMetrics) -> f64| {
        classes.iter().map(|c| weight(c) * field(c)).sum::<f64>() / total
    };
    Averages {
        precision: mean(|c| c.precision),
        recall: mean(|c| c.recall),
        f1: mean(|c| c.f1),
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(0);
        writeln!(
            f,
            "{:>width$}  {:>9}  {:>9}  {:>9}  {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for class in &self.classes {
            writeln!(
                f,
                "{:>width$}  {:>9.4}  {:>9.4}  {:>9.4}  {:>9}",
                class.label, class.precision, class.recall, class.f1, class.support
            )?;
        }
        writeln!(f)?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$}  {:>9.4}  {:>9.4}  {:>9.4}  {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.total
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.model)?;
        if let Some(params) = &self.params {
            writeln!(f, "Best params: {params}")?;
        }
        writeln!(f, "Accuracy: {:.4}", self.accuracy)?;
        write!(f, "{}", self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["correct".to_string(), "lisp".to_string(), "stop".to_string()]
    }

    #[test]
    fn computes_per_class_scores() {
        let result = evaluate("demo", None, &[0, 0, 1, 1], &[0, 1, 1, 1], &classes());
        assert!((result.accuracy - 0.75).abs() < 1e-12);
        let lisp = &result.report.classes[1];
        assert!((lisp.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((lisp.recall - 1.0).abs() < 1e-12);
        assert!((lisp.f1 - 0.8).abs() < 1e-12);
        assert_eq!(result.report.confusion[0], vec![1, 1, 0]);
    }

    #[test]
    fn absent_class_scores_zero_without_panicking() {
        let result = evaluate("demo", None, &[0, 1], &[0, 1], &classes());
        let stop = &result.report.classes[2];
        assert_eq!((stop.precision, stop.recall, stop.f1, stop.support), (0.0, 0.0, 0.0, 0));
        assert!((result.report.weighted_avg.f1 - 1.0).abs() < 1e-12);
        assert!((result.report.macro_avg.f1 - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_input_has_zero_accuracy() {
        let result = evaluate("demo", None, &[], &[], &classes());
        assert_eq!(result.accuracy, 0.0);
        assert_eq!(result.report.weighted_avg.precision, 0.0);
    }

    #[test]
    fn display_shows_four_decimals() {
        let result = evaluate(
            "Random Forest",
            Some("n_estimators=100".to_string()),
            &[0, 1, 2],
            &[0, 1, 1],
            &classes(),
        );
        let text = result.to_string();
        assert!(text.contains("Accuracy: 0.6667"));
        assert!(text.contains("Best params: n_estimators=100"));
        assert!(text.contains("weighted avg"));
    }
}

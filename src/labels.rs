use std::collections::BTreeMap;

use crate::error::{ClassifierError, Result};

/// Maps string labels onto `0..n_classes`, ordered lexicographically.
///
/// The class list is fixed at fit time; later calls only look it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut classes: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, class)| (class.clone(), i))
            .collect();
        Self { classes, index }
    }

    /// Fits on `labels` and encodes them in one pass.
    pub fn fit_transform<S: AsRef<str>>(labels: &[S]) -> (Self, Vec<usize>) {
        let encoder = Self::fit(labels);
        let encoded = labels
            .iter()
            .map(|label| encoder.index[label.as_ref()])
            .collect();
        (encoder, encoded)
    }

    /// Encodes `labels`, failing on the first label absent at fit time.
    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                self.index
                    .get(label)
                    .copied()
                    .ok_or_else(|| ClassifierError::UnseenLabel(label.to_string()))
            })
            .collect()
    }

    pub fn inverse_transform(&self, indices: &[usize]) -> Result<Vec<String>> {
        indices
            .iter()
            .map(|&i| {
                self.classes.get(i).cloned().ok_or_else(|| {
                    ClassifierError::invalid(format!(
                        "label index {i} outside 0..{}",
                        self.classes.len()
                    ))
                })
            })
            .collect()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::LabelEncoder;
    use crate::error::ClassifierError;

    #[test]
    fn classes_are_sorted_and_deduplicated() {
        let (encoder, encoded) =
            LabelEncoder::fit_transform(&["lisp", "correct", "lisp", "lateral"]);
        assert_eq!(encoder.classes(), ["correct", "lateral", "lisp"]);
        assert_eq!(encoded, vec![2, 0, 2, 1]);
    }

    #[test]
    fn round_trips_every_training_label() {
        let labels = ["s", "sh", "th", "s", "z"];
        let (encoder, encoded) = LabelEncoder::fit_transform(&labels);
        let decoded = encoder.inverse_transform(&encoded).unwrap();
        assert_eq!(decoded, labels);
        assert_eq!(encoder.transform(&decoded).unwrap(), encoded);
    }

    #[test]
    fn rejects_unseen_label() {
        let (encoder, _) = LabelEncoder::fit_transform(&["A", "B"]);
        let err = encoder.transform(&["C"]).unwrap_err();
        assert!(matches!(err, ClassifierError::UnseenLabel(ref label) if label == "C"));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let encoder = LabelEncoder::fit(&["A"]);
        assert!(encoder.inverse_transform(&[1]).is_err());
    }
}

//! Label vocabulary fitting and string-to-index mapping.
//!
//! [`fit`] discovers the vocabulary of a split in first-seen order and assigns
//! consecutive indices from `0`. [`apply`] maps further label lists through an
//! existing [`LabelDict`]. Label lists keep their own length; nothing is padded
//! here.
//!
//! ```
//! use corpusbeam::indexify::{apply, fit, UnknownLabelPolicy};
//!
//! let raw = vec![vec!["a".to_string(), "b".to_string()], vec!["a".to_string()]];
//! let (indexed, dict) = fit(&raw);
//! assert_eq!(indexed, vec![vec![0, 1], vec![0]]);
//!
//! let test = apply(&[vec!["b".to_string()]], &dict, UnknownLabelPolicy::Fail).unwrap();
//! assert_eq!(test, vec![vec![1]]);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DatasetError;

/// What [`apply`] does with a label missing from the dictionary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownLabelPolicy {
    /// Abort with [`DatasetError::UnknownLabel`].
    #[default]
    Fail,
    /// Leave the label out of the indexed list.
    Drop,
}

/// Bijection between label strings and dense indices `0..len`.
///
/// Persisted as the ordered list of labels; the lookup table is rebuilt on
/// deserialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelDict {
    labels: Vec<String>,
    index: HashMap<String, i64>,
}

impl LabelDict {
    /// Build from labels already in index order. Repeated labels keep their
    /// first position.
    #[must_use]
    pub fn from_labels<I, T>(labels: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut dict = Self::default();
        for label in labels {
            dict.insert(label.into());
        }
        dict
    }

    fn insert(&mut self, label: String) -> i64 {
        if let Some(&i) = self.index.get(&label) {
            return i;
        }
        let i = self.labels.len() as i64;
        self.index.insert(label.clone(), i);
        self.labels.push(label);
        i
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, label: &str) -> Option<i64> {
        self.index.get(label).copied()
    }

    #[must_use]
    pub fn label_of(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }

    /// Labels in index order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Serialize for LabelDict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.labels.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LabelDict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let labels = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::from_labels(labels))
    }
}

/// Fit a vocabulary on `labels` and index them with it.
#[must_use]
pub fn fit(labels: &[Vec<String>]) -> (Vec<Vec<i64>>, LabelDict) {
    let mut dict = LabelDict::default();
    let indexed = labels
        .iter()
        .map(|list| list.iter().map(|l| dict.insert(l.clone())).collect())
        .collect();
    (indexed, dict)
}

/// Index `labels` with a fitted dictionary.
///
/// # Errors
/// With [`UnknownLabelPolicy::Fail`], the first label not in `dict` yields
/// [`DatasetError::UnknownLabel`] naming it and the position of its list.
pub fn apply(
    labels: &[Vec<String>],
    dict: &LabelDict,
    policy: UnknownLabelPolicy,
) -> Result<Vec<Vec<i64>>, DatasetError> {
    labels
        .iter()
        .enumerate()
        .map(|(position, list)| {
            let mut out = Vec::with_capacity(list.len());
            for label in list {
                match (dict.index_of(label), policy) {
                    (Some(i), _) => out.push(i),
                    (None, UnknownLabelPolicy::Drop) => {
                        tracing::debug!(
                            label = %label,
                            position,
                            "dropping label outside the vocabulary"
                        );
                    }
                    (None, UnknownLabelPolicy::Fail) => {
                        return Err(DatasetError::UnknownLabel {
                            label: label.clone(),
                            position,
                        });
                    }
                }
            }
            Ok(out)
        })
        .collect()
}

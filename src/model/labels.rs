// Label space
// Sorted distinct class names mapped to dense output indices

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LabelError {
    #[error("Label space is empty")]
    Empty,

    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    #[error("Class index {index} out of range for {count} labels")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Labels must be sorted and distinct")]
    NotCanonical,
}

/// Bijection between chord names and class indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSpace {
    labels: Vec<String>,
}

impl LabelSpace {
    /// Fit from training labels; indices follow lexicographic order
    pub fn fit<I, S>(labels: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels: Vec<String> = labels.into_iter().map(|l| l.as_ref().to_string()).collect();
        labels.sort();
        labels.dedup();
        if labels.is_empty() {
            return Err(LabelError::Empty);
        }
        Ok(LabelSpace { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn encode(&self, label: &str) -> Result<usize, LabelError> {
        self.labels
            .binary_search_by(|l| l.as_str().cmp(label))
            .map_err(|_| LabelError::UnknownLabel(label.to_string()))
    }

    pub fn decode(&self, index: usize) -> Result<&str, LabelError> {
        self.labels
            .get(index)
            .map(|l| l.as_str())
            .ok_or(LabelError::IndexOutOfRange {
                index,
                count: self.labels.len(),
            })
    }
}

impl TryFrom<Vec<String>> for LabelSpace {
    type Error = LabelError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        if labels.is_empty() {
            return Err(LabelError::Empty);
        }
        if labels.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(LabelError::NotCanonical);
        }
        Ok(LabelSpace { labels })
    }
}

impl From<LabelSpace> for Vec<String> {
    fn from(space: LabelSpace) -> Self {
        space.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_sorts_and_dedups() {
        let space = LabelSpace::fit(["G", "C", "Am", "C", "G"]).unwrap();
        assert_eq!(space.labels(), &["Am", "C", "G"]);
        assert_eq!(space.encode("C").unwrap(), 1);
        assert_eq!(space.decode(2).unwrap(), "G");
    }

    #[test]
    fn test_unknown_label_and_index() {
        let space = LabelSpace::fit(["Em"]).unwrap();
        assert_eq!(
            space.encode("F#"),
            Err(LabelError::UnknownLabel("F#".to_string()))
        );
        assert_eq!(
            space.decode(1),
            Err(LabelError::IndexOutOfRange { index: 1, count: 1 })
        );
    }

    #[test]
    fn test_empty_fit_fails() {
        assert_eq!(LabelSpace::fit(Vec::<String>::new()), Err(LabelError::Empty));
    }

    #[test]
    fn test_json_is_plain_array() {
        let space = LabelSpace::fit(["D", "A"]).unwrap();
        let json = serde_json::to_string(&space).unwrap();
        assert_eq!(json, r#"["A","D"]"#);
        let back: LabelSpace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, space);
    }

    #[test]
    fn test_unsorted_json_rejected() {
        assert!(serde_json::from_str::<LabelSpace>(r#"["D","A"]"#).is_err());
        assert!(serde_json::from_str::<LabelSpace>(r#"[]"#).is_err());
    }
}

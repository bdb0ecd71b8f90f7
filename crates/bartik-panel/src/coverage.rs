//! Coverage notes.
//!
//! Outer joins never drop rows, but they do introduce missing values where
//! one side lacks a key. Those gaps are surfaced here as non-fatal notes that
//! travel with the table and end up in estimation-result metadata, rather
//! than being silently absorbed.

use serde::{Deserialize, Serialize};

/// One non-fatal coverage gap observed while assembling data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageNote {
    /// Keys present only on one side of an outer-join merge.
    MergeMismatch {
        /// Column set brought in by the right-hand table.
        merged_columns: Vec<String>,
        /// Keys found only in the left table.
        left_only: usize,
        /// Keys found only in the right table.
        right_only: usize,
    },

    /// Entities excluded from an exposure fit for lack of reference-window data.
    ExposureExcluded {
        /// The excluded entity ids.
        entities: Vec<String>,
    },

    /// Fixed-effect groups with a single observation in the estimation sample.
    SingletonGroups {
        /// The fixed-effect dimension ("entity" or "time").
        dimension: String,
        /// How many groups had exactly one observation.
        count: usize,
    },
}

impl std::fmt::Display for CoverageNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MergeMismatch {
                merged_columns,
                left_only,
                right_only,
            } => write!(
                f,
                "merge of [{}]: {left_only} keys only in left, {right_only} only in right",
                merged_columns.join(", ")
            ),
            Self::ExposureExcluded { entities } => {
                write!(f, "{} entities excluded from exposure fit", entities.len())
            }
            Self::SingletonGroups { dimension, count } => {
                write!(f, "{count} singleton {dimension} groups")
            }
        }
    }
}

/// An ordered collection of coverage notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    notes: Vec<CoverageNote>,
}

impl CoverageReport {
    /// An empty report.
    pub const fn new() -> Self {
        Self { notes: Vec::new() }
    }

    /// Record a note.
    pub fn push(&mut self, note: CoverageNote) {
        self.notes.push(note);
    }

    /// Append every note from another report.
    pub fn extend(&mut self, other: &Self) {
        self.notes.extend(other.notes.iter().cloned());
    }

    /// The recorded notes, in the order they were observed.
    pub fn notes(&self) -> &[CoverageNote] {
        &self.notes
    }

    /// Whether anything was recorded.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accumulates_in_order() {
        let mut report = CoverageReport::new();
        report.push(CoverageNote::SingletonGroups {
            dimension: "entity".to_string(),
            count: 2,
        });
        let mut other = CoverageReport::new();
        other.push(CoverageNote::ExposureExcluded {
            entities: vec!["X".to_string()],
        });
        report.extend(&other);
        assert_eq!(report.notes().len(), 2);
        assert!(matches!(
            report.notes()[0],
            CoverageNote::SingletonGroups { .. }
        ));
    }

    #[test]
    fn test_display_mentions_counts() {
        let note = CoverageNote::MergeMismatch {
            merged_columns: vec!["hpi".to_string()],
            left_only: 3,
            right_only: 0,
        };
        let text = note.to_string();
        assert!(text.contains("3 keys only in left"));
    }
}

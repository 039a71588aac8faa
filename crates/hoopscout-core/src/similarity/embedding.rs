// Fixed-order embeddings built directly from z-score vectors.

use serde::{Deserialize, Serialize};

use crate::stats::category::{Category, CATEGORY_COUNT};
use crate::stats::record::finite_or_zero;
use crate::stats::scorer::{PlayerScoreRow, PlayerScoreVector};

/// A player's nine z-scores in [`Category::ALL`] order, used as the
/// similarity key. No weighting or reduction is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Embedding([f64; CATEGORY_COUNT]);

impl Embedding {
    /// Build from a score vector; non-finite components become 0.
    pub fn from_scores(scores: &PlayerScoreVector) -> Self {
        Self(Category::ALL.map(|c| finite_or_zero(scores.get(c))))
    }

    pub fn from_row(row: &PlayerScoreRow) -> Self {
        Self::from_scores(&row.scores)
    }

    pub fn values(&self) -> &[f64; CATEGORY_COUNT] {
        &self.0
    }

    pub fn get(&self, category: Category) -> f64 {
        self.0[category.index()]
    }

    /// Squared Euclidean distance, the metric the index collections use.
    pub fn squared_l2(&self, other: &Embedding) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum()
    }
}

// Similar-player retrieval over a NeighborIndex.

use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::LimitBounds;
use crate::similarity::embedding::Embedding;
use crate::similarity::index::{IndexError, NeighborIndex};
use crate::stats::record::parse_player_id;
use crate::stats::scorer::PlayerScoreRow;

#[derive(Debug, Error)]
pub enum SimilarityError {
    /// The index could not be reached or answered with something unusable.
    #[error("similarity service unavailable: {0}")]
    Unavailable(#[from] IndexError),
}

/// One similar player. `distance` is `None` when the index reported none.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityNeighbor {
    pub player_id: i64,
    pub distance: Option<f64>,
}

pub struct SimilarityRetriever {
    index: Arc<dyn NeighborIndex>,
    bounds: LimitBounds,
}

impl SimilarityRetriever {
    pub fn new(index: Arc<dyn NeighborIndex>, bounds: LimitBounds) -> Self {
        Self { index, bounds }
    }

    /// Up to `limit` players nearest to `player`, never including `player`.
    ///
    /// The limit is clamped before querying. One extra neighbor is requested
    /// to make room for the player itself. Hits with unparsable ids, or whose
    /// metadata names a different cohort snapshot, are dropped.
    pub async fn find_similar(
        &self,
        player: &PlayerScoreRow,
        limit: Option<f64>,
    ) -> Result<Vec<SimilarityNeighbor>, SimilarityError> {
        let limit = self.bounds.resolve(limit);
        let embedding = Embedding::from_row(player);
        let hits = self.index.query(&embedding, limit + 1).await?;

        let mut neighbors = Vec::with_capacity(limit);
        for hit in hits {
            let Some(player_id) = parse_player_id(&hit.id) else {
                warn!(id = %hit.id, "skipping index hit with unparsable id");
                continue;
            };
            if player_id == player.player_id {
                continue;
            }
            if let Some(meta) = &hit.metadata {
                if meta.snapshot_id != player.snapshot_id {
                    warn!(
                        player_id,
                        index_snapshot = %meta.snapshot_id,
                        score_snapshot = %player.snapshot_id,
                        "skipping neighbor from a different cohort snapshot"
                    );
                    continue;
                }
            }
            neighbors.push(SimilarityNeighbor {
                player_id,
                distance: hit.distance.filter(|d| d.is_finite()),
            });
        }

        // Index order is trusted; only re-sort when every distance is known.
        if neighbors.iter().all(|n| n.distance.is_some()) {
            neighbors.sort_by(|a, b| {
                a.distance
                    .unwrap_or(f64::INFINITY)
                    .total_cmp(&b.distance.unwrap_or(f64::INFINITY))
            });
        }
        neighbors.truncate(limit);
        Ok(neighbors)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

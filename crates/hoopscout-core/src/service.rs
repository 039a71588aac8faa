// Read-side lookups: player search, profiles, and similar players joined
// with their stored scores and raw stats.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::config::LimitBounds;
use crate::db::Database;
use crate::similarity::retriever::{SimilarityError, SimilarityRetriever};
use crate::stats::record::RawPlayerRecord;
use crate::stats::scorer::PlayerScoreRow;

pub use crate::stats::record::parse_player_id;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("player {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    SimilarityUnavailable(#[from] SimilarityError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A player's current score row with their raw stat line, if one exists.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProfile {
    pub score: PlayerScoreRow,
    pub raw: Option<RawPlayerRecord>,
}

/// One neighbor as reported to callers. `score` and `raw` are `None` when the
/// index knows a player the stores do not.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarPlayer {
    pub player_id: i64,
    pub distance: Option<f64>,
    pub score: Option<PlayerScoreRow>,
    pub raw: Option<RawPlayerRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarReport {
    pub player: PlayerScoreRow,
    pub neighbors: Vec<SimilarPlayer>,
}

pub struct LookupService {
    db: Arc<Database>,
    retriever: SimilarityRetriever,
    search: LimitBounds,
}

impl LookupService {
    pub fn new(db: Arc<Database>, retriever: SimilarityRetriever, search: LimitBounds) -> Self {
        Self {
            db,
            retriever,
            search,
        }
    }

    /// Players whose name contains `query` (case-insensitive), best total
    /// first. A blank query lists the top players.
    pub fn search_players(&self, query: &str, limit: Option<f64>) -> Result<Vec<PlayerScoreRow>, LookupError> {
        let limit = self.search.resolve(limit);
        Ok(self.db.search_scores(query, limit)?)
    }

    pub fn player_profile(&self, player_id: i64) -> Result<PlayerProfile, LookupError> {
        let score = self
            .db
            .score_by_id(player_id)?
            .ok_or(LookupError::NotFound(player_id))?;
        let raw = self.db.raw_stats_by_id(player_id)?;
        Ok(PlayerProfile { score, raw })
    }

    /// Nearest players to `player_id` in z-score space.
    pub async fn similar_players(&self, player_id: i64, limit: Option<f64>) -> Result<SimilarReport, LookupError> {
        let player = self
            .db
            .score_by_id(player_id)?
            .ok_or(LookupError::NotFound(player_id))?;

        let neighbors = match self.retriever.find_similar(&player, limit).await {
            Ok(n) => n,
            Err(e) => {
                warn!(player_id, error = %e, "similarity lookup failed");
                return Err(e.into());
            }
        };

        let ids: Vec<i64> = neighbors.iter().map(|n| n.player_id).collect();
        let mut scores = self.db.scores_by_ids(&ids)?;
        let mut raws = self.db.raw_stats_by_ids(&ids)?;

        let neighbors = neighbors
            .into_iter()
            .map(|n| SimilarPlayer {
                player_id: n.player_id,
                distance: n.distance,
                score: scores.remove(&n.player_id),
                raw: raws.remove(&n.player_id),
            })
            .collect();

        Ok(SimilarReport { player, neighbors })
    }
}

// Batch jobs: recompute scores for a fresh cohort snapshot, and rebuild the
// vector index from the current snapshot.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::CohortConfig;
use crate::db::Database;
use crate::similarity::index::{EmbeddingBatch, IndexError, MixedSnapshotError, NeighborIndex};
use crate::stats::league::{select_cohort, LeagueStatistics};
use crate::stats::scorer::{score_cohort, PlayerScoreRow};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("raw stats store is empty; import a stats CSV first")]
    EmptyRawStore,

    #[error("no player has at least {min_games} games among {raw_players} raw records; cohort is empty")]
    EmptyCohort { min_games: u32, raw_players: usize },

    #[error("no current score snapshot; run scoring first")]
    NoSnapshot,

    #[error("cannot index mixed snapshots: {0}")]
    MixedSnapshot(#[from] MixedSnapshotError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Outcome of [`refresh_scores`].
#[derive(Debug, Clone)]
pub struct ScoreSummary {
    pub snapshot_id: String,
    pub raw_players: usize,
    pub scored: usize,
    pub top: Option<PlayerScoreRow>,
}

/// Outcome of [`rebuild_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub snapshot_id: String,
    pub entries: usize,
    pub batches: usize,
}

/// Select a cohort from the raw snapshot, aggregate it, score every member
/// and persist the result as the new current snapshot.
///
/// Fails without saving anything when no raw record qualifies for the cohort.
pub fn refresh_scores(db: &Database, cohort_config: &CohortConfig) -> Result<ScoreSummary, PipelineError> {
    let raw = db.load_raw_stats()?;
    if raw.is_empty() {
        return Err(PipelineError::EmptyRawStore);
    }

    let cohort = select_cohort(&raw, cohort_config);
    if cohort.is_empty() {
        // Keep the previous snapshot current.
        return Err(PipelineError::EmptyCohort {
            min_games: cohort_config.min_games,
            raw_players: raw.len(),
        });
    }
    let league = LeagueStatistics::compute(&cohort);
    debug!(
        snapshot = %league.snapshot.id,
        fg_league_pct = league.fg.league_pct,
        ft_league_pct = league.ft.league_pct,
        "computed league statistics"
    );

    let rows = score_cohort(&cohort, &league);
    db.save_snapshot_scores(&league, &rows)?;

    info!(
        snapshot = %league.snapshot.id,
        raw_players = raw.len(),
        scored = rows.len(),
        "saved cohort scores"
    );

    Ok(ScoreSummary {
        snapshot_id: league.snapshot.id.clone(),
        raw_players: raw.len(),
        scored: rows.len(),
        top: rows.into_iter().next(),
    })
}

/// Replace the index contents with embeddings of the current snapshot.
///
/// The collection is reset first, then chunks of `batch_size` entries are
/// upserted with at most `concurrency` requests in flight. The first failed
/// batch aborts the rebuild.
pub async fn rebuild_index(
    db: &Database,
    index: &dyn NeighborIndex,
    batch_size: usize,
    concurrency: usize,
) -> Result<IndexSummary, PipelineError> {
    let snapshot_id = db.current_snapshot_id()?.ok_or(PipelineError::NoSnapshot)?;
    let rows = db.load_scores()?;

    let batch = EmbeddingBatch::from_rows(&rows)?;

    index.reset().await?;

    let entries = batch.as_ref().map(|b| b.entries()).unwrap_or(&[]);
    let chunks: Vec<_> = entries.chunks(batch_size.max(1)).collect();
    let batches = chunks.len();

    stream::iter(chunks)
        .map(|chunk| async move {
            index.upsert_batch(chunk).await?;
            debug!(count = chunk.len(), "indexed batch");
            Ok::<_, IndexError>(())
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect::<Vec<()>>()
        .await?;

    info!(
        snapshot = %snapshot_id,
        entries = entries.len(),
        batches,
        "rebuilt similarity index"
    );

    Ok(IndexSummary {
        snapshot_id,
        entries: entries.len(),
        batches,
    })
}

// Nearest-neighbor index capability and the in-memory exact backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

use crate::similarity::embedding::Embedding;
use crate::stats::scorer::PlayerScoreRow;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("vector index returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed vector index response: {0}")]
    Malformed(String),
}

/// Raised when an embedding batch would mix rows from different cohort
/// snapshots.
#[derive(Debug, Error, PartialEq)]
#[error("player {player_id} belongs to snapshot {found}, batch is for {expected}")]
pub struct MixedSnapshotError {
    pub expected: String,
    pub found: String,
    pub player_id: i64,
}

// ---------------------------------------------------------------------------
// Entries and hits
// ---------------------------------------------------------------------------

/// Metadata stored next to each embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub player_id: i64,
    pub player_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub total_z: f64,
    pub snapshot_id: String,
    #[serde(rename = "FG")]
    pub fg: f64,
    #[serde(rename = "FT")]
    pub ft: f64,
    pub three_ptm: f64,
    #[serde(rename = "PTS")]
    pub pts: f64,
    #[serde(rename = "REB")]
    pub reb: f64,
    #[serde(rename = "AST")]
    pub ast: f64,
    #[serde(rename = "STL")]
    pub stl: f64,
    #[serde(rename = "BLK")]
    pub blk: f64,
    #[serde(rename = "TOV")]
    pub tov: f64,
}

/// One `(id, embedding, metadata)` triple to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Embedding,
    pub metadata: IndexMetadata,
    pub document: String,
}

impl IndexEntry {
    pub fn from_row(row: &PlayerScoreRow) -> Self {
        let s = &row.scores;
        Self {
            id: row.player_id.to_string(),
            embedding: Embedding::from_row(row),
            metadata: IndexMetadata {
                player_id: row.player_id,
                player_name: row.name.clone(),
                team: row.team.clone(),
                total_z: s.total,
                snapshot_id: row.snapshot_id.clone(),
                fg: s.fg,
                ft: s.ft,
                three_ptm: s.three_ptm,
                pts: s.pts,
                reb: s.reb,
                ast: s.ast,
                stl: s.stl,
                blk: s.blk,
                tov: s.tov,
            },
            document: format!(
                "{} ({}) - total z {:.2}",
                row.name,
                row.team.as_deref().unwrap_or("FA"),
                s.total
            ),
        }
    }
}

/// One neighbor returned by a query, in index order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub distance: Option<f64>,
    pub metadata: Option<IndexMetadata>,
}

/// Index entries that all derive from one cohort snapshot.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    snapshot_id: String,
    entries: Vec<IndexEntry>,
}

impl EmbeddingBatch {
    /// Build entries for `rows`, rejecting rows whose snapshot differs from
    /// the first row's. Returns `None` for an empty slice.
    pub fn from_rows(rows: &[PlayerScoreRow]) -> Result<Option<Self>, MixedSnapshotError> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let snapshot_id = first.snapshot_id.clone();
        if let Some(stray) = rows.iter().find(|r| r.snapshot_id != snapshot_id) {
            return Err(MixedSnapshotError {
                expected: snapshot_id,
                found: stray.snapshot_id.clone(),
                player_id: stray.player_id,
            });
        }
        Ok(Some(Self {
            snapshot_id,
            entries: rows.iter().map(IndexEntry::from_row).collect(),
        }))
    }

    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// NeighborIndex
// ---------------------------------------------------------------------------

/// A named collection of embeddings supporting batch upsert and
/// query-by-vector. Implementations must use the same embedding dimension
/// and category order at upsert and query time.
#[async_trait]
pub trait NeighborIndex: Send + Sync {
    /// Drop every stored entry, leaving an empty collection.
    async fn reset(&self) -> Result<(), IndexError>;

    /// Insert or replace entries by id.
    async fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<(), IndexError>;

    /// Up to `n_results` nearest entries to `embedding`, closest first.
    async fn query(&self, embedding: &Embedding, n_results: usize) -> Result<Vec<IndexHit>, IndexError>;
}

// ---------------------------------------------------------------------------
// MemoryIndex
// ---------------------------------------------------------------------------

/// Exact brute-force index over squared Euclidean distance. Used by tests
/// and for runs without an index service.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NeighborIndex for MemoryIndex {
    async fn reset(&self) -> Result<(), IndexError> {
        self.entries.write().expect("index lock poisoned").clear();
        Ok(())
    }

    async fn upsert_batch(&self, batch: &[IndexEntry]) -> Result<(), IndexError> {
        let mut entries = self.entries.write().expect("index lock poisoned");
        for entry in batch {
            match entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => entries.push(entry.clone()),
            }
        }
        Ok(())
    }

    async fn query(&self, embedding: &Embedding, n_results: usize) -> Result<Vec<IndexHit>, IndexError> {
        let entries = self.entries.read().expect("index lock poisoned");
        let mut scored: Vec<(f64, &IndexEntry)> = entries
            .iter()
            .map(|e| (embedding.squared_l2(&e.embedding), e))
            .collect();
        // Stable: equal distances keep insertion order.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(scored
            .into_iter()
            .take(n_results)
            .map(|(distance, e)| IndexHit {
                id: e.id.clone(),
                distance: Some(distance),
                metadata: Some(e.metadata.clone()),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::category::CATEGORY_COUNT;
    use crate::stats::scorer::PlayerScoreVector;

    fn row(id: i64, first: f64, snapshot: &str) -> PlayerScoreRow {
        let mut c = [0.0; CATEGORY_COUNT];
        c[0] = first;
        PlayerScoreRow {
            player_id: id,
            name: format!("Player {id}"),
            team: if id % 2 == 0 { Some("BOS".into()) } else { None },
            snapshot_id: snapshot.into(),
            scores: PlayerScoreVector::from_components(c),
        }
    }

    #[test]
    fn entry_from_row() {
        let entry = IndexEntry::from_row(&row(7, 1.5, "cohort_a"));
        assert_eq!(entry.id, "7");
        assert_eq!(entry.metadata.player_id, 7);
        assert_eq!(entry.metadata.snapshot_id, "cohort_a");
        assert_eq!(entry.metadata.fg, 1.5);
        assert_eq!(entry.document, "Player 7 (FA) - total z 1.50");
    }

    #[test]
    fn metadata_serializes_category_labels_and_skips_missing_team() {
        let entry = IndexEntry::from_row(&row(7, 1.5, "cohort_a"));
        let json = serde_json::to_value(&entry.metadata).unwrap();
        assert_eq!(json["FG"], 1.5);
        assert!(json.get("three_ptm").is_some());
        assert!(json.get("team").is_none());
    }

    #[test]
    fn batch_rejects_mixed_snapshots() {
        let rows = vec![row(1, 0.0, "cohort_a"), row(2, 1.0, "cohort_b")];
        let err = EmbeddingBatch::from_rows(&rows).unwrap_err();
        assert_eq!(err.expected, "cohort_a");
        assert_eq!(err.found, "cohort_b");
        assert_eq!(err.player_id, 2);
    }

    #[test]
    fn batch_of_nothing_is_none() {
        assert!(EmbeddingBatch::from_rows(&[]).unwrap().is_none());
    }

    #[test]
    fn batch_from_single_snapshot() {
        let rows = vec![row(1, 0.0, "cohort_a"), row(2, 1.0, "cohort_a")];
        let batch = EmbeddingBatch::from_rows(&rows).unwrap().unwrap();
        assert_eq!(batch.snapshot_id(), "cohort_a");
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn memory_index_orders_by_distance() {
        let index = MemoryIndex::new();
        let rows: Vec<PlayerScoreRow> = [(1, 0.0), (2, 3.0), (3, 1.0), (4, -2.0)]
            .iter()
            .map(|&(id, v)| row(id, v, "s"))
            .collect();
        let entries: Vec<IndexEntry> = rows.iter().map(IndexEntry::from_row).collect();
        index.upsert_batch(&entries).await.unwrap();

        let hits = index.query(&Embedding::from_row(&rows[0]), 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "4"]);
        assert_eq!(hits[0].distance, Some(0.0));
        assert_eq!(hits[1].distance, Some(1.0));
        assert_eq!(hits[2].distance, Some(4.0));
    }

    #[tokio::test]
    async fn memory_index_upsert_replaces_by_id() {
        let index = MemoryIndex::new();
        index.upsert_batch(&[IndexEntry::from_row(&row(1, 0.0, "s"))]).await.unwrap();
        index.upsert_batch(&[IndexEntry::from_row(&row(1, 5.0, "s"))]).await.unwrap();
        assert_eq!(index.len(), 1);

        let query = Embedding::from_row(&row(9, 5.0, "s"));
        let hits = index.query(&query, 5).await.unwrap();
        assert_eq!(hits[0].distance, Some(0.0));
    }

    #[tokio::test]
    async fn memory_index_reset_clears() {
        let index = MemoryIndex::new();
        index.upsert_batch(&[IndexEntry::from_row(&row(1, 0.0, "s"))]).await.unwrap();
        index.reset().await.unwrap();
        assert!(index.is_empty());
        let hits = index.query(&Embedding::from_row(&row(1, 0.0, "s")), 3).await.unwrap();
        assert!(hits.is_empty());
    }
}

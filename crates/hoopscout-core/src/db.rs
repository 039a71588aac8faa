// SQLite persistence for raw stat lines, cohort snapshots and score rows.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::stats::category::{Category, CATEGORY_COUNT};
use crate::stats::league::LeagueStatistics;
use crate::stats::record::{finite_or_zero, RawPlayerRecord};
use crate::stats::scorer::{PlayerScoreRow, PlayerScoreVector};

/// `meta` key holding the id of the snapshot score reads default to.
const CURRENT_SNAPSHOT_KEY: &str = "current_snapshot";

const RAW_COLUMNS: &str = "player_id, player_name, team, games, minutes, fgm, fga, fg_pct, \
     fg3m, fg3a, fg3_pct, ftm, fta, ft_pct, reb, ast, stl, blk, tov, pts, fantasy_pts";

/// SQLite-backed store for the raw snapshot, score rows and the snapshots
/// that produced them.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS raw_stats (
                player_id   INTEGER PRIMARY KEY,
                player_name TEXT NOT NULL,
                team        TEXT,
                games       INTEGER,
                minutes     REAL,
                fgm         REAL,
                fga         REAL,
                fg_pct      REAL,
                fg3m        REAL,
                fg3a        REAL,
                fg3_pct     REAL,
                ftm         REAL,
                fta         REAL,
                ft_pct      REAL,
                reb         REAL,
                ast         REAL,
                stl         REAL,
                blk         REAL,
                tov         REAL,
                pts         REAL,
                fantasy_pts REAL
            );

            CREATE TABLE IF NOT EXISTS cohort_snapshots (
                snapshot_id TEXT PRIMARY KEY,
                cohort_size INTEGER NOT NULL,
                created_at  TEXT NOT NULL,
                stats_json  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS player_scores (
                player_id   INTEGER NOT NULL,
                snapshot_id TEXT NOT NULL REFERENCES cohort_snapshots(snapshot_id),
                player_name TEXT NOT NULL,
                team        TEXT,
                fg_z        REAL,
                ft_z        REAL,
                three_ptm_z REAL,
                pts_z       REAL,
                reb_z       REAL,
                ast_z       REAL,
                stl_z       REAL,
                blk_z       REAL,
                tov_z       REAL,
                total_z     REAL,
                PRIMARY KEY (player_id, snapshot_id)
            );

            CREATE INDEX IF NOT EXISTS idx_player_scores_snapshot
                ON player_scores(snapshot_id, total_z);

            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // -----------------------------------------------------------------------
    // Raw stats
    // -----------------------------------------------------------------------

    /// Insert or replace raw stat lines by player id in one transaction.
    /// Returns the number of rows written.
    pub fn upsert_raw_stats(&self, records: &[RawPlayerRecord]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin raw stats transaction")?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT OR REPLACE INTO raw_stats ({RAW_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                             ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
                ))
                .context("failed to prepare raw stats insert")?;
            for r in records {
                stmt.execute(params![
                    r.player_id,
                    r.name,
                    r.team,
                    r.games,
                    r.minutes,
                    r.fgm,
                    r.fga,
                    r.fg_pct,
                    r.fg3m,
                    r.fg3a,
                    r.fg3_pct,
                    r.ftm,
                    r.fta,
                    r.ft_pct,
                    r.reb,
                    r.ast,
                    r.stl,
                    r.blk,
                    r.tov,
                    r.pts,
                    r.fantasy_pts,
                ])
                .with_context(|| format!("failed to write raw stats for player {}", r.player_id))?;
            }
        }
        tx.commit().context("failed to commit raw stats")?;
        Ok(records.len())
    }

    /// The full raw snapshot, ordered by player id.
    pub fn load_raw_stats(&self) -> Result<Vec<RawPlayerRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {RAW_COLUMNS} FROM raw_stats ORDER BY player_id"))
            .context("failed to prepare raw stats query")?;
        let records = stmt
            .query_map([], raw_from_row)
            .context("failed to query raw stats")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map raw stats rows")?;
        Ok(records)
    }

    /// Raw stat lines for the given ids. Ids with no row are absent from the
    /// map.
    pub fn raw_stats_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, RawPlayerRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn();
        let sql = format!(
            "SELECT {RAW_COLUMNS} FROM raw_stats WHERE player_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare raw stats lookup")?;
        let records = stmt
            .query_map(params_from_iter(ids.iter()), raw_from_row)
            .context("failed to query raw stats by id")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map raw stats rows")?;
        Ok(records.into_iter().map(|r| (r.player_id, r)).collect())
    }

    pub fn raw_stats_by_id(&self, player_id: i64) -> Result<Option<RawPlayerRecord>> {
        Ok(self.raw_stats_by_ids(&[player_id])?.remove(&player_id))
    }

    // -----------------------------------------------------------------------
    // Snapshots and scores
    // -----------------------------------------------------------------------

    /// Persist a snapshot, its aggregates and every score row, then make it
    /// the current snapshot. All in one transaction. Re-saving a snapshot id
    /// replaces its rows rather than merging them.
    pub fn save_snapshot_scores(&self, league: &LeagueStatistics, rows: &[PlayerScoreRow]) -> Result<()> {
        let snapshot = &league.snapshot;
        let stats_json =
            serde_json::to_string(league).context("failed to serialize league statistics")?;

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin snapshot transaction")?;
        tx.execute(
            "INSERT INTO cohort_snapshots (snapshot_id, cohort_size, created_at, stats_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(snapshot_id) DO UPDATE SET
                cohort_size = excluded.cohort_size,
                created_at  = excluded.created_at,
                stats_json  = excluded.stats_json",
            params![
                snapshot.id,
                snapshot.size as i64,
                snapshot.created_at.to_rfc3339(),
                stats_json
            ],
        )
        .context("failed to save cohort snapshot")?;
        tx.execute(
            "DELETE FROM player_scores WHERE snapshot_id = ?1",
            params![snapshot.id],
        )
        .context("failed to clear previous scores for snapshot")?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT OR REPLACE INTO player_scores
                         (player_id, snapshot_id, player_name, team, {}, total_z)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    score_columns()
                ))
                .context("failed to prepare score insert")?;
            for row in rows {
                if row.snapshot_id != snapshot.id {
                    anyhow::bail!(
                        "score row for player {} belongs to snapshot {}, expected {}",
                        row.player_id,
                        row.snapshot_id,
                        snapshot.id
                    );
                }
                let c = row.scores.components();
                stmt.execute(params![
                    row.player_id,
                    row.snapshot_id,
                    row.name,
                    row.team,
                    c[0],
                    c[1],
                    c[2],
                    c[3],
                    c[4],
                    c[5],
                    c[6],
                    c[7],
                    c[8],
                    row.scores.total,
                ])
                .with_context(|| format!("failed to write score for player {}", row.player_id))?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![CURRENT_SNAPSHOT_KEY, snapshot.id],
        )
        .context("failed to update current snapshot")?;
        tx.commit().context("failed to commit snapshot scores")?;
        Ok(())
    }

    pub fn current_snapshot_id(&self) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![CURRENT_SNAPSHOT_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read current snapshot")
    }

    /// The aggregates stored with `snapshot_id`, if that snapshot exists.
    pub fn load_snapshot_stats(&self, snapshot_id: &str) -> Result<Option<LeagueStatistics>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT stats_json FROM cohort_snapshots WHERE snapshot_id = ?1",
                params![snapshot_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read cohort snapshot")?;
        json.map(|j| serde_json::from_str(&j).context("failed to deserialize league statistics"))
            .transpose()
    }

    /// Every score row of the current snapshot, total descending.
    pub fn load_scores(&self) -> Result<Vec<PlayerScoreRow>> {
        let conn = self.conn();
        let sql = format!(
            "{} WHERE snapshot_id = ({}) ORDER BY total_z DESC, player_id",
            select_scores(),
            CURRENT_SNAPSHOT_SUBQUERY
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare score query")?;
        let rows = stmt
            .query_map(params![CURRENT_SNAPSHOT_KEY], score_from_row)
            .context("failed to query scores")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map score rows")?;
        Ok(rows)
    }

    /// The current snapshot's score row for `player_id`.
    pub fn score_by_id(&self, player_id: i64) -> Result<Option<PlayerScoreRow>> {
        let conn = self.conn();
        let sql = format!(
            "{} WHERE snapshot_id = ({}) AND player_id = ?2",
            select_scores(),
            CURRENT_SNAPSHOT_SUBQUERY
        );
        conn.query_row(&sql, params![CURRENT_SNAPSHOT_KEY, player_id], score_from_row)
            .optional()
            .context("failed to read score row")
    }

    /// Current-snapshot score rows for the given ids.
    pub fn scores_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, PlayerScoreRow>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn();
        let sql = format!(
            "{} WHERE snapshot_id = ({}) AND player_id IN ({})",
            select_scores(),
            CURRENT_SNAPSHOT_SUBQUERY,
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare score lookup")?;
        let mut values: Vec<rusqlite::types::Value> = vec![CURRENT_SNAPSHOT_KEY.to_string().into()];
        values.extend(ids.iter().map(|&id| rusqlite::types::Value::from(id)));
        let rows = stmt
            .query_map(params_from_iter(values), score_from_row)
            .context("failed to query scores by id")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map score rows")?;
        Ok(rows.into_iter().map(|r| (r.player_id, r)).collect())
    }

    /// Case-insensitive substring search on player name within the current
    /// snapshot, total descending. A blank query matches everyone.
    ///
    /// Case is folded in Rust rather than by SQLite `LIKE`, which only folds
    /// ASCII letters.
    pub fn search_scores(&self, query: &str, limit: usize) -> Result<Vec<PlayerScoreRow>> {
        let needle = query.trim().to_lowercase();
        let conn = self.conn();
        let sql = format!(
            "{} WHERE snapshot_id = ({}) ORDER BY total_z DESC, player_id",
            select_scores(),
            CURRENT_SNAPSHOT_SUBQUERY
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare score search")?;
        let rows = stmt
            .query_map(params![CURRENT_SNAPSHOT_KEY], score_from_row)
            .context("failed to search scores")?;

        let mut hits = Vec::new();
        for row in rows {
            if hits.len() >= limit {
                break;
            }
            let row = row.context("failed to map score row")?;
            if row.name.to_lowercase().contains(&needle) {
                hits.push(row);
            }
        }
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const CURRENT_SNAPSHOT_SUBQUERY: &str = "SELECT value FROM meta WHERE key = ?1";

/// Category z-score columns in canonical order.
fn score_columns() -> String {
    Category::ALL.map(Category::score_column).join(", ")
}

fn select_scores() -> String {
    format!(
        "SELECT player_id, snapshot_id, player_name, team, {} FROM player_scores",
        score_columns()
    )
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Nullable REAL column read as a finite f64.
fn real(row: &Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    Ok(row.get::<_, Option<f64>>(idx)?.map(finite_or_zero).unwrap_or(0.0))
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawPlayerRecord> {
    let games: Option<i64> = row.get(3)?;
    Ok(RawPlayerRecord {
        player_id: row.get(0)?,
        name: row.get(1)?,
        team: row.get::<_, Option<String>>(2)?.filter(|t| !t.trim().is_empty()),
        games: games.unwrap_or(0).clamp(0, u32::MAX as i64) as u32,
        minutes: real(row, 4)?,
        fgm: real(row, 5)?,
        fga: real(row, 6)?,
        fg_pct: real(row, 7)?,
        fg3m: real(row, 8)?,
        fg3a: real(row, 9)?,
        fg3_pct: real(row, 10)?,
        ftm: real(row, 11)?,
        fta: real(row, 12)?,
        ft_pct: real(row, 13)?,
        reb: real(row, 14)?,
        ast: real(row, 15)?,
        stl: real(row, 16)?,
        blk: real(row, 17)?,
        tov: real(row, 18)?,
        pts: real(row, 19)?,
        fantasy_pts: real(row, 20)?,
    })
}

/// Maps a `select_scores()` row. The total is recomputed from the
/// components so it always equals their sum.
fn score_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerScoreRow> {
    let mut components = [0.0; CATEGORY_COUNT];
    for (i, slot) in components.iter_mut().enumerate() {
        *slot = real(row, 4 + i)?;
    }
    Ok(PlayerScoreRow {
        player_id: row.get(0)?,
        snapshot_id: row.get(1)?,
        name: row.get(2)?,
        team: row.get(3)?,
        scores: PlayerScoreVector::from_components(components),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::league::CohortSnapshot;
    use chrono::{TimeZone, Utc};

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn raw(id: i64, name: &str, pts: f64) -> RawPlayerRecord {
        RawPlayerRecord {
            pts,
            games: 60,
            fantasy_pts: pts * 2.0,
            ..RawPlayerRecord::empty(id, name, Some("DEN".into()))
        }
    }

    fn league(minute: u32) -> LeagueStatistics {
        let at = Utc.with_ymd_and_hms(2026, 2, 28, 14, minute, 0).unwrap();
        LeagueStatistics::compute_for_snapshot(&[], CohortSnapshot::at(at, 3))
    }

    fn score(id: i64, name: &str, snapshot: &str, fg: f64) -> PlayerScoreRow {
        let mut c = [0.0; CATEGORY_COUNT];
        c[0] = fg;
        c[8] = -0.5;
        PlayerScoreRow {
            player_id: id,
            name: name.into(),
            team: None,
            snapshot_id: snapshot.into(),
            scores: PlayerScoreVector::from_components(c),
        }
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for t in ["cohort_snapshots", "meta", "player_scores", "raw_stats"] {
            assert!(tables.contains(&t.to_string()), "missing table {t}");
        }
    }

    #[test]
    fn raw_stats_round_trip_and_replace() {
        let db = test_db();
        db.upsert_raw_stats(&[raw(2, "Bam", 19.0), raw(1, "Jokic", 26.0)]).unwrap();
        db.upsert_raw_stats(&[raw(1, "Jokic", 28.5)]).unwrap();

        let all = db.load_raw_stats().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].player_id, 1);
        assert_eq!(all[0].pts, 28.5);
        assert_eq!(all[1], raw(2, "Bam", 19.0));
    }

    #[test]
    fn raw_stats_null_numerics_read_as_zero() {
        let db = test_db();
        db.conn()
            .execute(
                "INSERT INTO raw_stats (player_id, player_name, team) VALUES (5, 'Rookie', '')",
                [],
            )
            .unwrap();
        let r = db.raw_stats_by_id(5).unwrap().unwrap();
        assert_eq!(r.games, 0);
        assert_eq!(r.pts, 0.0);
        assert_eq!(r.fantasy_pts, 0.0);
        assert_eq!(r.team, None);
    }

    #[test]
    fn raw_stats_by_ids_skips_missing() {
        let db = test_db();
        db.upsert_raw_stats(&[raw(1, "A", 1.0), raw(2, "B", 2.0)]).unwrap();
        let found = db.raw_stats_by_ids(&[2, 99]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&2));
        assert!(db.raw_stats_by_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn no_snapshot_means_no_scores() {
        let db = test_db();
        assert_eq!(db.current_snapshot_id().unwrap(), None);
        assert!(db.load_scores().unwrap().is_empty());
        assert!(db.score_by_id(1).unwrap().is_none());
    }

    #[test]
    fn save_snapshot_sets_current_and_reads_default_to_it() {
        let db = test_db();
        let old = league(0);
        db.save_snapshot_scores(&old, &[score(1, "Old Row", &old.snapshot.id, 9.0)])
            .unwrap();

        let new = league(1);
        let rows = vec![
            score(1, "Luka", &new.snapshot.id, 1.0),
            score(2, "Tatum", &new.snapshot.id, 2.0),
        ];
        db.save_snapshot_scores(&new, &rows).unwrap();

        assert_eq!(db.current_snapshot_id().unwrap(), Some(new.snapshot.id.clone()));
        let loaded = db.load_scores().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].player_id, 2);
        assert_eq!(loaded[1], rows[0]);
        assert_eq!(db.score_by_id(1).unwrap().unwrap().name, "Luka");
        assert_eq!(db.load_snapshot_stats(&new.snapshot.id).unwrap(), Some(new));
        assert!(db.load_snapshot_stats("cohort_missing").unwrap().is_none());
    }

    #[test]
    fn save_snapshot_rejects_foreign_rows() {
        let db = test_db();
        let l = league(0);
        let err = db
            .save_snapshot_scores(&l, &[score(1, "X", "cohort_other", 0.0)])
            .unwrap_err();
        assert!(err.to_string().contains("cohort_other"));
        assert_eq!(db.current_snapshot_id().unwrap(), None);
    }

    #[test]
    fn search_is_case_insensitive_substring_ordered_by_total() {
        let db = test_db();
        let l = league(0);
        let id = l.snapshot.id.clone();
        db.save_snapshot_scores(
            &l,
            &[
                score(1, "Stephen Curry", &id, 1.0),
                score(2, "Seth Curry", &id, 0.2),
                score(3, "Anthony Davis", &id, 3.0),
                score(4, "100%_Shooter", &id, 0.0),
            ],
        )
        .unwrap();

        let hits = db.search_scores("CURRY", 10).unwrap();
        let ids: Vec<i64> = hits.iter().map(|r| r.player_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let all = db.search_scores("  ", 2).unwrap();
        assert_eq!(all.iter().map(|r| r.player_id).collect::<Vec<_>>(), vec![3, 1]);

        let literal = db.search_scores("%_", 10).unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].player_id, 4);
    }

    #[test]
    fn search_folds_non_ascii_case() {
        let db = test_db();
        let l = league(0);
        let id = l.snapshot.id.clone();
        db.save_snapshot_scores(
            &l,
            &[
                score(203999, "Nikola Jokić", &id, 4.0),
                score(1628969, "Mikal Bridges", &id, 1.0),
                score(1641705, "Victor Wembanyama", &id, 3.0),
            ],
        )
        .unwrap();

        for query in ["JOKIĆ", "jokić", "Jokić"] {
            let hits = db.search_scores(query, 10).unwrap();
            assert_eq!(hits.iter().map(|r| r.player_id).collect::<Vec<_>>(), vec![203999], "{query}");
        }
        // Accents are matched, not stripped.
        assert!(db.search_scores("jokic", 10).unwrap().is_empty());
        // Matches past the limit are not returned.
        let first = db.search_scores("i", 1).unwrap();
        assert_eq!(first.iter().map(|r| r.player_id).collect::<Vec<_>>(), vec![203999]);
    }

    #[test]
    fn scores_by_ids_uses_current_snapshot() {
        let db = test_db();
        let old = league(0);
        db.save_snapshot_scores(&old, &[score(7, "Gone", &old.snapshot.id, 0.0)])
            .unwrap();
        let new = league(1);
        db.save_snapshot_scores(&new, &[score(8, "Here", &new.snapshot.id, 0.0)])
            .unwrap();

        let found = db.scores_by_ids(&[7, 8]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&8].snapshot_id, new.snapshot.id);
    }

    #[test]
    fn score_columns_follow_category_order() {
        assert_eq!(
            score_columns(),
            "fg_z, ft_z, three_ptm_z, pts_z, reb_z, ast_z, stl_z, blk_z, tov_z"
        );
    }
}

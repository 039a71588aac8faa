// Cohort aggregates with volume-weighted shooting impact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CohortConfig;
use crate::stats::record::{finite_or_zero, RawPlayerRecord};

// ---------------------------------------------------------------------------
// Pool statistics
// ---------------------------------------------------------------------------

/// Mean and standard deviation for a single statistical category across a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub mean: f64,
    pub stdev: f64,
}

impl PoolStats {
    pub const ZERO: PoolStats = PoolStats {
        mean: 0.0,
        stdev: 0.0,
    };
}

/// Compute mean and standard deviation for a slice of values.
///
/// Returns `PoolStats::ZERO` for an empty slice. Uses the population
/// standard deviation (N denominator), since the cohort is the full
/// population being ranked rather than a sample of it.
pub fn compute_pool_stats(values: &[f64]) -> PoolStats {
    if values.is_empty() {
        return PoolStats::ZERO;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    PoolStats {
        mean,
        stdev: variance.sqrt(),
    }
}

// ---------------------------------------------------------------------------
// Shooting impact
// ---------------------------------------------------------------------------

/// `total_makes / total_attempts`, or 0 when nobody attempted a shot.
pub fn league_percentage(total_makes: f64, total_attempts: f64) -> f64 {
    if total_attempts > 0.0 {
        total_makes / total_attempts
    } else {
        0.0
    }
}

/// Makes above (or below) what a league-average shooter would have made on
/// the same number of attempts: `makes - league_pct * attempts`.
pub fn shooting_impact(makes: f64, attempts: f64, league_pct: f64) -> f64 {
    makes - league_pct * attempts
}

/// Cohort-wide aggregates for one percentage category (FG or FT).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShootingStats {
    pub total_makes: f64,
    pub total_attempts: f64,
    pub league_pct: f64,
    /// Distribution of per-player [`shooting_impact`] values.
    pub impact: PoolStats,
}

impl ShootingStats {
    /// Aggregate `(makes, attempts)` pairs, one per cohort member.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let total_makes: f64 = pairs.iter().map(|(m, _)| m).sum();
        let total_attempts: f64 = pairs.iter().map(|(_, a)| a).sum();
        let league_pct = league_percentage(total_makes, total_attempts);
        let impacts: Vec<f64> = pairs
            .iter()
            .map(|&(m, a)| shooting_impact(m, a, league_pct))
            .collect();
        Self {
            total_makes,
            total_attempts,
            league_pct,
            impact: compute_pool_stats(&impacts),
        }
    }

    /// This category's impact for one player against the cohort's percentage.
    pub fn impact_of(&self, makes: f64, attempts: f64) -> f64 {
        shooting_impact(makes, attempts, self.league_pct)
    }
}

// ---------------------------------------------------------------------------
// Cohort snapshot
// ---------------------------------------------------------------------------

/// Identity of one cohort computation. Scores and embeddings are only
/// comparable when they carry the same snapshot id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortSnapshot {
    pub id: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

impl CohortSnapshot {
    /// A new snapshot stamped with the current UTC time.
    pub fn new(size: usize) -> Self {
        Self::at(Utc::now(), size)
    }

    pub fn at(created_at: DateTime<Utc>, size: usize) -> Self {
        Self {
            id: Self::id_for(created_at),
            size,
            created_at,
        }
    }

    /// Format: `cohort_YYYYMMDD_HHMMSS_mmm` (e.g. `cohort_20260228_143022_123`).
    pub fn id_for(at: DateTime<Utc>) -> String {
        at.format("cohort_%Y%m%d_%H%M%S_%3f").to_string()
    }
}

// ---------------------------------------------------------------------------
// League statistics
// ---------------------------------------------------------------------------

/// Population aggregates for every scoring category over one cohort.
///
/// Built once per cohort and never mutated; the scorer only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueStatistics {
    pub snapshot: CohortSnapshot,
    pub fg3m: PoolStats,
    pub pts: PoolStats,
    pub reb: PoolStats,
    pub ast: PoolStats,
    pub stl: PoolStats,
    pub blk: PoolStats,
    pub tov: PoolStats,
    pub fg: ShootingStats,
    pub ft: ShootingStats,
}

impl LeagueStatistics {
    /// Aggregate `cohort` under a fresh snapshot.
    pub fn compute(cohort: &[&RawPlayerRecord]) -> Self {
        Self::compute_for_snapshot(cohort, CohortSnapshot::new(cohort.len()))
    }

    /// Aggregate `cohort` under the given snapshot. An empty cohort yields
    /// all-zero aggregates.
    pub fn compute_for_snapshot(cohort: &[&RawPlayerRecord], snapshot: CohortSnapshot) -> Self {
        let column = |f: fn(&RawPlayerRecord) -> f64| -> PoolStats {
            let values: Vec<f64> = cohort.iter().map(|r| finite_or_zero(f(r))).collect();
            compute_pool_stats(&values)
        };
        let pairs = |makes: fn(&RawPlayerRecord) -> f64, attempts: fn(&RawPlayerRecord) -> f64| {
            cohort
                .iter()
                .map(|r| (finite_or_zero(makes(r)), finite_or_zero(attempts(r))))
                .collect::<Vec<_>>()
        };

        Self {
            snapshot,
            fg3m: column(|r| r.fg3m),
            pts: column(|r| r.pts),
            reb: column(|r| r.reb),
            ast: column(|r| r.ast),
            stl: column(|r| r.stl),
            blk: column(|r| r.blk),
            tov: column(|r| r.tov),
            fg: ShootingStats::from_pairs(&pairs(|r| r.fgm, |r| r.fga)),
            ft: ShootingStats::from_pairs(&pairs(|r| r.ftm, |r| r.fta)),
        }
    }
}

// ---------------------------------------------------------------------------
// Cohort selection
// ---------------------------------------------------------------------------

/// Keep players with at least `min_games` games and return the top `size`
/// by fantasy points. Ties keep the lower player id first.
pub fn select_cohort<'a>(records: &'a [RawPlayerRecord], cohort: &CohortConfig) -> Vec<&'a RawPlayerRecord> {
    let mut qualified: Vec<&RawPlayerRecord> = records
        .iter()
        .filter(|r| r.games >= cohort.min_games)
        .collect();
    qualified.sort_by(|a, b| {
        finite_or_zero(b.fantasy_pts)
            .total_cmp(&finite_or_zero(a.fantasy_pts))
            .then(a.player_id.cmp(&b.player_id))
    });
    qualified.truncate(cohort.size);
    qualified
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

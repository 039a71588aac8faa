// Per-player nine-category z-scores against a cohort's league statistics.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::stats::category::{Category, CATEGORY_COUNT};
use crate::stats::league::{LeagueStatistics, PoolStats};
use crate::stats::record::{finite_or_zero, RawPlayerRecord};

/// Threshold below which standard deviation is treated as zero.
const STDEV_EPSILON: f64 = 1e-9;

/// Compute a z-score given a value and pool stats.
///
/// Returns 0.0 if the standard deviation is approximately zero (guarding
/// against division by zero and cohorts where everyone shares a value).
pub fn compute_zscore(value: f64, stats: &PoolStats) -> f64 {
    if stats.stdev < STDEV_EPSILON {
        return 0.0;
    }
    (value - stats.mean) / stats.stdev
}

// ---------------------------------------------------------------------------
// Score vector
// ---------------------------------------------------------------------------

/// Nine per-category z-scores plus their unweighted sum.
///
/// `tov` is already sign-inverted: fewer turnovers scores higher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerScoreVector {
    pub fg: f64,
    pub ft: f64,
    pub three_ptm: f64,
    pub pts: f64,
    pub reb: f64,
    pub ast: f64,
    pub stl: f64,
    pub blk: f64,
    pub tov: f64,
    pub total: f64,
}

impl PlayerScoreVector {
    /// Build a vector from components in [`Category::ALL`] order; the total
    /// is their sum.
    pub fn from_components(c: [f64; CATEGORY_COUNT]) -> Self {
        Self {
            fg: c[0],
            ft: c[1],
            three_ptm: c[2],
            pts: c[3],
            reb: c[4],
            ast: c[5],
            stl: c[6],
            blk: c[7],
            tov: c[8],
            total: c.iter().sum(),
        }
    }

    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Fg => self.fg,
            Category::Ft => self.ft,
            Category::ThreePtm => self.three_ptm,
            Category::Pts => self.pts,
            Category::Reb => self.reb,
            Category::Ast => self.ast,
            Category::Stl => self.stl,
            Category::Blk => self.blk,
            Category::Tov => self.tov,
        }
    }

    /// Components in [`Category::ALL`] order.
    pub fn components(&self) -> [f64; CATEGORY_COUNT] {
        Category::ALL.map(|c| self.get(c))
    }
}

/// A score vector together with the player and cohort snapshot it belongs to.
/// One row of the score store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerScoreRow {
    pub player_id: i64,
    pub name: String,
    pub team: Option<String>,
    pub snapshot_id: String,
    pub scores: PlayerScoreVector,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score one player against `league`.
///
/// FG and FT use the impact transform; turnovers use the plain z-score with
/// the sign flipped. Pure: `league` is only read.
pub fn score_player(player: &RawPlayerRecord, league: &LeagueStatistics) -> PlayerScoreVector {
    let v = finite_or_zero;

    let fg_impact = league.fg.impact_of(v(player.fgm), v(player.fga));
    let ft_impact = league.ft.impact_of(v(player.ftm), v(player.fta));

    PlayerScoreVector::from_components([
        compute_zscore(fg_impact, &league.fg.impact),
        compute_zscore(ft_impact, &league.ft.impact),
        compute_zscore(v(player.fg3m), &league.fg3m),
        compute_zscore(v(player.pts), &league.pts),
        compute_zscore(v(player.reb), &league.reb),
        compute_zscore(v(player.ast), &league.ast),
        compute_zscore(v(player.stl), &league.stl),
        compute_zscore(v(player.blk), &league.blk),
        -compute_zscore(v(player.tov), &league.tov),
    ])
}

/// Score every player in `cohort`, tagging each row with the league's
/// snapshot. Players are scored in parallel; the result is sorted by total
/// descending (ties by player id).
pub fn score_cohort(cohort: &[&RawPlayerRecord], league: &LeagueStatistics) -> Vec<PlayerScoreRow> {
    let mut rows: Vec<PlayerScoreRow> = cohort
        .par_iter()
        .map(|player| PlayerScoreRow {
            player_id: player.player_id,
            name: player.name.clone(),
            team: player.team.clone(),
            snapshot_id: league.snapshot.id.clone(),
            scores: score_player(player, league),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.scores
            .total
            .total_cmp(&a.scores.total)
            .then(a.player_id.cmp(&b.player_id))
    });
    rows
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

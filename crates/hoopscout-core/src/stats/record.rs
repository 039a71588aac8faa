// Raw season stat lines and their CSV import.
//
// Reads NBA `leaguedashplayerstats` exports (one row per player, per-game
// averages). Every numeric cell is coerced to a finite f64 at this boundary;
// nothing downstream has to handle missing or malformed numbers.

use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::warn;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One season-aggregated stat line for a single player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPlayerRecord {
    pub player_id: i64,
    pub name: String,
    /// `None` for free agents.
    pub team: Option<String>,
    pub games: u32,
    pub minutes: f64,
    pub fgm: f64,
    pub fga: f64,
    pub fg_pct: f64,
    pub fg3m: f64,
    pub fg3a: f64,
    pub fg3_pct: f64,
    pub ftm: f64,
    pub fta: f64,
    pub ft_pct: f64,
    pub reb: f64,
    pub ast: f64,
    pub stl: f64,
    pub blk: f64,
    pub tov: f64,
    pub pts: f64,
    /// Ranking metric used for cohort selection.
    pub fantasy_pts: f64,
}

impl RawPlayerRecord {
    /// A record with the given identity and every stat at zero.
    pub fn empty(player_id: i64, name: impl Into<String>, team: Option<String>) -> Self {
        Self {
            player_id,
            name: name.into(),
            team,
            games: 0,
            minutes: 0.0,
            fgm: 0.0,
            fga: 0.0,
            fg_pct: 0.0,
            fg3m: 0.0,
            fg3a: 0.0,
            fg3_pct: 0.0,
            ftm: 0.0,
            fta: 0.0,
            ft_pct: 0.0,
            reb: 0.0,
            ast: 0.0,
            stl: 0.0,
            blk: 0.0,
            tov: 0.0,
            pts: 0.0,
            fantasy_pts: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

// ---------------------------------------------------------------------------
// Numeric coercion
// ---------------------------------------------------------------------------

/// Replace NaN and infinities with 0.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Parse a numeric cell, yielding 0 for blank, non-numeric or non-finite text.
pub fn coerce_numeric(text: &str) -> f64 {
    text.trim().parse::<f64>().map(finite_or_zero).unwrap_or(0.0)
}

/// Parse a player id. Accepts integral floats such as `"201939.0"`.
pub fn parse_player_id(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if let Ok(id) = trimmed.parse::<i64>() {
        return Some(id);
    }
    let value = trimmed.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().map(coerce_numeric).unwrap_or(0.0))
}

// ---------------------------------------------------------------------------
// Raw CSV serde struct (private)
// ---------------------------------------------------------------------------

/// NBA stats export row. Unknown columns (ranks, plus-minus, ...) are ignored.
#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct RawNbaRow {
    #[serde(default)]
    PLAYER_ID: Option<String>,
    #[serde(default)]
    PLAYER_NAME: Option<String>,
    #[serde(default)]
    TEAM_ABBREVIATION: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    GP: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    MIN: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FGM: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FGA: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FG_PCT: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FG3M: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FG3A: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FG3_PCT: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FTM: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FTA: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    FT_PCT: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    REB: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    AST: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    STL: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    BLK: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    TOV: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    PTS: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    NBA_FANTASY_PTS: f64,
}

impl RawNbaRow {
    fn into_record(self) -> Option<RawPlayerRecord> {
        let player_id = self.PLAYER_ID.as_deref().and_then(parse_player_id)?;
        let team = self
            .TEAM_ABBREVIATION
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Some(RawPlayerRecord {
            player_id,
            name: self.PLAYER_NAME.unwrap_or_default().trim().to_string(),
            team,
            games: self.GP.max(0.0).round() as u32,
            minutes: self.MIN,
            fgm: self.FGM,
            fga: self.FGA,
            fg_pct: self.FG_PCT,
            fg3m: self.FG3M,
            fg3a: self.FG3A,
            fg3_pct: self.FG3_PCT,
            ftm: self.FTM,
            fta: self.FTA,
            ft_pct: self.FT_PCT,
            reb: self.REB,
            ast: self.AST,
            stl: self.STL,
            blk: self.BLK,
            tov: self.TOV,
            pts: self.PTS,
            fantasy_pts: self.NBA_FANTASY_PTS,
        })
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

fn load_records_from_reader<R: Read>(rdr: R) -> Result<Vec<RawPlayerRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(rdr);
    let mut records = Vec::new();
    for (line, result) in reader.deserialize::<RawNbaRow>().enumerate() {
        match result {
            Ok(raw) => {
                let name = raw.PLAYER_NAME.clone().unwrap_or_default();
                match raw.into_record() {
                    Some(record) => records.push(record),
                    None => warn!(
                        "skipping row {} ('{}'): missing or invalid PLAYER_ID",
                        line + 1,
                        name.trim()
                    ),
                }
            }
            Err(e) => {
                warn!("skipping malformed stats row: {}", e);
            }
        }
    }
    Ok(records)
}

/// Load raw stat lines from an NBA stats CSV export.
pub fn load_raw_csv(path: &Path) -> Result<Vec<RawPlayerRecord>, ImportError> {
    let file = std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_records_from_reader(file).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

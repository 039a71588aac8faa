// The nine scoring categories and their canonical order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of scoring categories, and the embedding dimensionality.
pub const CATEGORY_COUNT: usize = 9;

/// A nine-category fantasy basketball stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "FG")]
    Fg,
    #[serde(rename = "FT")]
    Ft,
    #[serde(rename = "3PTM")]
    ThreePtm,
    #[serde(rename = "PTS")]
    Pts,
    #[serde(rename = "REB")]
    Reb,
    #[serde(rename = "AST")]
    Ast,
    #[serde(rename = "STL")]
    Stl,
    #[serde(rename = "BLK")]
    Blk,
    #[serde(rename = "TOV")]
    Tov,
}

impl Category {
    /// Canonical order. Score columns, embeddings and index entries all use it;
    /// changing it invalidates every stored embedding.
    pub const ALL: [Category; CATEGORY_COUNT] = [
        Category::Fg,
        Category::Ft,
        Category::ThreePtm,
        Category::Pts,
        Category::Reb,
        Category::Ast,
        Category::Stl,
        Category::Blk,
        Category::Tov,
    ];

    /// Short display label, e.g. `"3PTM"`.
    pub fn label(self) -> &'static str {
        match self {
            Category::Fg => "FG",
            Category::Ft => "FT",
            Category::ThreePtm => "3PTM",
            Category::Pts => "PTS",
            Category::Reb => "REB",
            Category::Ast => "AST",
            Category::Stl => "STL",
            Category::Blk => "BLK",
            Category::Tov => "TOV",
        }
    }

    /// Column holding this category's z-score in the `player_scores` table.
    pub fn score_column(self) -> &'static str {
        match self {
            Category::Fg => "fg_z",
            Category::Ft => "ft_z",
            Category::ThreePtm => "three_ptm_z",
            Category::Pts => "pts_z",
            Category::Reb => "reb_z",
            Category::Ast => "ast_z",
            Category::Stl => "stl_z",
            Category::Blk => "blk_z",
            Category::Tov => "tov_z",
        }
    }

    /// Position of this category in [`Category::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hoopscout",
    version,
    about = "NBA 9-category z-scores and similar-player lookups",
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a season stats CSV into the raw stats store
    Import {
        /// Path to a leaguedashplayerstats CSV export
        csv: PathBuf,
    },

    /// Recompute z-scores for a fresh cohort snapshot
    Score,

    /// Rebuild the similarity index from the current snapshot
    Index,

    /// Search players by name, best total first
    Search {
        /// Substring of the player name; omit to list the top players
        query: Option<String>,

        #[arg(short = 'n', long = "limit", allow_negative_numbers = true)]
        limit: Option<f64>,
    },

    /// Show a player's scores and raw stats
    Show {
        /// Player id
        id: String,
    },

    /// List the players most similar to a player
    Similar {
        /// Player id
        id: String,

        #[arg(short = 'n', long = "limit", allow_negative_numbers = true)]
        limit: Option<f64>,
    },
}

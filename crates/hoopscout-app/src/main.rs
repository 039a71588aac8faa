// hoopscout entry point.
//
// Every command follows the same startup:
// 1. Initialize tracing (stderr; stdout carries the report)
// 2. Load config
// 3. Open database
// 4. Run the command, building the index client only when it needs one

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use hoopscout_core::config::{self, Config};
use hoopscout_core::db::Database;
use hoopscout_core::pipeline;
use hoopscout_core::service::{parse_player_id, LookupError, LookupService, PlayerProfile, SimilarReport};
use hoopscout_core::similarity::chroma::ChromaIndex;
use hoopscout_core::similarity::index::NeighborIndex;
use hoopscout_core::similarity::retriever::SimilarityRetriever;
use hoopscout_core::stats::category::Category;
use hoopscout_core::stats::record::load_raw_csv;
use hoopscout_core::stats::scorer::PlayerScoreRow;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Initialize tracing
    init_tracing(cli.verbose)?;

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 3. Open database
    ensure_parent_dir(&config.db_path)?;
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!(path = %config.db_path, "database opened");

    // 4. Run the command
    match cli.command {
        Command::Import { csv } => {
            let records = load_raw_csv(&csv)
                .with_context(|| format!("failed to import {}", csv.display()))?;
            let written = db.upsert_raw_stats(&records)?;
            println!("imported {written} players from {}", csv.display());
        }
        Command::Score => {
            let summary = pipeline::refresh_scores(&db, &config.cohort)?;
            println!(
                "snapshot {}: scored {} of {} players",
                summary.snapshot_id, summary.scored, summary.raw_players
            );
            if let Some(top) = &summary.top {
                println!("top: {}", format_score_line(top));
            }
        }
        Command::Index => {
            let index = ChromaIndex::new(&config.index).context("failed to build index client")?;
            let summary = pipeline::rebuild_index(
                &db,
                &index,
                config.index.batch_size,
                config.index.upsert_concurrency,
            )
            .await?;
            println!(
                "indexed {} players from snapshot {} in {} batches",
                summary.entries, summary.snapshot_id, summary.batches
            );
        }
        Command::Search { query, limit } => {
            let service = lookup_service(&config, db)?;
            let rows = service.search_players(query.as_deref().unwrap_or(""), limit)?;
            if rows.is_empty() {
                println!("no players found");
            }
            for row in &rows {
                println!("{}", format_score_line(row));
            }
        }
        Command::Show { id } => {
            let player_id = require_player_id(&id)?;
            let service = lookup_service(&config, db)?;
            print_profile(&service.player_profile(player_id)?);
        }
        Command::Similar { id, limit } => {
            let player_id = require_player_id(&id)?;
            let service = lookup_service(&config, db)?;
            let profile = service.player_profile(player_id)?;
            print_profile(&profile);
            println!();
            match service.similar_players(player_id, limit).await {
                Ok(report) => print_similar(&report),
                Err(LookupError::SimilarityUnavailable(e)) => {
                    warn!(error = %e, "similar players unavailable");
                    println!("similarity unavailable");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// Initialize tracing to stderr so stdout stays usable for command output.
fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_filter = if verbose {
        "hoopscout=debug,hoopscout_core=debug,warn"
    } else {
        "hoopscout=info,hoopscout_core=info,warn"
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

fn ensure_parent_dir(db_path: &str) -> anyhow::Result<()> {
    if db_path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn lookup_service(config: &Config, db: Arc<Database>) -> anyhow::Result<LookupService> {
    let index: Arc<dyn NeighborIndex> =
        Arc::new(ChromaIndex::new(&config.index).context("failed to build index client")?);
    Ok(LookupService::new(
        db,
        SimilarityRetriever::new(index, config.similar),
        config.search,
    ))
}

fn require_player_id(text: &str) -> anyhow::Result<i64> {
    match parse_player_id(text) {
        Some(id) => Ok(id),
        None => bail!("invalid player id: {text:?}"),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn format_score_line(row: &PlayerScoreRow) -> String {
    format!(
        "{:>8}  {:<26} {:<4} total {:>6.2}",
        row.player_id,
        row.name,
        row.team.as_deref().unwrap_or("FA"),
        row.scores.total
    )
}

fn format_categories(row: &PlayerScoreRow) -> String {
    Category::ALL
        .iter()
        .map(|&c| format!("{} {:+.2}", c.label(), row.scores.get(c)))
        .collect::<Vec<_>>()
        .join("  ")
}

fn print_profile(profile: &PlayerProfile) {
    let score = &profile.score;
    println!("{}", format_score_line(score));
    println!("  {}", format_categories(score));
    match &profile.raw {
        Some(raw) => println!(
            "  {} GP  {:.1} MIN  {:.1} PTS  {:.1} REB  {:.1} AST  {:.1} STL  {:.1} BLK  {:.1} TOV  {:.3} FG%  {:.3} FT%  {:.1} 3PM",
            raw.games,
            raw.minutes,
            raw.pts,
            raw.reb,
            raw.ast,
            raw.stl,
            raw.blk,
            raw.tov,
            raw.fg_pct,
            raw.ft_pct,
            raw.fg3m
        ),
        None => println!("  no raw stats on file"),
    }
    println!("  snapshot {}", score.snapshot_id);
}

fn print_similar(report: &SimilarReport) {
    if report.neighbors.is_empty() {
        println!("no similar players found");
        return;
    }
    println!("similar to {}:", report.player.name);
    for n in &report.neighbors {
        let distance = n
            .distance
            .map(|d| format!("{d:.3}"))
            .unwrap_or_else(|| "-".to_string());
        match &n.score {
            Some(score) => println!("  d={distance:>7}  {}", format_score_line(score)),
            None => println!("  d={distance:>7}  {:>8}  (no score row)", n.player_id),
        }
    }
}

//! Console front-end: create, import, and query position databases.

use chess_board::Position;
use chess_core::{GameLevel, Outcome};
use chess_posdb::{Database, ImportMode, ImportableFile};
use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "posdb", about = "Position-indexed chess game database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Human,
    Engine,
    Server,
}

impl From<LevelArg> for GameLevel {
    fn from(level: LevelArg) -> GameLevel {
        match level {
            LevelArg::Human => GameLevel::Human,
            LevelArg::Engine => GameLevel::Engine,
            LevelArg::Server => GameLevel::Server,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Sequenced,
    Parallel,
    ParallelUnsequenced,
}

impl From<ModeArg> for ImportMode {
    fn from(mode: ModeArg) -> ImportMode {
        match mode {
            ModeArg::Sequenced => ImportMode::Sequenced,
            ModeArg::Parallel => ImportMode::Parallel,
            ModeArg::ParallelUnsequenced => ImportMode::ParallelUnsequenced,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty database.
    Create { path: PathBuf },

    /// Import BCGN files into a database.
    Import {
        db: PathBuf,
        files: Vec<PathBuf>,
        /// Game level the imported files belong to.
        #[arg(long, value_enum, default_value = "human")]
        level: LevelArg,
        /// Import memory budget in megabytes.
        #[arg(long, default_value_t = 1024)]
        memory_mb: usize,
        #[arg(long, value_enum, default_value = "sequenced")]
        mode: ModeArg,
    },

    /// Query positions (as FEN strings) against a database.
    Query {
        db: PathBuf,
        #[arg(long = "fen", required = true)]
        fens: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Create { path } => {
            Database::create(&path)?;
            println!("created database at {}", path.display());
        }
        Command::Import {
            db,
            files,
            level,
            memory_mb,
            mode,
        } => {
            let mut database = Database::open(&db)?;
            let files: Vec<ImportableFile> = files
                .into_iter()
                .map(|path| ImportableFile::new(path, level.into()))
                .collect();
            let stats = database.import(&files, memory_mb << 20, mode.into())?;
            println!(
                "imported {} games ({} positions, {} skipped)",
                stats.games, stats.positions, stats.skipped_games
            );
        }
        Command::Query { db, fens } => {
            let database = Database::open(&db)?;
            let positions = fens
                .iter()
                .map(|fen| Position::from_fen(fen))
                .collect::<Result<Vec<_>, _>>()?;

            let targets: Vec<(GameLevel, Outcome)> = GameLevel::ALL
                .into_iter()
                .flat_map(|level| Outcome::DECIDED.map(|outcome| (level, outcome)))
                .collect();
            let results = database.query(&targets, &positions)?;

            let report = query_report(&database, &targets, &fens, &results)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn query_report(
    database: &Database,
    targets: &[(GameLevel, Outcome)],
    fens: &[String],
    results: &chess_posdb::QueryResults,
) -> Result<serde_json::Value, Box<dyn Error>> {
    let mut positions = Vec::new();
    for (p, fen) in fens.iter().enumerate() {
        let mut rows = Vec::new();
        for (t, (level, outcome)) in targets.iter().enumerate() {
            let result = &results.by_target[t][p];
            if result.count == 0 {
                continue;
            }
            let first_game = match result.first_game_id {
                Some(id) => {
                    let headers = database.query_headers(&[id])?;
                    let header = &headers[0];
                    serde_json::json!({
                        "id": id,
                        "white": header.white,
                        "black": header.black,
                        "event": header.event,
                        "date": header.date.to_string(),
                        "eco": header.eco.map(|e| e.to_string()),
                        "plies": header.ply_count,
                    })
                }
                None => serde_json::Value::Null,
            };
            rows.push(serde_json::json!({
                "level": level.to_string(),
                "result": outcome.to_string(),
                "count": result.count,
                "first_game": first_game,
            }));
        }
        positions.push(serde_json::json!({
            "fen": fen,
            "results": rows,
        }));
    }
    Ok(serde_json::json!({ "positions": positions }))
}

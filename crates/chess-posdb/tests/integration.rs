//! End-to-end database tests: import, reopen, query, corruption handling.

use chess_bcgn::{CompressionLevel, GameHeader, Writer};
use chess_board::{legal_moves, Position};
use chess_core::{GameLevel, Move, Outcome};
use chess_posdb::{Database, DatabaseError, ImportMode, ImportStats, ImportableFile};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

struct TestGame {
    white: String,
    outcome: Outcome,
    moves: Vec<Move>,
}

fn random_game(seed: u64, max_plies: usize, outcome: Outcome) -> TestGame {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut position = Position::startpos();
    let mut moves = Vec::new();
    for _ in 0..max_plies {
        let legal = legal_moves(&position);
        if legal.is_empty() {
            break;
        }
        let m = legal[rng.random_range(0..legal.len())];
        position.do_move(m);
        moves.push(m);
    }
    TestGame {
        white: format!("Player {seed}"),
        outcome,
        moves,
    }
}

fn write_bcgn(path: &Path, games: &[TestGame]) {
    let mut writer = Writer::create(path, CompressionLevel::Level1).unwrap();
    for game in games {
        writer
            .begin_game(&GameHeader {
                white: game.white.clone(),
                black: "Opponent".to_string(),
                event: "Test Event".to_string(),
                site: "Nowhere".to_string(),
                outcome: game.outcome,
                ..GameHeader::default()
            })
            .unwrap();
        let mut position = Position::startpos();
        for m in &game.moves {
            writer.add_move(&position, *m).unwrap();
            position.do_move(*m);
        }
        writer.end_game().unwrap();
    }
    writer.finish().unwrap();
}

/// Positions visited by a game, in order, starting position included.
fn positions_of(game: &TestGame) -> Vec<Position> {
    let mut position = Position::startpos();
    let mut positions = vec![position.clone()];
    for m in &game.moves {
        position.do_move(*m);
        positions.push(position.clone());
    }
    positions
}

const MEMORY: usize = 16 << 20;

#[test]
fn two_games_query_start_position() {
    let dir = tempfile::tempdir().unwrap();
    let bcgn = dir.path().join("games.bcgn");
    write_bcgn(
        &bcgn,
        &[
            random_game(1, 40, Outcome::WhiteWin),
            random_game(2, 40, Outcome::Draw),
        ],
    );

    let mut db = Database::create(dir.path().join("db")).unwrap();
    let stats = db
        .import(
            &[ImportableFile::new(&bcgn, GameLevel::Human)],
            MEMORY,
            ImportMode::Sequenced,
        )
        .unwrap();
    assert_eq!(stats.games, 2);
    assert_eq!(stats.skipped_games, 0);

    let targets = [
        (GameLevel::Human, Outcome::WhiteWin),
        (GameLevel::Human, Outcome::BlackWin),
        (GameLevel::Human, Outcome::Draw),
    ];
    let results = db.query(&targets, &[Position::startpos()]).unwrap();

    // The start position occurs once per game: one range under the white
    // win, one under the draw, nothing under losses.
    let win = &results.by_target[0][0];
    assert_eq!(win.ranges.len(), 1);
    assert_eq!(win.count, 1);
    assert_eq!(win.first_game_id, Some(0));

    let loss = &results.by_target[1][0];
    assert!(loss.ranges.is_empty());
    assert_eq!(loss.first_game_id, None);

    let draw = &results.by_target[2][0];
    assert_eq!(draw.ranges.len(), 1);
    assert_eq!(draw.first_game_id, Some(1));

    // Header resolution for the two first games.
    let headers = db.query_headers(&[0, 1]).unwrap();
    assert_eq!(headers[0].white, "Player 1");
    assert_eq!(headers[1].white, "Player 2");
}

#[test]
fn every_position_of_an_ingested_game_is_found() {
    let dir = tempfile::tempdir().unwrap();
    let bcgn = dir.path().join("games.bcgn");
    let games = vec![
        random_game(10, 80, Outcome::WhiteWin),
        random_game(11, 80, Outcome::BlackWin),
        random_game(12, 80, Outcome::Draw),
    ];
    write_bcgn(&bcgn, &games);

    let mut db = Database::create(dir.path().join("db")).unwrap();
    db.import(
        &[ImportableFile::new(&bcgn, GameLevel::Engine)],
        MEMORY,
        ImportMode::Sequenced,
    )
    .unwrap();

    for (game_id, game) in games.iter().enumerate() {
        let positions = positions_of(game);
        let results = db
            .query(&[(GameLevel::Engine, game.outcome)], &positions)
            .unwrap();
        for (i, result) in results.by_target[0].iter().enumerate() {
            assert!(
                result.count >= 1,
                "game {game_id} position {i} missing from index"
            );
            assert!(
                result.first_game_id.is_some_and(|id| id <= game_id as u32),
                "first game id must not exceed the containing game's id"
            );
        }
    }
}

#[test]
fn queries_answer_identically_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let bcgn = dir.path().join("games.bcgn");
    let games = vec![
        random_game(20, 60, Outcome::WhiteWin),
        random_game(21, 60, Outcome::Draw),
    ];
    write_bcgn(&bcgn, &games);

    let db_path = dir.path().join("db");
    let positions = positions_of(&games[0]);
    let targets = [(GameLevel::Server, Outcome::WhiteWin)];

    let before = {
        let mut db = Database::create(&db_path).unwrap();
        db.import(
            &[ImportableFile::new(&bcgn, GameLevel::Server)],
            MEMORY,
            ImportMode::Sequenced,
        )
        .unwrap();
        let results = db.query(&targets, &positions).unwrap();
        db.close();
        results
    };

    let db = Database::open(&db_path).unwrap();
    let after = db.query(&targets, &positions).unwrap();

    for (b, a) in before.by_target[0].iter().zip(&after.by_target[0]) {
        assert_eq!(b.ranges, a.ranges);
        assert_eq!(b.count, a.count);
        assert_eq!(b.first_game_id, a.first_game_id);
    }
}

#[test]
fn empty_import_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::create(dir.path().join("db")).unwrap();
    let stats = db.import(&[], MEMORY, ImportMode::Sequenced).unwrap();
    assert_eq!(stats, ImportStats::default());
    assert_eq!(db.game_count(), 0);
}

#[test]
fn unknown_results_are_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let bcgn = dir.path().join("games.bcgn");
    write_bcgn(
        &bcgn,
        &[
            random_game(30, 40, Outcome::Unknown),
            random_game(31, 40, Outcome::Draw),
        ],
    );

    let mut db = Database::create(dir.path().join("db")).unwrap();
    let stats = db
        .import(
            &[ImportableFile::new(&bcgn, GameLevel::Human)],
            MEMORY,
            ImportMode::Sequenced,
        )
        .unwrap();
    assert_eq!(stats.games, 1);
    assert_eq!(stats.skipped_games, 1);
    // The skipped game consumed no game id.
    assert_eq!(db.game_count(), 1);
}

#[test]
fn unreadable_file_skips_without_poisoning_the_import() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.bcgn");
    write_bcgn(&good, &[random_game(40, 40, Outcome::WhiteWin)]);

    let mut db = Database::create(dir.path().join("db")).unwrap();
    let stats = db
        .import(
            &[
                ImportableFile::new(dir.path().join("missing.bcgn"), GameLevel::Human),
                ImportableFile::new(&good, GameLevel::Human),
            ],
            MEMORY,
            ImportMode::Sequenced,
        )
        .unwrap();
    assert_eq!(stats.games, 1);
}

#[test]
fn tiny_memory_budget_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bcgn = dir.path().join("games.bcgn");
    write_bcgn(&bcgn, &[random_game(50, 20, Outcome::Draw)]);

    let mut db = Database::create(dir.path().join("db")).unwrap();
    let result = db.import(
        &[ImportableFile::new(&bcgn, GameLevel::Human)],
        64,
        ImportMode::Sequenced,
    );
    assert!(matches!(
        result,
        Err(DatabaseError::MemoryBudgetTooSmall(64))
    ));
}

#[test]
fn parallel_unsequenced_import_keeps_file_ids_ordered() {
    let dir = tempfile::tempdir().unwrap();

    let mut files = Vec::new();
    let mut seed = 100;
    for i in 0..10 {
        let path = dir.path().join(format!("batch{i}.bcgn"));
        let games: Vec<TestGame> = (0..5)
            .map(|_| {
                seed += 1;
                let outcome = match seed % 3 {
                    0 => Outcome::WhiteWin,
                    1 => Outcome::BlackWin,
                    _ => Outcome::Draw,
                };
                random_game(seed, 60, outcome)
            })
            .collect();
        write_bcgn(&path, &games);
        files.push(ImportableFile::new(&path, GameLevel::Human));
    }

    let db_path = dir.path().join("db");
    let mut db = Database::create(&db_path).unwrap();
    let stats = db
        .import(&files, MEMORY, ImportMode::ParallelUnsequenced)
        .unwrap();
    assert_eq!(stats.games, 50);

    // Every partition directory must hold strictly increasing, unique
    // file ids (gaps from unused reservations are fine).
    for level in ["human", "engine", "server"] {
        for result in ["w", "l", "d"] {
            for bucket in 0..4 {
                let partition_dir = db_path.join(level).join(result).join(bucket.to_string());
                let mut ids: Vec<u32> = std::fs::read_dir(&partition_dir)
                    .unwrap()
                    .filter_map(|e| e.unwrap().file_name().to_string_lossy().parse().ok())
                    .collect();
                let count = ids.len();
                ids.sort_unstable();
                ids.dedup();
                assert_eq!(ids.len(), count, "duplicate file id in {partition_dir:?}");
            }
        }
    }

    // The database must still answer queries correctly after reopening.
    drop(db);
    let db = Database::open(&db_path).unwrap();
    let targets = [
        (GameLevel::Human, Outcome::WhiteWin),
        (GameLevel::Human, Outcome::BlackWin),
        (GameLevel::Human, Outcome::Draw),
    ];
    let results = db.query(&targets, &[Position::startpos()]).unwrap();
    let total: u64 = results.by_target.iter().map(|t| t[0].count).sum();
    assert_eq!(total, 50, "start position occurs once per imported game");
}

#[test]
fn parallel_import_matches_sequenced_counts() {
    let dir = tempfile::tempdir().unwrap();

    let mut files = Vec::new();
    for (i, level) in [GameLevel::Human, GameLevel::Engine, GameLevel::Server]
        .iter()
        .enumerate()
    {
        let path = dir.path().join(format!("level{i}.bcgn"));
        write_bcgn(
            &path,
            &[
                random_game(200 + i as u64, 50, Outcome::WhiteWin),
                random_game(210 + i as u64, 50, Outcome::Draw),
            ],
        );
        files.push(ImportableFile::new(&path, *level));
    }

    let mut db = Database::create(dir.path().join("db")).unwrap();
    let stats = db.import(&files, MEMORY, ImportMode::Parallel).unwrap();
    assert_eq!(stats.games, 6);
    assert_eq!(db.game_count(), 6);

    // Each level sees exactly its own two games at the start position.
    for level in GameLevel::ALL {
        let results = db
            .query(
                &[(level, Outcome::WhiteWin), (level, Outcome::Draw)],
                &[Position::startpos()],
            )
            .unwrap();
        assert_eq!(results.by_target[0][0].count, 1);
        assert_eq!(results.by_target[1][0].count, 1);
    }
}

#[test]
fn absent_positions_yield_no_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let bcgn = dir.path().join("games.bcgn");
    let game = random_game(60, 60, Outcome::WhiteWin);
    write_bcgn(&bcgn, &[game]);

    let mut db = Database::create(dir.path().join("db")).unwrap();
    db.import(
        &[ImportableFile::new(&bcgn, GameLevel::Human)],
        MEMORY,
        ImportMode::Sequenced,
    )
    .unwrap();

    // Probe many positions from unrelated playouts; none besides early
    // transpositions of the indexed game may match, and every reported
    // match must decode to a real record range.
    let mut probes = Vec::new();
    for seed in 1000..1050 {
        let game = random_game(seed, 40, Outcome::Draw);
        probes.push(positions_of(&game).pop().unwrap());
    }

    let indexed: std::collections::HashSet<_> = positions_of(&random_game(60, 60, Outcome::WhiteWin))
        .iter()
        .map(|p| p.signature())
        .collect();

    let results = db
        .query(&[(GameLevel::Human, Outcome::WhiteWin)], &probes)
        .unwrap();
    for (probe, result) in probes.iter().zip(&results.by_target[0]) {
        if indexed.contains(&probe.signature()) {
            assert!(result.count >= 1);
        } else {
            assert_eq!(result.count, 0, "false positive for {}", probe.to_fen());
            assert!(result.ranges.is_empty());
        }
    }
}

#[test]
fn corrupt_partition_file_fails_open_with_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let bcgn = dir.path().join("games.bcgn");
    write_bcgn(&bcgn, &[random_game(70, 60, Outcome::WhiteWin)]);

    let db_path = dir.path().join("db");
    {
        let mut db = Database::create(&db_path).unwrap();
        db.import(
            &[ImportableFile::new(&bcgn, GameLevel::Human)],
            MEMORY,
            ImportMode::Sequenced,
        )
        .unwrap();
    }

    // Find some partition data file and truncate 8 bytes off its tail,
    // leaving a size that is not a multiple of the 20-byte record.
    let victim = walk_files(&db_path)
        .into_iter()
        .find(|p| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .parse::<u32>()
                .is_ok()
        })
        .expect("at least one partition file exists");
    let bytes = std::fs::read(&victim).unwrap();
    std::fs::write(&victim, &bytes[..bytes.len() - 8]).unwrap();

    match Database::open(&db_path) {
        Err(DatabaseError::CorruptFile { path, .. }) => assert_eq!(path, victim),
        Err(other) => panic!("expected corrupt-file error, got {other:?}"),
        Ok(_) => panic!("open must fail on a corrupt partition file"),
    }
}

fn walk_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}

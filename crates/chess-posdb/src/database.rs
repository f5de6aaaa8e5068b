//! The partitioned position database.
//!
//! Partition layout under the database root:
//!
//! ```text
//! <root>/header/header          game metadata log
//! <root>/header/index           game id -> log offset
//! <root>/<level>/<result>/<bucket>/<id>        sorted index entries
//! <root>/<level>/<result>/<bucket>/<id>_index  range-index sidecar
//! ```
//!
//! Levels are human/engine/server, results w/l/d, and each (level, result)
//! pair is split over four hash buckets keyed by the low 32 bits of the
//! position signature. Partition files are immutable once published; an
//! import only ever adds files with fresh ids.

use crate::headers::{HeaderEntry, HeaderStore};
use crate::pipeline::{StorePipeline, WriteCompletion};
use crate::store::{equal_range_multiple, ImmutableSpan, RangeIndex};
use crate::{DatabaseError, IndexEntry};
use chess_bcgn::{Reader, UnparsedGame};
use chess_board::{Position, PositionSignature};
use chess_core::{GameLevel, Outcome};
use std::ops::Range as IdRange;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Hash buckets per (level, result) partition; must be a power of two.
pub const NUM_BUCKETS: u32 = 4;

/// Total partition directories.
const NUM_PARTITIONS: usize = 3 * 3 * NUM_BUCKETS as usize;

/// Conservative decode lower bounds used to size file-id reservations.
const MIN_BYTES_PER_MOVE: u64 = 1;
const MIN_BYTES_PER_GAME: u64 = 23;

/// A query target: one (level, result) pair.
pub type QueryTarget = (GameLevel, Outcome);

/// One source file of an import and the level its games belong to.
#[derive(Debug, Clone)]
pub struct ImportableFile {
    pub path: PathBuf,
    pub level: GameLevel,
}

impl ImportableFile {
    pub fn new<P: Into<PathBuf>>(path: P, level: GameLevel) -> Self {
        ImportableFile {
            path: path.into(),
            level,
        }
    }
}

/// Import parallelism strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// One thread, one level at a time, one sort worker.
    Sequenced,
    /// One ingest task per non-empty level over a shared pipeline.
    Parallel,
    /// File-block parallelism with pre-reserved disjoint file-id ranges.
    ParallelUnsequenced,
}

/// Counters reported by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub games: u64,
    pub positions: u64,
    pub skipped_games: u64,
}

#[derive(Default)]
struct SharedStats {
    games: AtomicU64,
    positions: AtomicU64,
    skipped: AtomicU64,
}

impl SharedStats {
    fn snapshot(&self) -> ImportStats {
        ImportStats {
            games: self.games.load(Ordering::Relaxed),
            positions: self.positions.load(Ordering::Relaxed),
            skipped_games: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// A committed record range within one partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub file_id: u32,
    pub begin: u64,
    pub end: u64,
}

/// Everything the index knows about one queried position under one target.
#[derive(Debug, Clone, Default)]
pub struct PositionQueryResult {
    /// Matching record ranges, in partition-file id order.
    pub ranges: Vec<Range>,
    /// Total number of matching index entries.
    pub count: u64,
    /// Game id of the first record of the first non-empty range.
    pub first_game_id: Option<u32>,
}

/// Query results as a target-major matrix in caller input order.
#[derive(Debug, Clone)]
pub struct QueryResults {
    /// `by_target[t][p]` answers targets[t] for positions[p].
    pub by_target: Vec<Vec<PositionQueryResult>>,
}

struct PartitionFile {
    id: u32,
    span: ImmutableSpan<IndexEntry>,
    range_index: RangeIndex,
}

impl PartitionFile {
    fn open(dir: &Path, id: u32) -> Result<Self, DatabaseError> {
        let span = ImmutableSpan::open(&dir.join(id.to_string()))?;
        let range_index = RangeIndex::load(&dir.join(format!("{id}_index")))?;
        Ok(PartitionFile {
            id,
            span,
            range_index,
        })
    }
}

struct PendingFile {
    id: u32,
    completion: WriteCompletion,
}

/// One (level, result, bucket) directory of immutable sorted files.
struct Partition {
    dir: PathBuf,
    files: Vec<PartitionFile>,
    next_id: AtomicU32,
    pending: Mutex<Vec<PendingFile>>,
}

impl Partition {
    fn open(dir: PathBuf) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(&dir)?;

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let name = entry?.file_name();
            // Data files are bare numeric ids; everything else is a sidecar.
            if let Ok(id) = name.to_string_lossy().parse::<u32>() {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            files.push(PartitionFile::open(&dir, id)?);
        }

        let next_id = files.last().map(|f| f.id + 1).unwrap_or(0);
        Ok(Partition {
            dir,
            files,
            next_id: AtomicU32::new(next_id),
            pending: Mutex::new(Vec::new()),
        })
    }

    fn data_path(&self, id: u32) -> PathBuf {
        self.dir.join(id.to_string())
    }

    fn index_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{id}_index"))
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserves a disjoint id range for one file block.
    fn reserve_ids(&self, span: u32) -> IdRange<u32> {
        let base = self.next_id.fetch_add(span, Ordering::Relaxed);
        base..base + span
    }

    fn schedule(&self, pipeline: &StorePipeline, id: u32, buffer: Vec<IndexEntry>) {
        let completion =
            pipeline.schedule_unsorted(self.data_path(id), self.index_path(id), buffer);
        self.pending
            .lock()
            .expect("partition lock")
            .push(PendingFile { id, completion });
    }

    /// Moves every written future file into the committed file list.
    fn commit_pending(&mut self) -> Result<(), DatabaseError> {
        let pending = std::mem::take(self.pending.get_mut().expect("partition lock"));
        for PendingFile { id, completion } in pending {
            let range_index = completion.wait()?;
            let span = ImmutableSpan::open(&self.data_path(id))?;
            self.files.push(PartitionFile {
                id,
                span,
                range_index,
            });
        }
        self.files.sort_by_key(|f| f.id);
        Ok(())
    }
}

fn result_index(outcome: Outcome) -> usize {
    match outcome {
        Outcome::WhiteWin => 0,
        Outcome::BlackWin => 1,
        Outcome::Draw => 2,
        Outcome::Unknown => unreachable!("unknown results are never partitioned"),
    }
}

fn partition_index(level: GameLevel, outcome: Outcome, bucket: u32) -> usize {
    (level as usize * 3 + result_index(outcome)) * NUM_BUCKETS as usize + bucket as usize
}

/// Shared borrows every ingest task works against.
struct IngestCtx<'a> {
    partitions: &'a [Partition],
    headers: &'a HeaderStore,
    pipeline: &'a StorePipeline,
    stats: &'a SharedStats,
}

/// File-id allocation strategy of one ingest task.
enum IdAlloc {
    /// Take the partition's next id directly.
    Direct,
    /// Draw from this task's pre-reserved per-partition ranges.
    Reserved(Vec<IdRange<u32>>),
}

impl IdAlloc {
    fn allocate(&mut self, partition_idx: usize, ctx: &IngestCtx<'_>) -> u32 {
        match self {
            IdAlloc::Direct => ctx.partitions[partition_idx].allocate_id(),
            IdAlloc::Reserved(ranges) => ranges[partition_idx]
                .next()
                .expect("file id reservation is sized for the block"),
        }
    }
}

/// Per-task index-entry buffers, one per partition, filled to a fixed
/// capacity and then swapped against the pipeline's pool.
struct Buckets {
    capacity: usize,
    buffers: Vec<Vec<IndexEntry>>,
}

impl Buckets {
    fn new(capacity: usize) -> Self {
        Buckets {
            capacity,
            buffers: (0..NUM_PARTITIONS).map(|_| Vec::new()).collect(),
        }
    }

    fn push(
        &mut self,
        partition_idx: usize,
        entry: IndexEntry,
        ctx: &IngestCtx<'_>,
        ids: &mut IdAlloc,
    ) {
        let buffer = &mut self.buffers[partition_idx];
        if buffer.capacity() == 0 {
            buffer.reserve_exact(self.capacity);
        }
        buffer.push(entry);

        if buffer.len() >= self.capacity {
            let empty = ctx.pipeline.get_empty_buffer();
            let full = std::mem::replace(buffer, empty);
            let id = ids.allocate(partition_idx, ctx);
            ctx.partitions[partition_idx].schedule(ctx.pipeline, id, full);
        }
    }

    /// Hands every non-empty buffer to the pipeline. Final flushes give
    /// their buffers away instead of drawing replacements from the pool.
    fn flush_all(mut self, ctx: &IngestCtx<'_>, ids: &mut IdAlloc) {
        for (partition_idx, buffer) in self.buffers.iter_mut().enumerate() {
            if !buffer.is_empty() {
                let full = std::mem::take(buffer);
                let id = ids.allocate(partition_idx, ctx);
                ctx.partitions[partition_idx].schedule(ctx.pipeline, id, full);
            }
        }
    }
}

fn ingest_file(
    ctx: &IngestCtx<'_>,
    file: &ImportableFile,
    buckets: &mut Buckets,
    ids: &mut IdAlloc,
) -> Result<(), DatabaseError> {
    let mut reader = match Reader::open(&file.path) {
        Ok(reader) => reader,
        Err(error) => {
            tracing::warn!(path = %file.path.display(), %error, "skipping unreadable file");
            return Ok(());
        }
    };

    for game in reader.games() {
        let game = match game {
            Ok(game) => game,
            Err(error) => {
                tracing::debug!(path = %file.path.display(), %error, "skipping corrupt game");
                ctx.stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        ingest_game(ctx, file.level, &game, buckets, ids)?;
    }
    Ok(())
}

fn ingest_game(
    ctx: &IngestCtx<'_>,
    level: GameLevel,
    game: &UnparsedGame,
    buckets: &mut Buckets,
    ids: &mut IdAlloc,
) -> Result<(), DatabaseError> {
    let skip = || ctx.stats.skipped.fetch_add(1, Ordering::Relaxed);

    let outcome = game.outcome();
    if outcome == Outcome::Unknown || game.ply_count() == 0 {
        skip();
        return Ok(());
    }

    // Decode the whole game before touching the header store, so corrupt
    // games are skipped without leaving a dangling game id behind.
    let header = match parse_header(game) {
        Some(header) => header,
        None => {
            skip();
            return Ok(());
        }
    };
    let mut signatures = Vec::with_capacity(game.ply_count() as usize + 1);
    let replay = match game.replay() {
        Ok(replay) => replay,
        Err(_) => {
            skip();
            return Ok(());
        }
    };
    for position in replay {
        match position {
            Ok(position) => signatures.push(position.signature()),
            Err(_) => {
                skip();
                return Ok(());
            }
        }
    }

    // The id carried by every index entry is the one assigned here, under
    // the header store's global order.
    let game_id = ctx.headers.add_game(&header)?;

    for signature in &signatures {
        let bucket = signature.low32() % NUM_BUCKETS;
        let partition_idx = partition_index(level, outcome, bucket);
        buckets.push(partition_idx, IndexEntry::new(*signature, game_id), ctx, ids);
    }

    ctx.stats.games.fetch_add(1, Ordering::Relaxed);
    ctx.stats
        .positions
        .fetch_add(signatures.len() as u64, Ordering::Relaxed);
    Ok(())
}

fn parse_header(game: &UnparsedGame) -> Option<HeaderEntry> {
    Some(HeaderEntry {
        date: game.date(),
        eco: game.eco(),
        ply_count: game.ply_count(),
        event: game.event().ok()?.to_string(),
        white: game.white().ok()?.to_string(),
        black: game.black().ok()?.to_string(),
    })
}

fn bucket_capacity(
    memory: usize,
    live_buckets: usize,
    pool_buffers: usize,
) -> Result<usize, DatabaseError> {
    let capacity = memory / (IndexEntry::SIZE * (live_buckets + pool_buffers));
    if capacity == 0 {
        return Err(DatabaseError::MemoryBudgetTooSmall(memory));
    }
    Ok(capacity)
}

/// A position-indexed game database rooted at one directory.
pub struct Database {
    root: PathBuf,
    headers: HeaderStore,
    partitions: Vec<Partition>,
}

impl Database {
    /// Creates the directory tree and opens the (empty) database.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(path.as_ref())?;
        Self::open_inner(path.as_ref())
    }

    /// Opens an existing database, validating every partition file and
    /// sidecar. A corrupt file fails the open with its path named.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(DatabaseError::NotFound(path.to_path_buf()));
        }
        Self::open_inner(path)
    }

    fn open_inner(root: &Path) -> Result<Self, DatabaseError> {
        let headers = HeaderStore::open(&root.join("header"))?;

        let mut partitions = Vec::with_capacity(NUM_PARTITIONS);
        for level in GameLevel::ALL {
            for outcome in Outcome::DECIDED {
                for bucket in 0..NUM_BUCKETS {
                    let dir = root
                        .join(level.dir_name())
                        .join(outcome.dir_name().expect("decided outcome"))
                        .join(bucket.to_string());
                    partitions.push(Partition::open(dir)?);
                }
            }
        }

        let files: usize = partitions.iter().map(|p| p.files.len()).sum();
        tracing::info!(
            root = %root.display(),
            games = headers.next_game_id(),
            partition_files = files,
            "opened database"
        );

        Ok(Database {
            root: root.to_path_buf(),
            headers,
            partitions,
        })
    }

    /// The database root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of games in the header store.
    pub fn game_count(&self) -> u32 {
        self.headers.next_game_id()
    }

    fn partition(&self, level: GameLevel, outcome: Outcome, bucket: u32) -> &Partition {
        &self.partitions[partition_index(level, outcome, bucket)]
    }

    /// Imports BCGN files, building index entries for every position of
    /// every decided game.
    ///
    /// `memory` bounds the total buffer bytes held by bucket buffers and
    /// the pipeline pool. Unreadable files are skipped with a warning;
    /// corrupt games are skipped and counted.
    pub fn import(
        &mut self,
        files: &[ImportableFile],
        memory: usize,
        mode: ImportMode,
    ) -> Result<ImportStats, DatabaseError> {
        if files.is_empty() {
            return Ok(ImportStats::default());
        }

        tracing::info!(files = files.len(), ?mode, memory, "import started");
        let stats = SharedStats::default();

        match mode {
            ImportMode::Sequenced => self.import_sequenced(files, memory, &stats)?,
            ImportMode::Parallel => self.import_parallel(files, memory, &stats)?,
            ImportMode::ParallelUnsequenced => self.import_unsequenced(files, memory, &stats)?,
        }

        for partition in &mut self.partitions {
            partition.commit_pending()?;
        }

        let result = stats.snapshot();
        tracing::info!(
            games = result.games,
            positions = result.positions,
            skipped = result.skipped_games,
            "import finished"
        );
        Ok(result)
    }

    fn import_sequenced(
        &self,
        files: &[ImportableFile],
        memory: usize,
        stats: &SharedStats,
    ) -> Result<(), DatabaseError> {
        // One level at a time keeps result x bucket buffers live at once.
        let live_buckets = 3 * NUM_BUCKETS as usize;
        let pool_buffers = 3;
        let capacity = bucket_capacity(memory, live_buckets, pool_buffers)?;
        let pipeline = StorePipeline::new(1, pool_buffers, capacity);
        let ctx = IngestCtx {
            partitions: &self.partitions,
            headers: &self.headers,
            pipeline: &pipeline,
            stats,
        };

        for level in GameLevel::ALL {
            let mut buckets = Buckets::new(capacity);
            let mut ids = IdAlloc::Direct;
            for file in files.iter().filter(|f| f.level == level) {
                ingest_file(&ctx, file, &mut buckets, &mut ids)?;
            }
            buckets.flush_all(&ctx, &mut ids);
        }

        pipeline.wait_for_completion()
    }

    fn import_parallel(
        &self,
        files: &[ImportableFile],
        memory: usize,
        stats: &SharedStats,
    ) -> Result<(), DatabaseError> {
        let mut by_level: Vec<(GameLevel, Vec<&ImportableFile>)> = Vec::new();
        for level in GameLevel::ALL {
            let level_files: Vec<&ImportableFile> =
                files.iter().filter(|f| f.level == level).collect();
            if !level_files.is_empty() {
                by_level.push((level, level_files));
            }
        }

        let live_buckets = 3 * NUM_BUCKETS as usize * by_level.len();
        let sort_workers = 3;
        let pool_buffers = sort_workers + 2;
        let capacity = bucket_capacity(memory, live_buckets, pool_buffers)?;
        let pipeline = StorePipeline::new(sort_workers, pool_buffers, capacity);
        let ctx = IngestCtx {
            partitions: &self.partitions,
            headers: &self.headers,
            pipeline: &pipeline,
            stats,
        };

        let mut errors = run_ingest_tasks(
            by_level
                .into_iter()
                .map(|(_, level_files)| (level_files, IdAlloc::Direct))
                .collect(),
            &ctx,
            capacity,
        );

        pipeline.wait_for_completion()?;
        match errors.pop() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn import_unsequenced(
        &self,
        files: &[ImportableFile],
        memory: usize,
        stats: &SharedStats,
    ) -> Result<(), DatabaseError> {
        let threads = num_cpus::get().max(2);
        let block_count = (threads / 2).clamp(1, files.len());
        let sort_workers = threads.saturating_sub(block_count + 1).max(1);

        // Nearly-equal-bytes blocks: repeatedly give the largest remaining
        // file to the lightest block.
        let mut sized: Vec<(&ImportableFile, u64)> = files
            .iter()
            .map(|f| {
                let bytes = std::fs::metadata(&f.path).map(|m| m.len()).unwrap_or(0);
                (f, bytes)
            })
            .collect();
        sized.sort_by_key(|(_, bytes)| std::cmp::Reverse(*bytes));
        let mut blocks: Vec<(Vec<&ImportableFile>, u64)> = vec![(Vec::new(), 0); block_count];
        for (file, bytes) in sized {
            let lightest = blocks
                .iter_mut()
                .min_by_key(|(_, total)| *total)
                .expect("at least one block");
            lightest.0.push(file);
            lightest.1 += bytes;
        }

        let live_buckets = NUM_PARTITIONS * block_count;
        let pool_buffers = sort_workers + 2;
        let capacity = bucket_capacity(memory, live_buckets, pool_buffers)?;
        let pipeline = StorePipeline::new(sort_workers, pool_buffers, capacity);
        let ctx = IngestCtx {
            partitions: &self.partitions,
            headers: &self.headers,
            pipeline: &pipeline,
            stats,
        };

        // Disjoint per-block file-id reservations, handed out in block
        // order so ids within a partition stay monotone across blocks.
        // The bound is deliberately loose: a block can never produce more
        // index entries than it has movetext bytes plus games.
        let tasks: Vec<(Vec<&ImportableFile>, IdAlloc)> = blocks
            .into_iter()
            .filter(|(block_files, _)| !block_files.is_empty())
            .map(|(block_files, bytes)| {
                let max_entries =
                    bytes / MIN_BYTES_PER_MOVE + bytes / MIN_BYTES_PER_GAME + 1;
                let id_span = (max_entries / capacity as u64 + 1).min(u32::MAX as u64) as u32;
                let reservations = (0..NUM_PARTITIONS)
                    .map(|idx| self.partitions[idx].reserve_ids(id_span))
                    .collect();
                (block_files, IdAlloc::Reserved(reservations))
            })
            .collect();

        let mut errors = run_ingest_tasks(tasks, &ctx, capacity);

        pipeline.wait_for_completion()?;
        match errors.pop() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Resolves record ranges for every (target, position) combination.
    ///
    /// Query positions are swept in signature order against each file of
    /// each target partition in file-id order; results come back in the
    /// caller's input order.
    pub fn query(
        &self,
        targets: &[QueryTarget],
        positions: &[Position],
    ) -> Result<QueryResults, DatabaseError> {
        let mut keyed: Vec<(PositionSignature, usize)> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| (p.signature(), i))
            .collect();
        keyed.sort();

        // A signature can only live in its own hash bucket.
        let mut bucket_keys: Vec<Vec<PositionSignature>> =
            (0..NUM_BUCKETS).map(|_| Vec::new()).collect();
        let mut bucket_origins: Vec<Vec<usize>> =
            (0..NUM_BUCKETS).map(|_| Vec::new()).collect();
        for (signature, origin) in keyed {
            let bucket = (signature.low32() % NUM_BUCKETS) as usize;
            bucket_keys[bucket].push(signature);
            bucket_origins[bucket].push(origin);
        }

        let mut by_target = Vec::with_capacity(targets.len());
        for &(level, outcome) in targets {
            let mut per_position = vec![PositionQueryResult::default(); positions.len()];

            if outcome != Outcome::Unknown {
                for bucket in 0..NUM_BUCKETS {
                    let keys = &bucket_keys[bucket as usize];
                    if keys.is_empty() {
                        continue;
                    }
                    let partition = self.partition(level, outcome, bucket);
                    for file in &partition.files {
                        let ranges = equal_range_multiple(&file.span, &file.range_index, keys);
                        for (k, &(begin, end)) in ranges.iter().enumerate() {
                            if end > begin {
                                let result =
                                    &mut per_position[bucket_origins[bucket as usize][k]];
                                if result.first_game_id.is_none() {
                                    result.first_game_id =
                                        Some(file.span.get(begin).game_id());
                                }
                                result.count += end - begin;
                                result.ranges.push(Range {
                                    file_id: file.id,
                                    begin,
                                    end,
                                });
                            }
                        }
                    }
                }
            }

            by_target.push(per_position);
        }

        Ok(QueryResults { by_target })
    }

    /// Fetches header records for the given game ids.
    pub fn query_headers(&self, game_ids: &[u32]) -> Result<Vec<HeaderEntry>, DatabaseError> {
        self.headers.query(game_ids)
    }

    /// Closes the database. Dropping has the same effect.
    pub fn close(self) {}
}

/// Runs one scoped ingest thread per task and collects their failures.
fn run_ingest_tasks(
    tasks: Vec<(Vec<&ImportableFile>, IdAlloc)>,
    ctx: &IngestCtx<'_>,
    capacity: usize,
) -> Vec<DatabaseError> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|(task_files, mut ids)| {
                scope.spawn(move || -> Result<(), DatabaseError> {
                    let mut buckets = Buckets::new(capacity);
                    for file in task_files {
                        ingest_file(ctx, file, &mut buckets, &mut ids)?;
                    }
                    buckets.flush_all(ctx, &mut ids);
                    Ok(())
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| match handle.join() {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error),
                Err(_) => Some(DatabaseError::WorkerFailed(
                    "an ingest task panicked".to_string(),
                )),
            })
            .collect()
    })
}

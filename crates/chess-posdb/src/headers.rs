//! The append-only game header store.
//!
//! Two files under `header/`: a densely packed log of variable-length
//! metadata records and a fixed-width index of u64 byte offsets into it.
//! The index position of a record is the game id, so ids are dense and
//! allocation is just "append and return the old count". One mutex covers
//! both files; a record and its offset commit together.
//!
//! Record layout (little-endian): u16 size of the bytes that follow,
//! u16 year, u8 month, u8 day, 3 ASCII bytes of ECO (zeroes when absent),
//! u16 ply count, then event, white, and black as (u8 length, bytes)
//! strings.

use crate::DatabaseError;
use chess_core::{Date, Eco};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

/// Upper bound on a serialized record; fits three maximal strings.
const MAX_RECORD: usize = 2 + 2 + 1 + 1 + 3 + 2 + 3 * 256;

/// Decoded game metadata, both the input to [`HeaderStore::add_game`] and
/// the output of [`HeaderStore::query`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderEntry {
    pub date: Date,
    pub eco: Option<Eco>,
    pub ply_count: u16,
    pub event: String,
    pub white: String,
    pub black: String,
}

struct HeaderFiles {
    log: File,
    index: File,
    log_len: u64,
    count: u32,
}

/// The global game metadata store of a database.
pub struct HeaderStore {
    inner: Mutex<HeaderFiles>,
}

impl HeaderStore {
    const LOG_NAME: &'static str = "header";
    const INDEX_NAME: &'static str = "index";

    /// Opens (or creates) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(dir)?;
        let log = Self::open_file(&dir.join(Self::LOG_NAME))?;
        let index = Self::open_file(&dir.join(Self::INDEX_NAME))?;

        let index_len = index.metadata()?.len();
        if index_len % 8 != 0 {
            return Err(DatabaseError::CorruptFile {
                path: dir.join(Self::INDEX_NAME),
                reason: format!("index size {index_len} is not a multiple of 8"),
            });
        }
        let log_len = log.metadata()?.len();

        Ok(HeaderStore {
            inner: Mutex::new(HeaderFiles {
                log,
                index,
                log_len,
                count: (index_len / 8) as u32,
            }),
        })
    }

    fn open_file(path: &Path) -> Result<File, DatabaseError> {
        Ok(OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?)
    }

    /// Appends a game record and returns its dense game id.
    ///
    /// Atomic with respect to concurrent callers: the record bytes and the
    /// offset index entry commit under one lock.
    pub fn add_game(&self, entry: &HeaderEntry) -> Result<u32, DatabaseError> {
        let record = encode_record(entry)?;

        let mut files = self.inner.lock().expect("header store lock");
        let game_id = files.count;
        let offset = files.log_len;

        files.log.write_all(&record)?;
        files.index.write_all(&offset.to_le_bytes())?;
        files.log_len += record.len() as u64;
        files.count += 1;

        Ok(game_id)
    }

    /// Fetches the records for the given game ids.
    pub fn query(&self, game_ids: &[u32]) -> Result<Vec<HeaderEntry>, DatabaseError> {
        let mut files = self.inner.lock().expect("header store lock");
        let mut entries = Vec::with_capacity(game_ids.len());

        for &game_id in game_ids {
            if game_id >= files.count {
                return Err(DatabaseError::GameIdOutOfRange(game_id));
            }

            let mut offset_bytes = [0u8; 8];
            files.index.seek(SeekFrom::Start(game_id as u64 * 8))?;
            files.index.read_exact(&mut offset_bytes)?;
            let offset = u64::from_le_bytes(offset_bytes);

            let mut size_bytes = [0u8; 2];
            files.log.seek(SeekFrom::Start(offset))?;
            files.log.read_exact(&mut size_bytes)?;
            let size = u16::from_le_bytes(size_bytes) as usize;

            let mut record = vec![0u8; size];
            files.log.read_exact(&mut record)?;
            entries.push(
                decode_record(&record).ok_or(DatabaseError::CorruptHeader(game_id))?,
            );
        }

        Ok(entries)
    }

    /// The id the next added game will receive.
    pub fn next_game_id(&self) -> u32 {
        self.inner.lock().expect("header store lock").count
    }
}

fn push_string(out: &mut Vec<u8>, s: &str) -> Result<(), DatabaseError> {
    if s.len() > u8::MAX as usize {
        return Err(DatabaseError::StringTooLong(s.len()));
    }
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_record(entry: &HeaderEntry) -> Result<Vec<u8>, DatabaseError> {
    let mut out = Vec::with_capacity(MAX_RECORD);
    out.extend_from_slice(&[0, 0]); // size, backpatched below
    out.extend_from_slice(&entry.date.year().to_le_bytes());
    out.push(entry.date.month());
    out.push(entry.date.day());
    out.extend_from_slice(&entry.eco.map(Eco::to_ascii).unwrap_or([0; 3]));
    out.extend_from_slice(&entry.ply_count.to_le_bytes());
    push_string(&mut out, &entry.event)?;
    push_string(&mut out, &entry.white)?;
    push_string(&mut out, &entry.black)?;

    let size = (out.len() - 2) as u16;
    out[..2].copy_from_slice(&size.to_le_bytes());
    Ok(out)
}

fn read_string(bytes: &[u8], offset: &mut usize) -> Option<String> {
    let len = *bytes.get(*offset)? as usize;
    let start = *offset + 1;
    let end = start + len;
    let s = std::str::from_utf8(bytes.get(start..end)?).ok()?;
    *offset = end;
    Some(s.to_string())
}

/// Decodes the bytes following the size field.
fn decode_record(bytes: &[u8]) -> Option<HeaderEntry> {
    if bytes.len() < 9 {
        return None;
    }
    let year = u16::from_le_bytes([bytes[0], bytes[1]]);
    let date = Date::new(year, bytes[2], bytes[3])?;
    let eco = Eco::from_ascii([bytes[4], bytes[5], bytes[6]]);
    let ply_count = u16::from_le_bytes([bytes[7], bytes[8]]);

    let mut offset = 9;
    let event = read_string(bytes, &mut offset)?;
    let white = read_string(bytes, &mut offset)?;
    let black = read_string(bytes, &mut offset)?;

    Some(HeaderEntry {
        date,
        eco,
        ply_count,
        event,
        white,
        black,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: u32) -> HeaderEntry {
        HeaderEntry {
            date: Date::new(1997, 5, 11).unwrap(),
            eco: Eco::from_str_code("C45"),
            ply_count: 91,
            event: format!("Event {n}"),
            white: "Deep Blue".to_string(),
            black: "Kasparov, Garry".to_string(),
        }
    }

    #[test]
    fn ids_are_dense_and_records_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path()).unwrap();

        assert_eq!(store.next_game_id(), 0);
        for n in 0..50 {
            assert_eq!(store.add_game(&sample(n)).unwrap(), n);
        }
        assert_eq!(store.next_game_id(), 50);

        let entries = store.query(&[0, 17, 49]).unwrap();
        assert_eq!(entries[0], sample(0));
        assert_eq!(entries[1], sample(17));
        assert_eq!(entries[2], sample(49));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HeaderStore::open(dir.path()).unwrap();
            store.add_game(&sample(0)).unwrap();
            store.add_game(&sample(1)).unwrap();
        }
        let store = HeaderStore::open(dir.path()).unwrap();
        assert_eq!(store.next_game_id(), 2);
        assert_eq!(store.query(&[1]).unwrap()[0], sample(1));
    }

    #[test]
    fn unknown_metadata_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path()).unwrap();
        let entry = HeaderEntry {
            ply_count: 2,
            ..HeaderEntry::default()
        };
        let id = store.add_game(&entry).unwrap();
        assert_eq!(store.query(&[id]).unwrap()[0], entry);
    }

    #[test]
    fn out_of_range_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.query(&[0]),
            Err(DatabaseError::GameIdOutOfRange(0))
        ));
    }

    #[test]
    fn oversized_string_is_rejected_before_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path()).unwrap();
        let entry = HeaderEntry {
            white: "x".repeat(300),
            ..HeaderEntry::default()
        };
        assert!(matches!(
            store.add_game(&entry),
            Err(DatabaseError::StringTooLong(300))
        ));
        assert_eq!(store.next_game_id(), 0);
    }

    #[test]
    fn ragged_index_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HeaderStore::open(dir.path()).unwrap();
            store.add_game(&sample(0)).unwrap();
        }
        // Corrupt the offset index with a partial record.
        let index_path = dir.path().join("index");
        let mut bytes = std::fs::read(&index_path).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&index_path, bytes).unwrap();

        assert!(matches!(
            HeaderStore::open(dir.path()),
            Err(DatabaseError::CorruptFile { .. })
        ));
    }

    #[test]
    fn concurrent_adds_produce_unique_dense_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::open(dir.path()).unwrap();

        let mut ids: Vec<u32> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = &store;
                    scope.spawn(move || {
                        (0..25)
                            .map(|n| store.add_game(&sample(t * 100 + n)).unwrap())
                            .collect::<Vec<u32>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        ids.sort_unstable();
        assert_eq!(ids, (0..100).collect::<Vec<u32>>());
        assert_eq!(store.next_game_id(), 100);
    }
}

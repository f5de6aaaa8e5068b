//! Read-only random access over a file of fixed-size records.

use crate::DatabaseError;
use memmap2::Mmap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;

/// A record type with a fixed wire size.
pub trait FixedRecord: Sized {
    /// Record size in bytes.
    const SIZE: usize;

    /// Decodes one record. `bytes` is exactly `SIZE` long.
    fn from_record_bytes(bytes: &[u8]) -> Self;
}

/// A read-only, random-access view over a sorted file of fixed-size
/// records, backed by a memory map.
///
/// Opening fails when the file size is not a whole multiple of the record
/// size; a partition file that fails this check is corrupt and the
/// database refuses to come up on it.
pub struct ImmutableSpan<T> {
    map: Option<Mmap>,
    len: u64,
    _marker: PhantomData<T>,
}

impl<T: FixedRecord> ImmutableSpan<T> {
    /// Maps the file at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let file = File::open(path)?;
        let bytes = file.metadata()?.len();

        if bytes % T::SIZE as u64 != 0 {
            return Err(DatabaseError::CorruptFile {
                path: path.to_path_buf(),
                reason: format!(
                    "file size {bytes} is not a multiple of the {}-byte record",
                    T::SIZE
                ),
            });
        }

        // Zero-length files cannot be mapped; an empty span needs no map.
        let map = if bytes == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(ImmutableSpan {
            map,
            len: bytes / T::SIZE as u64,
            _marker: PhantomData,
        })
    }

    /// Number of records in the file.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the record at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn get(&self, index: u64) -> T {
        assert!(index < self.len, "record index out of bounds");
        let map = self.map.as_ref().expect("non-empty span is mapped");
        let start = index as usize * T::SIZE;
        T::from_record_bytes(&map[start..start + T::SIZE])
    }

    /// Iterates all records in file order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

//! Streaming BCGN reader.

use crate::game::UnparsedGame;
use crate::header::{CompressionLevel, FileHeader, HEADER_SIZE};
use crate::BcgnError;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Streaming reader over the games of a BCGN file.
pub struct Reader {
    reader: BufReader<File>,
    header: FileHeader,
}

impl Reader {
    /// Opens a BCGN file and validates its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BcgnError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes)?;
        let header = FileHeader::parse(&bytes)?;
        Ok(Reader { reader, header })
    }

    /// The movetext compression level of this file.
    pub fn compression(&self) -> CompressionLevel {
        self.header.compression
    }

    /// Iterates the games in file order.
    pub fn games(&mut self) -> GameIter<'_> {
        GameIter { reader: self }
    }
}

/// Iterator over raw game entries.
pub struct GameIter<'a> {
    reader: &'a mut Reader,
}

impl Iterator for GameIter<'_> {
    type Item = Result<UnparsedGame, BcgnError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Peek the entry size; a clean EOF here means the file is done.
        let mut len_bytes = [0u8; 2];
        match self.reader.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }

        let total = u16::from_be_bytes(len_bytes) as usize;
        if total < 4 {
            return Some(Err(BcgnError::Malformed("entry length too small")));
        }

        let mut bytes = vec![0u8; total];
        bytes[..2].copy_from_slice(&len_bytes);
        if let Err(e) = self.reader.reader.read_exact(&mut bytes[2..]) {
            return Some(Err(match e.kind() {
                ErrorKind::UnexpectedEof => BcgnError::Truncated,
                _ => e.into(),
            }));
        }

        Some(UnparsedGame::new(bytes, self.reader.header.compression))
    }
}

//! Double-buffered BCGN writer.
//!
//! Games are encoded into a scratch entry, appended to the front buffer on
//! `end_game`, and the front buffer is handed to a background thread for
//! writing whenever fewer bytes remain than the largest possible entry.
//! While the background thread drains one buffer the caller keeps filling
//! the other; the join handle doubles as the completion future.

use crate::game::{GameHeader, MAX_GAME_LENGTH, MAX_PLIES};
use crate::header::{CompressionLevel, FileHeader, HEADER_SIZE};
use crate::moveindex::{move_to_index, requires_long_move_index};
use crate::BcgnError;
use chess_board::Position;
use chess_core::Move;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::thread::JoinHandle;

const BUFFER_CAPACITY: usize = 1 << 20;

/// Streaming writer for a BCGN file.
pub struct Writer {
    file: Option<File>,
    front: Vec<u8>,
    spare: Option<Vec<u8>>,
    pending: Option<JoinHandle<std::io::Result<(File, Vec<u8>)>>>,
    compression: CompressionLevel,
    game: Option<PendingGame>,
}

struct PendingGame {
    entry: Vec<u8>,
    header_len: usize,
    plies: u32,
}

impl Writer {
    /// Creates a new file and writes the 32-byte file header.
    pub fn create<P: AsRef<Path>>(
        path: P,
        compression: CompressionLevel,
    ) -> Result<Self, BcgnError> {
        let mut file = File::create(path)?;
        file.write_all(&FileHeader::new(compression).to_bytes())?;
        Ok(Self::with_file(file, compression))
    }

    /// Opens a file for appending.
    ///
    /// When the file already exists and is non-empty its header is
    /// validated instead of rewritten; its compression level must match.
    pub fn append<P: AsRef<Path>>(
        path: P,
        compression: CompressionLevel,
    ) -> Result<Self, BcgnError> {
        let path = path.as_ref();
        let existing = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if existing == 0 {
            return Self::create(path, compression);
        }

        let mut probe = File::open(path)?;
        let mut bytes = [0u8; HEADER_SIZE];
        probe.read_exact(&mut bytes)?;
        let header = FileHeader::parse(&bytes)?;
        if header.compression != compression {
            return Err(BcgnError::UnsupportedCompression(header.compression as u8));
        }

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self::with_file(file, compression))
    }

    fn with_file(file: File, compression: CompressionLevel) -> Self {
        Writer {
            file: Some(file),
            front: Vec::with_capacity(BUFFER_CAPACITY),
            spare: None,
            pending: None,
            compression,
            game: None,
        }
    }

    /// Starts a new game entry from its metadata.
    pub fn begin_game(&mut self, header: &GameHeader) -> Result<(), BcgnError> {
        if self.game.is_some() {
            return Err(BcgnError::Malformed("previous game was not ended"));
        }
        let entry = header.encode()?;
        self.game = Some(PendingGame {
            header_len: entry.len(),
            entry,
            plies: 0,
        });
        Ok(())
    }

    /// Appends one move to the current game.
    ///
    /// `position` must be the position the move is played from; level-1
    /// encoding is defined relative to it.
    pub fn add_move(&mut self, position: &Position, m: Move) -> Result<(), BcgnError> {
        let game = self
            .game
            .as_mut()
            .ok_or(BcgnError::Malformed("no game in progress"))?;
        if game.plies >= MAX_PLIES {
            return Err(BcgnError::TooManyPlies(game.plies + 1));
        }

        match self.compression {
            CompressionLevel::Level0 => {
                game.entry.extend_from_slice(&m.to_bits().to_be_bytes());
            }
            CompressionLevel::Level1 => {
                let index = move_to_index(position, m);
                if requires_long_move_index(position) {
                    game.entry.extend_from_slice(&index.to_be_bytes());
                } else {
                    game.entry.push(index as u8);
                }
            }
        }

        game.plies += 1;
        Ok(())
    }

    /// Finalizes the current game and commits it to the output buffer.
    ///
    /// Zero-ply games and games whose entry exceeds 65535 bytes are
    /// rejected; the entry is discarded and nothing reaches the file.
    pub fn end_game(&mut self) -> Result<(), BcgnError> {
        let mut game = self
            .game
            .take()
            .ok_or(BcgnError::Malformed("no game in progress"))?;
        if game.plies == 0 {
            return Err(BcgnError::EmptyGame);
        }
        if game.entry.len() > MAX_GAME_LENGTH {
            return Err(BcgnError::GameTooLong);
        }

        let total = game.entry.len() as u16;
        let header_len = game.header_len as u16;
        let outcome_bits = (game.entry[5] & 0b11) as u16;
        let combined = ((game.plies as u16) << 2) | outcome_bits;
        game.entry[0..2].copy_from_slice(&total.to_be_bytes());
        game.entry[2..4].copy_from_slice(&header_len.to_be_bytes());
        game.entry[4..6].copy_from_slice(&combined.to_be_bytes());

        self.front.extend_from_slice(&game.entry);

        if BUFFER_CAPACITY.saturating_sub(self.front.len()) < MAX_GAME_LENGTH {
            self.swap_buffers()?;
        }
        Ok(())
    }

    fn join_pending(&mut self) -> Result<(), BcgnError> {
        if let Some(handle) = self.pending.take() {
            let (file, mut buffer) = handle
                .join()
                .map_err(|_| std::io::Error::other("background writer panicked"))??;
            buffer.clear();
            self.spare = Some(buffer);
            self.file = Some(file);
        }
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), BcgnError> {
        self.join_pending()?;
        let mut file = self.file.take().expect("file is present after join");
        let back = self
            .spare
            .take()
            .unwrap_or_else(|| Vec::with_capacity(BUFFER_CAPACITY));
        let full = std::mem::replace(&mut self.front, back);
        self.pending = Some(std::thread::spawn(move || {
            file.write_all(&full)?;
            Ok((file, full))
        }));
        Ok(())
    }

    /// Flushes all buffered games and closes the writer.
    pub fn finish(mut self) -> Result<(), BcgnError> {
        self.flush_all()
    }

    fn flush_all(&mut self) -> Result<(), BcgnError> {
        self.join_pending()?;
        if let Some(file) = self.file.as_mut() {
            if !self.front.is_empty() {
                file.write_all(&self.front)?;
                self.front.clear();
            }
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

//! Game entries: the writer-side header and the reader-side lazy view.
//!
//! Entry layout (all multibyte fields big-endian):
//!
//! ```text
//! 0..2    total_length (bytes, including both length fields)
//! 2..4    header_length (bytes from entry start through end of header)
//! 4..6    ply count (14 high bits) | result (2 low bits)
//! 6..10   date (year u16, month u8, day u8)
//! 10..12  white elo
//! 12..14  black elo
//! 14..16  round
//! 16..18  eco (category letter, index)
//! 18      flags (bit 0: additional tags, bit 1: custom start position)
//! 19..    optional 24-byte compressed start position
//! ...     strings: white, black, event, site (u8 length prefix each)
//! ...     optional tags: count u8, then (name, value) string pairs
//! ...     movetext, total_length - header_length bytes
//! ```

use crate::header::CompressionLevel;
use crate::moveindex::{index_to_move, requires_long_move_index};
use crate::BcgnError;
use chess_board::{CompressedPosition, Position};
use chess_core::{Date, Eco, Move, Outcome};

/// Offset of the fixed-width prefix end / flags byte + 1.
pub(crate) const FIXED_PREFIX: usize = 19;

/// Largest possible entry; used by the writer to size buffer headroom.
pub(crate) const MAX_GAME_LENGTH: usize = u16::MAX as usize;

/// Highest ply count the 14-bit field can carry.
pub(crate) const MAX_PLIES: u32 = (1 << 14) - 1;

pub(crate) const FLAG_TAGS: u8 = 0b01;
pub(crate) const FLAG_CUSTOM_START: u8 = 0b10;

/// Metadata for a game about to be written.
#[derive(Debug, Clone, Default)]
pub struct GameHeader {
    pub white: String,
    pub black: String,
    pub event: String,
    pub site: String,
    pub date: Date,
    pub eco: Option<Eco>,
    pub round: u16,
    pub white_elo: u16,
    pub black_elo: u16,
    pub outcome: Outcome,
    pub start_position: Option<CompressedPosition>,
    pub tags: Vec<(String, String)>,
}

fn push_string(out: &mut Vec<u8>, s: &str) -> Result<(), BcgnError> {
    if s.len() > u8::MAX as usize {
        return Err(BcgnError::StringTooLong(s.len()));
    }
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

impl GameHeader {
    /// Serializes the header portion of an entry.
    ///
    /// The two length fields and the ply count are left zero; the writer
    /// backpatches them when the game ends.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, BcgnError> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&[0; 4]); // total_length, header_length
        out.extend_from_slice(&(self.outcome.to_bits() as u16).to_be_bytes());
        out.extend_from_slice(&self.date.to_be_bytes());
        out.extend_from_slice(&self.white_elo.to_be_bytes());
        out.extend_from_slice(&self.black_elo.to_be_bytes());
        out.extend_from_slice(&self.round.to_be_bytes());
        out.extend_from_slice(&self.eco.map(Eco::to_bytes).unwrap_or([0, 0]));

        let mut flags = 0u8;
        if !self.tags.is_empty() {
            flags |= FLAG_TAGS;
        }
        if self.start_position.is_some() {
            flags |= FLAG_CUSTOM_START;
        }
        out.push(flags);

        if let Some(start) = &self.start_position {
            out.extend_from_slice(start.as_bytes());
        }

        push_string(&mut out, &self.white)?;
        push_string(&mut out, &self.black)?;
        push_string(&mut out, &self.event)?;
        push_string(&mut out, &self.site)?;

        if !self.tags.is_empty() {
            if self.tags.len() > u8::MAX as usize {
                return Err(BcgnError::Malformed("too many tags"));
            }
            out.push(self.tags.len() as u8);
            for (name, value) in &self.tags {
                push_string(&mut out, name)?;
                push_string(&mut out, value)?;
            }
        }

        Ok(out)
    }
}

/// A raw game entry, parsed on demand.
///
/// The reader hands these out without touching anything past the length
/// fields; each accessor decodes just the field it needs.
#[derive(Debug, Clone)]
pub struct UnparsedGame {
    bytes: Vec<u8>,
    compression: CompressionLevel,
}

impl UnparsedGame {
    pub(crate) fn new(
        bytes: Vec<u8>,
        compression: CompressionLevel,
    ) -> Result<Self, BcgnError> {
        if bytes.len() < FIXED_PREFIX {
            return Err(BcgnError::Truncated);
        }
        let total = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let header = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if total != bytes.len() {
            return Err(BcgnError::Malformed("total length disagrees with entry"));
        }
        if header < FIXED_PREFIX || header > total {
            return Err(BcgnError::Malformed("header length out of range"));
        }
        Ok(UnparsedGame { bytes, compression })
    }

    fn header_length(&self) -> usize {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]]) as usize
    }

    /// Number of plies in the movetext.
    pub fn ply_count(&self) -> u16 {
        u16::from_be_bytes([self.bytes[4], self.bytes[5]]) >> 2
    }

    /// The game result.
    pub fn outcome(&self) -> Outcome {
        Outcome::from_bits(self.bytes[5])
    }

    /// The game date.
    pub fn date(&self) -> Date {
        Date::from_be_bytes([
            self.bytes[6],
            self.bytes[7],
            self.bytes[8],
            self.bytes[9],
        ])
        .unwrap_or(Date::UNKNOWN)
    }

    pub fn white_elo(&self) -> u16 {
        u16::from_be_bytes([self.bytes[10], self.bytes[11]])
    }

    pub fn black_elo(&self) -> u16 {
        u16::from_be_bytes([self.bytes[12], self.bytes[13]])
    }

    pub fn round(&self) -> u16 {
        u16::from_be_bytes([self.bytes[14], self.bytes[15]])
    }

    /// The ECO code, if one was recorded.
    pub fn eco(&self) -> Option<Eco> {
        Eco::from_bytes([self.bytes[16], self.bytes[17]])
    }

    fn flags(&self) -> u8 {
        self.bytes[18]
    }

    /// True if the game starts from a custom position.
    pub fn has_custom_start(&self) -> bool {
        self.flags() & FLAG_CUSTOM_START != 0
    }

    fn strings_offset(&self) -> usize {
        if self.has_custom_start() {
            FIXED_PREFIX + CompressedPosition::SIZE
        } else {
            FIXED_PREFIX
        }
    }

    fn read_string(&self, offset: usize) -> Result<(&str, usize), BcgnError> {
        let header_end = self.header_length();
        if offset >= header_end {
            return Err(BcgnError::Truncated);
        }
        let len = self.bytes[offset] as usize;
        let end = offset + 1 + len;
        if end > header_end {
            return Err(BcgnError::Truncated);
        }
        let s = std::str::from_utf8(&self.bytes[offset + 1..end])
            .map_err(|_| BcgnError::Malformed("string is not valid UTF-8"))?;
        Ok((s, end))
    }

    fn nth_string(&self, n: usize) -> Result<&str, BcgnError> {
        let mut offset = self.strings_offset();
        for _ in 0..n {
            offset = self.read_string(offset)?.1;
        }
        Ok(self.read_string(offset)?.0)
    }

    pub fn white(&self) -> Result<&str, BcgnError> {
        self.nth_string(0)
    }

    pub fn black(&self) -> Result<&str, BcgnError> {
        self.nth_string(1)
    }

    pub fn event(&self) -> Result<&str, BcgnError> {
        self.nth_string(2)
    }

    pub fn site(&self) -> Result<&str, BcgnError> {
        self.nth_string(3)
    }

    /// Additional key/value tag pairs, empty when the flag is unset.
    pub fn tags(&self) -> Result<Vec<(&str, &str)>, BcgnError> {
        if self.flags() & FLAG_TAGS == 0 {
            return Ok(Vec::new());
        }
        let mut offset = self.strings_offset();
        for _ in 0..4 {
            offset = self.read_string(offset)?.1;
        }
        if offset >= self.header_length() {
            return Err(BcgnError::Truncated);
        }
        let count = self.bytes[offset] as usize;
        offset += 1;
        let mut tags = Vec::with_capacity(count);
        for _ in 0..count {
            let (name, next) = self.read_string(offset)?;
            let (value, next) = self.read_string(next)?;
            tags.push((name, value));
            offset = next;
        }
        Ok(tags)
    }

    /// The starting position: the custom one if present, else the
    /// standard start position.
    pub fn start_position(&self) -> Result<Position, BcgnError> {
        if !self.has_custom_start() {
            return Ok(Position::startpos());
        }
        let end = FIXED_PREFIX + CompressedPosition::SIZE;
        if end > self.header_length() {
            return Err(BcgnError::Truncated);
        }
        let bytes: [u8; 24] = self.bytes[FIXED_PREFIX..end]
            .try_into()
            .expect("slice length checked");
        CompressedPosition::from_bytes(bytes)
            .decompress()
            .ok_or(BcgnError::Malformed("invalid start position"))
    }

    /// The raw movetext bytes.
    pub fn movetext(&self) -> &[u8] {
        &self.bytes[self.header_length()..]
    }

    /// Iterates the positions of the game: the start position, then the
    /// position after each ply.
    pub fn replay(&self) -> Result<PositionReplay<'_>, BcgnError> {
        Ok(PositionReplay {
            movetext: self.movetext(),
            offset: 0,
            position: self.start_position()?,
            compression: self.compression,
            remaining_plies: self.ply_count(),
            yielded_start: false,
        })
    }
}

/// Iterator over the positions of a game, including the starting position.
pub struct PositionReplay<'a> {
    movetext: &'a [u8],
    offset: usize,
    position: Position,
    compression: CompressionLevel,
    remaining_plies: u16,
    yielded_start: bool,
}

impl PositionReplay<'_> {
    fn take_bytes(&mut self, n: usize) -> Result<&[u8], BcgnError> {
        if self.offset + n > self.movetext.len() {
            return Err(BcgnError::Truncated);
        }
        let bytes = &self.movetext[self.offset..self.offset + n];
        self.offset += n;
        Ok(bytes)
    }

    fn decode_move(&mut self) -> Result<Move, BcgnError> {
        match self.compression {
            CompressionLevel::Level0 => {
                let bytes = self.take_bytes(2)?;
                Ok(Move::from_bits(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            CompressionLevel::Level1 => {
                let index = if requires_long_move_index(&self.position) {
                    let bytes = self.take_bytes(2)?;
                    u16::from_be_bytes([bytes[0], bytes[1]])
                } else {
                    self.take_bytes(1)?[0] as u16
                };
                index_to_move(&self.position, index)
            }
        }
    }
}

impl Iterator for PositionReplay<'_> {
    type Item = Result<Position, BcgnError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.yielded_start {
            self.yielded_start = true;
            return Some(Ok(self.position.clone()));
        }
        if self.remaining_plies == 0 {
            return None;
        }
        match self.decode_move() {
            Ok(m) => {
                self.position.do_move(m);
                self.remaining_plies -= 1;
                Some(Ok(self.position.clone()))
            }
            Err(e) => {
                self.remaining_plies = 0;
                Some(Err(e))
            }
        }
    }
}

//! FEN (Forsyth-Edwards Notation) parsing and serialization.

use crate::{Color, Piece, Square};
use thiserror::Error;

/// Errors that can occur when parsing FEN strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FenError {
    #[error("invalid FEN: expected 4 to 6 fields, got {0}")]
    InvalidFieldCount(usize),

    #[error("invalid piece placement: {0}")]
    InvalidPiecePlacement(String),

    #[error("invalid side to move: expected 'w' or 'b', got '{0}'")]
    InvalidSideToMove(String),

    #[error("invalid castling rights: {0}")]
    InvalidCastlingRights(String),

    #[error("invalid en passant square: {0}")]
    InvalidEnPassantSquare(String),

    #[error("invalid move counter: {0}")]
    InvalidMoveCounter(String),
}

/// Castling availability parsed from the third FEN field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FenCastling {
    pub white_kingside: bool,
    pub white_queenside: bool,
    pub black_kingside: bool,
    pub black_queenside: bool,
}

/// A FEN string decomposed into typed fields.
///
/// The piece placement is delivered as (square, piece, color) triples; the
/// board crate folds them into its own representation. The halfmove clock
/// and fullmove number default to 0 and 1 when the FEN omits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fen {
    pub pieces: Vec<(Square, Piece, Color)>,
    pub side_to_move: Color,
    pub castling: FenCastling,
    pub en_passant: Option<Square>,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

impl Fen {
    /// The standard starting position.
    pub const STARTPOS: &'static str =
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    /// Parses a FEN string.
    pub fn parse(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 || fields.len() > 6 {
            return Err(FenError::InvalidFieldCount(fields.len()));
        }

        let pieces = Self::parse_placement(fields[0])?;

        let side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(FenError::InvalidSideToMove(other.to_string())),
        };

        let castling = Self::parse_castling(fields[2])?;
        let en_passant = Self::parse_en_passant(fields[3])?;

        let halfmove_clock = match fields.get(4) {
            Some(s) => s
                .parse::<u32>()
                .map_err(|_| FenError::InvalidMoveCounter(s.to_string()))?,
            None => 0,
        };
        let fullmove_number = match fields.get(5) {
            Some(s) => s
                .parse::<u32>()
                .map_err(|_| FenError::InvalidMoveCounter(s.to_string()))?,
            None => 1,
        };

        Ok(Fen {
            pieces,
            side_to_move,
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        })
    }

    fn parse_placement(placement: &str) -> Result<Vec<(Square, Piece, Color)>, FenError> {
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::InvalidPiecePlacement(format!(
                "expected 8 ranks, got {}",
                ranks.len()
            )));
        }

        let mut pieces = Vec::with_capacity(32);
        for (i, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - i as u8; // FEN lists rank 8 first
            let mut file = 0u8;
            for c in rank_str.chars() {
                if let Some(digit) = c.to_digit(10) {
                    if digit == 0 {
                        return Err(FenError::InvalidPiecePlacement(format!(
                            "invalid skip count in rank {}",
                            rank + 1
                        )));
                    }
                    file += digit as u8;
                } else if let Some((piece, color)) = Piece::from_fen_char(c) {
                    if file >= 8 {
                        return Err(FenError::InvalidPiecePlacement(format!(
                            "rank {} overflows 8 squares",
                            rank + 1
                        )));
                    }
                    // SAFETY: file and rank are both < 8 here.
                    let sq = unsafe { Square::from_index_unchecked(file + rank * 8) };
                    pieces.push((sq, piece, color));
                    file += 1;
                } else {
                    return Err(FenError::InvalidPiecePlacement(format!(
                        "invalid character '{}' in rank {}",
                        c,
                        rank + 1
                    )));
                }
            }
            if file != 8 {
                return Err(FenError::InvalidPiecePlacement(format!(
                    "rank {} has {} squares, expected 8",
                    rank + 1,
                    file
                )));
            }
        }
        Ok(pieces)
    }

    fn parse_castling(field: &str) -> Result<FenCastling, FenError> {
        let mut castling = FenCastling::default();
        if field == "-" {
            return Ok(castling);
        }
        for c in field.chars() {
            match c {
                'K' => castling.white_kingside = true,
                'Q' => castling.white_queenside = true,
                'k' => castling.black_kingside = true,
                'q' => castling.black_queenside = true,
                _ => {
                    return Err(FenError::InvalidCastlingRights(format!(
                        "invalid character '{}'",
                        c
                    )))
                }
            }
        }
        Ok(castling)
    }

    fn parse_en_passant(field: &str) -> Result<Option<Square>, FenError> {
        if field == "-" {
            return Ok(None);
        }
        let sq = Square::from_algebraic(field)
            .ok_or_else(|| FenError::InvalidEnPassantSquare(field.to_string()))?;
        if sq.rank() != crate::Rank::R3 && sq.rank() != crate::Rank::R6 {
            return Err(FenError::InvalidEnPassantSquare(field.to_string()));
        }
        Ok(Some(sq))
    }
}

//! Canonical position compression and fingerprinting.
//!
//! A position is packed into 24 bytes: the 64-bit occupancy followed by one
//! nibble per occupied square in ascending square order, low nibble of each
//! byte first. Nibble values 0-11 are colored pieces; 12-15 overload pieces
//! that carry extra state:
//!
//! - 12: the pawn that just double-pushed (the en passant subject)
//! - 13/14: a white/black rook standing on its home corner with the
//!   corresponding castling right still available
//! - 15: the black king when black is to move
//!
//! Two positions compress to the same bytes exactly when they agree on
//! board, side to move, castling rights, and en passant availability. The
//! 128-bit index key is a truncated SHA-256 of the compressed bytes.

use crate::{Bitboard, CastlingRights, Position};
use chess_core::{Color, Piece, Rank, Square};
use sha2::{Digest, Sha256};
use std::fmt;

const NIBBLE_EP_PAWN: u8 = 12;
const NIBBLE_WHITE_CASTLE_ROOK: u8 = 13;
const NIBBLE_BLACK_CASTLE_ROOK: u8 = 14;
const NIBBLE_BLACK_KING_TO_MOVE: u8 = 15;

/// A position packed into 24 canonical bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompressedPosition([u8; 24]);

impl CompressedPosition {
    /// Size of the packed form in bytes.
    pub const SIZE: usize = 24;

    /// Wraps raw bytes. No validation happens here; [`decompress`]
    /// (Self::decompress) rejects malformed contents.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 24]) -> Self {
        CompressedPosition(bytes)
    }

    /// Returns the packed bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 24] {
        &self.0
    }

    /// Unpacks the position, or None if the bytes are not a valid packing.
    ///
    /// The halfmove clock and fullmove number are not part of the packing
    /// and come back as 0 and 1.
    pub fn decompress(&self) -> Option<Position> {
        let occupancy = Bitboard::new(u64::from_be_bytes(
            self.0[..8].try_into().expect("8-byte slice"),
        ));
        if occupancy.count() > 32 {
            return None;
        }

        let mut position = Position::empty();
        let mut castling = 0u8;
        let mut side_to_move = Color::White;
        let mut ep_subject: Option<(Square, Color)> = None;

        for (i, sq) in occupancy.into_iter().enumerate() {
            let byte = self.0[8 + i / 2];
            let nibble = (byte >> ((i % 2) * 4)) & 0xF;

            let (piece, color) = match nibble {
                NIBBLE_EP_PAWN => {
                    let color = match sq.rank() {
                        Rank::R4 => Color::White,
                        Rank::R5 => Color::Black,
                        _ => return None,
                    };
                    ep_subject = Some((sq, color));
                    (Piece::Pawn, color)
                }
                NIBBLE_WHITE_CASTLE_ROOK => {
                    castling |= match sq {
                        Square::A1 => CastlingRights::WHITE_QUEENSIDE,
                        Square::H1 => CastlingRights::WHITE_KINGSIDE,
                        _ => return None,
                    };
                    (Piece::Rook, Color::White)
                }
                NIBBLE_BLACK_CASTLE_ROOK => {
                    castling |= match sq {
                        Square::A8 => CastlingRights::BLACK_QUEENSIDE,
                        Square::H8 => CastlingRights::BLACK_KINGSIDE,
                        _ => return None,
                    };
                    (Piece::Rook, Color::Black)
                }
                NIBBLE_BLACK_KING_TO_MOVE => {
                    side_to_move = Color::Black;
                    (Piece::King, Color::Black)
                }
                ordinal => Piece::from_colored_index(ordinal)?,
            };

            position.pieces[piece.index()].set(sq);
            position.colors[color.index()].set(sq);
        }

        if let Some((subject, pawn_color)) = ep_subject {
            // The subject pawn belongs to the side that just moved.
            if pawn_color.opposite() != side_to_move {
                return None;
            }
            let ep_rank = match pawn_color {
                Color::White => Rank::R3,
                Color::Black => Rank::R6,
            };
            position.en_passant = Some(Square::new(subject.file(), ep_rank));
        }

        position.side_to_move = side_to_move;
        position.castling = CastlingRights::new(castling);
        Some(position)
    }

    /// Returns the 128-bit index key for this packing.
    pub fn signature(&self) -> PositionSignature {
        let digest = Sha256::digest(self.0);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        PositionSignature(bytes)
    }
}

impl fmt::Debug for CompressedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompressedPosition(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// The 128-bit position fingerprint keyed on by the index.
///
/// Equality and ordering are byte-lexicographic, which coincides with the
/// numeric order of [`to_u128`](Self::to_u128).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionSignature([u8; 16]);

impl PositionSignature {
    /// Size of the signature in bytes.
    pub const SIZE: usize = 16;

    /// The smallest possible signature.
    pub const MIN: PositionSignature = PositionSignature([0; 16]);

    #[inline]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        PositionSignature(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Numeric projection used by interpolation search.
    #[inline]
    pub const fn to_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }

    /// The lowest 32 bits, used for hash-bucket routing.
    #[inline]
    pub const fn low32(&self) -> u32 {
        (self.to_u128() & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Debug for PositionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PositionSignature({:032x})", self.to_u128())
    }
}

impl Position {
    /// Packs this position into its canonical 24-byte form.
    pub fn compress(&self) -> CompressedPosition {
        let occupancy = self.occupied();
        let mut bytes = [0u8; 24];
        bytes[..8].copy_from_slice(&occupancy.0.to_be_bytes());

        let ep_subject = self.en_passant.map(|ep| {
            let rank = match ep.rank() {
                Rank::R3 => Rank::R4,
                _ => Rank::R5,
            };
            Square::new(ep.file(), rank)
        });

        for (i, sq) in occupancy.into_iter().enumerate() {
            let (piece, color) = self
                .piece_at(sq)
                .expect("occupancy and piece sets agree");

            let nibble = if piece == Piece::Pawn && ep_subject == Some(sq) {
                NIBBLE_EP_PAWN
            } else if piece == Piece::Rook && self.castle_rook_home(sq, color) {
                match color {
                    Color::White => NIBBLE_WHITE_CASTLE_ROOK,
                    Color::Black => NIBBLE_BLACK_CASTLE_ROOK,
                }
            } else if piece == Piece::King
                && color == Color::Black
                && self.side_to_move == Color::Black
            {
                NIBBLE_BLACK_KING_TO_MOVE
            } else {
                piece.colored_index(color)
            };

            bytes[8 + i / 2] |= nibble << ((i % 2) * 4);
        }

        CompressedPosition(bytes)
    }

    /// True if `sq` is a home corner of `color` whose castling right is live.
    fn castle_rook_home(&self, sq: Square, color: Color) -> bool {
        match (color, sq) {
            (Color::White, Square::A1) => self.castling.queenside(Color::White),
            (Color::White, Square::H1) => self.castling.kingside(Color::White),
            (Color::Black, Square::A8) => self.castling.queenside(Color::Black),
            (Color::Black, Square::H8) => self.castling.kingside(Color::Black),
            _ => false,
        }
    }

    /// Returns the 128-bit fingerprint of this position.
    ///
    /// The fingerprint distinguishes side to move, castling rights, and en
    /// passant availability.
    #[inline]
    pub fn signature(&self) -> PositionSignature {
        self.compress().signature()
    }
}

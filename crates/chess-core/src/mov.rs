//! Move representation.

use crate::{Piece, Square};
use std::fmt;

/// The kind of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MoveKind {
    /// Any move that is not one of the three special kinds, captures included.
    Normal = 0,
    /// Pawn promotion; the promoted piece rides in the move's promo bits.
    Promotion = 1,
    /// Castling, encoded as the king capturing its own rook.
    Castle = 2,
    /// En passant capture; the destination is the empty en passant square.
    EnPassant = 3,
}

impl MoveKind {
    #[inline]
    const fn from_bits(bits: u16) -> MoveKind {
        match bits & 0b11 {
            0 => MoveKind::Normal,
            1 => MoveKind::Promotion,
            2 => MoveKind::Castle,
            _ => MoveKind::EnPassant,
        }
    }
}

/// A chess move, packed into 16 bits.
///
/// Layout: `from:6 | to:6 | kind:2 | promo:2`, low bits first. This packing
/// is also the big-endian wire form of a level-0 BCGN movetext entry, so
/// serializing a move is [`Move::to_bits`] and nothing else.
///
/// Castling stores the rook's home square in `to` (king takes own rook);
/// the promo bits are zero unless `kind` is [`MoveKind::Promotion`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move(u16);

/// Promotion pieces in promo-bit order.
const PROMO_PIECES: [Piece; 4] = [Piece::Knight, Piece::Bishop, Piece::Rook, Piece::Queen];

impl Move {
    /// Creates a normal move.
    #[inline]
    pub const fn normal(from: Square, to: Square) -> Self {
        Self::pack(from, to, MoveKind::Normal, 0)
    }

    /// Creates a promotion move.
    #[inline]
    pub const fn promotion(from: Square, to: Square, piece: Piece) -> Self {
        let promo = match piece {
            Piece::Knight => 0,
            Piece::Bishop => 1,
            Piece::Rook => 2,
            _ => 3,
        };
        Self::pack(from, to, MoveKind::Promotion, promo)
    }

    /// Creates a castling move from the king's square to the rook's home square.
    #[inline]
    pub const fn castle(king: Square, rook: Square) -> Self {
        Self::pack(king, rook, MoveKind::Castle, 0)
    }

    /// Creates an en passant capture onto the (empty) en passant square.
    #[inline]
    pub const fn en_passant(from: Square, to: Square) -> Self {
        Self::pack(from, to, MoveKind::EnPassant, 0)
    }

    #[inline]
    const fn pack(from: Square, to: Square, kind: MoveKind, promo: u16) -> Self {
        Move(
            from.index() as u16
                | (to.index() as u16) << 6
                | (kind as u16) << 12
                | promo << 14,
        )
    }

    /// Returns the source square.
    #[inline]
    pub const fn from(self) -> Square {
        // SAFETY: masked to 6 bits, always a valid square index.
        unsafe { Square::from_index_unchecked((self.0 & 0x3F) as u8) }
    }

    /// Returns the destination square (the rook's home square for castling).
    #[inline]
    pub const fn to(self) -> Square {
        // SAFETY: masked to 6 bits, always a valid square index.
        unsafe { Square::from_index_unchecked((self.0 >> 6 & 0x3F) as u8) }
    }

    /// Returns the kind of this move.
    #[inline]
    pub const fn kind(self) -> MoveKind {
        MoveKind::from_bits(self.0 >> 12)
    }

    /// Returns the promoted piece for a promotion move.
    #[inline]
    pub const fn promotion_piece(self) -> Option<Piece> {
        match self.kind() {
            MoveKind::Promotion => Some(PROMO_PIECES[(self.0 >> 14) as usize]),
            _ => None,
        }
    }

    /// Returns the raw 16-bit packing (the level-0 BCGN wire value).
    #[inline]
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    /// Rebuilds a move from its raw packing.
    ///
    /// Promo bits on a non-promotion kind are cleared so that decoding is a
    /// left inverse of encoding for every move built by the constructors.
    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        match MoveKind::from_bits(bits >> 12) {
            MoveKind::Promotion => Move(bits),
            _ => Move(bits & 0x3FFF),
        }
    }

    /// Returns the UCI notation for this move (e.g., "e2e4", "e7e8q").
    ///
    /// Castling renders with the king's conventional destination (g- or
    /// c-file), not the internal rook square.
    pub fn to_uci(self) -> String {
        let from = self.from();
        let to = match self.kind() {
            MoveKind::Castle => {
                let file = if self.to().file() > from.file() {
                    crate::File::G
                } else {
                    crate::File::C
                };
                Square::new(file, from.rank())
            }
            _ => self.to(),
        };
        let promo = match self.promotion_piece() {
            Some(Piece::Knight) => "n",
            Some(Piece::Bishop) => "b",
            Some(Piece::Rook) => "r",
            Some(Piece::Queen) => "q",
            _ => "",
        };
        format!("{}{}{}", from, to, promo)
    }
}

impl fmt::Debug for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Move({})", self.to_uci())
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uci())
    }
}

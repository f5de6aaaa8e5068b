//! Bitboard-based chess position handling.
//!
//! This crate provides:
//! - [`Bitboard`] - 64-bit board representation with efficient set operations
//! - [`Position`] - full position state with in-place do/undo of moves
//! - Legal move generation backed by magic bitboard attack tables
//! - [`CompressedPosition`] - a canonical 24-byte position encoding
//! - [`PositionSignature`] - the 128-bit fingerprint keyed on by the
//!   position index
//!
//! The position fingerprint distinguishes side to move, castling rights,
//! and en passant availability, so two positions compare equal exactly
//! when they are interchangeable for game-tree purposes.

mod attacks;
mod bitboard;
mod compressed;
mod magics;
mod movegen;
mod position;

pub use attacks::{attacks, king_attacks, knight_attacks, pawn_attacks, pawn_attacks_bb};
pub use bitboard::Bitboard;
pub use compressed::{CompressedPosition, PositionSignature};
pub use magics::{bishop_attacks, queen_attacks, rook_attacks};
pub use movegen::{is_king_attacked, is_square_attacked, legal_moves, MoveList};
pub use position::{CastlingRights, Position, ReverseMove};

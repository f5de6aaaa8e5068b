//! Position-relative move indices for level-1 movetext.
//!
//! Every legal move is numbered by walking the mover's pieces in a fixed
//! order (pawns, knights, bishops, rooks, kings, queens; instances in
//! ascending square order) and, per piece, its destination enumeration:
//! the squares the piece could reach on an empty board, ascending by
//! square index. The enumeration is a function of (piece type, square,
//! color) only, so the encoder and a decoder replaying the same game
//! always agree on it.
//!
//! Two wrinkles make the whole space fit:
//! - every pawn destination spans four slots, one per promotion piece, so
//!   promotions need no extra bytes (the promo slot is 0 off the last rank)
//! - the king's enumeration from its home square includes both rook home
//!   squares, which is where castling (encoded king-takes-rook) lives
//!
//! The cumulative index tops out at 255 for any legal position unless the
//! mover has more than three queens; only then does the encoding widen to
//! two bytes.

use crate::BcgnError;
use chess_board::{king_attacks, knight_attacks, queen_attacks, rook_attacks, bishop_attacks,
    Bitboard, Position};
use chess_core::{Color, Move, MoveKind, Piece, Rank, Square};

/// Piece walk order for the cumulative index.
const PIECE_ORDER: [Piece; 6] = [
    Piece::Pawn,
    Piece::Knight,
    Piece::Bishop,
    Piece::Rook,
    Piece::King,
    Piece::Queen,
];

const PROMO_PIECES: [Piece; 4] = [Piece::Knight, Piece::Bishop, Piece::Rook, Piece::Queen];

/// Returns true when the 1-byte index space cannot cover the side to move.
///
/// With more than three queens the sum of destination slots can exceed
/// 255, so the encoder must widen to the 2-byte form.
#[inline]
pub fn requires_long_move_index(position: &Position) -> bool {
    position
        .pieces_of(Piece::Queen, position.side_to_move)
        .count()
        > 3
}

/// Empty-board destination enumeration for (piece type, square, color).
fn destinations(piece: Piece, from: Square, color: Color) -> Bitboard {
    match piece {
        Piece::Pawn => pawn_destinations(from, color),
        Piece::Knight => knight_attacks(from),
        Piece::Bishop => bishop_attacks(from, Bitboard::EMPTY),
        Piece::Rook => rook_attacks(from, Bitboard::EMPTY),
        Piece::Queen => queen_attacks(from, Bitboard::EMPTY),
        Piece::King => king_destinations(from, color),
    }
}

fn pawn_destinations(from: Square, color: Color) -> Bitboard {
    let bb = Bitboard::from_square(from);
    match color {
        Color::White => {
            let mut dests = bb.north() | bb.north_west() | bb.north_east();
            if from.rank() == Rank::R2 {
                dests |= bb.north().north();
            }
            dests
        }
        Color::Black => {
            let mut dests = bb.south() | bb.south_west() | bb.south_east();
            if from.rank() == Rank::R7 {
                dests |= bb.south().south();
            }
            dests
        }
    }
}

fn king_destinations(from: Square, color: Color) -> Bitboard {
    let mut dests = king_attacks(from);
    let home = match color {
        Color::White => Square::E1,
        Color::Black => Square::E8,
    };
    if from == home {
        // Castle targets: the rook home squares on the king's rank.
        dests.set(Square::new(chess_core::File::A, from.rank()));
        dests.set(Square::new(chess_core::File::H, from.rank()));
    }
    dests
}

/// Number of index slots a piece on a square occupies.
fn slot_count(piece: Piece, from: Square, color: Color) -> u16 {
    let dests = destinations(piece, from, color).count() as u16;
    match piece {
        Piece::Pawn => dests * 4,
        _ => dests,
    }
}

/// Position of `to` within the destination enumeration.
#[inline]
fn destination_rank(dests: Bitboard, to: Square) -> u16 {
    let below = Bitboard::new((1u64 << to.index()) - 1);
    (dests & below).count() as u16
}

/// Encodes a legal move as its cumulative index for this position.
pub fn move_to_index(position: &Position, m: Move) -> u16 {
    let us = position.side_to_move;
    let moving_piece = match m.kind() {
        MoveKind::Castle => Piece::King,
        MoveKind::EnPassant | MoveKind::Promotion => Piece::Pawn,
        MoveKind::Normal => {
            position
                .piece_at(m.from())
                .expect("move source square is occupied")
                .0
        }
    };

    let mut offset = 0u16;
    for piece in PIECE_ORDER {
        for sq in position.pieces_of(piece, us) {
            if piece == moving_piece && sq == m.from() {
                let dests = destinations(piece, sq, us);
                let dest_rank = destination_rank(dests, m.to());
                return match piece {
                    Piece::Pawn => {
                        let promo = match m.promotion_piece() {
                            Some(Piece::Bishop) => 1,
                            Some(Piece::Rook) => 2,
                            Some(Piece::Queen) => 3,
                            _ => 0,
                        };
                        offset + dest_rank * 4 + promo
                    }
                    _ => offset + dest_rank,
                };
            }
            offset += slot_count(piece, sq, us);
        }
    }

    unreachable!("moving piece not found on the board")
}

/// Decodes a cumulative index back into the move it encodes.
///
/// Exact inverse of [`move_to_index`] for every legal move of `position`.
pub fn index_to_move(position: &Position, index: u16) -> Result<Move, BcgnError> {
    let us = position.side_to_move;
    let mut remaining = index;

    for piece in PIECE_ORDER {
        for from in position.pieces_of(piece, us) {
            let count = slot_count(piece, from, us);
            if remaining >= count {
                remaining -= count;
                continue;
            }

            let dests = destinations(piece, from, us);
            return match piece {
                Piece::Pawn => {
                    let to = nth_square(dests, remaining / 4)?;
                    let promo = (remaining % 4) as usize;
                    let promo_rank = match us {
                        Color::White => Rank::R8,
                        Color::Black => Rank::R1,
                    };
                    if to.rank() == promo_rank {
                        Ok(Move::promotion(from, to, PROMO_PIECES[promo]))
                    } else if position.en_passant == Some(to) && to.file() != from.file() {
                        Ok(Move::en_passant(from, to))
                    } else {
                        Ok(Move::normal(from, to))
                    }
                }
                Piece::King => {
                    let to = nth_square(dests, remaining)?;
                    if king_attacks(from).contains(to) {
                        Ok(Move::normal(from, to))
                    } else {
                        Ok(Move::castle(from, to))
                    }
                }
                _ => Ok(Move::normal(from, nth_square(dests, remaining)?)),
            };
        }
    }

    Err(BcgnError::BadMoveIndex(index))
}

fn nth_square(dests: Bitboard, n: u16) -> Result<Square, BcgnError> {
    dests
        .into_iter()
        .nth(n as usize)
        .ok_or(BcgnError::BadMoveIndex(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_board::legal_moves;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_all_moves_roundtrip(position: &Position) {
        for m in &legal_moves(position) {
            let index = move_to_index(position, *m);
            let decoded = index_to_move(position, index).unwrap();
            assert_eq!(decoded, *m, "index {index} in {}", position.to_fen());
        }
    }

    #[test]
    fn startpos_moves_roundtrip() {
        assert_all_moves_roundtrip(&Position::startpos());
    }

    #[test]
    fn castling_and_promotion_roundtrip() {
        let fens = [
            "r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1",
            "r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R b KQkq - 0 1",
            "1n6/P7/8/8/8/8/6p1/K5Rk b - - 0 1",
            "rnbqkbnr/pppp1ppp/8/4pP2/8/8/PPPPP1PP/RNBQKBNR w KQkq e6 0 3",
        ];
        for fen in fens {
            assert_all_moves_roundtrip(&Position::from_fen(fen).unwrap());
        }
    }

    #[test]
    fn startpos_fits_one_byte() {
        let position = Position::startpos();
        assert!(!requires_long_move_index(&position));
        for m in &legal_moves(&position) {
            assert!(move_to_index(&position, *m) <= u8::MAX as u16);
        }
    }

    #[test]
    fn many_queens_require_long_index() {
        // Five queens after promotions.
        let position =
            Position::from_fen("4k3/8/8/8/8/8/QQ6/QQQ1K3 w - - 0 1").unwrap();
        assert!(requires_long_move_index(&position));
        assert_all_moves_roundtrip(&position);
    }

    #[test]
    fn three_queens_still_fit_one_byte() {
        let position =
            Position::from_fen("rnb1kbnr/pppppppp/8/4Q3/4Q3/4Q3/PPPP1PPP/RNB1KBNR w KQkq - 0 1")
                .unwrap();
        assert!(!requires_long_move_index(&position));
        for m in &legal_moves(&position) {
            assert!(move_to_index(&position, *m) <= u8::MAX as u16);
        }
    }

    #[test]
    fn bad_index_is_rejected() {
        let position = Position::startpos();
        assert!(index_to_move(&position, u16::MAX).is_err());
    }

    // Fuzz the invariant over random playouts: every legal move of every
    // reached position must survive an encode/decode round-trip, and the
    // short form must suffice whenever the queen count allows it.
    #[test]
    fn random_playout_indices_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0xbc61);
        for game in 0..20 {
            let mut position = Position::startpos();
            for _ in 0..120 {
                let moves = legal_moves(&position);
                if moves.is_empty() {
                    break;
                }
                for m in &moves {
                    let index = move_to_index(&position, *m);
                    assert_eq!(index_to_move(&position, index).unwrap(), *m);
                    if !requires_long_move_index(&position) {
                        assert!(
                            index <= u8::MAX as u16,
                            "short index overflow in game {game}: {}",
                            position.to_fen()
                        );
                    }
                }
                position.do_move(moves[rng.random_range(0..moves.len())]);
            }
        }
    }
}

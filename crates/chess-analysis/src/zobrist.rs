//! Zobrist hashing for position identification.
//!
//! A position's key XORs one random number per occupied (piece, square)
//! pair, plus keys for the side to move, each castling right and the
//! en-passant file. Keys come from a fixed-seed xorshift generator, so
//! hashes are stable across runs.

use crate::board::Board;
use shakmaty::{CastlingSide, Color, EnPassantMode, Piece, Position, Square};

const PIECE_KEYS: usize = 12 * 64;
const BLACK_TO_MOVE: usize = PIECE_KEYS;
const CASTLING: usize = BLACK_TO_MOVE + 1;
const EN_PASSANT: usize = CASTLING + 4;
const KEY_COUNT: usize = EN_PASSANT + 8;

/// Zobrist hash keys.
pub struct ZobristKeys {
    keys: [u64; KEY_COUNT],
}

impl ZobristKeys {
    pub const fn new() -> Self {
        // xorshift64
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        let mut keys = [0u64; KEY_COUNT];
        let mut i = 0;
        while i < KEY_COUNT {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            keys[i] = state;
            i += 1;
        }
        Self { keys }
    }

    fn piece(&self, piece: Piece, square: Square) -> u64 {
        let role = piece.role as usize - 1;
        let color = match piece.color {
            Color::White => 0,
            Color::Black => 1,
        };
        self.keys[(role * 2 + color) * 64 + square as usize]
    }

    fn castling(&self, color: Color, side: CastlingSide) -> u64 {
        let index = match (color, side) {
            (Color::White, CastlingSide::KingSide) => 0,
            (Color::White, CastlingSide::QueenSide) => 1,
            (Color::Black, CastlingSide::KingSide) => 2,
            (Color::Black, CastlingSide::QueenSide) => 3,
        };
        self.keys[CASTLING + index]
    }

    /// Hash of `board`, computed from scratch.
    pub fn hash(&self, board: &Board) -> u64 {
        let placement = board.board();
        let mut hash = 0u64;

        for square in placement.occupied() {
            if let Some(piece) = placement.piece_at(square) {
                hash ^= self.piece(piece, square);
            }
        }

        if board.turn() == Color::Black {
            hash ^= self.keys[BLACK_TO_MOVE];
        }

        let castles = board.castles();
        for color in [Color::White, Color::Black] {
            for side in [CastlingSide::KingSide, CastlingSide::QueenSide] {
                if castles.has(color, side) {
                    hash ^= self.castling(color, side);
                }
            }
        }

        if let Some(ep) = board.ep_square(EnPassantMode::Legal) {
            hash ^= self.keys[EN_PASSANT + ep.file() as usize];
        }

        hash
    }
}

impl Default for ZobristKeys {
    fn default() -> Self {
        Self::new()
    }
}

/// Global Zobrist keys instance.
pub static ZOBRIST: ZobristKeys = ZobristKeys::new();

/// Hash of `board` using the global keys.
pub fn position_hash(board: &Board) -> u64 {
    ZOBRIST.hash(board)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{apply_move, parse_fen, parse_uci_move, starting_position};
    use std::collections::HashSet;

    fn play(moves: &[&str]) -> Board {
        let mut board = starting_position();
        for token in moves {
            let mv = parse_uci_move(token, &board).unwrap();
            apply_move(&mut board, mv).unwrap();
        }
        board
    }

    #[test]
    fn test_keys_are_distinct() {
        let keys = ZobristKeys::new();
        let unique: HashSet<u64> = keys.keys.iter().copied().collect();
        assert_eq!(unique.len(), KEY_COUNT);
        assert!(!unique.contains(&0));
    }

    #[test]
    fn test_transpositions_hash_equal() {
        let a = play(&["g1f3", "g8f6", "b1c3"]);
        let b = play(&["b1c3", "g8f6", "g1f3"]);
        assert_eq!(position_hash(&a), position_hash(&b));
    }

    #[test]
    fn test_side_to_move_changes_hash() {
        let white = parse_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let black = parse_fen("4k3/8/8/8/8/8/8/4K3 b - - 0 1").unwrap();
        assert_ne!(position_hash(&white), position_hash(&black));
    }

    #[test]
    fn test_castling_rights_change_hash() {
        let with = parse_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let without = parse_fen("r3k2r/8/8/8/8/8/8/R3K2R w Kkq - 0 1").unwrap();
        assert_ne!(position_hash(&with), position_hash(&without));
    }

    #[test]
    fn test_legal_en_passant_changes_hash() {
        let with = parse_fen("4k3/8/8/3Pp3/8/8/8/4K3 w - e6 0 1").unwrap();
        let without = parse_fen("4k3/8/8/3Pp3/8/8/8/4K3 w - - 0 1").unwrap();
        assert_ne!(position_hash(&with), position_hash(&without));
    }
}

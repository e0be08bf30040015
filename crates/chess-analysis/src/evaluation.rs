//! Static evaluation and capture ordering.

use crate::board::Board;
use shakmaty::{Color, Position, Role};

const PAWN_VALUE: i32 = 100;
const KNIGHT_VALUE: i32 = 320;
const BISHOP_VALUE: i32 = 330;
const ROOK_VALUE: i32 = 500;
const QUEEN_VALUE: i32 = 900;
const KING_VALUE: i32 = 10_000;

pub fn piece_value(role: Role) -> i32 {
    match role {
        Role::Pawn => PAWN_VALUE,
        Role::Knight => KNIGHT_VALUE,
        Role::Bishop => BISHOP_VALUE,
        Role::Rook => ROOK_VALUE,
        Role::Queen => QUEEN_VALUE,
        Role::King => KING_VALUE,
    }
}

/// Material balance from the side to move's perspective.
///
/// Kings are always present on both sides and cancel out.
pub fn evaluate(board: &Board) -> i32 {
    let placement = board.board();
    let mut score = 0;
    for square in placement.occupied() {
        if let Some(piece) = placement.piece_at(square) {
            if piece.role == Role::King {
                continue;
            }
            let value = piece_value(piece.role);
            score += if piece.color == Color::White { value } else { -value };
        }
    }
    if board.turn() == Color::White {
        score
    } else {
        -score
    }
}

/// MVV-LVA ordering key: most valuable victim first, then least valuable
/// attacker. Quiet moves score 0.
pub fn capture_order(m: &shakmaty::Move) -> i32 {
    match m.capture() {
        Some(victim) => piece_value(victim) * 1000 - piece_value(m.role()),
        None => 0,
    }
}

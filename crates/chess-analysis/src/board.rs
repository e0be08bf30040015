//! Rule-engine seam.
//!
//! Everything the engines need to know about chess rules goes through these
//! functions: legal move generation, applying moves, game status and FEN.

use crate::{EngineError, Move};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position, Role, Square};

/// Position type analysed by the engines. Cloning is cheap.
pub type Board = Chess;

/// Status of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Normal,
    Check,
    Checkmate,
    Stalemate,
}

pub fn starting_position() -> Board {
    Chess::default()
}

pub fn generate_legal_moves(board: &Board) -> Vec<Move> {
    let turn = board.turn();
    board
        .legal_moves()
        .iter()
        .filter_map(|m| Move::from_chess(m, turn))
        .collect()
}

/// Resolve `mv` to the matching legal rule-engine move, if any.
pub fn find_legal(board: &Board, mv: Move) -> Option<shakmaty::Move> {
    let turn = board.turn();
    board
        .legal_moves()
        .into_iter()
        .find(|m| Move::from_chess(m, turn) == Some(mv))
}

pub fn apply_move(board: &mut Board, mv: Move) -> Result<(), EngineError> {
    let legal = find_legal(board, mv).ok_or_else(|| EngineError::IllegalMove(mv.to_uci()))?;
    board.play_unchecked(&legal);
    Ok(())
}

pub fn game_status(board: &Board) -> GameStatus {
    let stuck = board.legal_moves().is_empty();
    match (stuck, board.is_check()) {
        (true, true) => GameStatus::Checkmate,
        (true, false) => GameStatus::Stalemate,
        (false, true) => GameStatus::Check,
        (false, false) => GameStatus::Normal,
    }
}

pub fn parse_fen(fen: &str) -> Result<Board, EngineError> {
    let fen = fen.trim();
    let parsed = fen
        .parse::<Fen>()
        .map_err(|e| EngineError::InvalidFen(format!("{}: {}", fen, e)))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| EngineError::InvalidFen(format!("{}: {}", fen, e)))
}

pub fn to_fen(board: &Board) -> String {
    Fen(board.clone().into_setup(EnPassantMode::Legal)).to_string()
}

/// Decode a UCI move token (`e2e4`, `e7e8q`) against `board`.
///
/// The moving piece is read from the source square. A promotion suffix
/// takes the colour of that piece, or white when the square is empty.
/// The result is not checked for legality.
pub fn parse_uci_move(token: &str, board: &Board) -> Option<Move> {
    let token = token.trim();
    if !(4..=5).contains(&token.len()) || !token.is_ascii() {
        return None;
    }
    let from: Square = token[0..2].parse().ok()?;
    let to: Square = token[2..4].parse().ok()?;
    let source = board.board().piece_at(from);

    let promoted = token
        .chars()
        .nth(4)
        .and_then(|c| Role::from_char(c.to_ascii_lowercase()))
        .filter(|role| !matches!(role, Role::Pawn | Role::King));

    match promoted {
        Some(role) => {
            let color = source.map_or(Color::White, |p| p.color);
            Some(Move::promoting(from, to, role.of(color)))
        }
        None => source.map(|piece| Move::new(from, to, piece)),
    }
}

//! Move representation shared by both engines.

use shakmaty::{Color, File, Piece, Role, Square};
use std::fmt;

/// A move as reported by an analysis engine.
///
/// `piece` is the piece standing on `to` after the move: the moving piece,
/// or the promoted piece for promotions (`promotion` is then set). Castling
/// is described by the king's path (`e1g1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub piece: Piece,
    pub promotion: bool,
}

impl Move {
    /// Creates a non-promoting move.
    pub const fn new(from: Square, to: Square, piece: Piece) -> Self {
        Move {
            from,
            to,
            piece,
            promotion: false,
        }
    }

    /// Creates a promotion to `piece`.
    pub const fn promoting(from: Square, to: Square, piece: Piece) -> Self {
        Move {
            from,
            to,
            piece,
            promotion: true,
        }
    }

    /// Converts a rule-engine move played by `turn`.
    ///
    /// Returns `None` for drops, which standard chess never generates.
    pub fn from_chess(m: &shakmaty::Move, turn: Color) -> Option<Self> {
        match *m {
            shakmaty::Move::Normal {
                role,
                from,
                to,
                promotion,
                ..
            } => Some(match promotion {
                Some(promoted) => Move::promoting(from, to, promoted.of(turn)),
                None => Move::new(from, to, role.of(turn)),
            }),
            shakmaty::Move::EnPassant { from, to } => Some(Move::new(from, to, Role::Pawn.of(turn))),
            shakmaty::Move::Castle { king, rook } => {
                let file = if rook.file() > king.file() {
                    File::G
                } else {
                    File::C
                };
                let to = Square::from_coords(file, king.rank());
                Some(Move::new(king, to, Role::King.of(turn)))
            }
            shakmaty::Move::Put { .. } => None,
        }
    }

    /// Returns the UCI notation of the move (`e2e4`, `e7e8q`).
    pub fn to_uci(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if self.promotion {
            write!(f, "{}", self.piece.role.char())?;
        }
        Ok(())
    }
}
